use std::io::{Read, Write};

use roaring::RoaringBitmap;

use crate::error::{QuadError, QuadResult};
use crate::index::bitmap::TermBitmap;
use crate::index::wire;

/// Codec for a tile's term bitmap file: repeated `u32` term id followed
/// by one portable roaring bitmap, until end of file.
pub struct BitmapStream;

impl BitmapStream {
    /// Writes every `(term, bitset)` pair. Terms are emitted in ascending
    /// order so the file content is deterministic for identical bitmaps.
    pub fn write<W: Write>(writer: &mut W, bitmap: &TermBitmap) -> QuadResult<()> {
        let mut terms: Vec<u32> = bitmap.keys().copied().collect();
        terms.sort_unstable();
        for term in terms {
            writer.write_all(&term.to_le_bytes())?;
            if let Some(bits) = bitmap.get(&term) {
                bits.serialize_into(&mut *writer)?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Reads pairs until end of file.
    pub fn read<R: Read>(reader: &mut R) -> QuadResult<TermBitmap> {
        let mut bitmap = TermBitmap::new();
        loop {
            let term = match wire::read_u32(reader) {
                Ok(term) => term,
                Err(ref error) if wire::is_eof(error) => break,
                Err(error) => return Err(QuadError::Io(error)),
            };
            let bits = RoaringBitmap::deserialize_from(&mut *reader)?;
            bitmap.insert(term, bits);
        }
        Ok(bitmap)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use roaring::RoaringBitmap;

    use super::BitmapStream;
    use crate::index::bitmap::TermBitmap;

    #[test]
    fn empty_bitmap_round_trip() {
        let mut buffer = Vec::new();
        BitmapStream::write(&mut buffer, &TermBitmap::new()).unwrap();
        assert!(buffer.is_empty());

        let bitmap = BitmapStream::read(&mut Cursor::new(buffer)).unwrap();
        assert!(bitmap.is_empty());
    }

    #[test]
    fn keys_and_bit_lists_round_trip() {
        let mut bitmap = TermBitmap::new();
        bitmap.insert(3, RoaringBitmap::from_iter([0_u32, 2, 7]));
        bitmap.insert(11, RoaringBitmap::from_iter([1_u32]));
        bitmap.insert(5, RoaringBitmap::from_iter([0_u32, 100_000]));

        let mut buffer = Vec::new();
        BitmapStream::write(&mut buffer, &bitmap).unwrap();
        let restored = BitmapStream::read(&mut Cursor::new(buffer)).unwrap();

        assert_eq!(restored.len(), 3);
        for (term, bits) in &bitmap {
            let restored_bits: Vec<u32> = restored[term].iter().collect();
            let original_bits: Vec<u32> = bits.iter().collect();
            assert_eq!(restored_bits, original_bits, "term {term}");
        }
    }
}
