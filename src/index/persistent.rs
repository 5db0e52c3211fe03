use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Buf;

use crate::cancel::CancellationToken;
use crate::element::{Element, ElementVisitor};
use crate::error::{QuadError, QuadResult};
use crate::geo::{BoundingBox, LodRange};
use crate::index::bitmap::{BitmapIndex, TermBitmap, TextQuery};
use crate::index::bitmap_stream::BitmapStream;
use crate::index::element_stream::ElementStream;
use crate::index::store::ElementStore;
use crate::lru::LruCache;
use crate::quadkey::{self, QuadKey};
use crate::string_table::StringTable;

const DATA_EXTENSION: &str = "dat";
const INDEX_EXTENSION: &str = "idf";
const BITMAP_EXTENSION: &str = "bmp";

/// One `.idf` record: `u64` element id plus `u32` offset into `.dat`.
const INDEX_RECORD_SIZE: u64 = 12;

/// Open tile file handles kept alive at a time.
const HANDLE_CACHE_CAPACITY: usize = 12;

/// Open file streams of one tile plus its lazily parsed term bitmap.
struct QuadKeyData {
    data_file: File,
    index_file: File,
    bitmap_path: PathBuf,
    bitmap: Option<TermBitmap>,
}

impl QuadKeyData {
    fn open(data_path: &Path, index_path: &Path, bitmap_path: PathBuf) -> QuadResult<Self> {
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);
        Ok(Self {
            data_file: options.open(data_path)?,
            index_file: options.open(index_path)?,
            bitmap_path,
            bitmap: None,
        })
    }

    /// Parses the `.bmp` file on first use; a missing file is an empty
    /// bitmap (the tile has no elements yet).
    fn bitmap_mut(&mut self) -> QuadResult<&mut TermBitmap> {
        if self.bitmap.is_none() {
            let bitmap = match File::open(&self.bitmap_path) {
                Ok(file) => BitmapStream::read(&mut BufReader::new(file))?,
                Err(ref error) if error.kind() == std::io::ErrorKind::NotFound => {
                    TermBitmap::new()
                }
                Err(error) => return Err(QuadError::Io(error)),
            };
            self.bitmap = Some(bitmap);
        }
        self.bitmap
            .as_mut()
            .ok_or_else(|| QuadError::Io(std::io::Error::other("bitmap vanished")))
    }

    /// Atomically replaces the `.bmp` content with the in-memory bitmap.
    fn rewrite_bitmap(&mut self) -> QuadResult<()> {
        let mut writer = BufWriter::new(File::create(&self.bitmap_path)?);
        let bitmap = self.bitmap_mut()?;
        BitmapStream::write(&mut writer, bitmap)?;
        writer.flush()?;
        Ok(())
    }
}

/// Stores elements in per-tile `data/<lod>/<quad key>.{dat,idf,bmp}` file
/// triples under the store's data path. Open handles are kept in a small
/// LRU; eviction closes the files.
pub struct PersistentElementStore {
    data_path: PathBuf,
    index: BitmapIndex,
    handles: Mutex<LruCache<QuadKey, Arc<Mutex<QuadKeyData>>>>,
}

impl PersistentElementStore {
    #[must_use]
    pub fn new(data_path: impl Into<PathBuf>, string_table: Arc<StringTable>) -> Self {
        Self {
            data_path: data_path.into(),
            index: BitmapIndex::new(string_table),
            handles: Mutex::new(LruCache::new(HANDLE_CACHE_CAPACITY)),
        }
    }

    fn file_path(&self, quad_key: QuadKey, extension: &str) -> PathBuf {
        self.data_path
            .join("data")
            .join(quad_key.lod.to_string())
            .join(format!("{}.{extension}", quad_key.to_base4()))
    }

    /// The tile's open handles, opening and caching them on first use.
    fn quad_data(&self, quad_key: QuadKey) -> QuadResult<Arc<Mutex<QuadKeyData>>> {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        if handles.exists(&quad_key) {
            return Ok(handles.get(&quad_key)?.clone());
        }

        let data_path = self.file_path(quad_key, DATA_EXTENSION);
        if let Some(parent) = data_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = Arc::new(Mutex::new(QuadKeyData::open(
            &data_path,
            &self.file_path(quad_key, INDEX_EXTENSION),
            self.file_path(quad_key, BITMAP_EXTENSION),
        )?));
        handles.put(quad_key, data.clone());
        Ok(data)
    }

    /// Materializes the element stored at `order` of the tile.
    fn element_at(
        data: &mut QuadKeyData,
        quad_key: QuadKey,
        order: u32,
    ) -> QuadResult<Element> {
        data.index_file
            .seek(SeekFrom::Start(u64::from(order) * INDEX_RECORD_SIZE))?;
        let mut record = [0_u8; INDEX_RECORD_SIZE as usize];
        data.index_file
            .read_exact(&mut record)
            .map_err(|_| QuadError::MissingOrder { quad_key, order })?;
        let mut record = record.as_slice();
        let _id = record.get_u64_le();
        let offset = record.get_u32_le();

        data.data_file.seek(SeekFrom::Start(u64::from(offset)))?;
        ElementStream::read(&mut BufReader::new(&data.data_file))
    }
}

impl ElementStore for PersistentElementStore {
    fn save(&self, element: &Element, quad_key: QuadKey) -> QuadResult<()> {
        let handle = self.quad_data(quad_key)?;
        let mut data = handle.lock().unwrap_or_else(PoisonError::into_inner);

        let offset = data.data_file.seek(SeekFrom::End(0))?;
        let offset =
            u32::try_from(offset).map_err(|_| QuadError::RecordOverflow("data offset"))?;
        let order = data.index_file.seek(SeekFrom::End(0))? / INDEX_RECORD_SIZE;
        let order =
            u32::try_from(order).map_err(|_| QuadError::RecordOverflow("element order"))?;

        data.index_file.write_all(&element.id().to_le_bytes())?;
        data.index_file.write_all(&offset.to_le_bytes())?;

        {
            let mut writer = BufWriter::new(&data.data_file);
            ElementStream::write(&mut writer, element)?;
            writer.flush()?;
        }

        self.index.add(element, data.bitmap_mut()?, order)?;
        data.rewrite_bitmap()
    }

    fn search_text(
        &self,
        query: &TextQuery,
        visitor: &mut dyn ElementVisitor,
        cancel_token: &CancellationToken,
    ) -> QuadResult<()> {
        self.index.search(query, |quad_key, tokenized| {
            if cancel_token.is_cancelled() || !self.has_data(quad_key) {
                return Ok(());
            }
            let handle = self.quad_data(quad_key)?;
            let mut data = handle.lock().unwrap_or_else(PoisonError::into_inner);
            let matches = BitmapIndex::evaluate(data.bitmap_mut()?, tokenized);
            for order in matches {
                if cancel_token.is_cancelled() {
                    break;
                }
                let element = Self::element_at(&mut data, quad_key, order)?;
                element.accept(visitor);
            }
            Ok(())
        })
    }

    fn search_tile(
        &self,
        quad_key: QuadKey,
        visitor: &mut dyn ElementVisitor,
        cancel_token: &CancellationToken,
    ) -> QuadResult<()> {
        if !self.has_data(quad_key) {
            return Ok(());
        }
        let handle = self.quad_data(quad_key)?;
        let mut data = handle.lock().unwrap_or_else(PoisonError::into_inner);

        data.index_file.seek(SeekFrom::Start(0))?;
        let mut entries = Vec::new();
        data.index_file.read_to_end(&mut entries)?;
        let mut entries = entries.as_slice();

        while entries.remaining() >= INDEX_RECORD_SIZE as usize {
            if cancel_token.is_cancelled() {
                break;
            }
            let _id = entries.get_u64_le();
            let offset = entries.get_u32_le();
            data.data_file.seek(SeekFrom::Start(u64::from(offset)))?;
            let element = ElementStream::read(&mut BufReader::new(&data.data_file))?;
            element.accept(visitor);
        }
        Ok(())
    }

    fn has_data(&self, quad_key: QuadKey) -> bool {
        std::fs::metadata(self.file_path(quad_key, DATA_EXTENSION))
            .map(|metadata| metadata.len() > 0)
            .unwrap_or(false)
    }

    fn erase_tile(&self, quad_key: QuadKey) -> QuadResult<()> {
        // Drop the cached handle first so the files are closed.
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&quad_key);

        for extension in [DATA_EXTENSION, INDEX_EXTENSION, BITMAP_EXTENSION] {
            match std::fs::remove_file(self.file_path(quad_key, extension)) {
                Ok(()) => {}
                Err(ref error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => return Err(QuadError::Io(error)),
            }
        }
        Ok(())
    }

    fn erase_area(&self, bbox: &BoundingBox, range: LodRange) -> QuadResult<()> {
        for lod in range.levels() {
            quadkey::for_each_in_bbox(bbox, lod, |quad_key| {
                if self.has_data(quad_key) {
                    self.erase_tile(quad_key)?;
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    fn flush(&self) -> QuadResult<()> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}
