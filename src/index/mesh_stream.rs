use std::io::{Read, Write};

use crate::error::{QuadError, QuadResult};
use crate::index::wire;
use crate::mesh::Mesh;

/// Fixed-point factor applied to vertex longitude/latitude.
const COORDINATE_SCALE: f64 = 1E7;

/// Binary codec for mesh records.
///
/// The name is a NUL-terminated string. Each buffer is a `u32` element
/// count followed by raw little-endian values, except vertices: their
/// triples are packed as `(lon: i32 ×1e7, lat: i32 ×1e7, elev: f32)`,
/// deliberately trading sub-1e-7 coordinate precision and full-width
/// elevation for a compact cache file.
pub struct MeshStream;

impl MeshStream {
    pub fn write<W: Write>(writer: &mut W, mesh: &Mesh) -> QuadResult<()> {
        writer.write_all(mesh.name.as_bytes())?;
        writer.write_all(&[0])?;

        // Only whole triples are representable; a trailing partial triple
        // is not written.
        let count = into_u32(mesh.vertices.len() / 3 * 3, "vertex count")?;
        writer.write_all(&count.to_le_bytes())?;
        for triple in mesh.vertices.chunks_exact(3) {
            let lon = (triple[0] * COORDINATE_SCALE).round() as i32;
            let lat = (triple[1] * COORDINATE_SCALE).round() as i32;
            writer.write_all(&lon.to_le_bytes())?;
            writer.write_all(&lat.to_le_bytes())?;
            writer.write_all(&(triple[2] as f32).to_le_bytes())?;
        }

        Self::write_i32_buffer(writer, &mesh.triangles, "triangle count")?;
        Self::write_i32_buffer(writer, &mesh.colors, "color count")?;

        let count = into_u32(mesh.uvs.len(), "uv count")?;
        writer.write_all(&count.to_le_bytes())?;
        for &uv in &mesh.uvs {
            writer.write_all(&uv.to_le_bytes())?;
        }

        Self::write_i32_buffer(writer, &mesh.uv_map, "uv map count")?;
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> QuadResult<Mesh> {
        let mut name = Vec::new();
        loop {
            let byte = wire::read_u8(reader)?;
            if byte == 0 {
                break;
            }
            name.push(byte);
        }
        let name = String::from_utf8(name).map_err(|e| {
            QuadError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;

        let count = wire::read_u32(reader)? as usize;
        let mut vertices = Vec::with_capacity(count);
        for _ in 0..count / 3 {
            let lon = f64::from(wire::read_i32(reader)?) / COORDINATE_SCALE;
            let lat = f64::from(wire::read_i32(reader)?) / COORDINATE_SCALE;
            let elevation = f64::from(wire::read_f32(reader)?);
            vertices.extend([lon, lat, elevation]);
        }

        let triangles = Self::read_i32_buffer(reader)?;
        let colors = Self::read_i32_buffer(reader)?;

        let count = wire::read_u32(reader)? as usize;
        let mut uvs = Vec::with_capacity(count);
        for _ in 0..count {
            uvs.push(wire::read_f64(reader)?);
        }

        let uv_map = Self::read_i32_buffer(reader)?;
        Ok(Mesh {
            name,
            vertices,
            triangles,
            colors,
            uvs,
            uv_map,
        })
    }

    fn write_i32_buffer<W: Write>(
        writer: &mut W,
        buffer: &[i32],
        what: &'static str,
    ) -> QuadResult<()> {
        let count = into_u32(buffer.len(), what)?;
        writer.write_all(&count.to_le_bytes())?;
        for &value in buffer {
            writer.write_all(&value.to_le_bytes())?;
        }
        Ok(())
    }

    fn read_i32_buffer<R: Read>(reader: &mut R) -> QuadResult<Vec<i32>> {
        let count = wire::read_u32(reader)? as usize;
        let mut buffer = Vec::with_capacity(count);
        for _ in 0..count {
            buffer.push(wire::read_i32(reader)?);
        }
        Ok(buffer)
    }
}

fn into_u32(value: usize, what: &'static str) -> QuadResult<u32> {
    u32::try_from(value).map_err(|_| QuadError::RecordOverflow(what))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::MeshStream;
    use crate::mesh::Mesh;

    #[test]
    fn round_trip_preserves_buffers() {
        let mesh = Mesh {
            name: "building".to_string(),
            vertices: vec![13.3771, 52.5166, 35.5, -0.0000001, 85.0511287, -12.25],
            triangles: vec![0, 1, 2, 2, 1, 0],
            colors: vec![0x00FF_0000_u32 as i32, 0x0000_FF00],
            uvs: vec![0.0, 1.0, 0.25, 0.75],
            uv_map: vec![0, 4],
        };

        let mut buffer = Vec::new();
        MeshStream::write(&mut buffer, &mesh).unwrap();
        let restored = MeshStream::read(&mut Cursor::new(buffer)).unwrap();

        assert_eq!(restored.name, mesh.name);
        assert_eq!(restored.triangles, mesh.triangles);
        assert_eq!(restored.colors, mesh.colors);
        assert_eq!(restored.uvs, mesh.uvs);
        assert_eq!(restored.uv_map, mesh.uv_map);
        assert_eq!(restored.vertices.len(), mesh.vertices.len());
        for (restored_triple, triple) in restored
            .vertices
            .chunks_exact(3)
            .zip(mesh.vertices.chunks_exact(3))
        {
            assert!((restored_triple[0] - triple[0]).abs() <= 1e-7);
            assert!((restored_triple[1] - triple[1]).abs() <= 1e-7);
            assert!((restored_triple[2] - triple[2]).abs() <= f64::from(f32::EPSILON) * triple[2].abs().max(1.0));
        }
    }

    #[test]
    fn empty_mesh_round_trip() {
        let mesh = Mesh::new("empty");
        let mut buffer = Vec::new();
        MeshStream::write(&mut buffer, &mesh).unwrap();
        let restored = MeshStream::read(&mut Cursor::new(buffer)).unwrap();

        assert_eq!(restored.name, "empty");
        assert!(restored.is_empty());
        assert!(restored.triangles.is_empty());
    }
}
