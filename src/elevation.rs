use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use crate::geo::GeoCoordinate;
use crate::quadkey::QuadKey;

/// Yields a height for a (tile, coordinate) pair.
pub trait ElevationProvider: Send + Sync {
    fn elevation(&self, quad_key: QuadKey, coordinate: GeoCoordinate) -> f64;
}

/// Selects one of the built-in elevation providers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElevationKind {
    Flat,
    Grid,
    Srtm,
}

impl From<i32> for ElevationKind {
    /// Unknown selectors map to `Flat`.
    fn from(value: i32) -> Self {
        match value {
            1 => ElevationKind::Grid,
            2 => ElevationKind::Srtm,
            _ => ElevationKind::Flat,
        }
    }
}

/// Sea-level provider: every coordinate has height zero.
#[derive(Debug, Default)]
pub struct FlatElevationProvider;

impl ElevationProvider for FlatElevationProvider {
    fn elevation(&self, _quad_key: QuadKey, _coordinate: GeoCoordinate) -> f64 {
        0.0
    }
}

/// Regular DEM lookup from per-tile grid files.
///
/// A grid file is `<root>/elevation/<lod>/<quad key>.ele`: whitespace
/// separated heights forming a square grid laid row-major from the
/// north-west corner of the tile. Heights are interpolated bilinearly;
/// a tile without a grid file is flat.
pub struct GridElevationProvider {
    root: PathBuf,
}

impl GridElevationProvider {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_grid(&self, quad_key: QuadKey) -> Option<Vec<f64>> {
        let path = self
            .root
            .join("elevation")
            .join(quad_key.lod.to_string())
            .join(format!("{}.ele", quad_key.to_base4()));
        let content = std::fs::read_to_string(path).ok()?;
        let heights: Vec<f64> = content
            .split_whitespace()
            .map_while(|token| token.parse().ok())
            .collect();
        let side = (heights.len() as f64).sqrt() as usize;
        (side >= 2 && side * side == heights.len()).then_some(heights)
    }
}

impl ElevationProvider for GridElevationProvider {
    fn elevation(&self, quad_key: QuadKey, coordinate: GeoCoordinate) -> f64 {
        let Some(heights) = self.read_grid(quad_key) else {
            return 0.0;
        };
        let side = (heights.len() as f64).sqrt() as usize;
        let bbox = quad_key.bounding_box();

        let width = bbox.max_lon - bbox.min_lon;
        let height = bbox.max_lat - bbox.min_lat;
        let fx = ((coordinate.longitude - bbox.min_lon) / width).clamp(0.0, 1.0)
            * (side - 1) as f64;
        let fy = ((bbox.max_lat - coordinate.latitude) / height).clamp(0.0, 1.0)
            * (side - 1) as f64;

        bilinear(&heights, side, fx, fy)
    }
}

/// SRTM height lookup from `.hgt` tiles under the index root.
///
/// A file named like `N52E013.hgt` holds big-endian `i16` samples in a
/// square grid, row 0 at the northern edge. Both 1" (3601²) and 3"
/// (1201²) resolutions are accepted; the side length is derived from the
/// file size. Missing files read as sea level.
pub struct SrtmElevationProvider {
    root: PathBuf,
}

impl SrtmElevationProvider {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn file_name(coordinate: GeoCoordinate) -> String {
        let lat = coordinate.latitude.floor() as i32;
        let lon = coordinate.longitude.floor() as i32;
        let ns = if lat >= 0 { 'N' } else { 'S' };
        let ew = if lon >= 0 { 'E' } else { 'W' };
        format!("{}{:02}{}{:03}.hgt", ns, lat.abs(), ew, lon.abs())
    }

    fn sample(file: &mut File, side: u64, row: u64, column: u64) -> Option<f64> {
        let offset = (row * side + column) * 2;
        file.seek(SeekFrom::Start(offset)).ok()?;
        let mut buffer = [0_u8; 2];
        file.read_exact(&mut buffer).ok()?;
        let height = i16::from_be_bytes(buffer);
        // Voids are marked with the minimum sample value.
        (height != i16::MIN).then_some(f64::from(height))
    }
}

impl ElevationProvider for SrtmElevationProvider {
    fn elevation(&self, _quad_key: QuadKey, coordinate: GeoCoordinate) -> f64 {
        let path = self.root.join(Self::file_name(coordinate));
        let Ok(mut file) = File::open(&path) else {
            return 0.0;
        };
        let Ok(metadata) = file.metadata() else {
            return 0.0;
        };
        let side = ((metadata.len() / 2) as f64).sqrt() as u64;
        if side < 2 {
            return 0.0;
        }

        let fx = (coordinate.longitude - coordinate.longitude.floor()) * (side - 1) as f64;
        let fy = (1.0 - (coordinate.latitude - coordinate.latitude.floor())) * (side - 1) as f64;
        let column = (fx as u64).min(side - 2);
        let row = (fy as u64).min(side - 2);

        let corners = [
            Self::sample(&mut file, side, row, column),
            Self::sample(&mut file, side, row, column + 1),
            Self::sample(&mut file, side, row + 1, column),
            Self::sample(&mut file, side, row + 1, column + 1),
        ];
        let [Some(nw), Some(ne), Some(sw), Some(se)] = corners else {
            return 0.0;
        };

        let tx = fx - column as f64;
        let ty = fy - row as f64;
        (nw * (1.0 - tx) + ne * tx) * (1.0 - ty) + (sw * (1.0 - tx) + se * tx) * ty
    }
}

fn bilinear(heights: &[f64], side: usize, fx: f64, fy: f64) -> f64 {
    let column = (fx as usize).min(side - 2);
    let row = (fy as usize).min(side - 2);
    let tx = fx - column as f64;
    let ty = fy - row as f64;

    let at = |r: usize, c: usize| heights[r * side + c];
    (at(row, column) * (1.0 - tx) + at(row, column + 1) * tx) * (1.0 - ty)
        + (at(row + 1, column) * (1.0 - tx) + at(row + 1, column + 1) * tx) * ty
}
