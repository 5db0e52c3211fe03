use std::cmp::Ordering;
use std::f64::consts::PI;
use std::fmt::{Display, Formatter};

use crate::error::{QuadError, QuadResult};
use crate::geo::{BoundingBox, GeoCoordinate};

/// Lowest supported level of detail.
pub const MIN_LOD: u8 = 1;
/// Highest supported level of detail.
pub const MAX_LOD: u8 = 16;

/// Latitude bound of the web mercator projection.
const MAX_LATITUDE: f64 = 85.051_128_78;

pub(crate) fn check_lod(lod: u8) -> QuadResult<()> {
    if (MIN_LOD..=MAX_LOD).contains(&lod) {
        Ok(())
    } else {
        Err(QuadError::LodOutOfRange(lod))
    }
}

/// One cell of the quad-tree subdivision of the globe.
///
/// Ordered by level of detail first, then row-major `(y, x)` (the order
/// used for on-disk iteration and cache comparators).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QuadKey {
    /// Level of detail (zoom), `1..=16`.
    pub lod: u8,
    /// Tile column, `0..2^lod`.
    pub x: i32,
    /// Tile row, `0..2^lod`; grows southward.
    pub y: i32,
}

impl Ord for QuadKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lod
            .cmp(&other.lod)
            .then(self.y.cmp(&other.y))
            .then(self.x.cmp(&other.x))
    }
}

impl PartialOrd for QuadKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for QuadKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.lod, self.x, self.y)
    }
}

impl QuadKey {
    /// Creates a quad key after validating the level of detail and the tile
    /// coordinates against it.
    pub fn new(lod: u8, x: i32, y: i32) -> QuadResult<Self> {
        check_lod(lod)?;
        let side = 1_i32 << lod;
        if x < 0 || y < 0 || x >= side || y >= side {
            return Err(QuadError::TileOutOfRange { lod, x, y });
        }
        Ok(Self { lod, x, y })
    }

    /// The quad key containing `coordinate` at the given level of detail.
    pub fn from_coordinate(coordinate: GeoCoordinate, lod: u8) -> QuadResult<Self> {
        check_lod(lod)?;
        Ok(Self {
            lod,
            x: lon_to_tile_x(coordinate.longitude, lod),
            y: lat_to_tile_y(coordinate.latitude, lod),
        })
    }

    /// The canonical base-4 encoding, padded to `lod` digits. Used as the
    /// file name stem of every per-tile file.
    #[must_use]
    pub fn to_base4(&self) -> String {
        let mut digits = String::with_capacity(self.lod as usize);
        for i in (1..=self.lod).rev() {
            let mask = 1_i32 << (i - 1);
            let mut digit = 0_u8;
            if self.x & mask != 0 {
                digit += 1;
            }
            if self.y & mask != 0 {
                digit += 2;
            }
            digits.push(char::from(b'0' + digit));
        }
        digits
    }

    /// Parses the canonical base-4 encoding; the digit count is the level
    /// of detail.
    pub fn from_base4(literal: &str) -> QuadResult<Self> {
        let lod = u8::try_from(literal.len())
            .map_err(|_| QuadError::InvalidQuadKey(literal.to_string()))?;
        check_lod(lod).map_err(|_| QuadError::InvalidQuadKey(literal.to_string()))?;

        let mut x = 0_i32;
        let mut y = 0_i32;
        for (i, digit) in literal.chars().enumerate() {
            let mask = 1_i32 << (lod as usize - i - 1);
            match digit {
                '0' => {}
                '1' => x |= mask,
                '2' => y |= mask,
                '3' => {
                    x |= mask;
                    y |= mask;
                }
                _ => return Err(QuadError::InvalidQuadKey(literal.to_string())),
            }
        }
        Ok(Self { lod, x, y })
    }

    /// The geographic bounding box covered by this tile.
    #[must_use]
    pub fn bounding_box(&self) -> BoundingBox {
        let side = f64::from(1_i32 << self.lod);
        let min_lon = f64::from(self.x) / side * 360.0 - 180.0;
        let max_lon = f64::from(self.x + 1) / side * 360.0 - 180.0;
        let max_lat = tile_y_to_lat(f64::from(self.y), side);
        let min_lat = tile_y_to_lat(f64::from(self.y + 1), side);
        BoundingBox::new(min_lat, min_lon, max_lat, max_lon)
    }
}

fn lon_to_tile_x(lon: f64, lod: u8) -> i32 {
    let side = 1_i32 << lod;
    let x = ((lon + 180.0) / 360.0 * f64::from(side)).floor() as i32;
    x.clamp(0, side - 1)
}

fn lat_to_tile_y(lat: f64, lod: u8) -> i32 {
    let side = 1_i32 << lod;
    let rad = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let y = ((1.0 - (rad.tan() + 1.0 / rad.cos()).ln() / PI) / 2.0 * f64::from(side)).floor() as i32;
    y.clamp(0, side - 1)
}

fn tile_y_to_lat(y: f64, side: f64) -> f64 {
    let t = PI * (1.0 - 2.0 * y / side);
    t.sinh().atan().to_degrees()
}

/// Visits every tile at `lod` that overlaps `bbox`, row-major: north to
/// south, west to east. Stops early when the callback fails.
pub fn for_each_in_bbox(
    bbox: &BoundingBox,
    lod: u8,
    mut visit: impl FnMut(QuadKey) -> QuadResult<()>,
) -> QuadResult<()> {
    check_lod(lod)?;
    if !bbox.is_valid() {
        return Ok(());
    }

    let min_x = lon_to_tile_x(bbox.min_lon, lod);
    let max_x = lon_to_tile_x(bbox.max_lon, lod);
    let min_y = lat_to_tile_y(bbox.max_lat, lod);
    let max_y = lat_to_tile_y(bbox.min_lat, lod);
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            visit(QuadKey { lod, x, y })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(1, 0, 0, "0")]
    #[case(1, 1, 1, "3")]
    #[case(3, 3, 5, "213")]
    #[case(16, 35205, 21489, "1202102332220103")]
    fn base4_round_trip(#[case] lod: u8, #[case] x: i32, #[case] y: i32, #[case] literal: &str) {
        let quad_key = QuadKey::new(lod, x, y).unwrap();
        assert_eq!(quad_key.to_base4(), literal);
        assert_eq!(QuadKey::from_base4(literal).unwrap(), quad_key);
    }

    #[test]
    fn rejects_out_of_range_tiles() {
        assert!(QuadKey::new(0, 0, 0).is_err());
        assert!(QuadKey::new(17, 0, 0).is_err());
        assert!(QuadKey::new(1, 2, 0).is_err());
        assert!(QuadKey::new(1, 0, -1).is_err());
    }

    #[test]
    fn bounding_box_of_top_left_lod1_tile() {
        let bbox = QuadKey::new(1, 0, 0).unwrap().bounding_box();
        assert!((bbox.min_lon - -180.0).abs() < 1e-9);
        assert!((bbox.max_lon - 0.0).abs() < 1e-9);
        assert!((bbox.min_lat - 0.0).abs() < 1e-9);
        assert!((bbox.max_lat - MAX_LATITUDE).abs() < 1e-6);
    }

    #[test]
    fn coordinate_lands_in_its_tile() {
        let coordinate = GeoCoordinate::new(52.52, 13.38);
        for lod in MIN_LOD..=MAX_LOD {
            let quad_key = QuadKey::from_coordinate(coordinate, lod).unwrap();
            assert!(quad_key.bounding_box().contains(coordinate), "lod {lod}");
        }
    }

    #[test]
    fn world_bbox_covers_all_four_lod1_tiles() {
        let mut visited = Vec::new();
        for_each_in_bbox(&BoundingBox::world(), 1, |quad_key| {
            visited.push((quad_key.x, quad_key.y));
            Ok(())
        })
        .unwrap();
        assert_eq!(visited, vec![(0, 0), (1, 0), (0, 1), (1, 1)]);
    }

    #[test]
    fn order_is_lod_then_row_major() {
        let mut keys = vec![
            QuadKey::new(2, 0, 1).unwrap(),
            QuadKey::new(1, 1, 0).unwrap(),
            QuadKey::new(2, 3, 0).unwrap(),
            QuadKey::new(1, 0, 1).unwrap(),
        ];
        keys.sort();
        let as_tuples: Vec<_> = keys.iter().map(|k| (k.lod, k.y, k.x)).collect();
        assert_eq!(
            as_tuples,
            vec![(1, 0, 1), (1, 1, 0), (2, 0, 3), (2, 1, 0)]
        );
    }
}
