use crate::error::{QuadError, QuadResult};

/// A WGS84 coordinate in degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoCoordinate {
    /// Latitude in degrees (-90 to 90).
    pub latitude: f64,
    /// Longitude in degrees (-180 to 180).
    pub longitude: f64,
}

impl GeoCoordinate {
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// An axis-aligned geographic bounding box in WGS84 coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    /// Minimum latitude (south) in degrees.
    pub min_lat: f64,
    /// Minimum longitude (west) in degrees.
    pub min_lon: f64,
    /// Maximum latitude (north) in degrees.
    pub max_lat: f64,
    /// Maximum longitude (east) in degrees.
    pub max_lon: f64,
}

impl BoundingBox {
    #[must_use]
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// An inverted box that any `expand` turns into a valid one.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(90.0, 180.0, -90.0, -180.0)
    }

    /// The whole globe.
    #[must_use]
    pub fn world() -> Self {
        Self::new(-90.0, -180.0, 90.0, 180.0)
    }

    /// Whether the box covers at least one point.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.min_lat <= self.max_lat && self.min_lon <= self.max_lon
    }

    /// Grows the box to include `coordinate`.
    pub fn expand(&mut self, coordinate: GeoCoordinate) {
        self.min_lat = self.min_lat.min(coordinate.latitude);
        self.min_lon = self.min_lon.min(coordinate.longitude);
        self.max_lat = self.max_lat.max(coordinate.latitude);
        self.max_lon = self.max_lon.max(coordinate.longitude);
    }

    /// Grows the box to include all of `other`.
    pub fn expand_box(&mut self, other: &BoundingBox) {
        self.min_lat = self.min_lat.min(other.min_lat);
        self.min_lon = self.min_lon.min(other.min_lon);
        self.max_lat = self.max_lat.max(other.max_lat);
        self.max_lon = self.max_lon.max(other.max_lon);
    }

    /// Whether `coordinate` lies inside the box, borders included.
    #[must_use]
    pub fn contains(&self, coordinate: GeoCoordinate) -> bool {
        coordinate.latitude >= self.min_lat
            && coordinate.latitude <= self.max_lat
            && coordinate.longitude >= self.min_lon
            && coordinate.longitude <= self.max_lon
    }

    /// Whether the two boxes share at least one point.
    #[must_use]
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
            && self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
    }

    /// The overlap of the two boxes, or `None` when they are disjoint.
    #[must_use]
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let candidate = BoundingBox::new(
            self.min_lat.max(other.min_lat),
            self.min_lon.max(other.min_lon),
            self.max_lat.min(other.max_lat),
            self.max_lon.min(other.max_lon),
        );
        candidate.is_valid().then_some(candidate)
    }
}

/// An inclusive zoom level interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LodRange {
    /// First level of detail, inclusive.
    pub start: u8,
    /// Last level of detail, inclusive.
    pub end: u8,
}

impl LodRange {
    /// Creates a range after validating both ends against the supported
    /// `1..=16` interval.
    pub fn new(start: u8, end: u8) -> QuadResult<Self> {
        crate::quadkey::check_lod(start)?;
        crate::quadkey::check_lod(end)?;
        if start > end {
            return Err(QuadError::LodOutOfRange(end));
        }
        Ok(Self { start, end })
    }

    /// Iterates the levels of the range in ascending order.
    pub fn levels(&self) -> impl Iterator<Item = u8> {
        self.start..=self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_grows_empty_box() {
        let mut bbox = BoundingBox::empty();
        assert!(!bbox.is_valid());

        bbox.expand(GeoCoordinate::new(52.0, 13.0));
        bbox.expand(GeoCoordinate::new(48.0, 11.0));

        assert!(bbox.is_valid());
        assert_eq!(bbox, BoundingBox::new(48.0, 11.0, 52.0, 13.0));
    }

    #[test]
    fn contains_is_border_inclusive() {
        let bbox = BoundingBox::new(-5.0, -5.0, 5.0, 5.0);
        assert!(bbox.contains(GeoCoordinate::new(5.0, -5.0)));
        assert!(!bbox.contains(GeoCoordinate::new(5.1, 0.0)));
    }

    #[test]
    fn disjoint_boxes_have_no_intersection() {
        let a = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let b = BoundingBox::new(2.0, 2.0, 3.0, 3.0);
        assert!(!a.intersects(&b));
        assert!(a.intersection(&b).is_none());
    }

    #[test]
    fn overlapping_boxes_intersect() {
        let a = BoundingBox::new(0.0, 0.0, 2.0, 2.0);
        let b = BoundingBox::new(1.0, 1.0, 3.0, 3.0);
        assert_eq!(
            a.intersection(&b),
            Some(BoundingBox::new(1.0, 1.0, 2.0, 2.0))
        );
    }

    #[test]
    fn lod_range_rejects_out_of_bounds_levels() {
        assert!(LodRange::new(0, 4).is_err());
        assert!(LodRange::new(1, 17).is_err());
        assert!(LodRange::new(5, 3).is_err());
        assert!(LodRange::new(1, 16).is_ok());
    }
}
