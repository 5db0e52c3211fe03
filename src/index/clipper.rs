use geo::{BooleanOps, Coord, LineString, MultiLineString, Polygon};

use crate::element::{Area, Element, Node, Relation, Way};
use crate::geo::{BoundingBox, GeoCoordinate};
use crate::quadkey::QuadKey;

/// Fixed-point factor: coordinates are snapped to 1e-7 degrees before
/// clipping and descaled on output.
const SCALE: f64 = 1E7;

/// Classification of an element's vertices against a tile bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PointLocation {
    AllInside,
    AllOutside,
    Mixed,
}

/// Clips one element against one tile's bounding box.
///
/// The clip rectangle is built once per instance; a clipper is meant to be
/// reused for every element assigned to its tile.
pub struct GeometryClipper {
    quad_key: QuadKey,
    bbox: BoundingBox,
    clip_shape: Polygon<f64>,
}

impl GeometryClipper {
    #[must_use]
    pub fn new(quad_key: QuadKey) -> Self {
        let bbox = quad_key.bounding_box();
        let clip_shape = Polygon::new(
            LineString::from(vec![
                scale_point(bbox.min_lon, bbox.min_lat),
                scale_point(bbox.max_lon, bbox.min_lat),
                scale_point(bbox.max_lon, bbox.max_lat),
                scale_point(bbox.min_lon, bbox.max_lat),
            ]),
            vec![],
        );
        Self {
            quad_key,
            bbox,
            clip_shape,
        }
    }

    #[must_use]
    pub fn quad_key(&self) -> QuadKey {
        self.quad_key
    }

    /// The element's geometry restricted to this tile, or `None` when the
    /// two are disjoint.
    #[must_use]
    pub fn clip(&self, element: &Element) -> Option<Element> {
        match element {
            Element::Node(node) => self
                .bbox
                .contains(node.coordinate)
                .then(|| Element::Node(node.clone())),
            Element::Way(way) => self.clip_way(way),
            Element::Area(area) => self.clip_area(area),
            Element::Relation(relation) => self.clip_relation(relation),
        }
    }

    fn clip_way(&self, way: &Way) -> Option<Element> {
        let (location, shape, _) = self.locate(&way.coordinates);
        match location {
            PointLocation::AllInside => return Some(Element::Way(way.clone())),
            PointLocation::AllOutside => return None,
            PointLocation::Mixed => {}
        }

        let subject = MultiLineString::new(vec![LineString::new(shape)]);
        let pieces: Vec<Vec<GeoCoordinate>> = self
            .clip_shape
            .clip(&subject, false)
            .0
            .into_iter()
            .map(|piece| descale_line(&piece))
            .filter(|piece| piece.len() > 1)
            .collect();

        match pieces.len() {
            0 => None,
            1 => Some(Element::Way(Way {
                id: way.id,
                tags: way.tags.clone(),
                coordinates: pieces.into_iter().next()?,
            })),
            _ => Some(Element::Relation(Relation {
                id: way.id,
                tags: way.tags.clone(),
                members: pieces
                    .into_iter()
                    .map(|coordinates| {
                        Element::Way(Way {
                            id: 0,
                            tags: way.tags.clone(),
                            coordinates,
                        })
                    })
                    .collect(),
            })),
        }
    }

    fn clip_area(&self, area: &Area) -> Option<Element> {
        let (location, shape, element_bbox) = self.locate(&area.coordinates);
        match location {
            PointLocation::AllInside => return Some(Element::Area(area.clone())),
            // A polygon can enclose the whole tile with every vertex
            // outside; only a disjoint bounding box rules it out.
            PointLocation::AllOutside if !self.bbox.intersects(&element_bbox) => return None,
            PointLocation::AllOutside | PointLocation::Mixed => {}
        }

        let subject = Polygon::new(LineString::new(shape), vec![]);
        let solution = self.clip_shape.intersection(&subject);

        // Every ring of the solution is one output contour, holes included.
        let contours: Vec<Vec<GeoCoordinate>> = solution
            .iter()
            .flat_map(|polygon| {
                std::iter::once(polygon.exterior()).chain(polygon.interiors().iter())
            })
            .map(descale_ring)
            .filter(|contour| contour.len() > 2)
            .collect();

        match contours.len() {
            0 => None,
            1 => Some(Element::Area(Area {
                id: area.id,
                tags: area.tags.clone(),
                coordinates: contours.into_iter().next()?,
            })),
            _ => Some(Element::Relation(Relation {
                id: area.id,
                tags: area.tags.clone(),
                members: contours
                    .into_iter()
                    .map(|coordinates| {
                        Element::Area(Area {
                            id: 0,
                            tags: area.tags.clone(),
                            coordinates,
                        })
                    })
                    .collect(),
            })),
        }
    }

    fn clip_relation(&self, relation: &Relation) -> Option<Element> {
        let mut members = Vec::new();
        for member in &relation.members {
            if let Some(clipped) = self.clip(member) {
                members.push(clipped);
            }
        }

        match members.len() {
            0 => None,
            1 => {
                let mut child = members.into_iter().next()?;
                child.set_identity(relation.id, relation.tags.clone());
                Some(child)
            }
            _ => Some(Element::Relation(Relation {
                id: relation.id,
                tags: relation.tags.clone(),
                members,
            })),
        }
    }

    /// Walks the vertices once: classification, the scaled shape and the
    /// element's own bounding box.
    fn locate(&self, coordinates: &[GeoCoordinate]) -> (PointLocation, Vec<Coord<f64>>, BoundingBox) {
        let mut all_inside = true;
        let mut all_outside = true;
        let mut element_bbox = BoundingBox::empty();
        let mut shape = Vec::with_capacity(coordinates.len());

        for &coordinate in coordinates {
            let contains = self.bbox.contains(coordinate);
            all_inside &= contains;
            all_outside &= !contains;
            element_bbox.expand(coordinate);
            shape.push(scale_point(coordinate.longitude, coordinate.latitude));
        }

        let location = if all_inside {
            PointLocation::AllInside
        } else if all_outside {
            PointLocation::AllOutside
        } else {
            PointLocation::Mixed
        };
        (location, shape, element_bbox)
    }
}

fn scale_point(lon: f64, lat: f64) -> Coord<f64> {
    Coord {
        x: (lon * SCALE).round(),
        y: (lat * SCALE).round(),
    }
}

fn descale(coord: Coord<f64>) -> GeoCoordinate {
    GeoCoordinate::new(coord.y / SCALE, coord.x / SCALE)
}

fn descale_line(line: &LineString<f64>) -> Vec<GeoCoordinate> {
    line.coords().map(|&c| descale(c)).collect()
}

/// Descale a closed ring, dropping the duplicated closing point: area
/// geometry keeps the closing edge implicit.
fn descale_ring(ring: &LineString<f64>) -> Vec<GeoCoordinate> {
    let coords = &ring.0;
    let open = match coords.split_last() {
        Some((last, rest)) if Some(last) == rest.first() => rest,
        _ => coords.as_slice(),
    };
    open.iter().map(|&c| descale(c)).collect()
}
