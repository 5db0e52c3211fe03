use crate::geo::{BoundingBox, GeoCoordinate};

/// A key/value pair of interned string ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Tag {
    /// Interned id of the key string.
    pub key: u32,
    /// Interned id of the value string.
    pub value: u32,
}

impl Tag {
    #[must_use]
    pub fn new(key: u32, value: u32) -> Self {
        Self { key, value }
    }
}

/// A point of interest.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub id: u64,
    pub tags: Vec<Tag>,
    pub coordinate: GeoCoordinate,
}

/// An open polyline.
#[derive(Clone, Debug, PartialEq)]
pub struct Way {
    pub id: u64,
    pub tags: Vec<Tag>,
    pub coordinates: Vec<GeoCoordinate>,
}

/// A closed polygon; the closing edge back to the first coordinate is
/// implicit and not stored.
#[derive(Clone, Debug, PartialEq)]
pub struct Area {
    pub id: u64,
    pub tags: Vec<Tag>,
    pub coordinates: Vec<GeoCoordinate>,
}

/// A collection of member elements.
#[derive(Clone, Debug, PartialEq)]
pub struct Relation {
    pub id: u64,
    pub tags: Vec<Tag>,
    pub members: Vec<Element>,
}

/// A map element. Id `0` marks a synthetic element produced by clipping
/// and is allowed to repeat.
#[derive(Clone, Debug, PartialEq)]
pub enum Element {
    Node(Node),
    Way(Way),
    Area(Area),
    Relation(Relation),
}

impl Element {
    #[must_use]
    pub fn id(&self) -> u64 {
        match self {
            Element::Node(node) => node.id,
            Element::Way(way) => way.id,
            Element::Area(area) => area.id,
            Element::Relation(relation) => relation.id,
        }
    }

    #[must_use]
    pub fn tags(&self) -> &[Tag] {
        match self {
            Element::Node(node) => &node.tags,
            Element::Way(way) => &way.tags,
            Element::Area(area) => &area.tags,
            Element::Relation(relation) => &relation.tags,
        }
    }

    /// Replaces id and tags in place. Used when clipping restores the
    /// identity of a parent element on an unwrapped child.
    pub(crate) fn set_identity(&mut self, id: u64, tags: Vec<Tag>) {
        match self {
            Element::Node(node) => {
                node.id = id;
                node.tags = tags;
            }
            Element::Way(way) => {
                way.id = id;
                way.tags = tags;
            }
            Element::Area(area) => {
                area.id = id;
                area.tags = tags;
            }
            Element::Relation(relation) => {
                relation.id = id;
                relation.tags = tags;
            }
        }
    }

    /// The tightest box around the element's geometry.
    #[must_use]
    pub fn bounding_box(&self) -> BoundingBox {
        let mut bbox = BoundingBox::empty();
        match self {
            Element::Node(node) => bbox.expand(node.coordinate),
            Element::Way(way) => {
                for &coordinate in &way.coordinates {
                    bbox.expand(coordinate);
                }
            }
            Element::Area(area) => {
                for &coordinate in &area.coordinates {
                    bbox.expand(coordinate);
                }
            }
            Element::Relation(relation) => {
                for member in &relation.members {
                    bbox.expand_box(&member.bounding_box());
                }
            }
        }
        bbox
    }

    /// Delivers the element to a visitor.
    pub fn accept(&self, visitor: &mut dyn ElementVisitor) {
        visitor.visit_element(self);
    }
}

/// Receiver of elements produced by store scans and searches.
///
/// Implementors either override `visit_element` to handle every variant in
/// one place, or the per-variant methods and rely on the default dispatch.
pub trait ElementVisitor {
    fn visit_element(&mut self, element: &Element) {
        match element {
            Element::Node(node) => self.visit_node(node),
            Element::Way(way) => self.visit_way(way),
            Element::Area(area) => self.visit_area(area),
            Element::Relation(relation) => self.visit_relation(relation),
        }
    }

    fn visit_node(&mut self, _node: &Node) {}
    fn visit_way(&mut self, _way: &Way) {}
    fn visit_area(&mut self, _area: &Area) {}
    fn visit_relation(&mut self, _relation: &Relation) {}
}

/// Forwards elements that pass a predicate to an inner visitor.
pub struct FilteredVisitor<'a, F: FnMut(&Element) -> bool> {
    inner: &'a mut dyn ElementVisitor,
    predicate: F,
}

impl<'a, F: FnMut(&Element) -> bool> FilteredVisitor<'a, F> {
    pub fn new(inner: &'a mut dyn ElementVisitor, predicate: F) -> Self {
        Self { inner, predicate }
    }
}

impl<F: FnMut(&Element) -> bool> ElementVisitor for FilteredVisitor<'_, F> {
    fn visit_element(&mut self, element: &Element) {
        if (self.predicate)(element) {
            self.inner.visit_element(element);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_bounding_box_unions_members() {
        let relation = Element::Relation(Relation {
            id: 1,
            tags: vec![],
            members: vec![
                Element::Node(Node {
                    id: 2,
                    tags: vec![],
                    coordinate: GeoCoordinate::new(10.0, 20.0),
                }),
                Element::Way(Way {
                    id: 3,
                    tags: vec![],
                    coordinates: vec![
                        GeoCoordinate::new(-1.0, 2.0),
                        GeoCoordinate::new(4.0, -3.0),
                    ],
                }),
            ],
        });

        assert_eq!(
            relation.bounding_box(),
            BoundingBox::new(-1.0, -3.0, 10.0, 20.0)
        );
    }

    #[test]
    fn filtered_visitor_drops_rejected_elements() {
        struct Count(usize);
        impl ElementVisitor for Count {
            fn visit_element(&mut self, _element: &Element) {
                self.0 += 1;
            }
        }

        let node = |id| {
            Element::Node(Node {
                id,
                tags: vec![],
                coordinate: GeoCoordinate::new(0.0, 0.0),
            })
        };

        let mut count = Count(0);
        let mut filtered = FilteredVisitor::new(&mut count, |e| e.id() % 2 == 0);
        for id in 0..5 {
            node(id).accept(&mut filtered);
        }
        assert_eq!(count.0, 3);
    }
}
