use std::io::{Read, Write};

use crate::element::{Area, Element, Node, Relation, Tag, Way};
use crate::error::{QuadError, QuadResult};
use crate::geo::GeoCoordinate;
use crate::index::wire;

const NODE_KIND: u8 = 0;
const WAY_KIND: u8 = 1;
const AREA_KIND: u8 = 2;
const RELATION_KIND: u8 = 3;

/// Binary codec for element records.
///
/// Record layout: kind byte, `u64` id, `u16` tag count with `(u32, u32)`
/// id pairs, then the geometry: a single `lat, lon` pair for nodes, a
/// `u16` count of `lat, lon` pairs for ways and areas, and recursively
/// framed members for relations. All integers little-endian.
pub struct ElementStream;

impl ElementStream {
    pub fn write<W: Write>(writer: &mut W, element: &Element) -> QuadResult<()> {
        match element {
            Element::Node(node) => {
                Self::write_header(writer, NODE_KIND, node.id, &node.tags)?;
                Self::write_coordinate(writer, node.coordinate)?;
            }
            Element::Way(way) => {
                Self::write_header(writer, WAY_KIND, way.id, &way.tags)?;
                Self::write_coordinates(writer, &way.coordinates)?;
            }
            Element::Area(area) => {
                Self::write_header(writer, AREA_KIND, area.id, &area.tags)?;
                Self::write_coordinates(writer, &area.coordinates)?;
            }
            Element::Relation(relation) => {
                Self::write_header(writer, RELATION_KIND, relation.id, &relation.tags)?;
                let count = into_u16(relation.members.len(), "relation member count")?;
                writer.write_all(&count.to_le_bytes())?;
                for member in &relation.members {
                    Self::write(writer, member)?;
                }
            }
        }
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> QuadResult<Element> {
        let kind = wire::read_u8(reader)?;
        let id = wire::read_u64(reader)?;
        let tags = Self::read_tags(reader)?;

        Ok(match kind {
            NODE_KIND => Element::Node(Node {
                id,
                tags,
                coordinate: Self::read_coordinate(reader)?,
            }),
            WAY_KIND => Element::Way(Way {
                id,
                tags,
                coordinates: Self::read_coordinates(reader)?,
            }),
            AREA_KIND => Element::Area(Area {
                id,
                tags,
                coordinates: Self::read_coordinates(reader)?,
            }),
            RELATION_KIND => {
                let count = wire::read_u16(reader)?;
                let mut members = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    members.push(Self::read(reader)?);
                }
                Element::Relation(Relation { id, tags, members })
            }
            unknown => return Err(QuadError::CorruptRecord(unknown)),
        })
    }

    fn write_header<W: Write>(
        writer: &mut W,
        kind: u8,
        id: u64,
        tags: &[Tag],
    ) -> QuadResult<()> {
        writer.write_all(&[kind])?;
        writer.write_all(&id.to_le_bytes())?;
        let count = into_u16(tags.len(), "tag count")?;
        writer.write_all(&count.to_le_bytes())?;
        for tag in tags {
            writer.write_all(&tag.key.to_le_bytes())?;
            writer.write_all(&tag.value.to_le_bytes())?;
        }
        Ok(())
    }

    fn read_tags<R: Read>(reader: &mut R) -> QuadResult<Vec<Tag>> {
        let count = wire::read_u16(reader)?;
        let mut tags = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let key = wire::read_u32(reader)?;
            let value = wire::read_u32(reader)?;
            tags.push(Tag::new(key, value));
        }
        Ok(tags)
    }

    fn write_coordinate<W: Write>(writer: &mut W, coordinate: GeoCoordinate) -> QuadResult<()> {
        writer.write_all(&coordinate.latitude.to_le_bytes())?;
        writer.write_all(&coordinate.longitude.to_le_bytes())?;
        Ok(())
    }

    fn read_coordinate<R: Read>(reader: &mut R) -> QuadResult<GeoCoordinate> {
        let latitude = wire::read_f64(reader)?;
        let longitude = wire::read_f64(reader)?;
        Ok(GeoCoordinate::new(latitude, longitude))
    }

    fn write_coordinates<W: Write>(
        writer: &mut W,
        coordinates: &[GeoCoordinate],
    ) -> QuadResult<()> {
        let count = into_u16(coordinates.len(), "coordinate count")?;
        writer.write_all(&count.to_le_bytes())?;
        for &coordinate in coordinates {
            Self::write_coordinate(writer, coordinate)?;
        }
        Ok(())
    }

    fn read_coordinates<R: Read>(reader: &mut R) -> QuadResult<Vec<GeoCoordinate>> {
        let count = wire::read_u16(reader)?;
        let mut coordinates = Vec::with_capacity(count as usize);
        for _ in 0..count {
            coordinates.push(Self::read_coordinate(reader)?);
        }
        Ok(coordinates)
    }
}

fn into_u16(value: usize, what: &'static str) -> QuadResult<u16> {
    u16::try_from(value).map_err(|_| QuadError::RecordOverflow(what))
}
