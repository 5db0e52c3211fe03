use crate::cancel::CancellationToken;
use crate::element::{Element, ElementVisitor};
use crate::error::QuadResult;
use crate::geo::{BoundingBox, LodRange};
use crate::index::bitmap::TextQuery;
use crate::quadkey::QuadKey;

/// Per-tile persistence of clipped elements plus text search dispatch.
///
/// Implementations serialize internally: operations on distinct tiles are
/// safe to run concurrently, concurrent save and search on the same tile
/// are not and must be serialized by the caller.
pub trait ElementStore: Send + Sync {
    /// Appends an element to the given tile. The element has already been
    /// clipped (or deliberately copied) for that tile.
    fn save(&self, element: &Element, quad_key: QuadKey) -> QuadResult<()>;

    /// Runs a boolean text query; matches are delivered in set-bit order
    /// per tile, tiles in range order, levels ascending.
    fn search_text(
        &self,
        query: &TextQuery,
        visitor: &mut dyn ElementVisitor,
        cancel_token: &CancellationToken,
    ) -> QuadResult<()>;

    /// Scans one tile in insertion order.
    fn search_tile(
        &self,
        quad_key: QuadKey,
        visitor: &mut dyn ElementVisitor,
        cancel_token: &CancellationToken,
    ) -> QuadResult<()>;

    /// Whether the tile holds at least one element.
    fn has_data(&self, quad_key: QuadKey) -> bool;

    /// Drops the tile's elements and index data.
    fn erase_tile(&self, quad_key: QuadKey) -> QuadResult<()>;

    /// Drops every tile covered by the box over the level range. Not every
    /// store supports this.
    fn erase_area(&self, bbox: &BoundingBox, range: LodRange) -> QuadResult<()>;

    /// Releases cached resources (open file handles).
    fn flush(&self) -> QuadResult<()>;
}

/// A stream of raw elements to ingest. This is the seam towards the
/// parsing front-ends (OSM XML, PBF, shape files) that live outside this
/// crate.
pub trait ElementSource {
    /// Calls `visit` for every element. A callback returning `Ok(false)`
    /// stops the iteration early.
    fn for_each(&self, visit: &mut dyn FnMut(&Element) -> QuadResult<bool>) -> QuadResult<()>;
}

impl ElementSource for [Element] {
    fn for_each(&self, visit: &mut dyn FnMut(&Element) -> QuadResult<bool>) -> QuadResult<()> {
        for element in self {
            if !visit(element)? {
                break;
            }
        }
        Ok(())
    }
}

impl ElementSource for Vec<Element> {
    fn for_each(&self, visit: &mut dyn FnMut(&Element) -> QuadResult<bool>) -> QuadResult<()> {
        self.as_slice().for_each(visit)
    }
}
