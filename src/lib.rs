//! Tile-indexed geographic element store with an embedded boolean-text
//! search engine and a per-tile mesh build pipeline cached on disk.
//!
//! Map elements (points, polylines, polygons, collections) are clipped
//! into the tiles of a quad-tree subdivision of the globe and persisted
//! per tile as a data/index/bitmap file triple. Two kinds of queries are
//! answered on top of that layout:
//!
//! - **Text**: AND/OR/NOT terms over tokenized tag text, scoped to a
//!   bounding box and zoom interval, evaluated on compressed per-tile
//!   term bitmaps.
//! - **Build**: a per-tile composition of registered element builders
//!   into a stream of meshes and elements, transparently served from an
//!   on-disk mesh cache when present.
//!
//! The [`Session`] handle ties the pieces together for a host binding;
//! every component is also usable on its own.

mod build;
mod cancel;
mod element;
mod elevation;
mod error;
mod geo;
mod index;
mod lru;
mod mesh;
mod quadkey;
mod session;
mod string_table;
mod style;
#[cfg(test)]
pub(crate) mod test_util;

pub use build::{
    BuilderContext, BuilderFactory, ElementBuilder, ElementCallback, EmptyBuilder,
    ExternalBuilder, MeshCache, MeshCallback, QuadKeyBuilder, builder_factory,
};
pub use cancel::CancellationToken;
pub use element::{Area, Element, ElementVisitor, FilteredVisitor, Node, Relation, Tag, Way};
pub use elevation::{
    ElevationKind, ElevationProvider, FlatElevationProvider, GridElevationProvider,
    SrtmElevationProvider,
};
pub use error::{QuadError, QuadResult};
pub use geo::{BoundingBox, GeoCoordinate, LodRange};
pub use index::{
    BitmapIndex, BitmapStream, ElementSource, ElementStore, ElementStream, GeoStore,
    GeometryClipper, InMemoryElementStore, MeshStream, PersistentElementStore, TermBitmap,
    TextQuery, TokenizedQuery,
};
pub use lru::LruCache;
pub use mesh::{Mesh, MeshPool};
pub use quadkey::{MAX_LOD, MIN_LOD, QuadKey, for_each_in_bbox};
pub use session::{ElementCallbackFn, Session};
pub use string_table::StringTable;
pub use style::{ClipPolicy, Style, StyleProvider, StylesheetParser};
