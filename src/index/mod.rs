//! Tile-partitioned storage and search: clipping, per-tile element files,
//! term bitmaps and the store registry.

mod bitmap;
mod bitmap_stream;
mod clipper;
mod element_stream;
mod geo_store;
mod in_memory;
mod mesh_stream;
mod persistent;
mod store;
pub(crate) mod wire;

pub use bitmap::{BitmapIndex, TermBitmap, TextQuery, TokenizedQuery};
pub use bitmap_stream::BitmapStream;
pub use clipper::GeometryClipper;
pub use element_stream::ElementStream;
pub use geo_store::GeoStore;
pub use in_memory::InMemoryElementStore;
pub use mesh_stream::MeshStream;
pub use persistent::PersistentElementStore;
pub use store::{ElementSource, ElementStore};
