use std::path::Path;
use std::sync::Arc;

use crate::element::Element;
use crate::error::QuadResult;
use crate::string_table::StringTable;

/// Resolved style of one element at one level of detail: a flat list of
/// `(key id, value)` declarations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Style {
    declarations: Vec<(u32, String)>,
}

impl Style {
    /// A style without declarations; elements resolving to it are not
    /// stored or built.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn new(declarations: Vec<(u32, String)>) -> Self {
        Self { declarations }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// The value declared under the interned key, if any.
    #[must_use]
    pub fn get(&self, key: u32) -> Option<&str> {
        self.declarations
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn declarations(&self) -> &[(u32, String)] {
        &self.declarations
    }
}

/// How an element is assigned to a tile during ingest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClipPolicy {
    /// Clip the geometry against the tile bounding box.
    Clip,
    /// Store the element as-is into every covered tile.
    Copy,
    /// Do not store the element at this level of detail.
    Skip,
}

/// Per-element style lookup backed by a parsed stylesheet.
///
/// The MapCSS engine itself is an external collaborator; the core only
/// needs declaration lookup, the clip policy and a stable tag that
/// namespaces the mesh cache on disk.
pub trait StyleProvider: Send + Sync {
    /// Stable identifier of the parsed stylesheet.
    fn tag(&self) -> &str;

    /// Resolves the declarations applying to `element` at `lod`.
    fn for_element(&self, element: &Element, lod: u8) -> Style;

    /// Decides how `element` is assigned to tiles at `lod`.
    fn clip_policy(&self, element: &Element, lod: u8) -> ClipPolicy;
}

/// Parses a stylesheet file into a provider. Implemented by the host's
/// MapCSS engine; the session caches the result per path.
pub trait StylesheetParser: Send + Sync {
    fn parse(
        &self,
        path: &Path,
        string_table: &Arc<StringTable>,
    ) -> QuadResult<Arc<dyn StyleProvider>>;
}
