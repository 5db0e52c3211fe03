//! Per-tile build pipeline: element builders, their shared context and the
//! on-disk mesh cache.

mod mesh_cache;
mod quad_key;

pub use mesh_cache::MeshCache;
pub use quad_key::QuadKeyBuilder;

use std::sync::Arc;

use crate::cancel::CancellationToken;
use crate::element::Element;
use crate::elevation::ElevationProvider;
use crate::error::QuadResult;
use crate::mesh::Mesh;
use crate::quadkey::QuadKey;
use crate::string_table::StringTable;
use crate::style::StyleProvider;

/// Receives every mesh a builder completes.
pub type MeshCallback<'a> = Arc<dyn Fn(&Mesh) + 'a>;
/// Receives every element a builder emits back to the host.
pub type ElementCallback<'a> = Arc<dyn Fn(&Element) + 'a>;

/// Everything an element builder needs while processing one tile.
///
/// The context is a value of borrows: it lives for the duration of one
/// `build` call and is cheap to clone. The mesh cache substitutes the two
/// callbacks with teeing variants when it wraps a context.
#[derive(Clone)]
pub struct BuilderContext<'a> {
    pub quad_key: QuadKey,
    pub style_provider: &'a dyn StyleProvider,
    pub string_table: &'a StringTable,
    pub elevation_provider: &'a dyn ElevationProvider,
    pub mesh_callback: MeshCallback<'a>,
    pub element_callback: ElementCallback<'a>,
    pub cancel_token: &'a CancellationToken,
}

/// Consumes the elements of one tile and emits meshes and elements
/// through the context callbacks.
///
/// Lifecycle: `prepare` once after creation, `visit` per dispatched
/// element, then exactly one of `complete` (normal finish) or `abort`
/// (the build was cancelled; semantic output is discarded but resources
/// must still be released).
pub trait ElementBuilder {
    fn prepare(&mut self) -> QuadResult<()> {
        Ok(())
    }

    fn visit(&mut self, element: &Element);

    fn complete(&mut self) -> QuadResult<()> {
        Ok(())
    }

    fn abort(&mut self) -> QuadResult<()> {
        Ok(())
    }
}

/// Creates a builder for one build pass. The factory must not retain the
/// context reference; it clones what it needs.
pub type BuilderFactory =
    Arc<dyn for<'a> Fn(&BuilderContext<'a>) -> Box<dyn ElementBuilder + 'a> + Send + Sync>;

/// Wraps a closure as a [`BuilderFactory`].
pub fn builder_factory<F>(factory: F) -> BuilderFactory
where
    F: for<'a> Fn(&BuilderContext<'a>) -> Box<dyn ElementBuilder + 'a> + Send + Sync + 'static,
{
    Arc::new(factory)
}

/// Builder installed when a cache fetch already delivered the output.
pub struct EmptyBuilder;

impl ElementBuilder for EmptyBuilder {
    fn visit(&mut self, _element: &Element) {}
}

/// Fallback for builder names without a registered factory: forwards the
/// elements to the host through the element callback so an out-of-process
/// builder can consume them.
pub struct ExternalBuilder<'a> {
    context: BuilderContext<'a>,
}

impl<'a> ExternalBuilder<'a> {
    #[must_use]
    pub fn new(context: BuilderContext<'a>) -> Self {
        Self { context }
    }
}

impl ElementBuilder for ExternalBuilder<'_> {
    fn visit(&mut self, element: &Element) {
        (self.context.element_callback)(element);
    }
}
