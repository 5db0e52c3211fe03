use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use crate::build::mesh_cache::CacheBuilder;
use crate::build::{
    BuilderContext, BuilderFactory, ElementBuilder, ElementCallback, ExternalBuilder,
    MeshCache, MeshCallback,
};
use crate::cancel::CancellationToken;
use crate::element::{Element, ElementVisitor};
use crate::elevation::ElevationProvider;
use crate::error::QuadResult;
use crate::index::GeoStore;
use crate::quadkey::QuadKey;
use crate::string_table::StringTable;
use crate::style::StyleProvider;

/// Style declaration key that lists the builders for an element.
const BUILDERS_KEY: &str = "builders";

/// Turns one tile into a stream of meshes and element notifications by
/// dispatching every stored element through the `builders` directive of
/// its resolved style.
pub struct QuadKeyBuilder {
    string_table: Arc<StringTable>,
    mesh_cache: Arc<MeshCache>,
    builders_key: u32,
    factories: RwLock<HashMap<String, BuilderFactory>>,
}

impl QuadKeyBuilder {
    pub fn new(string_table: Arc<StringTable>, mesh_cache: Arc<MeshCache>) -> QuadResult<Self> {
        let builders_key = string_table.get_id(BUILDERS_KEY)?;
        Ok(Self {
            string_table,
            mesh_cache,
            builders_key,
            factories: RwLock::new(HashMap::new()),
        })
    }

    /// Registers a builder factory under a name referenced by stylesheet
    /// `builders` directives. With `use_cache`, the builder is decorated
    /// so a finished cache file short-circuits the whole build of its
    /// tile.
    pub fn register_element_builder(&self, name: &str, factory: BuilderFactory, use_cache: bool) {
        let factory = if use_cache {
            let cache = self.mesh_cache.clone();
            let factory = factory.clone();
            crate::build::builder_factory(move |context: &BuilderContext<'_>| {
                Box::new(CacheBuilder::new(
                    cache.clone(),
                    factory.clone(),
                    context.clone(),
                ))
            })
        } else {
            factory
        };
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), factory);
    }

    /// Builds one tile: scans its elements through the geo store, feeds
    /// them to the named builders and completes the builders in creation
    /// order. A cancelled build skips the remaining semantic completions
    /// but still releases builder resources.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &self,
        geo_store: &GeoStore,
        quad_key: QuadKey,
        style_provider: &dyn StyleProvider,
        elevation_provider: &dyn ElevationProvider,
        mesh_callback: MeshCallback<'_>,
        element_callback: ElementCallback<'_>,
        cancel_token: &CancellationToken,
    ) -> QuadResult<()> {
        let context = BuilderContext {
            quad_key,
            style_provider,
            string_table: &self.string_table,
            elevation_provider,
            mesh_callback,
            element_callback,
            cancel_token,
        };
        let factories = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut dispatcher = BuilderDispatcher {
            context: &context,
            factories: &factories,
            builders_key: self.builders_key,
            builders: Vec::new(),
            builder_index: HashMap::new(),
            seen_ids: HashSet::new(),
            error: None,
        };
        geo_store.search_tile(quad_key, style_provider, &mut dispatcher, cancel_token)?;
        dispatcher.finish()
    }
}

/// Routes elements to builders while a tile is being scanned.
///
/// Builders are created lazily and memoized by name, so a name repeated
/// in a `builders` directive dispatches once, and `complete` runs in
/// creation order. Elements with a non-zero id are dispatched at most
/// once per build.
struct BuilderDispatcher<'a, 'b> {
    context: &'b BuilderContext<'a>,
    factories: &'b HashMap<String, BuilderFactory>,
    builders_key: u32,
    builders: Vec<(String, Box<dyn ElementBuilder + 'a>)>,
    builder_index: HashMap<String, usize>,
    seen_ids: HashSet<u64>,
    error: Option<crate::error::QuadError>,
}

impl ElementVisitor for BuilderDispatcher<'_, '_> {
    fn visit_element(&mut self, element: &Element) {
        if self.error.is_some() || self.context.cancel_token.is_cancelled() {
            return;
        }

        let style = self
            .context
            .style_provider
            .for_element(element, self.context.quad_key.lod);
        let Some(names) = style.get(self.builders_key) else {
            return;
        };
        if element.id() != 0 && !self.seen_ids.insert(element.id()) {
            return;
        }

        let names = names.to_string();
        for name in names.split(',') {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            match self.builder(name) {
                Ok(index) => self.builders[index].1.visit(element),
                Err(error) => {
                    self.error = Some(error);
                    return;
                }
            }
        }
    }
}

impl<'a> BuilderDispatcher<'a, '_> {
    /// The builder registered under `name`, created and prepared on first
    /// use; unknown names fall back to the external builder.
    fn builder(&mut self, name: &str) -> QuadResult<usize> {
        if let Some(&index) = self.builder_index.get(name) {
            return Ok(index);
        }

        let mut builder: Box<dyn ElementBuilder + 'a> = match self.factories.get(name) {
            Some(factory) => factory(self.context),
            None => Box::new(ExternalBuilder::new(self.context.clone())),
        };
        builder.prepare()?;

        let index = self.builders.len();
        self.builders.push((name.to_string(), builder));
        self.builder_index.insert(name.to_string(), index);
        Ok(index)
    }

    /// Runs the completion phase and surfaces the first recorded error.
    fn finish(mut self) -> QuadResult<()> {
        let mut completion_error = None;
        for (name, builder) in &mut self.builders {
            // Cancellation may fire between completions.
            let result = if self.context.cancel_token.is_cancelled() {
                builder.abort()
            } else {
                builder.complete()
            };
            if let Err(error) = result {
                log::warn!("builder {name} failed to complete: {error}");
                completion_error.get_or_insert(error);
            }
        }

        match self.error.take() {
            Some(error) => Err(error),
            None => match completion_error {
                Some(error) => Err(error),
                None => Ok(()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::TempDir;

    use super::*;
    use crate::element::{Node, Tag};
    use crate::elevation::FlatElevationProvider;
    use crate::geo::{GeoCoordinate, LodRange};
    use crate::index::InMemoryElementStore;
    use crate::mesh::Mesh;
    use crate::test_util::TestStyleProvider;

    struct Fixture {
        _dir: TempDir,
        string_table: Arc<StringTable>,
        geo_store: GeoStore,
        mesh_cache: Arc<MeshCache>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let string_table = Arc::new(StringTable::open(dir.path()).unwrap());
            let geo_store = GeoStore::new(string_table.clone());
            geo_store
                .register_store(
                    "mem",
                    Arc::new(InMemoryElementStore::new(string_table.clone())),
                )
                .unwrap();
            let mesh_cache = Arc::new(MeshCache::new(dir.path(), "mesh"));
            Self {
                _dir: dir,
                string_table,
                geo_store,
                mesh_cache,
            }
        }

        fn quad_key_builder(&self) -> QuadKeyBuilder {
            QuadKeyBuilder::new(self.string_table.clone(), self.mesh_cache.clone()).unwrap()
        }

        fn style(&self, builders: &str) -> TestStyleProvider {
            TestStyleProvider::with_builders(&self.string_table, builders)
        }

        fn add_node(&self, id: u64, style: &TestStyleProvider) {
            let node = Element::Node(Node {
                id,
                tags: vec![Tag::new(
                    self.string_table.get_id("natural").unwrap(),
                    self.string_table.get_id("tree").unwrap(),
                )],
                coordinate: GeoCoordinate::new(52.0, 13.0),
            });
            self.geo_store
                .add_element(
                    "mem",
                    &node,
                    LodRange::new(1, 1).unwrap(),
                    style,
                    &CancellationToken::new(),
                )
                .unwrap();
        }
    }

    /// Records visit and lifecycle calls; emits one mesh on completion.
    struct RecordingBuilder<'a> {
        name: String,
        visited: Arc<std::sync::Mutex<Vec<u64>>>,
        completions: Arc<AtomicUsize>,
        mesh_callback: MeshCallback<'a>,
    }

    impl ElementBuilder for RecordingBuilder<'_> {
        fn visit(&mut self, element: &Element) {
            self.visited.lock().unwrap().push(element.id());
        }

        fn complete(&mut self) -> QuadResult<()> {
            self.completions.fetch_add(1, Ordering::SeqCst);
            let mut mesh = Mesh::new(self.name.clone());
            mesh.vertices.extend([13.0, 52.0, 0.0]);
            (self.mesh_callback)(&mesh);
            Ok(())
        }
    }

    #[test]
    fn elements_are_dispatched_to_listed_builders() {
        let fixture = Fixture::new();
        let style = fixture.style("terrain");
        fixture.add_node(1, &style);
        fixture.add_node(2, &style);

        let visited = Arc::new(std::sync::Mutex::new(Vec::new()));
        let completions = Arc::new(AtomicUsize::new(0));
        let builder = fixture.quad_key_builder();
        {
            let visited = visited.clone();
            let completions = completions.clone();
            builder.register_element_builder(
                "terrain",
                crate::build::builder_factory(move |context: &BuilderContext<'_>| {
                    Box::new(RecordingBuilder {
                        name: "terrain".to_string(),
                        visited: visited.clone(),
                        completions: completions.clone(),
                        mesh_callback: context.mesh_callback.clone(),
                    })
                }),
                false,
            );
        }

        let meshes = RefCell::new(Vec::new());
        let elements = RefCell::new(Vec::new());
        builder
            .build(
                &fixture.geo_store,
                QuadKey::new(1, 1, 0).unwrap(),
                &style,
                &FlatElevationProvider,
                Arc::new(|mesh| meshes.borrow_mut().push(mesh.name.clone())),
                Arc::new(|element| elements.borrow_mut().push(element.id())),
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(*visited.lock().unwrap(), vec![1, 2]);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(*meshes.borrow(), vec!["terrain"]);
    }

    #[test]
    fn unknown_builder_name_falls_back_to_external() {
        let fixture = Fixture::new();
        let style = fixture.style("no-such-builder");
        fixture.add_node(11, &style);

        let builder = fixture.quad_key_builder();
        let elements = RefCell::new(Vec::new());
        builder
            .build(
                &fixture.geo_store,
                QuadKey::new(1, 1, 0).unwrap(),
                &style,
                &FlatElevationProvider,
                Arc::new(|_mesh| {}),
                Arc::new(|element| elements.borrow_mut().push(element.id())),
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(*elements.borrow(), vec![11]);
    }

    #[test]
    fn repeated_ids_and_names_dispatch_once() {
        let fixture = Fixture::new();
        // The directive repeats the name; the element id repeats in store.
        let style = fixture.style("terrain, terrain");
        fixture.add_node(5, &style);
        fixture.add_node(5, &style);

        let visited = Arc::new(std::sync::Mutex::new(Vec::new()));
        let completions = Arc::new(AtomicUsize::new(0));
        let builder = fixture.quad_key_builder();
        {
            let visited = visited.clone();
            let completions = completions.clone();
            builder.register_element_builder(
                "terrain",
                crate::build::builder_factory(move |context: &BuilderContext<'_>| {
                    Box::new(RecordingBuilder {
                        name: "terrain".to_string(),
                        visited: visited.clone(),
                        completions: completions.clone(),
                        mesh_callback: context.mesh_callback.clone(),
                    })
                }),
                false,
            );
        }

        builder
            .build(
                &fixture.geo_store,
                QuadKey::new(1, 1, 0).unwrap(),
                &style,
                &FlatElevationProvider,
                Arc::new(|_mesh| {}),
                Arc::new(|_element| {}),
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(*visited.lock().unwrap(), vec![5]);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cached_builder_short_circuits_the_second_build() {
        let fixture = Fixture::new();
        let style = fixture.style("terrain");
        fixture.add_node(1, &style);

        let visited = Arc::new(std::sync::Mutex::new(Vec::new()));
        let completions = Arc::new(AtomicUsize::new(0));
        let builder = fixture.quad_key_builder();
        {
            let visited = visited.clone();
            let completions = completions.clone();
            builder.register_element_builder(
                "terrain",
                crate::build::builder_factory(move |context: &BuilderContext<'_>| {
                    Box::new(RecordingBuilder {
                        name: "terrain".to_string(),
                        visited: visited.clone(),
                        completions: completions.clone(),
                        mesh_callback: context.mesh_callback.clone(),
                    })
                }),
                true,
            );
        }

        let run = |expected_from_cache: bool| {
            let meshes = RefCell::new(Vec::new());
            builder
                .build(
                    &fixture.geo_store,
                    QuadKey::new(1, 1, 0).unwrap(),
                    &style,
                    &FlatElevationProvider,
                    Arc::new(|mesh: &Mesh| meshes.borrow_mut().push(mesh.name.clone())),
                    Arc::new(|_element| {}),
                    &CancellationToken::new(),
                )
                .unwrap();
            let names = meshes.into_inner();
            assert_eq!(names, vec!["terrain"], "from cache: {expected_from_cache}");
        };

        run(false);
        assert_eq!(completions.load(Ordering::SeqCst), 1);

        // Second build replays the cache file; the real builder never runs.
        run(true);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(*visited.lock().unwrap(), vec![1]);
    }
}
