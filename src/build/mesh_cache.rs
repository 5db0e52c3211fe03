use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::build::{BuilderContext, BuilderFactory, ElementBuilder, EmptyBuilder};
use crate::element::Element;
use crate::error::{QuadError, QuadResult};
use crate::index::wire;
use crate::index::{ElementStream, MeshStream};
use crate::mesh::Mesh;
use crate::quadkey::QuadKey;

const ELEMENT_RECORD: u8 = 0;
const MESH_RECORD: u8 = 1;

type CacheWriter = Arc<Mutex<File>>;

struct CacheState {
    enabled: bool,
    /// Tiles with an open cache write stream. While a tile is in here,
    /// readers treat it as not present on disk.
    in_progress: BTreeMap<QuadKey, CacheWriter>,
}

/// Memoizes per-tile builder output on disk.
///
/// Cache files live under `<data path>/cache/<style tag>/<lod>/` and hold
/// a sequence of typed records (element or mesh). A single mutex guards
/// the in-progress map and the enable flag; record writes happen on the
/// stream's own lock after the map lock has been released, so two
/// concurrent builds for the same tile resolve to exactly one writer.
/// The second behaves as if there were no cache at all.
pub struct MeshCache {
    data_path: PathBuf,
    extension: String,
    state: Mutex<CacheState>,
}

impl MeshCache {
    #[must_use]
    pub fn new(data_path: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            data_path: data_path.into(),
            extension: extension.to_string(),
            state: Mutex::new(CacheState {
                enabled: true,
                in_progress: BTreeMap::new(),
            }),
        }
    }

    /// Globally enables or disables caching. Disabled: `wrap` is identity
    /// and `fetch` never hits.
    pub fn set_enabled(&self, enabled: bool) {
        self.lock_state().enabled = enabled;
    }

    /// Returns a context whose callbacks tee every mesh and element into
    /// the tile's cache file, or the context unchanged when the tile is
    /// already cached, currently being written by another build, or
    /// caching is disabled.
    pub fn wrap<'a>(&self, context: &BuilderContext<'a>) -> QuadResult<BuilderContext<'a>> {
        let file_path = self.file_path(context);
        let writer = {
            let mut state = self.lock_state();
            if !state.enabled
                || state.in_progress.contains_key(&context.quad_key)
                || file_exists_non_empty(&file_path)
            {
                return Ok(context.clone());
            }

            if let Some(parent) = file_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().append(true).create(true).open(&file_path)?;
            let writer: CacheWriter = Arc::new(Mutex::new(file));
            state.in_progress.insert(context.quad_key, writer.clone());
            writer
        };

        let mesh_callback = {
            let writer = writer.clone();
            let inner = context.mesh_callback.clone();
            Arc::new(move |mesh: &Mesh| {
                if let Err(error) = write_mesh_record(&writer, mesh) {
                    log::warn!("mesh cache write failed: {error}");
                }
                inner(mesh);
            })
        };
        let element_callback = {
            let inner = context.element_callback.clone();
            Arc::new(move |element: &Element| {
                if let Err(error) = write_element_record(&writer, element) {
                    log::warn!("mesh cache write failed: {error}");
                }
                inner(element);
            })
        };

        Ok(BuilderContext {
            mesh_callback,
            element_callback,
            ..context.clone()
        })
    }

    /// Replays a cached tile through the context callbacks. Returns false
    /// when the tile has no finished cache file.
    pub fn fetch(&self, context: &BuilderContext<'_>) -> QuadResult<bool> {
        let file_path = self.file_path(context);
        {
            let state = self.lock_state();
            if !state.enabled
                || state.in_progress.contains_key(&context.quad_key)
                || !file_exists_non_empty(&file_path)
            {
                return Ok(false);
            }
        }

        let mut reader = BufReader::new(File::open(&file_path)?);
        while !context.cancel_token.is_cancelled() {
            let record_type = match wire::read_u8(&mut reader) {
                Ok(record_type) => record_type,
                Err(ref error) if wire::is_eof(error) => break,
                Err(error) => return Err(QuadError::Io(error)),
            };
            match record_type {
                MESH_RECORD => {
                    let mesh = MeshStream::read(&mut reader)?;
                    (context.mesh_callback)(&mesh);
                }
                ELEMENT_RECORD => {
                    let _id = wire::read_u64(&mut reader)?;
                    let element = ElementStream::read(&mut reader)?;
                    (context.element_callback)(&element);
                }
                unknown => return Err(QuadError::CorruptCache(unknown)),
            }
        }
        Ok(true)
    }

    /// Finishes the tile's cache write, if one is in progress. A cancelled
    /// build deletes the file: a partially written record stream is never
    /// kept.
    pub fn unwrap(&self, context: &BuilderContext<'_>) -> QuadResult<()> {
        let writer = {
            let mut state = self.lock_state();
            state.in_progress.remove(&context.quad_key)
        };
        let Some(writer) = writer else {
            return Ok(());
        };

        writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()?;
        drop(writer);

        if context.cancel_token.is_cancelled() {
            let file_path = self.file_path(context);
            log::debug!("dropping cancelled cache file {}", file_path.display());
            match std::fs::remove_file(&file_path) {
                Ok(()) => {}
                Err(ref error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => return Err(QuadError::Io(error)),
            }
        }
        Ok(())
    }

    fn file_path(&self, context: &BuilderContext<'_>) -> PathBuf {
        self.data_path
            .join("cache")
            .join(context.style_provider.tag())
            .join(context.quad_key.lod.to_string())
            .join(format!("{}.{}", context.quad_key.to_base4(), self.extension))
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn file_exists_non_empty(path: &std::path::Path) -> bool {
    std::fs::metadata(path)
        .map(|metadata| metadata.len() > 0)
        .unwrap_or(false)
}

fn write_mesh_record(writer: &CacheWriter, mesh: &Mesh) -> QuadResult<()> {
    let mut file = writer.lock().unwrap_or_else(PoisonError::into_inner);
    file.write_all(&[MESH_RECORD])?;
    MeshStream::write(&mut *file, mesh)
}

fn write_element_record(writer: &CacheWriter, element: &Element) -> QuadResult<()> {
    let mut file = writer.lock().unwrap_or_else(PoisonError::into_inner);
    file.write_all(&[ELEMENT_RECORD])?;
    file.write_all(&element.id().to_le_bytes())?;
    ElementStream::write(&mut *file, element)
}

/// Decorates a registered builder with the cache: a hit replaces the real
/// builder with a no-op, a miss runs it against the cache-wrapped context.
pub(crate) struct CacheBuilder<'a> {
    cache: Arc<MeshCache>,
    factory: BuilderFactory,
    context: BuilderContext<'a>,
    cache_context: Option<BuilderContext<'a>>,
    inner: Option<Box<dyn ElementBuilder + 'a>>,
}

impl<'a> CacheBuilder<'a> {
    pub(crate) fn new(
        cache: Arc<MeshCache>,
        factory: BuilderFactory,
        context: BuilderContext<'a>,
    ) -> Self {
        Self {
            cache,
            factory,
            context,
            cache_context: None,
            inner: None,
        }
    }
}

impl ElementBuilder for CacheBuilder<'_> {
    fn prepare(&mut self) -> QuadResult<()> {
        if self.cache.fetch(&self.context)? {
            self.inner = Some(Box::new(EmptyBuilder));
            return Ok(());
        }

        let wrapped = self.cache.wrap(&self.context)?;
        let mut builder = (self.factory)(&wrapped);
        self.cache_context = Some(wrapped);
        builder.prepare()?;
        self.inner = Some(builder);
        Ok(())
    }

    fn visit(&mut self, element: &Element) {
        if let Some(builder) = self.inner.as_mut() {
            builder.visit(element);
        }
    }

    fn complete(&mut self) -> QuadResult<()> {
        let result = match self.inner.as_mut() {
            Some(builder) => builder.complete(),
            None => Ok(()),
        };
        if let Some(cache_context) = self.cache_context.take() {
            self.cache.unwrap(&cache_context)?;
        }
        result
    }

    fn abort(&mut self) -> QuadResult<()> {
        // Skip the inner builder's completion entirely, but still release
        // the cache entry so the partial file is deleted.
        if let Some(cache_context) = self.cache_context.take() {
            self.cache.unwrap(&cache_context)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::cancel::CancellationToken;
    use crate::element::{Area, Node, Way};
    use crate::elevation::FlatElevationProvider;
    use crate::geo::GeoCoordinate;
    use crate::string_table::StringTable;
    use crate::style::StyleProvider;
    use crate::test_util::TestStyleProvider;

    const QUAD_KEY: (u8, i32, i32) = (1, 0, 0);

    struct Fixture {
        dir: TempDir,
        string_table: Arc<StringTable>,
        style: TestStyleProvider,
        elevation: FlatElevationProvider,
        cancel: CancellationToken,
        seen_ids: RefCell<Vec<u64>>,
        seen_meshes: RefCell<Vec<String>>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let string_table = Arc::new(StringTable::open(dir.path()).unwrap());
            Self {
                dir,
                string_table,
                style: TestStyleProvider::clip_everything(),
                elevation: FlatElevationProvider,
                cancel: CancellationToken::new(),
                seen_ids: RefCell::new(Vec::new()),
                seen_meshes: RefCell::new(Vec::new()),
            }
        }

        fn cache(&self) -> MeshCache {
            MeshCache::new(self.dir.path(), "mesh")
        }

        fn context(&self) -> BuilderContext<'_> {
            let quad_key = QuadKey::new(QUAD_KEY.0, QUAD_KEY.1, QUAD_KEY.2).unwrap();
            let seen_meshes = &self.seen_meshes;
            let seen_ids = &self.seen_ids;
            BuilderContext {
                quad_key,
                style_provider: &self.style,
                string_table: &self.string_table,
                elevation_provider: &self.elevation,
                mesh_callback: Arc::new(move |mesh| {
                    seen_meshes.borrow_mut().push(mesh.name.clone());
                }),
                element_callback: Arc::new(move |element| {
                    seen_ids.borrow_mut().push(element.id());
                }),
                cancel_token: &self.cancel,
            }
        }

        fn reset(&self) {
            self.seen_ids.borrow_mut().clear();
            self.seen_meshes.borrow_mut().clear();
        }
    }

    fn sample_elements() -> Vec<Element> {
        vec![
            Element::Node(Node {
                id: 1,
                tags: vec![],
                coordinate: GeoCoordinate::new(0.5, -0.5),
            }),
            Element::Way(Way {
                id: 7,
                tags: vec![],
                coordinates: vec![
                    GeoCoordinate::new(1.0, -1.0),
                    GeoCoordinate::new(5.0, -5.0),
                ],
            }),
            Element::Area(Area {
                id: 7,
                tags: vec![],
                coordinates: vec![
                    GeoCoordinate::new(1.0, -1.0),
                    GeoCoordinate::new(5.0, -5.0),
                    GeoCoordinate::new(10.0, -10.0),
                ],
            }),
        ]
    }

    #[test]
    fn wrapped_context_stores_and_fetch_replays() {
        let fixture = Fixture::new();
        let cache = fixture.cache();
        let context = fixture.context();

        let wrapped = cache.wrap(&context).unwrap();
        for element in &sample_elements() {
            (wrapped.element_callback)(element);
        }
        let mut mesh = Mesh::new("M");
        mesh.vertices.extend([1.0, 2.0, 3.0]);
        mesh.triangles.push(0);
        (wrapped.mesh_callback)(&mesh);

        // The original callbacks were invoked through the tee.
        assert_eq!(*fixture.seen_ids.borrow(), vec![1, 7, 7]);
        assert_eq!(*fixture.seen_meshes.borrow(), vec!["M"]);

        cache.unwrap(&wrapped).unwrap();
        fixture.reset();

        assert!(cache.fetch(&context).unwrap());
        assert_eq!(*fixture.seen_ids.borrow(), vec![1, 7, 7]);
        assert_eq!(*fixture.seen_meshes.borrow(), vec!["M"]);
    }

    #[test]
    fn fetch_misses_while_write_is_in_progress() {
        let fixture = Fixture::new();
        let cache = fixture.cache();
        let context = fixture.context();

        let wrapped = cache.wrap(&context).unwrap();
        assert!(!cache.fetch(&context).unwrap());

        cache.unwrap(&wrapped).unwrap();
    }

    #[test]
    fn second_wrap_for_the_same_tile_sees_no_cache() {
        let fixture = Fixture::new();
        let cache = fixture.cache();
        let context = fixture.context();

        let first = cache.wrap(&context).unwrap();
        let second = cache.wrap(&context).unwrap();

        // The second wrap is an identity: emitting through it must not
        // touch the cache file.
        (second.element_callback)(&sample_elements()[0]);
        assert!(Arc::ptr_eq(&second.element_callback, &context.element_callback));

        (first.element_callback)(&sample_elements()[1]);
        cache.unwrap(&first).unwrap();
        fixture.reset();

        assert!(cache.fetch(&context).unwrap());
        assert_eq!(*fixture.seen_ids.borrow(), vec![7]);
    }

    #[test]
    fn cancelled_unwrap_deletes_the_partial_file() {
        let fixture = Fixture::new();
        let cache = fixture.cache();
        let context = fixture.context();

        let wrapped = cache.wrap(&context).unwrap();
        (wrapped.element_callback)(&sample_elements()[0]);

        fixture.cancel.cancel();
        cache.unwrap(&wrapped).unwrap();

        let tag = fixture.style.tag().to_string();
        let file = fixture
            .dir
            .path()
            .join("cache")
            .join(tag)
            .join("1")
            .join("0.mesh");
        assert!(!file.exists());
    }

    #[test]
    fn disabled_cache_is_inert() {
        let fixture = Fixture::new();
        let cache = fixture.cache();
        cache.set_enabled(false);
        let context = fixture.context();

        let wrapped = cache.wrap(&context).unwrap();
        assert!(Arc::ptr_eq(&wrapped.element_callback, &context.element_callback));
        assert!(!cache.fetch(&context).unwrap());
        cache.unwrap(&wrapped).unwrap();
    }

    #[test]
    fn corrupt_record_type_fails_the_fetch() {
        let fixture = Fixture::new();
        let cache = fixture.cache();
        let context = fixture.context();

        let wrapped = cache.wrap(&context).unwrap();
        (wrapped.element_callback)(&sample_elements()[0]);
        cache.unwrap(&wrapped).unwrap();

        let tag = fixture.style.tag().to_string();
        let file = fixture
            .dir
            .path()
            .join("cache")
            .join(tag)
            .join("1")
            .join("0.mesh");
        let mut bytes = std::fs::read(&file).unwrap();
        bytes[0] = 0x7F;
        std::fs::write(&file, bytes).unwrap();

        assert!(matches!(
            cache.fetch(&context),
            Err(QuadError::CorruptCache(0x7F))
        ));
    }
}
