use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::build::{BuilderFactory, MeshCache, QuadKeyBuilder};
use crate::cancel::CancellationToken;
use crate::element::{Area, Element, ElementVisitor, Node, Tag, Way};
use crate::elevation::{
    ElevationKind, ElevationProvider, FlatElevationProvider, GridElevationProvider,
    SrtmElevationProvider,
};
use crate::error::{QuadError, QuadResult};
use crate::geo::{BoundingBox, GeoCoordinate, LodRange};
use crate::index::{
    ElementSource, GeoStore, InMemoryElementStore, PersistentElementStore, TextQuery,
};
use crate::mesh::Mesh;
use crate::quadkey::{MAX_LOD, MIN_LOD, QuadKey};
use crate::string_table::StringTable;
use crate::style::{StyleProvider, StylesheetParser};

/// File extension of mesh cache files.
const CACHE_EXTENSION: &str = "mesh";

/// Receives one exported element: request tag, element id, tag strings
/// (key/value interleaved), vertices (lon/lat/elevation triples) and
/// style strings (key/value interleaved).
pub type ElementCallbackFn<'a> = dyn FnMut(i32, u64, &[String], &[f64], &[String]) + 'a;

/// One open index root: the string table, the store registry, the style
/// provider cache and the per-tile build pipeline.
///
/// A session is an explicit handle; hosts that need a process-wide
/// instance park it in their own slot, the core does not assume
/// uniqueness.
pub struct Session {
    index_path: PathBuf,
    string_table: Arc<StringTable>,
    geo_store: GeoStore,
    mesh_cache: Arc<MeshCache>,
    quad_key_builder: QuadKeyBuilder,
    style_providers: Mutex<HashMap<PathBuf, Arc<dyn StyleProvider>>>,
    parser: Box<dyn StylesheetParser>,
    on_new_directory: Box<dyn Fn(&Path) + Send + Sync>,
    flat_elevation: FlatElevationProvider,
    grid_elevation: GridElevationProvider,
    srtm_elevation: SrtmElevationProvider,
}

impl Session {
    /// Opens the string table under `index_path` and prepares empty store
    /// and stylesheet registries. Stylesheet parsing and directory
    /// creation stay with the host through the two callbacks.
    pub fn connect(
        index_path: impl Into<PathBuf>,
        parser: Box<dyn StylesheetParser>,
        on_new_directory: Box<dyn Fn(&Path) + Send + Sync>,
    ) -> QuadResult<Self> {
        let index_path = index_path.into();
        let string_table = Arc::new(StringTable::open(&index_path)?);
        let mesh_cache = Arc::new(MeshCache::new(&index_path, CACHE_EXTENSION));
        let quad_key_builder =
            QuadKeyBuilder::new(string_table.clone(), mesh_cache.clone())?;
        Ok(Self {
            geo_store: GeoStore::new(string_table.clone()),
            string_table,
            mesh_cache,
            quad_key_builder,
            style_providers: Mutex::new(HashMap::new()),
            parser,
            on_new_directory,
            flat_elevation: FlatElevationProvider,
            grid_elevation: GridElevationProvider::new(&index_path),
            srtm_elevation: SrtmElevationProvider::new(&index_path),
            index_path,
        })
    }

    #[must_use]
    pub fn string_table(&self) -> &Arc<StringTable> {
        &self.string_table
    }

    #[must_use]
    pub fn geo_store(&self) -> &GeoStore {
        &self.geo_store
    }

    /// Parses (or reuses) the stylesheet, announces its cache directories
    /// to the host and returns the provider's stable tag.
    pub fn register_stylesheet(&self, path: &Path) -> QuadResult<String> {
        let provider = self.style_provider(path)?;
        let tag = provider.tag().to_string();
        let cache_root = self.index_path.join("cache").join(&tag);
        for lod in MIN_LOD..=MAX_LOD {
            (self.on_new_directory)(&cache_root.join(lod.to_string()));
        }
        Ok(tag)
    }

    /// Registers a volatile in-memory store.
    pub fn register_in_memory_store(&self, key: &str) -> QuadResult<()> {
        self.geo_store.register_store(
            key,
            Arc::new(InMemoryElementStore::new(self.string_table.clone())),
        )
    }

    /// Registers a persistent store rooted at `data_path` and announces
    /// its per-level data directories to the host.
    pub fn register_persistent_store(&self, key: &str, data_path: &Path) -> QuadResult<()> {
        self.geo_store.register_store(
            key,
            Arc::new(PersistentElementStore::new(
                data_path,
                self.string_table.clone(),
            )),
        )?;
        let data_root = data_path.join("data");
        for lod in MIN_LOD..=MAX_LOD {
            (self.on_new_directory)(&data_root.join(lod.to_string()));
        }
        Ok(())
    }

    /// Globally enables or disables the mesh cache.
    pub fn enable_mesh_cache(&self, enabled: bool) {
        self.mesh_cache.set_enabled(enabled);
    }

    /// Registers a named element builder; see
    /// [`QuadKeyBuilder::register_element_builder`].
    pub fn register_element_builder(
        &self,
        name: &str,
        factory: BuilderFactory,
        use_cache: bool,
    ) {
        self.quad_key_builder
            .register_element_builder(name, factory, use_cache);
    }

    /// Ingests a source over a level range.
    pub fn add_data_in_range(
        &self,
        store_key: &str,
        style_path: &Path,
        source: &dyn ElementSource,
        range: LodRange,
        on_error: impl Fn(&str),
        cancel_token: &CancellationToken,
    ) {
        safe_execute(&on_error, || {
            let provider = self.style_provider(style_path)?;
            self.geo_store
                .add_in_range(store_key, source, range, provider.as_ref(), cancel_token)
        });
    }

    /// Ingests a source restricted to a bounding box and level range.
    #[allow(clippy::too_many_arguments)]
    pub fn add_data_in_bounding_box(
        &self,
        store_key: &str,
        style_path: &Path,
        source: &dyn ElementSource,
        bbox: BoundingBox,
        range: LodRange,
        on_error: impl Fn(&str),
        cancel_token: &CancellationToken,
    ) {
        safe_execute(&on_error, || {
            let provider = self.style_provider(style_path)?;
            self.geo_store.add_in_bbox(
                store_key,
                source,
                bbox,
                range,
                provider.as_ref(),
                cancel_token,
            )
        });
    }

    /// Ingests a source into exactly one tile.
    pub fn add_data_in_quad_key(
        &self,
        store_key: &str,
        style_path: &Path,
        source: &dyn ElementSource,
        quad_key: QuadKey,
        on_error: impl Fn(&str),
        cancel_token: &CancellationToken,
    ) {
        safe_execute(&on_error, || {
            let provider = self.style_provider(style_path)?;
            self.geo_store
                .add_to_tile(store_key, source, quad_key, provider.as_ref(), cancel_token)
        });
    }

    /// Ingests one literal element given as raw vertex and tag arrays.
    ///
    /// Vertices are `lat, lon` pairs: a single pair is a node, a ring
    /// whose last pair equals the first is an area (stored without the
    /// closing duplicate), anything else a way.
    #[allow(clippy::too_many_arguments)]
    pub fn add_data_in_element(
        &self,
        store_key: &str,
        style_path: &Path,
        id: u64,
        vertices: &[f64],
        tags: &[(&str, &str)],
        range: LodRange,
        on_error: impl Fn(&str),
        cancel_token: &CancellationToken,
    ) {
        safe_execute(&on_error, || {
            let provider = self.style_provider(style_path)?;
            let element = self.element_from_raw(id, vertices, tags)?;
            self.geo_store
                .add_element(store_key, &element, range, provider.as_ref(), cancel_token)
        });
    }

    /// Whether any registered store has data for the tile.
    #[must_use]
    pub fn has_data(&self, quad_key: QuadKey) -> bool {
        self.geo_store.has_data(quad_key)
    }

    /// Text search over all stores. Matches are exported without styles
    /// and with zero elevation.
    #[allow(clippy::too_many_arguments)]
    pub fn get_data_by_text(
        &self,
        tag: i32,
        not_terms: &str,
        and_terms: &str,
        or_terms: &str,
        bbox: BoundingBox,
        range: LodRange,
        on_element: &mut ElementCallbackFn<'_>,
        on_error: impl Fn(&str),
        cancel_token: &CancellationToken,
    ) {
        let query = TextQuery {
            not_terms: not_terms.to_string(),
            and_terms: and_terms.to_string(),
            or_terms: or_terms.to_string(),
            bounding_box: bbox,
            range,
        };
        let mut visitor = ExportElementVisitor {
            tag,
            quad_key: None,
            string_table: &self.string_table,
            style_provider: None,
            elevation_provider: None,
            callback: on_element,
            error: None,
        };
        safe_execute(&on_error, || {
            self.geo_store
                .search_text(&query, &mut visitor, cancel_token)?;
            match visitor.error.take() {
                Some(error) => Err(error),
                None => Ok(()),
            }
        });
    }

    /// Builds one tile: meshes and elements stream through the callbacks,
    /// transparently served from the mesh cache when present. Exported
    /// elements carry their style strings and real elevation.
    #[allow(clippy::too_many_arguments)]
    pub fn get_data_by_quad_key(
        &self,
        tag: i32,
        style_path: &Path,
        quad_key: QuadKey,
        elevation_type: i32,
        on_mesh: &mut dyn FnMut(i32, &Mesh),
        on_element: &mut ElementCallbackFn<'_>,
        on_error: impl Fn(&str),
        cancel_token: &CancellationToken,
    ) {
        safe_execute(&on_error, || {
            let provider = self.style_provider(style_path)?;
            let elevation = self.elevation_provider(ElevationKind::from(elevation_type));

            let visitor = RefCell::new(ExportElementVisitor {
                tag,
                quad_key: Some(quad_key),
                string_table: &self.string_table,
                style_provider: Some(provider.as_ref()),
                elevation_provider: Some(elevation),
                callback: on_element,
                error: None,
            });
            let on_mesh = RefCell::new(on_mesh);

            self.quad_key_builder.build(
                &self.geo_store,
                quad_key,
                provider.as_ref(),
                elevation,
                Arc::new(|mesh| {
                    // Empty meshes are never delivered to the host.
                    if !mesh.is_empty() {
                        (on_mesh.borrow_mut())(tag, mesh);
                    }
                }),
                Arc::new(|element| visitor.borrow_mut().visit_element(element)),
                cancel_token,
            )?;

            match visitor.into_inner().error.take() {
                Some(error) => Err(error),
                None => Ok(()),
            }
        });
    }

    /// Height at a coordinate through the selected elevation provider.
    #[must_use]
    pub fn get_elevation_by_quad_key(
        &self,
        quad_key: QuadKey,
        elevation_type: i32,
        coordinate: GeoCoordinate,
    ) -> f64 {
        self.elevation_provider(ElevationKind::from(elevation_type))
            .elevation(quad_key, coordinate)
    }

    /// Releases cached resources of every registered store.
    pub fn flush(&self) -> QuadResult<()> {
        self.geo_store.flush()
    }

    /// The cached provider for a stylesheet path, parsing it on first use.
    fn style_provider(&self, path: &Path) -> QuadResult<Arc<dyn StyleProvider>> {
        let mut providers = self
            .style_providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(provider) = providers.get(path) {
            return Ok(provider.clone());
        }
        let provider = self.parser.parse(path, &self.string_table)?;
        providers.insert(path.to_path_buf(), provider.clone());
        Ok(provider)
    }

    fn elevation_provider(&self, kind: ElevationKind) -> &dyn ElevationProvider {
        match kind {
            ElevationKind::Flat => &self.flat_elevation,
            ElevationKind::Grid => &self.grid_elevation,
            ElevationKind::Srtm => &self.srtm_elevation,
        }
    }

    fn element_from_raw(
        &self,
        id: u64,
        vertices: &[f64],
        tags: &[(&str, &str)],
    ) -> QuadResult<Element> {
        let mut element_tags = Vec::with_capacity(tags.len());
        for &(key, value) in tags {
            element_tags.push(Tag::new(
                self.string_table.get_id(key)?,
                self.string_table.get_id(value)?,
            ));
        }

        let mut coordinates: Vec<GeoCoordinate> = vertices
            .chunks_exact(2)
            .map(|pair| GeoCoordinate::new(pair[0], pair[1]))
            .collect();

        Ok(if coordinates.len() == 1 {
            Element::Node(Node {
                id,
                tags: element_tags,
                coordinate: coordinates[0],
            })
        } else if coordinates.len() > 2 && coordinates.first() == coordinates.last() {
            coordinates.pop();
            Element::Area(Area {
                id,
                tags: element_tags,
                coordinates,
            })
        } else {
            Element::Way(Way {
                id,
                tags: element_tags,
                coordinates,
            })
        })
    }
}

fn safe_execute(on_error: &impl Fn(&str), operation: impl FnOnce() -> QuadResult<()>) {
    if let Err(error) = operation() {
        on_error(&error.to_string());
    }
}

/// Renders elements into the flat payload the host callbacks consume.
struct ExportElementVisitor<'a, 'b> {
    tag: i32,
    quad_key: Option<QuadKey>,
    string_table: &'a StringTable,
    style_provider: Option<&'a dyn StyleProvider>,
    elevation_provider: Option<&'a dyn ElevationProvider>,
    callback: &'b mut ElementCallbackFn<'a>,
    error: Option<QuadError>,
}

impl ElementVisitor for ExportElementVisitor<'_, '_> {
    fn visit_element(&mut self, element: &Element) {
        if self.error.is_some() {
            return;
        }
        if let Err(error) = self.export(element) {
            self.error = Some(error);
        }
    }
}

impl ExportElementVisitor<'_, '_> {
    fn export(&mut self, element: &Element) -> QuadResult<()> {
        let single;
        let coordinates: &[GeoCoordinate] = match element {
            Element::Node(node) => {
                single = [node.coordinate];
                &single
            }
            Element::Way(way) => &way.coordinates,
            Element::Area(area) => &area.coordinates,
            Element::Relation(_) => {
                // Relation geometry is not flattened for export.
                single = [GeoCoordinate::new(0.0, 0.0)];
                &single
            }
        };

        let mut tag_strings = Vec::with_capacity(element.tags().len() * 2);
        for tag in element.tags() {
            tag_strings.push(self.string_table.get_string(tag.key)?);
            tag_strings.push(self.string_table.get_string(tag.value)?);
        }

        let mut vertices = Vec::with_capacity(coordinates.len() * 3);
        for &coordinate in coordinates {
            vertices.push(coordinate.longitude);
            vertices.push(coordinate.latitude);
            vertices.push(match (self.elevation_provider, self.quad_key) {
                (Some(provider), Some(quad_key)) => provider.elevation(quad_key, coordinate),
                _ => 0.0,
            });
        }

        let mut style_strings = Vec::new();
        if let (Some(provider), Some(quad_key)) = (self.style_provider, self.quad_key) {
            let style = provider.for_element(element, quad_key.lod);
            style_strings.reserve(style.declarations().len() * 2);
            for (key, value) in style.declarations() {
                style_strings.push(self.string_table.get_string(*key)?);
                style_strings.push(value.clone());
            }
        }

        (self.callback)(
            self.tag,
            element.id(),
            &tag_strings,
            &vertices,
            &style_strings,
        );
        Ok(())
    }
}
