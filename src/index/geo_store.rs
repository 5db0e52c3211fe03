use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use crate::cancel::CancellationToken;
use crate::element::{Element, ElementVisitor, FilteredVisitor};
use crate::error::{QuadError, QuadResult};
use crate::geo::{BoundingBox, LodRange};
use crate::index::bitmap::TextQuery;
use crate::index::clipper::GeometryClipper;
use crate::index::store::{ElementSource, ElementStore};
use crate::quadkey::{self, QuadKey};
use crate::string_table::StringTable;
use crate::style::{ClipPolicy, StyleProvider};

/// Fan-out over registered element stores plus the ingest orchestration:
/// clipping elements into tiles, tracking written tiles and rolling them
/// back when an ingest is cancelled.
pub struct GeoStore {
    string_table: Arc<StringTable>,
    stores: RwLock<BTreeMap<String, Arc<dyn ElementStore>>>,
}

impl GeoStore {
    #[must_use]
    pub fn new(string_table: Arc<StringTable>) -> Self {
        Self {
            string_table,
            stores: RwLock::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn string_table(&self) -> &Arc<StringTable> {
        &self.string_table
    }

    /// Registers a store under a unique key.
    pub fn register_store(&self, key: &str, store: Arc<dyn ElementStore>) -> QuadResult<()> {
        let mut stores = self.stores.write().unwrap_or_else(PoisonError::into_inner);
        if stores.contains_key(key) {
            return Err(QuadError::DuplicateStore(key.to_string()));
        }
        stores.insert(key.to_string(), store);
        Ok(())
    }

    /// Ingests a source into exactly one tile.
    pub fn add_to_tile(
        &self,
        store_key: &str,
        source: &dyn ElementSource,
        quad_key: QuadKey,
        style_provider: &dyn StyleProvider,
        cancel_token: &CancellationToken,
    ) -> QuadResult<()> {
        self.add_impl(store_key, source, Target::Tile(quad_key), style_provider, cancel_token)
    }

    /// Ingests a source into every intersecting tile of the box over the
    /// level range.
    pub fn add_in_bbox(
        &self,
        store_key: &str,
        source: &dyn ElementSource,
        bbox: BoundingBox,
        range: LodRange,
        style_provider: &dyn StyleProvider,
        cancel_token: &CancellationToken,
    ) -> QuadResult<()> {
        self.add_impl(
            store_key,
            source,
            Target::Area { bbox, range },
            style_provider,
            cancel_token,
        )
    }

    /// Ingests a source over the level range without a box constraint.
    pub fn add_in_range(
        &self,
        store_key: &str,
        source: &dyn ElementSource,
        range: LodRange,
        style_provider: &dyn StyleProvider,
        cancel_token: &CancellationToken,
    ) -> QuadResult<()> {
        self.add_in_bbox(
            store_key,
            source,
            BoundingBox::world(),
            range,
            style_provider,
            cancel_token,
        )
    }

    /// Ingests one literal element over the level range.
    pub fn add_element(
        &self,
        store_key: &str,
        element: &Element,
        range: LodRange,
        style_provider: &dyn StyleProvider,
        cancel_token: &CancellationToken,
    ) -> QuadResult<()> {
        let source = vec![element.clone()];
        self.add_in_range(store_key, &source, range, style_provider, cancel_token)
    }

    /// Runs a text query against every registered store.
    pub fn search_text(
        &self,
        query: &TextQuery,
        visitor: &mut dyn ElementVisitor,
        cancel_token: &CancellationToken,
    ) -> QuadResult<()> {
        for store in self.snapshot() {
            if cancel_token.is_cancelled() {
                break;
            }
            store.search_text(query, visitor, cancel_token)?;
        }
        Ok(())
    }

    /// Scans one tile across every registered store, forwarding only
    /// elements that resolve to a non-empty style at the tile's level.
    pub fn search_tile(
        &self,
        quad_key: QuadKey,
        style_provider: &dyn StyleProvider,
        visitor: &mut dyn ElementVisitor,
        cancel_token: &CancellationToken,
    ) -> QuadResult<()> {
        let mut filtered = FilteredVisitor::new(visitor, |element| {
            !style_provider.for_element(element, quad_key.lod).is_empty()
        });
        for store in self.snapshot() {
            if cancel_token.is_cancelled() {
                break;
            }
            store.search_tile(quad_key, &mut filtered, cancel_token)?;
        }
        Ok(())
    }

    /// Whether any registered store has data for the tile.
    #[must_use]
    pub fn has_data(&self, quad_key: QuadKey) -> bool {
        self.snapshot().iter().any(|store| store.has_data(quad_key))
    }

    /// Releases cached resources of every registered store.
    pub fn flush(&self) -> QuadResult<()> {
        for store in self.snapshot() {
            store.flush()?;
        }
        Ok(())
    }

    fn store(&self, key: &str) -> QuadResult<Arc<dyn ElementStore>> {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| QuadError::UnknownStore(key.to_string()))
    }

    fn snapshot(&self) -> Vec<Arc<dyn ElementStore>> {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn add_impl(
        &self,
        store_key: &str,
        source: &dyn ElementSource,
        target: Target,
        style_provider: &dyn StyleProvider,
        cancel_token: &CancellationToken,
    ) -> QuadResult<()> {
        let store = self.store(store_key)?;
        let mut session = IngestSession {
            store: store.as_ref(),
            style_provider,
            clippers: BTreeMap::new(),
            touched: BTreeSet::new(),
        };

        let outcome = source.for_each(&mut |element| {
            if cancel_token.is_cancelled() {
                return Ok(false);
            }
            match target {
                Target::Tile(quad_key) => session.save_into_tile(element, quad_key)?,
                Target::Area { bbox, range } => {
                    let element_bbox = element.bounding_box();
                    let Some(covered) = element_bbox.intersection(&bbox) else {
                        return Ok(true);
                    };
                    for lod in range.levels() {
                        quadkey::for_each_in_bbox(&covered, lod, |quad_key| {
                            session.save_into_tile(element, quad_key)
                        })?;
                    }
                }
            }
            Ok(true)
        });

        // A cancelled ingest leaves no partial tiles behind.
        if cancel_token.is_cancelled() {
            session.rollback();
            return Ok(());
        }
        outcome
    }
}

#[derive(Clone, Copy)]
enum Target {
    Tile(QuadKey),
    Area { bbox: BoundingBox, range: LodRange },
}

/// Per-`add` bookkeeping: clippers are built once per touched tile, and
/// every written tile is recorded for rollback.
struct IngestSession<'a> {
    store: &'a dyn ElementStore,
    style_provider: &'a dyn StyleProvider,
    clippers: BTreeMap<QuadKey, GeometryClipper>,
    touched: BTreeSet<QuadKey>,
}

impl IngestSession<'_> {
    fn save_into_tile(&mut self, element: &Element, quad_key: QuadKey) -> QuadResult<()> {
        match self.style_provider.clip_policy(element, quad_key.lod) {
            ClipPolicy::Skip => Ok(()),
            ClipPolicy::Copy => {
                self.store.save(element, quad_key)?;
                self.touched.insert(quad_key);
                Ok(())
            }
            ClipPolicy::Clip => {
                let clipper = self
                    .clippers
                    .entry(quad_key)
                    .or_insert_with(|| GeometryClipper::new(quad_key));
                if let Some(clipped) = clipper.clip(element) {
                    self.store.save(&clipped, quad_key)?;
                    self.touched.insert(quad_key);
                }
                Ok(())
            }
        }
    }

    fn rollback(&mut self) {
        for &quad_key in &self.touched {
            if let Err(error) = self.store.erase_tile(quad_key) {
                log::warn!("rollback failed to erase tile {quad_key}: {error}");
            }
        }
        self.touched.clear();
    }
}
