use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::cancel::CancellationToken;
use crate::element::{Element, ElementVisitor};
use crate::error::{QuadError, QuadResult};
use crate::geo::{BoundingBox, LodRange};
use crate::index::bitmap::{BitmapIndex, TermBitmap, TextQuery};
use crate::index::store::ElementStore;
use crate::quadkey::QuadKey;
use crate::string_table::StringTable;

/// Keeps every element and term bitmap in process memory. Used for
/// volatile overlays (editor scratch data) and tests.
pub struct InMemoryElementStore {
    index: BitmapIndex,
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    elements: BTreeMap<QuadKey, Vec<Element>>,
    bitmaps: BTreeMap<QuadKey, TermBitmap>,
}

impl InMemoryElementStore {
    #[must_use]
    pub fn new(string_table: Arc<StringTable>) -> Self {
        Self {
            index: BitmapIndex::new(string_table),
            state: RwLock::new(State::default()),
        }
    }
}

impl ElementStore for InMemoryElementStore {
    fn save(&self, element: &Element, quad_key: QuadKey) -> QuadResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *state;
        let elements = state.elements.entry(quad_key).or_default();
        let order = u32::try_from(elements.len())
            .map_err(|_| QuadError::RecordOverflow("element order"))?;
        self.index
            .add(element, state.bitmaps.entry(quad_key).or_default(), order)?;
        elements.push(element.clone());
        Ok(())
    }

    fn search_text(
        &self,
        query: &TextQuery,
        visitor: &mut dyn ElementVisitor,
        cancel_token: &CancellationToken,
    ) -> QuadResult<()> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        self.index.search(query, |quad_key, tokenized| {
            if cancel_token.is_cancelled() {
                return Ok(());
            }
            let Some(bitmap) = state.bitmaps.get(&quad_key) else {
                return Ok(());
            };
            let elements = state.elements.get(&quad_key);
            for order in BitmapIndex::evaluate(bitmap, tokenized) {
                if cancel_token.is_cancelled() {
                    break;
                }
                let element = elements
                    .and_then(|e| e.get(order as usize))
                    .ok_or(QuadError::MissingOrder { quad_key, order })?;
                element.accept(visitor);
            }
            Ok(())
        })
    }

    fn search_tile(
        &self,
        quad_key: QuadKey,
        visitor: &mut dyn ElementVisitor,
        cancel_token: &CancellationToken,
    ) -> QuadResult<()> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let Some(elements) = state.elements.get(&quad_key) else {
            return Ok(());
        };
        for element in elements {
            if cancel_token.is_cancelled() {
                break;
            }
            element.accept(visitor);
        }
        Ok(())
    }

    fn has_data(&self, quad_key: QuadKey) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .elements
            .contains_key(&quad_key)
    }

    fn erase_tile(&self, quad_key: QuadKey) -> QuadResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.elements.remove(&quad_key);
        state.bitmaps.remove(&quad_key);
        Ok(())
    }

    fn erase_area(&self, _bbox: &BoundingBox, _range: LodRange) -> QuadResult<()> {
        Err(QuadError::UnsupportedErase)
    }

    fn flush(&self) -> QuadResult<()> {
        Ok(())
    }
}
