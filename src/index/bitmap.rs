use std::collections::HashMap;
use std::sync::Arc;

use roaring::RoaringBitmap;

use crate::element::Element;
use crate::error::QuadResult;
use crate::geo::{BoundingBox, LodRange};
use crate::quadkey::{self, QuadKey};
use crate::string_table::StringTable;

/// Per-tile term index: interned token id to the set of element orders
/// whose tag text contains that token.
pub type TermBitmap = HashMap<u32, RoaringBitmap>;

/// Symbols that split tag text and query strings into tokens.
const DELIMITERS: &[char] = &[
    ' ', '_', ':', ';', '!', '@', '#', '$', '%', '^', '&', '*', '(', ')', '{', '}', '[', ']',
    ',', '.', '?', '`', '\\', '/', '"', '\'',
];

/// A boolean text query scoped to a bounding box and zoom interval.
#[derive(Clone, Debug)]
pub struct TextQuery {
    /// Logical "not": result must not include any of these terms.
    pub not_terms: String,
    /// Logical "and": result has to include all of these terms.
    pub and_terms: String,
    /// Logical "or": result may include any of these terms.
    pub or_terms: String,
    /// Bounding box constraint.
    pub bounding_box: BoundingBox,
    /// Level of detail constraint.
    pub range: LodRange,
}

/// The query with interned token ids instead of raw strings.
#[derive(Clone, Debug, Default)]
pub struct TokenizedQuery {
    pub not_terms: Vec<u32>,
    pub and_terms: Vec<u32>,
    pub or_terms: Vec<u32>,
}

impl TokenizedQuery {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.not_terms.is_empty() && self.and_terms.is_empty() && self.or_terms.is_empty()
    }
}

/// Tokenizer and boolean query evaluator over per-tile term bitmaps.
///
/// The bitmaps themselves live with the owning store (in memory or inside
/// a tile's `.bmp` file); this type only knows how to fill them from an
/// element's tag text and how to run the OR → AND → NOT phases.
pub struct BitmapIndex {
    string_table: Arc<StringTable>,
}

impl BitmapIndex {
    #[must_use]
    pub fn new(string_table: Arc<StringTable>) -> Self {
        Self { string_table }
    }

    /// Sets the `order` bit for every token of the element's tag keys and
    /// values.
    pub fn add(&self, element: &Element, bitmap: &mut TermBitmap, order: u32) -> QuadResult<()> {
        for tag in element.tags() {
            for part in [tag.key, tag.value] {
                let text = self.string_table.get_string(part)?;
                self.tokenize_into(&text, &mut |token| {
                    bitmap.entry(token).or_default().insert(order);
                    Ok(())
                })?;
            }
        }
        Ok(())
    }

    /// Interns the three raw term strings of a query.
    pub fn tokenize_query(&self, query: &TextQuery) -> QuadResult<TokenizedQuery> {
        let mut tokenized = TokenizedQuery::default();
        self.tokenize_into(&query.not_terms, &mut |token| {
            tokenized.not_terms.push(token);
            Ok(())
        })?;
        self.tokenize_into(&query.and_terms, &mut |token| {
            tokenized.and_terms.push(token);
            Ok(())
        })?;
        self.tokenize_into(&query.or_terms, &mut |token| {
            tokenized.or_terms.push(token);
            Ok(())
        })?;
        Ok(tokenized)
    }

    /// Evaluates the query phases against one tile's bitmap and returns
    /// the matching element orders.
    ///
    /// OR terms union; AND terms intersect, with a missing AND term
    /// eliminating the tile outright; NOT terms subtract. A term missing
    /// from the tile is a no-op for the OR and NOT phases.
    #[must_use]
    pub fn evaluate(bitmap: &TermBitmap, query: &TokenizedQuery) -> RoaringBitmap {
        let mut result = RoaringBitmap::new();

        for term in &query.or_terms {
            if let Some(bits) = bitmap.get(term) {
                result |= bits;
            }
        }

        for term in &query.and_terms {
            let Some(bits) = bitmap.get(term) else {
                return RoaringBitmap::new();
            };
            if result.is_empty() {
                result = bits.clone();
            } else {
                result &= bits;
            }
        }

        for term in &query.not_terms {
            if let Some(bits) = bitmap.get(term) {
                result -= bits;
            }
        }

        result
    }

    /// Drives a query over every covered tile: ascending level of detail,
    /// then the tile-range order at that level.
    pub fn search(
        &self,
        query: &TextQuery,
        mut visit_tile: impl FnMut(QuadKey, &TokenizedQuery) -> QuadResult<()>,
    ) -> QuadResult<()> {
        let tokenized = self.tokenize_query(query)?;
        if tokenized.is_empty() {
            return Ok(());
        }
        for lod in query.range.levels() {
            quadkey::for_each_in_bbox(&query.bounding_box, lod, |quad_key| {
                visit_tile(quad_key, &tokenized)
            })?;
        }
        Ok(())
    }

    fn tokenize_into(
        &self,
        source: &str,
        sink: &mut impl FnMut(u32) -> QuadResult<()>,
    ) -> QuadResult<()> {
        for token in source.split(DELIMITERS).filter(|t| !t.is_empty()) {
            sink(self.string_table.get_id(token)?)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use roaring::RoaringBitmap;
    use tempfile::TempDir;

    use super::{BitmapIndex, TermBitmap, TokenizedQuery};
    use crate::element::{Element, Node, Tag};
    use crate::geo::GeoCoordinate;
    use crate::string_table::StringTable;

    fn index() -> (TempDir, BitmapIndex, Arc<StringTable>) {
        let dir = TempDir::new().unwrap();
        let table = Arc::new(StringTable::open(dir.path()).unwrap());
        (dir, BitmapIndex::new(table.clone()), table)
    }

    fn tagged_node(table: &StringTable, key: &str, value: &str) -> Element {
        Element::Node(Node {
            id: 0,
            tags: vec![Tag::new(
                table.get_id(key).unwrap(),
                table.get_id(value).unwrap(),
            )],
            coordinate: GeoCoordinate::new(0.0, 0.0),
        })
    }

    #[test]
    fn add_indexes_tokens_of_keys_and_values() {
        let (_dir, index, table) = index();
        let mut bitmap = TermBitmap::new();

        let node = tagged_node(&table, "addr:street", "Eichendorffstr.");
        index.add(&node, &mut bitmap, 5).unwrap();

        for token in ["addr", "street", "Eichendorffstr"] {
            let id = table.get_id(token).unwrap();
            assert!(bitmap[&id].contains(5), "missing token {token}");
        }
    }

    #[test]
    fn missing_and_term_eliminates_the_tile() {
        let (_dir, index, table) = index();
        let mut bitmap = TermBitmap::new();
        index
            .add(&tagged_node(&table, "name:en", "Kremlin Clock"), &mut bitmap, 0)
            .unwrap();

        let query = TokenizedQuery {
            and_terms: vec![
                table.get_id("Kremlin").unwrap(),
                table.get_id("Senate").unwrap(),
            ],
            ..Default::default()
        };

        assert!(BitmapIndex::evaluate(&bitmap, &query).is_empty());
    }

    #[test]
    fn not_phase_subtracts_from_the_result() {
        let mut bitmap = TermBitmap::new();
        bitmap.insert(1, RoaringBitmap::from_iter([0_u32, 1, 2]));
        bitmap.insert(2, RoaringBitmap::from_iter([1_u32]));

        let query = TokenizedQuery {
            and_terms: vec![1],
            not_terms: vec![2],
            ..Default::default()
        };

        let result = BitmapIndex::evaluate(&bitmap, &query);
        assert_eq!(result.iter().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn missing_or_and_not_terms_are_no_ops() {
        let mut bitmap = TermBitmap::new();
        bitmap.insert(1, RoaringBitmap::from_iter([3_u32]));

        let query = TokenizedQuery {
            or_terms: vec![1, 99],
            not_terms: vec![98],
            ..Default::default()
        };

        let result = BitmapIndex::evaluate(&bitmap, &query);
        assert_eq!(result.iter().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn empty_query_matches_nothing() {
        let mut bitmap = TermBitmap::new();
        bitmap.insert(1, RoaringBitmap::from_iter([0_u32]));
        assert!(BitmapIndex::evaluate(&bitmap, &TokenizedQuery::default()).is_empty());
    }
}
