//! Shared fixtures for the unit tests.

use std::sync::Arc;

use crate::element::Element;
use crate::string_table::StringTable;
use crate::style::{ClipPolicy, Style, StyleProvider};

/// Style provider with a fixed answer for every element.
pub(crate) struct TestStyleProvider {
    tag: String,
    policy: ClipPolicy,
    declarations: Vec<(u32, String)>,
    empty_style: bool,
}

impl TestStyleProvider {
    /// Non-empty style, geometry clipped per tile.
    pub(crate) fn clip_everything() -> Self {
        Self {
            tag: "test-style".to_string(),
            policy: ClipPolicy::Clip,
            declarations: vec![(u32::MAX, "any".to_string())],
            empty_style: false,
        }
    }

    /// Non-empty style, elements copied into tiles unclipped.
    pub(crate) fn copy_everything() -> Self {
        Self {
            policy: ClipPolicy::Copy,
            ..Self::clip_everything()
        }
    }

    /// Elements are skipped during ingest.
    pub(crate) fn skip_everything() -> Self {
        Self {
            policy: ClipPolicy::Skip,
            ..Self::clip_everything()
        }
    }

    /// Every element resolves to an empty style.
    pub(crate) fn styleless() -> Self {
        Self {
            empty_style: true,
            ..Self::clip_everything()
        }
    }

    /// Non-empty style carrying a `builders` directive.
    pub(crate) fn with_builders(string_table: &Arc<StringTable>, names: &str) -> Self {
        let builders_key = string_table.get_id("builders").unwrap();
        Self {
            tag: "test-style".to_string(),
            policy: ClipPolicy::Clip,
            declarations: vec![(builders_key, names.to_string())],
            empty_style: false,
        }
    }
}

impl StyleProvider for TestStyleProvider {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn for_element(&self, _element: &Element, _lod: u8) -> Style {
        if self.empty_style {
            Style::empty()
        } else {
            Style::new(self.declarations.clone())
        }
    }

    fn clip_policy(&self, _element: &Element, _lod: u8) -> ClipPolicy {
        self.policy
    }
}
