//! Source map v3 data model.
//!
//! The built-in compiler encodes its mappings with the `sourcemap` crate. What
//! comes back from any compiler is read into [`SourceMap`] so the module emitter
//! can shift it past its import prefix with [`SourceMap::prepend_lines`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A source map as handed back to the bundler.
///
/// Only `mappings` is mandatory; an inert map serializes to `{"mappings":""}`.
/// Fields this crate doesn't model are kept in `extra` so a compiler's map
/// survives the round trip through [`SourceMap::from_json`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_root: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources_content: Option<Vec<Option<String>>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
    pub mappings: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SourceMap {
    /// The map returned when source maps are disabled.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Shifts every mapping down by `lines` generated lines.
    ///
    /// Each `;` in `mappings` starts a new generated line, and segment columns
    /// are relative within a line, so prepending separators is enough.
    pub fn prepend_lines(&mut self, lines: usize) {
        self.mappings.insert_str(0, &";".repeat(lines));
    }
}
