//! Built-in Handlebars template compiler.
//!
//! [`TemplateCompiler`] is the seam the plugin compiles through: `parse` turns
//! template text into an [`ast::Program`] (which the plugin also walks to find
//! partial references) and `precompile` turns that tree into a JavaScript
//! template-spec expression for `Handlebars.template(...)`.
//!
//! [`Handlebars`] is the implementation used by default. It targets the
//! Handlebars 4.3+ runtime (compiler revision 8).

pub mod ast;
mod codegen;
mod parser;
mod whitespace;

use ast::Program;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("Parse error{} on line {line}, column {column}: {message}", in_source(.source_name))]
    Parse {
        message: String,
        source_name: Option<String>,
        line: u32,
        column: u32,
    },

    #[error("You specified knownHelpersOnly, but used the unknown helper {name} (line {line}, column {column})")]
    UnknownHelper { name: String, line: u32, column: u32 },

    #[error("{message} (line {line}, column {column})")]
    Invalid {
        message: String,
        line: u32,
        column: u32,
    },

    #[error("Invalid compiler options: {0}")]
    Options(#[source] serde_json::Error),

    #[error("Failed to serialize source map: {0}")]
    Serialize(#[source] sourcemap::Error),
}

fn in_source(source_name: &Option<String>) -> String {
    match source_name {
        Some(name) => format!(" in {}", name),
        None => String::new(),
    }
}

/// Output of [`TemplateCompiler::precompile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precompiled {
    /// Bare code, returned when no `srcName` was requested.
    Code(String),
    /// Code plus a serialized v3 source map.
    WithMap { code: String, map: Option<String> },
}

impl Precompiled {
    pub fn into_parts(self) -> (String, Option<String>) {
        match self {
            Precompiled::Code(code) => (code, None),
            Precompiled::WithMap { code, map } => (code, map),
        }
    }
}

/// A Handlebars-compatible compiler.
///
/// Options are passed through as a JSON object so that callers can forward a
/// user's compiler configuration without this crate knowing every key.
pub trait TemplateCompiler {
    fn parse(&self, source: &str, options: &Map<String, Value>) -> Result<Program, CompileError>;

    fn precompile(
        &self,
        ast: &Program,
        options: &Map<String, Value>,
    ) -> Result<Precompiled, CompileError>;
}

/// Options understood by [`Handlebars`]. Unrecognized keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompileOptions {
    /// Source name for node locations; also switches on source-map output.
    pub src_name: Option<String>,
    /// Recorded as the map's `file`.
    pub dest_name: Option<String>,
    /// Pass `@data` through to helpers. Defaults to true.
    pub data: Option<bool>,
    pub no_escape: bool,
    pub known_helpers: BTreeMap<String, bool>,
    pub known_helpers_only: bool,
    /// Keep the indentation and line break around standalone tags.
    pub ignore_standalone: bool,
    /// Render partials without re-indenting their lines.
    pub prevent_indent: bool,
}

impl CompileOptions {
    pub fn from_map(options: &Map<String, Value>) -> Result<Self, CompileError> {
        serde_json::from_value(Value::Object(options.clone())).map_err(CompileError::Options)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Handlebars;

impl TemplateCompiler for Handlebars {
    fn parse(&self, source: &str, options: &Map<String, Value>) -> Result<Program, CompileError> {
        let options = CompileOptions::from_map(options)?;
        parser::parse_with(
            source,
            options.src_name.as_deref(),
            !options.ignore_standalone,
        )
    }

    fn precompile(
        &self,
        ast: &Program,
        options: &Map<String, Value>,
    ) -> Result<Precompiled, CompileError> {
        let options = CompileOptions::from_map(options)?;
        let (code, map) = codegen::generate(ast, &options)?;
        match map {
            Some(map) => {
                let mut json = Vec::new();
                map.to_writer(&mut json).map_err(CompileError::Serialize)?;
                Ok(Precompiled::WithMap {
                    code,
                    map: Some(String::from_utf8_lossy(&json).into_owned()),
                })
            }
            None => Ok(Precompiled::Code(code)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_precompile_without_src_name_returns_bare_code() {
        let hbs = Handlebars;
        let ast = hbs.parse("Hi {{name}}", &Map::new()).unwrap();
        let out = hbs.precompile(&ast, &Map::new()).unwrap();
        assert!(matches!(out, Precompiled::Code(ref code) if code.starts_with('{')));
    }

    #[test]
    fn test_precompile_with_src_name_returns_map() {
        let hbs = Handlebars;
        let opts = options(json!({ "srcName": "foo.hbs", "destName": "foo.js" }));
        let ast = hbs.parse("Hi {{name}}", &opts).unwrap();
        let (code, map) = hbs.precompile(&ast, &opts).unwrap().into_parts();
        assert!(code.contains("\"main\":function"));
        let map: Value = serde_json::from_str(&map.unwrap()).unwrap();
        assert_eq!(map["sources"], json!(["foo.hbs"]));
        assert_eq!(map["file"], json!("foo.js"));
        assert_eq!(map["version"], json!(3));
    }

    #[test]
    fn test_unknown_options_are_ignored() {
        let opts = options(json!({ "strict": true, "knownHelpers": { "t": true } }));
        let parsed = CompileOptions::from_map(&opts).unwrap();
        assert_eq!(parsed.known_helpers.get("t"), Some(&true));
    }

    #[test]
    fn test_ignore_standalone_keeps_lines() {
        let source = "<ul>\n  {{#each items}}\n  <li></li>\n  {{/each}}\n</ul>";
        let stripped = Handlebars.parse(source, &Map::new()).unwrap();
        let kept = Handlebars
            .parse(source, &options(json!({ "ignoreStandalone": true })))
            .unwrap();
        let first = |program: &Program| match &program.body[0] {
            ast::Statement::Content(c) => c.value.clone(),
            other => panic!("expected content, got {:?}", other),
        };
        assert_eq!(first(&stripped), "<ul>\n");
        assert_eq!(first(&kept), "<ul>\n  ");
    }

    #[test]
    fn test_triple_stash_with_whitespace_control() {
        let ast = Handlebars.parse("a {{~{foo}~}} b", &Map::new()).unwrap();
        let (code, _) = Handlebars.precompile(&ast, &Map::new()).unwrap().into_parts();
        assert!(code.contains("  return \"a\"\n    + "), "{}", code);
        assert!(code.contains("\n    + \"b\";"), "{}", code);
        assert!(!code.contains("escapeExpression"), "{}", code);
    }

    #[test]
    fn test_mistyped_option_is_an_error() {
        let opts = options(json!({ "knownHelpersOnly": "yes" }));
        assert!(matches!(
            CompileOptions::from_map(&opts),
            Err(CompileError::Options(_))
        ));
    }

    #[test]
    fn test_parse_error_display_names_source() {
        let opts = options(json!({ "srcName": "bad.hbs" }));
        let err = Handlebars.parse("{{#if}}", &opts).unwrap_err();
        assert!(err.to_string().starts_with("Parse error in bad.hbs on line 1"), "{err}");
    }
}
