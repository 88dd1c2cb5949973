//! User options and the resolved, immutable plugin configuration.

use crate::error::PrecompileError;
use crate::filter::{normalize_path, PathFilter};
use crate::source_map::SourceMap;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

pub const DEFAULT_INCLUDE: &[&str] = &["**/*.hbs", "**/*.handlebars", "**/*.mustache"];
pub const DEFAULT_EXCLUDE: &[&str] = &["node_modules/**"];
pub const DEFAULT_PARTIALS: &[&str] = &["**/_*"];

/// Compiler option keys the plugin controls itself.
const RESERVED_COMPILER_KEYS: &[&str] = &["srcName", "destName"];

lazy_static! {
    static ref LEADING_NON_ALNUM: Regex = Regex::new(r"^[^[:alnum:]]+").unwrap();
}

/// Maps a partial's module id to the name it is registered under.
pub type PartialNameFn = Arc<dyn Fn(&str) -> anyhow::Result<String> + Send + Sync>;

/// Maps a partial name and the importing template's id to an import path.
pub type PartialPathFn = Arc<dyn Fn(&str, &str) -> anyhow::Result<String> + Send + Sync>;

/// One glob pattern or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Patterns {
    One(String),
    Many(Vec<String>),
}

impl Patterns {
    /// Falls back to `default` when unset or set to an empty string.
    fn resolve(patterns: Option<Patterns>, default: &[&str]) -> Vec<String> {
        match patterns {
            Some(Patterns::One(pattern)) if !pattern.is_empty() => vec![pattern],
            Some(Patterns::Many(patterns)) => patterns,
            _ => default.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl From<&str> for Patterns {
    fn from(pattern: &str) -> Self {
        Patterns::One(pattern.to_string())
    }
}

impl From<Vec<&str>> for Patterns {
    fn from(patterns: Vec<&str>) -> Self {
        Patterns::Many(patterns.into_iter().map(str::to_string).collect())
    }
}

/// Plugin options as the user writes them.
///
/// Everything except the two naming functions can be read from JSON with
/// camelCase keys; the functions are attached with
/// [`PluginOptions::with_partial_name`] and [`PluginOptions::with_partial_path`].
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginOptions {
    /// Helper modules, imported relative to the helpers module in this order.
    pub helpers: Vec<String>,
    pub include: Option<Patterns>,
    pub exclude: Option<Patterns>,
    pub partials: Option<Patterns>,
    #[serde(skip)]
    pub partial_name: Option<PartialNameFn>,
    #[serde(skip)]
    pub partial_path: Option<PartialPathFn>,
    /// Passed through to the template compiler.
    pub compiler: Map<String, Value>,
    /// Source maps are off only when this is exactly `false`.
    pub source_map: Option<Value>,
    #[serde(rename = "sourcemap")]
    pub sourcemap: Option<Value>,
    /// Directory relative patterns resolve against. Defaults to the working
    /// directory.
    pub resolution_base: Option<PathBuf>,
}

impl PluginOptions {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_partial_name<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.partial_name = Some(Arc::new(f));
        self
    }

    pub fn with_partial_path<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.partial_path = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for PluginOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginOptions")
            .field("helpers", &self.helpers)
            .field("include", &self.include)
            .field("exclude", &self.exclude)
            .field("partials", &self.partials)
            .field("partial_name", &self.partial_name.as_ref().map(|_| "<fn>"))
            .field("partial_path", &self.partial_path.as_ref().map(|_| "<fn>"))
            .field("compiler", &self.compiler)
            .field("source_map", &self.source_map)
            .field("sourcemap", &self.sourcemap)
            .field("resolution_base", &self.resolution_base)
            .finish()
    }
}

/// Resolved configuration, built once per plugin instance and never mutated.
#[derive(Clone)]
pub struct Config {
    helpers: Vec<String>,
    templates: PathFilter,
    partials: PathFilter,
    partial_name: PartialNameFn,
    partial_path: PartialPathFn,
    compiler_options: Map<String, Value>,
    source_maps_enabled: bool,
}

impl Config {
    pub fn new(options: PluginOptions) -> Result<Self, PrecompileError> {
        let base = match options.resolution_base {
            Some(base) => base,
            None => std::env::current_dir().map_err(PrecompileError::WorkingDirectory)?,
        };

        let include = Patterns::resolve(options.include, DEFAULT_INCLUDE);
        let exclude = Patterns::resolve(options.exclude, DEFAULT_EXCLUDE);
        let partials = Patterns::resolve(options.partials, DEFAULT_PARTIALS);
        log::debug!(
            "Template patterns {:?} excluding {:?}, partial patterns {:?}, base {}",
            include,
            exclude,
            partials,
            base.display()
        );

        let mut compiler_options = options.compiler;
        for key in RESERVED_COMPILER_KEYS {
            if compiler_options.remove(*key).is_some() {
                log::debug!("Ignoring compiler option {}", key);
            }
        }

        let disabled = |value: &Option<Value>| matches!(value, Some(Value::Bool(false)));
        let source_maps_enabled = !(disabled(&options.source_map) || disabled(&options.sourcemap));

        Ok(Self {
            helpers: options.helpers,
            templates: PathFilter::new(&include, &exclude, &base)?,
            partials: PathFilter::new(&partials, Vec::<String>::new(), &base)?,
            partial_name: options.partial_name.unwrap_or_else(|| {
                Arc::new(|id: &str| -> anyhow::Result<String> { Ok(default_partial_name(id)) })
            }),
            partial_path: options.partial_path.unwrap_or_else(|| {
                Arc::new(|name: &str, importer: &str| -> anyhow::Result<String> {
                    Ok(default_partial_path(name, importer))
                })
            }),
            compiler_options,
            source_maps_enabled,
        })
    }

    pub fn helpers(&self) -> &[String] {
        &self.helpers
    }

    pub fn is_template(&self, id: &str) -> bool {
        self.templates.matches(id)
    }

    pub fn is_partial(&self, id: &str) -> bool {
        self.partials.matches(id)
    }

    pub fn source_maps_enabled(&self) -> bool {
        self.source_maps_enabled
    }

    pub fn partial_name(&self, id: &str) -> Result<String, PrecompileError> {
        (self.partial_name)(id).map_err(PrecompileError::Naming)
    }

    pub fn partial_path(&self, name: &str, importer: &str) -> Result<String, PrecompileError> {
        (self.partial_path)(name, importer).map_err(PrecompileError::Naming)
    }

    /// The user's compiler options plus `srcName: id` when maps are enabled.
    pub fn compiler_options_for(&self, id: &str) -> Map<String, Value> {
        let mut options = self.compiler_options.clone();
        if self.source_maps_enabled {
            options.insert("srcName".to_string(), Value::String(id.to_string()));
        }
        options
    }

    /// Shifts the compiler's map past `lines` generated lines of prefix.
    ///
    /// With maps disabled this returns the inert map without looking at
    /// `raw`.
    pub fn adjust_source_map(
        &self,
        raw: Option<&str>,
        id: &str,
        lines: usize,
    ) -> Result<SourceMap, PrecompileError> {
        if !self.source_maps_enabled {
            return Ok(SourceMap::empty());
        }
        let raw = raw.ok_or_else(|| PrecompileError::MissingSourceMap(id.to_string()))?;
        let mut map = SourceMap::from_json(raw)?;
        map.prepend_lines(lines);
        Ok(map)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("helpers", &self.helpers)
            .field("templates", &self.templates)
            .field("partials", &self.partials)
            .field("compiler_options", &self.compiler_options)
            .field("source_maps_enabled", &self.source_maps_enabled)
            .finish_non_exhaustive()
    }
}

/// `dir/_foo.hbs` -> `foo`: basename, minus extension, minus leading
/// non-alphanumerics.
pub fn default_partial_name(id: &str) -> String {
    let id = normalize_path(id);
    let base = id.rsplit('/').next().unwrap_or_default();
    let stem = match base.rfind('.') {
        Some(dot) => &base[..dot],
        None => base,
    };
    LEADING_NON_ALNUM.replace(stem, "").into_owned()
}

/// `("foo", "dir/page.hbs")` -> `./_foo.hbs`
pub fn default_partial_path(name: &str, importer: &str) -> String {
    let ext = importer.rsplit('.').next().unwrap_or_default();
    format!("./_{}.{}", name, ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn config(options: PluginOptions) -> Config {
        Config::new(PluginOptions {
            resolution_base: Some(PathBuf::from("/work/project")),
            ..options
        })
        .unwrap()
    }

    #[rstest]
    #[case("_foo.hbs", "foo")]
    #[case("dir/_foo.hbs", "foo")]
    #[case(r"dir\sub\_nav.handlebars", "nav")]
    #[case("/abs/path/__double.mustache", "double")]
    #[case("_foo.bar.hbs", "foo.bar")]
    #[case("_noext", "noext")]
    #[case("plain.hbs", "plain")]
    fn test_default_partial_name(#[case] id: &str, #[case] expected: &str) {
        assert_eq!(default_partial_name(id), expected);
    }

    #[rstest]
    #[case("bar", "foo.hbs", "./_bar.hbs")]
    #[case("bar", "src/components/foo.handlebars", "./_bar.handlebars")]
    #[case("nav/top", "foo.mustache", "./_nav/top.mustache")]
    fn test_default_partial_path(#[case] name: &str, #[case] importer: &str, #[case] expected: &str) {
        assert_eq!(default_partial_path(name, importer), expected);
    }

    #[test]
    fn test_defaults() {
        let config = config(PluginOptions::default());
        assert!(config.helpers().is_empty());
        assert!(config.is_template("foo.hbs"));
        assert!(!config.is_template("/work/project/node_modules/foo.hbs"));
        assert!(config.is_partial("_foo.hbs"));
        assert!(!config.is_partial("foo.hbs"));
        assert!(config.source_maps_enabled());
        assert_eq!(config.partial_name("_foo.hbs").unwrap(), "foo");
        assert_eq!(config.partial_path("bar", "foo.hbs").unwrap(), "./_bar.hbs");
    }

    #[test]
    fn test_options_from_json() {
        let options = PluginOptions::from_json(
            r#"{
                "helpers": ["components/helpers.js"],
                "include": "**/*.tmpl",
                "exclude": ["vendor/**", "dist/**"],
                "partials": "**/*.partial.tmpl",
                "compiler": { "knownHelpers": { "t": true } },
                "sourcemap": false,
                "somethingElse": 1
            }"#,
        )
        .unwrap();
        assert_eq!(options.helpers, vec!["components/helpers.js"]);
        assert_eq!(options.include, Some(Patterns::from("**/*.tmpl")));
        assert_eq!(options.exclude, Some(Patterns::from(vec!["vendor/**", "dist/**"])));

        let config = config(options);
        assert!(config.is_template("a.tmpl"));
        assert!(!config.is_template("/work/project/vendor/a.tmpl"));
        assert!(!config.is_template("a.hbs"));
        assert!(config.is_partial("x/y.partial.tmpl"));
        assert!(!config.source_maps_enabled());
    }

    #[test]
    fn test_reserved_compiler_keys_are_removed() {
        let compiler = json!({ "srcName": "bar/baz.handlebars", "destName": "quux/xyzzy.js", "noEscape": true });
        let Value::Object(compiler) = compiler else {
            unreachable!()
        };
        let config = config(PluginOptions {
            compiler,
            ..Default::default()
        });
        let options = config.compiler_options_for("foo.hbs");
        assert_eq!(options.get("srcName"), Some(&json!("foo.hbs")));
        assert_eq!(options.get("destName"), None);
        assert_eq!(options.get("noEscape"), Some(&json!(true)));
    }

    #[rstest]
    #[case::source_map_false(json!({ "sourceMap": false }), false)]
    #[case::sourcemap_false(json!({ "sourcemap": false }), false)]
    #[case::true_value(json!({ "sourceMap": true }), true)]
    #[case::null(json!({ "sourceMap": null }), true)]
    #[case::zero(json!({ "sourcemap": 0 }), true)]
    #[case::empty_string(json!({ "sourcemap": "" }), true)]
    #[case::absent(json!({}), true)]
    fn test_source_map_switch(#[case] options: Value, #[case] enabled: bool) {
        let options: PluginOptions = serde_json::from_value(options).unwrap();
        let config = config(options);
        assert_eq!(config.source_maps_enabled(), enabled);
        assert_eq!(
            config.compiler_options_for("foo.hbs").contains_key("srcName"),
            enabled
        );
    }

    #[test]
    fn test_adjust_source_map() {
        let config = config(PluginOptions::default());
        let map = config
            .adjust_source_map(Some(r#"{"version":3,"sources":["foo.hbs"],"mappings":"AAAA"}"#), "foo.hbs", 4)
            .unwrap();
        assert_eq!(map.mappings, ";;;;AAAA");
        assert_eq!(map.sources, vec!["foo.hbs"]);
    }

    #[test]
    fn test_adjust_source_map_failures() {
        let config = config(PluginOptions::default());
        assert!(matches!(
            config.adjust_source_map(None, "foo.hbs", 4),
            Err(PrecompileError::MissingSourceMap(id)) if id == "foo.hbs"
        ));
        assert!(matches!(
            config.adjust_source_map(Some("not json"), "foo.hbs", 4),
            Err(PrecompileError::SourceMap(_))
        ));
    }

    #[test]
    fn test_disabled_map_ignores_input() {
        let config = config(PluginOptions {
            source_map: Some(Value::Bool(false)),
            ..Default::default()
        });
        let map = config.adjust_source_map(Some("not json"), "foo.hbs", 4).unwrap();
        assert_eq!(map, SourceMap::empty());
    }

    #[test]
    fn test_custom_naming_functions() {
        let config = config(
            PluginOptions::default()
                .with_partial_name(|id| Ok(id.trim_end_matches(".partial.hbs").to_string()))
                .with_partial_path(|name, _| {
                    anyhow::ensure!(!name.is_empty(), "empty partial name");
                    Ok(format!("./{}.partial.hbs", name))
                }),
        );
        assert_eq!(config.partial_name("foo.partial.hbs").unwrap(), "foo");
        assert_eq!(config.partial_path("bar", "foo.hbs").unwrap(), "./bar.partial.hbs");
        let err = config.partial_path("", "foo.hbs").unwrap_err();
        assert_eq!(err.to_string(), "empty partial name");
    }

    #[test]
    fn test_invalid_pattern_fails_construction() {
        let result = Config::new(PluginOptions {
            partials: Some(Patterns::from("[")),
            resolution_base: Some(PathBuf::from("/work")),
            ..Default::default()
        });
        assert!(matches!(result, Err(PrecompileError::Pattern { .. })));
    }
}
