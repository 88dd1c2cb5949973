use hbs_precompiler_rs::options::Patterns;
use hbs_precompiler_rs::serde_json::{self, json, Value};
use hbs_precompiler_rs::{HandlebarsPrecompiler, PluginOptions, SourceMap, TransformResult};
use rstest::rstest;
use std::path::PathBuf;

const IMPORT_HANDLEBARS: &str = "import Handlebars from 'handlebars/lib/handlebars.runtime'";
const IMPORT_RENDER: &str = "import Render from '\0handlebars-precompiler'";
const BEGIN_TEMPLATE: &str = "export const RawTemplate = Handlebars.template(";
const TRAILER: &str = ")\nexport default Render(RawTemplate)";
const TEMPLATE: &str = "<p>Hello, {{ recipient }}</p>";

fn plugin(options: PluginOptions) -> HandlebarsPrecompiler {
    HandlebarsPrecompiler::new(PluginOptions {
        resolution_base: Some(PathBuf::from("/work/project")),
        ..options
    })
    .unwrap()
}

fn transform(options: PluginOptions, source: &str, id: &str) -> TransformResult {
    plugin(options)
        .transform(source, id)
        .unwrap()
        .unwrap_or_else(|| panic!("{} should be a template", id))
}

/// Leading `;` separators in a mapping string.
fn leading_lines(mappings: &str) -> usize {
    mappings.chars().take_while(|c| *c == ';').count()
}

#[test]
fn test_default_module_layout() {
    let result = transform(PluginOptions::default(), TEMPLATE, "foo.hbs");

    let prefix = [IMPORT_HANDLEBARS, IMPORT_RENDER, BEGIN_TEMPLATE].join("\n");
    assert!(result.code.starts_with(&prefix), "{}", result.code);
    assert!(result.code.ends_with(TRAILER), "{}", result.code);
    assert!(result.code.contains("\"recipient\""));

    assert_eq!(result.map.sources, vec!["foo.hbs"]);
    assert_eq!(leading_lines(&result.map.mappings), 3);
    assert!(result.map.file.is_none());
}

#[test]
fn test_transform_is_deterministic() {
    let plugin = plugin(PluginOptions::default());
    let source = "{{#each items as |item i|}}{{> row item}}{{i}}{{/each}}";
    let first = plugin.transform(source, "list.hbs").unwrap();
    let second = plugin.transform(source, "list.hbs").unwrap();
    assert_eq!(first, second);
}

#[rstest]
#[case::source_map(json!({ "sourceMap": false }))]
#[case::sourcemap(json!({ "sourcemap": false }))]
fn test_disabled_source_maps(#[case] options: Value) {
    let options: PluginOptions = serde_json::from_value(options).unwrap();
    let result = transform(options, TEMPLATE, "foo.hbs");
    assert_eq!(result.map, SourceMap::empty());
    assert_eq!(result.map.to_json().unwrap(), r#"{"mappings":""}"#);
}

#[test]
fn test_partial_imports_follow_header() {
    let result = transform(PluginOptions::default(), "{{>bar}}{{>baz}}{{>quux}}", "foo.hbs");
    let lines: Vec<_> = result.code.lines().take(6).collect();
    assert_eq!(
        lines,
        [
            IMPORT_HANDLEBARS,
            IMPORT_RENDER,
            "import './_bar.hbs'",
            "import './_baz.hbs'",
            "import './_quux.hbs'",
            BEGIN_TEMPLATE,
        ]
    );
    assert_eq!(leading_lines(&result.map.mappings), 6);
}

#[test]
fn test_duplicate_partials_import_twice() {
    let result = transform(PluginOptions::default(), "{{> row}}{{> row}}", "table.handlebars");
    assert_eq!(result.code.matches("import './_row.handlebars'").count(), 2);
}

#[test]
fn test_custom_partial_path() {
    let options = PluginOptions::default()
        .with_partial_path(|name, importer| Ok(format!("./partials/{}.{}", name, importer.len())));
    let result = transform(options, "{{> bar}}", "foo.hbs");
    assert!(result.code.contains("\nimport './partials/bar.7'\n"));
}

#[test]
fn test_partial_registers_itself() {
    let result = transform(PluginOptions::default(), TEMPLATE, "_foo.hbs");
    assert!(result.code.ends_with(&format!(
        "{}\nHandlebars.registerPartial('foo', RawTemplate)",
        TRAILER
    )));
}

#[test]
fn test_custom_partial_patterns_and_names() {
    let options = PluginOptions {
        partials: Some(Patterns::from("**/*.partial.hbs")),
        ..Default::default()
    }
    .with_partial_name(|id| {
        let base = id.rsplit('/').next().unwrap_or(id);
        Ok(base.trim_end_matches(".partial.hbs").to_string())
    });
    let plugin = plugin(options);

    let result = plugin.transform(TEMPLATE, "src/nav.partial.hbs").unwrap().unwrap();
    assert!(result.code.ends_with("Handlebars.registerPartial('nav', RawTemplate)"));

    let result = plugin.transform(TEMPLATE, "src/_nav.hbs").unwrap().unwrap();
    assert!(!result.code.contains("registerPartial"));
}

#[test]
fn test_reserved_compiler_options_are_ignored() {
    let options: PluginOptions = serde_json::from_value(json!({
        "compiler": { "srcName": "bar/baz.handlebars", "destName": "quux/xyzzy.js" }
    }))
    .unwrap();
    let result = transform(options, TEMPLATE, "foo.hbs");
    assert_eq!(result.map.sources, vec!["foo.hbs"]);
    assert!(result.map.file.is_none());
}

#[test]
fn test_compiler_options_pass_through() {
    let options: PluginOptions = serde_json::from_value(json!({
        "compiler": { "noEscape": true }
    }))
    .unwrap();
    let result = transform(options, TEMPLATE, "foo.hbs");
    assert!(!result.code.contains("escapeExpression"));
}

#[rstest]
#[case::excluded("/work/project/node_modules/pkg/foo.hbs")]
#[case::other_extension("foo.js")]
#[case::private_id("\0handlebars-precompiler")]
fn test_non_templates_are_skipped(#[case] id: &str) {
    assert!(plugin(PluginOptions::default()).transform(TEMPLATE, id).unwrap().is_none());
}

#[test]
fn test_syntax_errors_abort_the_file() {
    let err = plugin(PluginOptions::default())
        .transform("{{#if ready}}never closed", "broken.hbs")
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Parse error"), "{}", message);
    assert!(message.contains("broken.hbs"), "{}", message);
}

#[test]
fn test_invalid_patterns_fail_construction() {
    let result = HandlebarsPrecompiler::new(PluginOptions {
        include: Some(Patterns::from(vec!["**/*.hbs", "src/[.hbs"])),
        resolution_base: Some(PathBuf::from("/work/project")),
        ..Default::default()
    });
    let err = result.unwrap_err();
    assert!(err.to_string().contains("src/[.hbs"), "{}", err);
}
