// Allow deprecated APIs (assert_cmd::cargo_bin is deprecated but still works)
#![allow(deprecated)]

use assert_cmd::prelude::*; // Add methods on commands
use predicates::prelude::*; // Used for writing assertions
use rstest::rstest;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const PREFIX: &str = "import Handlebars from 'handlebars/lib/handlebars.runtime'\nimport Render from '\0handlebars-precompiler'";

fn template_path(name: &str) -> String {
    let root_path = Path::new(env!("CARGO_MANIFEST_DIR"));
    root_path
        .join("tests")
        .join("templates")
        .join(name)
        .to_str()
        .unwrap()
        .to_string()
}

fn output_path(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

#[test]
fn test_compile_to_stdout() -> Result<(), Box<dyn std::error::Error>> {
    Command::cargo_bin("hbs-precompiler")?
        .arg("compile")
        .arg("-i")
        .arg(template_path("greeting.hbs"))
        .assert()
        .success()
        .stdout(predicate::str::starts_with(format!(
            "{}\nexport const RawTemplate = Handlebars.template(\n{{",
            PREFIX
        )))
        .stdout(predicate::str::contains(")\nexport default Render(RawTemplate)"))
        .stdout(predicate::str::contains("registerPartial").not());
    Ok(())
}

#[test]
fn test_compile_writes_module_and_map() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let output = output_path(&dir, "greeting.js");

    Command::cargo_bin("hbs-precompiler")?
        .arg("compile")
        .arg("-i")
        .arg(template_path("greeting.hbs"))
        .arg("--id")
        .arg("greeting.hbs")
        .arg("-o")
        .arg(&output)
        .assert()
        .success();

    let code = fs::read_to_string(&output)?;
    assert!(code.starts_with(PREFIX));

    let map: serde_json::Value = serde_json::from_str(&fs::read_to_string(dir.path().join("greeting.js.map"))?)?;
    assert_eq!(map["sources"], serde_json::json!(["greeting.hbs"]));
    let mappings = map["mappings"].as_str().unwrap();
    assert!(mappings.starts_with(";;;") && !mappings.starts_with(";;;;"), "{}", mappings);
    Ok(())
}

#[test]
fn test_compile_without_source_map() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let output = output_path(&dir, "greeting.js");

    Command::cargo_bin("hbs-precompiler")?
        .arg("compile")
        .arg("-i")
        .arg(template_path("greeting.hbs"))
        .arg("-o")
        .arg(&output)
        .arg("--no-source-map")
        .assert()
        .success();

    assert!(output.exists());
    assert!(!dir.path().join("greeting.js.map").exists());
    Ok(())
}

#[test]
fn test_compile_imports_partials() -> Result<(), Box<dyn std::error::Error>> {
    Command::cargo_bin("hbs-precompiler")?
        .arg("compile")
        .arg("-i")
        .arg(template_path("page.hbs"))
        .assert()
        .success()
        .stdout(predicate::str::starts_with(format!(
            "{}\nimport './_nav.hbs'\nimport './_footer.hbs'\nexport const RawTemplate",
            PREFIX
        )));
    Ok(())
}

#[rstest]
#[case::default_options(None)]
#[case::options_file(Some("options.json"))]
fn test_compile_registers_partial(
    #[case] options: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("hbs-precompiler")?;
    cmd.arg("compile").arg("-i").arg(template_path("_nav.hbs"));
    if let Some(options) = options {
        cmd.arg("-c").arg(template_path(options));
    }
    cmd.assert().success().stdout(predicate::str::ends_with(
        "export default Render(RawTemplate)\nHandlebars.registerPartial('nav', RawTemplate)\n",
    ));
    Ok(())
}

#[test]
fn test_compile_parse_error() -> Result<(), Box<dyn std::error::Error>> {
    Command::cargo_bin("hbs-precompiler")?
        .arg("compile")
        .arg("-i")
        .arg(template_path("broken.hbs"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Parse error"))
        .stderr(predicate::str::contains("broken.hbs"));
    Ok(())
}

#[rstest]
#[case::not_a_template("options.json", "is not matched by the template include patterns")]
#[case::missing_input("missing.hbs", "Failed to read input file")]
fn test_compile_failures(
    #[case] input: &str,
    #[case] message: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    Command::cargo_bin("hbs-precompiler")?
        .arg("compile")
        .arg("-i")
        .arg(template_path(input))
        .assert()
        .failure()
        .stderr(predicate::str::contains(message));
    Ok(())
}

#[test]
fn test_helpers_module() -> Result<(), Box<dyn std::error::Error>> {
    Command::cargo_bin("hbs-precompiler")?
        .arg("helpers")
        .arg("-c")
        .arg(template_path("options.json"))
        .assert()
        .success()
        .stdout(predicate::str::starts_with(
            "import Handlebars from 'handlebars/lib/handlebars.runtime'\nimport registerHelpers0 from './helpers.js'\nregisterHelpers0(Handlebars)\nexport default (rawTemplate)",
        ));
    Ok(())
}

#[test]
fn test_helpers_bad_options_file() -> Result<(), Box<dyn std::error::Error>> {
    Command::cargo_bin("hbs-precompiler")?
        .arg("helpers")
        .arg("-c")
        .arg(template_path("greeting.hbs"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse options file as JSON"));
    Ok(())
}

#[test]
fn test_partials() -> Result<(), Box<dyn std::error::Error>> {
    Command::cargo_bin("hbs-precompiler")?
        .arg("partials")
        .arg("-i")
        .arg(template_path("page.hbs"))
        .assert()
        .success()
        .stdout("nav\nfooter\n");
    Ok(())
}
