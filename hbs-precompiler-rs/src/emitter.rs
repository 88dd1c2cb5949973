//! Assembly of the ES modules handed back to the bundler.
//!
//! A template module looks like:
//!
//! ```text
//! import Handlebars from 'handlebars/lib/handlebars.runtime'
//! import Render from '\0handlebars-precompiler'
//! import './_nav.hbs'
//! export const RawTemplate = Handlebars.template(
//! {"compiler":[8,">= 4.3.0"],"main":function(...) {...}}
//! )
//! export default Render(RawTemplate)
//! Handlebars.registerPartial('nav', RawTemplate)
//! ```
//!
//! The last line only appears for partials. The compiler's map is shifted by
//! the number of lines before the template body.

use crate::error::PrecompileError;
use crate::handlebars::TemplateCompiler;
use crate::options::Config;
use crate::partials::collect_partials;
use crate::plugin::PLUGIN_ID;
use crate::source_map::SourceMap;
use itertools::Itertools;
use serde::Serialize;
use std::iter;

const IMPORT_HANDLEBARS: &str = "import Handlebars from 'handlebars/lib/handlebars.runtime'";
const BEGIN_TEMPLATE: &str = "export const RawTemplate = Handlebars.template(";
const END_TEMPLATE: &str = ")";
const EXPORT_RENDER: &str = "export default Render(RawTemplate)";

/// Wraps a raw template so that calling it yields a `DocumentFragment`.
const RENDER_WRAPPER: &[&str] = &[
    "export default (rawTemplate) => ((context, options) => {",
    "  const t = document.createElement('template')",
    "  t.innerHTML = rawTemplate(context, options)",
    "  return t.content",
    "})",
];

/// Code and source map for one transformed template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformResult {
    pub code: String,
    pub map: SourceMap,
}

/// Compiles `source` (module id `id`) into a template module.
pub fn compile<C>(
    config: &Config,
    compiler: &C,
    source: &str,
    id: &str,
) -> Result<TransformResult, PrecompileError>
where
    C: TemplateCompiler + ?Sized,
{
    let options = config.compiler_options_for(id);
    let ast = compiler.parse(source, &options)?;
    let (template, raw_map) = compiler.precompile(&ast, &options)?.into_parts();

    let partials = collect_partials(&ast);
    log::debug!("{} references partials {:?}", id, partials);

    let mut prefix = vec![IMPORT_HANDLEBARS.to_string(), import_helpers()];
    for partial in &partials {
        prefix.push(format!("import '{}'", config.partial_path(partial, id)?));
    }
    prefix.push(BEGIN_TEMPLATE.to_string());

    let mut suffix = vec![END_TEMPLATE.to_string(), EXPORT_RENDER.to_string()];
    if config.is_partial(id) {
        let name = config.partial_name(id)?;
        log::debug!("Registering {} as partial '{}'", id, name);
        suffix.push(format!("Handlebars.registerPartial('{}', RawTemplate)", name));
    }

    let map = config.adjust_source_map(raw_map.as_deref(), id, prefix.len())?;
    let code = prefix
        .iter()
        .chain(iter::once(&template))
        .chain(&suffix)
        .join("\n");
    Ok(TransformResult { code, map })
}

/// The module behind [`PLUGIN_ID`]: registers every configured helper module
/// with the runtime and exports the render wrapper.
pub fn helpers_module(config: &Config) -> String {
    let helpers = config.helpers();
    let imports = helpers
        .iter()
        .enumerate()
        .map(|(i, helper)| format!("import registerHelpers{} from './{}'", i, helper));
    let registrations = (0..helpers.len()).map(|i| format!("registerHelpers{}(Handlebars)", i));

    iter::once(IMPORT_HANDLEBARS.to_string())
        .chain(imports)
        .chain(registrations)
        .chain(RENDER_WRAPPER.iter().map(|line| line.to_string()))
        .join("\n")
}

fn import_helpers() -> String {
    format!("import Render from '{}'", PLUGIN_ID)
}
