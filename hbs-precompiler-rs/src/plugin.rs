//! Bundler-facing hooks.

use crate::emitter::{self, TransformResult};
use crate::error::PrecompileError;
use crate::handlebars::{Handlebars, TemplateCompiler};
use crate::options::{Config, PluginOptions};

pub const PLUGIN_NAME: &str = "handlebars-precompiler";

/// Id of the virtual helpers module. The NUL prefix marks it as private, so
/// other plugins and the filters leave it alone.
pub const PLUGIN_ID: &str = "\0handlebars-precompiler";

/// Precompiles Handlebars templates into ES modules.
///
/// The three hooks mirror the bundler plugin contract: [`resolve_id`] and
/// [`load`] serve the helpers module under [`PLUGIN_ID`], and [`transform`]
/// compiles template modules.
///
/// [`resolve_id`]: HandlebarsPrecompiler::resolve_id
/// [`load`]: HandlebarsPrecompiler::load
/// [`transform`]: HandlebarsPrecompiler::transform
#[derive(Debug)]
pub struct HandlebarsPrecompiler<C = Handlebars> {
    config: Config,
    compiler: C,
}

impl HandlebarsPrecompiler<Handlebars> {
    pub fn new(options: PluginOptions) -> Result<Self, PrecompileError> {
        Self::with_compiler(options, Handlebars)
    }
}

impl<C: TemplateCompiler> HandlebarsPrecompiler<C> {
    pub fn with_compiler(options: PluginOptions, compiler: C) -> Result<Self, PrecompileError> {
        Ok(Self {
            config: Config::new(options)?,
            compiler,
        })
    }

    pub fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn resolve_id(&self, id: &str) -> Option<&'static str> {
        (id == PLUGIN_ID).then_some(PLUGIN_ID)
    }

    pub fn load(&self, id: &str) -> Option<String> {
        (id == PLUGIN_ID).then(|| emitter::helpers_module(&self.config))
    }

    /// Returns `Ok(None)` for ids that aren't templates.
    pub fn transform(
        &self,
        code: &str,
        id: &str,
    ) -> Result<Option<TransformResult>, PrecompileError> {
        if !self.config.is_template(id) {
            log::trace!("Skipping {}", id.escape_debug());
            return Ok(None);
        }
        log::debug!("Precompiling {}", id);
        emitter::compile(&self.config, &self.compiler, code, id).map(Some)
    }
}
