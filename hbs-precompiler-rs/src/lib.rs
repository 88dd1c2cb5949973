#![allow(clippy::uninlined_format_args)]
#![doc = include_str!("../README.md")]

#[macro_use]
extern crate lazy_static;

pub mod emitter;
pub mod error;
pub mod filter;
pub mod handlebars;
pub mod options;
pub mod partials;
pub mod plugin;
pub mod source_map;

pub use emitter::TransformResult;
pub use error::PrecompileError;
pub use handlebars::{Handlebars, Precompiled, TemplateCompiler};
pub use options::{Config, PluginOptions};
pub use partials::collect_partials;
pub use plugin::{HandlebarsPrecompiler, PLUGIN_ID, PLUGIN_NAME};
pub use serde_json;
pub use source_map::SourceMap;
