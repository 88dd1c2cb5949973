use crate::handlebars::CompileError;

#[derive(Debug, thiserror::Error)]
pub enum PrecompileError {
    /// Raised by the template compiler; passed through untouched.
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("Invalid filter pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// Raised by a `partialName` or `partialPath` function.
    #[error(transparent)]
    Naming(anyhow::Error),

    #[error("Cannot determine the working directory: {0}")]
    WorkingDirectory(#[source] std::io::Error),

    #[error("Compiler returned no source map for `{0}`")]
    MissingSourceMap(String),

    #[error("Malformed source map: {0}")]
    SourceMap(#[from] serde_json::Error),
}
