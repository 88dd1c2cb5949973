//! Include/exclude glob filters over module ids.
//!
//! Patterns follow the bundler's id-resolution convention: a pattern that is
//! absolute or starts with `**` is used as written, anything else is resolved
//! against a base directory (the working directory unless configured). Ids
//! passed to [`PathFilter::matches`] must therefore already be resolved the
//! same way the host resolves them.

use crate::error::PrecompileError;
use glob::{MatchOptions, Pattern};
use std::path::Path;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A compiled set of include and exclude patterns.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl PathFilter {
    /// Compiles `include` and `exclude` relative to `base`.
    ///
    /// Fails on the first invalid pattern, so misconfiguration surfaces when
    /// the plugin is built rather than on the first file it sees.
    pub fn new<I, E>(include: I, exclude: E, base: &Path) -> Result<Self, PrecompileError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        let base = normalize_path(&base.to_string_lossy());
        Ok(Self {
            include: compile_patterns(include, &base)?,
            exclude: compile_patterns(exclude, &base)?,
        })
    }

    /// Returns true if `id` matches an include pattern and no exclude pattern.
    ///
    /// An empty include set admits every id that isn't excluded. Ids holding
    /// a NUL character are private module ids and never match.
    pub fn matches(&self, id: &str) -> bool {
        if id.contains('\0') {
            return false;
        }
        let id = normalize_path(id);

        if self
            .exclude
            .iter()
            .any(|p| p.matches_with(&id, MATCH_OPTIONS))
        {
            return false;
        }
        self.include.is_empty()
            || self
                .include
                .iter()
                .any(|p| p.matches_with(&id, MATCH_OPTIONS))
    }
}

fn compile_patterns<P>(patterns: P, base: &str) -> Result<Vec<Pattern>, PrecompileError>
where
    P: IntoIterator,
    P::Item: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|p| {
            let pattern = resolve_pattern(p.as_ref(), base);
            Pattern::new(&pattern).map_err(|source| PrecompileError::Pattern { pattern, source })
        })
        .collect()
}

fn resolve_pattern(pattern: &str, base: &str) -> String {
    let pattern = normalize_path(pattern);
    if pattern.starts_with("**") || is_absolute(&pattern) {
        return pattern;
    }
    let relative = pattern.strip_prefix("./").unwrap_or(&pattern);
    format!(
        "{}/{}",
        Pattern::escape(base.trim_end_matches('/')),
        relative
    )
}

fn is_absolute(path: &str) -> bool {
    path.starts_with('/') || Path::new(path).is_absolute()
}

/// Converts Windows separators so ids and patterns compare the same way.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}
