//! Shell-style exclusion patterns for package contents.
//!
//! Patterns are matched against the whole root-relative path using `/` as
//! separator. `*` may cross directory boundaries, so `*.bin` excludes
//! `assets/blob.bin` and `skip/*` excludes everything below `skip/`.

use std::io::ErrorKind;
use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};
use tracing::warn;

/// Name of the ignore file read from the source root by default.
pub const DEFAULT_EXCLUDE_FILE: &str = ".stratusignore";

/// Patterns that are always excluded from a package.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    DEFAULT_EXCLUDE_FILE,
    "function.json",
    "function_url.json",
    ".git/*",
    "*/.git/*",
    ".terraform/*",
    "terraform.tfstate",
];

fn compile(pattern: &str) -> Option<GlobMatcher> {
    match GlobBuilder::new(pattern)
        .literal_separator(false)
        .backslash_escape(true)
        .build()
    {
        Ok(glob) => Some(glob.compile_matcher()),
        Err(e) => {
            warn!(pattern, error = %e, "ignoring invalid exclude pattern");
            None
        }
    }
}

/// Returns `true` if `pattern` matches the whole `relative_path`.
///
/// An invalid pattern never matches.
#[must_use]
pub fn matches(pattern: &str, relative_path: &str) -> bool {
    compile(pattern).is_some_and(|m| m.is_match(relative_path))
}

/// Returns `true` if any of `patterns` matches `relative_path`.
#[must_use]
pub fn is_excluded<S: AsRef<str>>(relative_path: &str, patterns: &[S]) -> bool {
    patterns
        .iter()
        .any(|pattern| matches(pattern.as_ref(), relative_path))
}

/// A pattern list compiled once for repeated matching during a walk.
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    patterns: Vec<String>,
    matchers: Vec<GlobMatcher>,
}

impl ExcludeSet {
    /// Compile a set of patterns. Invalid patterns are dropped with a warning.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for pattern in patterns {
            set.push(pattern);
        }
        set
    }

    /// The default exclusions plus `extra`.
    pub fn with_defaults<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::new(DEFAULT_EXCLUDES.iter().copied());
        for pattern in extra {
            set.push(pattern);
        }
        set
    }

    /// Add a single pattern.
    pub fn push(&mut self, pattern: impl Into<String>) {
        let pattern = pattern.into();
        if let Some(matcher) = compile(&pattern) {
            self.matchers.push(matcher);
        }
        self.patterns.push(pattern);
    }

    /// Patterns as supplied, including any that failed to compile.
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Returns `true` if any compiled pattern matches `relative_path`.
    #[must_use]
    pub fn is_excluded(&self, relative_path: &str) -> bool {
        self.matchers.iter().any(|m| m.is_match(relative_path))
    }
}

/// Parse an ignore file into patterns.
///
/// One pattern per line; blank lines and lines starting with `#` are skipped.
/// A missing file yields no patterns.
pub fn read_exclude_file(path: &Path) -> std::io::Result<Vec<String>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect())
}
