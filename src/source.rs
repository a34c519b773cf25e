//! SASS source file classification.
//!
//! A [`SourceFile`] is identified by its absolute path and never mutated.
//! Entry files are compiled directly; partials (`_name.scss`) only ever
//! reach the compiler through an `@import` from an entry.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

/// Default entry pattern: any `.scss`/`.sass` file not starting with `_`.
pub const DEFAULT_ENTRY_PATTERN: &str = r"^[^_].*\.s[ac]ss$";

pub(crate) static DEFAULT_ENTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DEFAULT_ENTRY_PATTERN).unwrap());

/// Syntax flavor, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Syntax {
    Scss,
    Sass,
}

impl Syntax {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "scss" => Some(Self::Scss),
            "sass" => Some(Self::Sass),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Scss => "scss",
            Self::Sass => "sass",
        }
    }
}

/// A SASS/SCSS file observed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceFile {
    path: PathBuf,
    syntax: Syntax,
}

impl SourceFile {
    /// Classify `path`. Returns `None` for anything that isn't `.scss`/`.sass`.
    pub fn new(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let syntax = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Syntax::from_extension)?;
        Some(Self { path, syntax })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn syntax(&self) -> Syntax {
        self.syntax
    }

    pub fn parent(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new(""))
    }

    pub fn name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Partials are conventionally prefixed with `_`.
    pub fn is_partial(&self) -> bool {
        self.name().starts_with('_')
    }

    /// Entry check against the default pattern.
    pub fn is_entry(&self) -> bool {
        self.is_entry_with(&DEFAULT_ENTRY_RE)
    }

    /// Entry check against a configured input pattern (matched on the file name).
    pub fn is_entry_with(&self, pattern: &Regex) -> bool {
        !self.is_partial() && pattern.is_match(self.name())
    }

    /// Default CSS output name: `main.scss` → `main.css`.
    pub fn css_name(&self) -> String {
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        format!("{stem}.css")
    }
}

/// Check whether `path` looks like a SASS source at all.
pub fn is_sass_path(path: &Path) -> bool {
    SourceFile::new(path).is_some()
}
