//! Compile diagnostics.
//!
//! [`CompileError`] is the one error shape that flows from the compiler to
//! the editor. [`ErrorReconciler`] re-homes errors reported against
//! partials and answers pending scan tickets.

mod reconcile;

pub use reconcile::{ErrorReconciler, ScanTicket};

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Prefix of every synthesized process-failure message.
pub const FATAL_PREFIX: &str = "Fatal compiler error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Error,
    Warning,
}

/// Zero-based error position. `line == None` means "do not highlight".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ErrorPos {
    pub line: Option<usize>,
    pub ch: usize,
}

impl ErrorPos {
    pub const fn at(line: usize, ch: usize) -> Self {
        Self {
            line: Some(line),
            ch,
        }
    }
}

/// A compiler error or warning attributed to a real project file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileError {
    pub path: PathBuf,
    pub pos: ErrorPos,
    pub message: String,
    pub severity: Severity,
    /// Unmodified compiler output.
    pub error_string: String,
}

impl CompileError {
    pub fn new(path: impl Into<PathBuf>, pos: ErrorPos, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            path: path.into(),
            pos,
            error_string: message.clone(),
            message,
            severity: Severity::Error,
        }
    }

    /// A process-level failure with no meaningful line.
    pub fn fatal(path: &Path, detail: impl fmt::Display) -> Self {
        Self::new(
            path,
            ErrorPos { line: None, ch: 0 },
            format!("{FATAL_PREFIX}, {detail}"),
        )
    }

    pub fn is_fatal(&self) -> bool {
        self.message.starts_with(FATAL_PREFIX)
    }

    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pos.line {
            Some(line) => write!(f, "{}:{}: {}", self.path.display(), line + 1, self.message),
            None => write!(f, "{}: {}", self.path.display(), self.message),
        }
    }
}

/// Outcome of one error scan.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ScanResult {
    pub errors: Vec<CompileError>,
    /// The scan was superseded by a newer one; `errors` is meaningless.
    pub aborted: bool,
}

impl ScanResult {
    pub fn aborted() -> Self {
        Self {
            errors: Vec::new(),
            aborted: true,
        }
    }

    pub fn completed(errors: Vec<CompileError>) -> Self {
        Self {
            errors,
            aborted: false,
        }
    }
}
