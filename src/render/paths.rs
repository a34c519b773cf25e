//! Source map and error path post-processing.
//!
//! Compilers emit `sources` relative to the output folder, with a few
//! platform quirks:
//!
//! ```text
//! file:///D:/proj/scss/_a.scss          ruby, cross-drive
//! ../../../../D:/proj/scss/_a.scss      libsass, cross-drive → C:\D:\proj\...
//! ```

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::diagnostics::CompileError;
use crate::store::MapJson;
use crate::utils::path::{clean_path, relative_to, resolve_against};

/// `C:\D:\...`: a drive letter nested after another one.
static DOUBLED_DRIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([a-z]:\\([a-z]:\\))").unwrap());

static FILE_URL_DRIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^file:///[a-z]:").unwrap());

/// Strip a `file://` URL prefix, keeping the path absolute.
pub fn strip_file_url(source: &str) -> &str {
    if FILE_URL_DRIVE.is_match(source) {
        &source["file:///".len()..]
    } else {
        source.strip_prefix("file://").unwrap_or(source)
    }
}

/// Collapse `C:\D:\x` into `D:\x`.
pub fn collapse_drive(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    match DOUBLED_DRIVE.replace(&text, "$2") {
        std::borrow::Cow::Borrowed(_) => path.to_path_buf(),
        std::borrow::Cow::Owned(fixed) => PathBuf::from(fixed),
    }
}

/// Source path as written into a map: forward slashes on every platform.
pub fn map_source(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Rewrite `map.sources` for consumers of the real project.
///
/// Each source is resolved against `compiled_out_dir` (where the compiler
/// believed the output lives), moved to the real tree with `rehome`, and
/// made relative to `real_out_dir`. The compiled input file is pinned to
/// position 0.
pub fn rewrite_sources(
    map: &mut MapJson,
    compiled_out_dir: &Path,
    compiled_input: &Path,
    real_out_dir: &Path,
    rehome: &dyn Fn(&Path) -> PathBuf,
) {
    let compiled_input = clean_path(compiled_input);
    let mut rewritten = Vec::with_capacity(map.sources.len());

    for source in &map.sources {
        let source = strip_file_url(source);
        let absolute = collapse_drive(&resolve_against(compiled_out_dir, Path::new(source)));
        let relative = map_source(&relative_to(&rehome(&absolute), real_out_dir));

        if absolute == compiled_input {
            rewritten.insert(0, relative);
        } else {
            rewritten.push(relative);
        }
    }

    map.sources = rewritten;
}

/// Re-express `map.sources` relative to another folder.
pub fn relocate_sources(map: &mut MapJson, from_dir: &Path, to_dir: &Path) {
    if from_dir == to_dir {
        return;
    }
    for source in &mut map.sources {
        let absolute = resolve_against(from_dir, Path::new(source.as_str()));
        *source = map_source(&relative_to(&absolute, to_dir));
    }
}

/// Point an error reported against the compiled copy back at the real
/// file and scrub `strip` out of its text.
pub fn rehome_error(
    error: &mut CompileError,
    compiled_input: &Path,
    real_input: &Path,
    rehome: &dyn Fn(&Path) -> PathBuf,
    strip: Option<&str>,
) {
    let reported = clean_path(&error.path);
    error.path = if reported == clean_path(compiled_input) {
        real_input.to_path_buf()
    } else {
        rehome(&reported)
    };

    if let Some(strip) = strip.filter(|s| !s.is_empty()) {
        error.message = error.message.replace(strip, "");
        error.error_string = error.error_string.replace(strip, "");
    }
}
