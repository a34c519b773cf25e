//! Compass output location from `config.rb`.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::source::SourceFile;
use crate::utils::path::clean_path;

pub const CONFIG_RB: &str = "config.rb";

const DEFAULT_HTTP_PATH: &str = ".";
const DEFAULT_CSS_DIR: &str = "css";

/// `key = "value"` assignments; quotes optional.
static ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*(http_path|css_dir)\s*=\s*["']?([^"'\r\n#]*?)["']?\s*(?:#.*)?$"#).unwrap()
});

/// CSS folder relative to the project root as configured in `config.rb`.
/// A missing file yields the defaults.
pub fn css_path(project_root: &Path) -> PathBuf {
    let text = std::fs::read_to_string(project_root.join(CONFIG_RB)).unwrap_or_default();
    css_path_from(&text)
}

fn css_path_from(config: &str) -> PathBuf {
    let mut http_path = DEFAULT_HTTP_PATH.to_string();
    let mut css_dir = DEFAULT_CSS_DIR.to_string();

    for caps in ASSIGNMENT.captures_iter(config) {
        let value = caps[2].trim_end_matches('/').to_string();
        if value.is_empty() {
            continue;
        }
        match &caps[1] {
            "http_path" => http_path = value,
            _ => css_dir = value,
        }
    }

    let joined = if css_dir.starts_with('/') {
        css_dir
    } else {
        format!("{http_path}/{css_dir}")
    };
    // Root-relative dirs are still placed under the project root.
    clean_path(Path::new(joined.trim_start_matches('/')))
}

/// Where compass writes the CSS for `input`: the output name always
/// mirrors the input name.
pub fn output_file(project_root: &Path, input: &SourceFile) -> PathBuf {
    clean_path(&project_root.join(css_path(project_root)).join(input.css_name()))
}
