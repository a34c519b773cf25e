//! Preferences for `sassmap.toml`.
//!
//! # Module Structure
//!
//! ```text
//! config/
//! ├── error      # ConfigError
//! ├── options    # OptionsPatch, CompileOptions and option enums
//! └── mod.rs     # SassConfig, Preferences, PreferenceStore (this file)
//! ```
//!
//! # Example
//!
//! ```toml
//! [sass]
//! enabled = true
//! compiler = "libsass"
//! timeout = 10000
//!
//! [sass.options]
//! include_paths = ["vendor"]
//! output_style = "nested"
//!
//! [[sass.overrides]]
//! path = "themes/dark"
//! options = { output_style = "compressed" }
//! ```

mod error;
pub mod options;

pub use error::ConfigError;
pub use options::{
    CompileOptions, Compass, Compiler, OptionsPatch, OutputStyle, SourceComments,
    SourceMapTarget, TimeoutMs,
};

use std::fs;
use std::hash::Hasher;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use regex::Regex;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::source::{DEFAULT_ENTRY_PATTERN, DEFAULT_ENTRY_RE};
use crate::utils::path::resolve_against;

/// Default config file name.
pub const CONFIG_FILE: &str = "sassmap.toml";

// ============================================================================
// Preferences trait
// ============================================================================

/// Scoped key/value lookups by file path.
///
/// This is the host-facing preferences source; [`SassConfig`] and
/// [`PreferenceStore`] are the built-in implementations.
pub trait Preferences: Send + Sync {
    fn enabled(&self, file: &Path) -> bool;
    fn compiler(&self, file: &Path) -> Compiler;
    fn compass(&self, file: &Path) -> Option<Compass>;
    fn options(&self, file: &Path) -> OptionsPatch;
    fn timeout(&self) -> TimeoutMs;
}

// ============================================================================
// Config sections
// ============================================================================

/// Root configuration structure representing `sassmap.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SassConfig {
    /// Absolute path to the config file (internal use only)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Project root directory - parent of config file (internal use only)
    #[serde(skip)]
    pub root: PathBuf,

    #[serde(default)]
    pub sass: SassSection,
}

/// `[sass]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SassSection {
    pub enabled: bool,
    pub compiler: Compiler,
    pub timeout: TimeoutMs,
    /// Long-lived worker speaking the JSON line protocol.
    pub worker: Vec<String>,
    /// `sass` command line used by the ruby backend.
    pub sass_command: Vec<String>,
    /// Parent directory for preview staging (defaults to the system temp dir).
    pub temp_dir: Option<PathBuf>,
    /// File-name pattern for entry files.
    pub entry_pattern: String,
    pub compass: Option<Compass>,
    pub options: OptionsPatch,
    pub overrides: Vec<ScopedOverride>,
}

impl Default for SassSection {
    fn default() -> Self {
        Self {
            enabled: true,
            compiler: Compiler::Libsass,
            timeout: TimeoutMs::DEFAULT,
            worker: vec!["sassmap-worker".into()],
            sass_command: vec!["sass".into()],
            temp_dir: None,
            entry_pattern: DEFAULT_ENTRY_PATTERN.into(),
            compass: None,
            options: OptionsPatch::default(),
            overrides: Vec::new(),
        }
    }
}

/// `[[sass.overrides]]`: preferences applying below `path` (relative to root).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopedOverride {
    pub path: PathBuf,
    pub enabled: Option<bool>,
    pub compiler: Option<Compiler>,
    pub compass: Option<Compass>,
    pub options: OptionsPatch,
}

// ============================================================================
// Loading
// ============================================================================

impl SassConfig {
    /// Load configuration from a file. The project root is the file's parent.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let root = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
        let mut config = Self::parse(&content, &root)?;
        config.config_path = path.to_path_buf();
        Ok(config)
    }

    /// Load `path` if it exists, otherwise defaults rooted at `fallback_root`.
    pub fn load_or_default(path: &Path, fallback_root: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::load(path);
        }
        Ok(Self {
            config_path: path.to_path_buf(),
            root: fallback_root.to_path_buf(),
            ..Default::default()
        })
    }

    /// Parse config text with `root` as the project root.
    pub fn parse(content: &str, root: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content)?;
        config.root = root.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sass.worker.is_empty() {
            return Err(ConfigError::Validation("sass.worker must not be empty".into()));
        }
        if self.sass.sass_command.is_empty() {
            return Err(ConfigError::Validation(
                "sass.sass_command must not be empty".into(),
            ));
        }
        if let Err(e) = Regex::new(&self.sass.entry_pattern) {
            return Err(ConfigError::Validation(format!(
                "sass.entry_pattern is not a valid regex: {e}"
            )));
        }
        Ok(())
    }

    /// Compiled entry pattern (validated at load time).
    pub fn entry_regex(&self) -> Regex {
        Regex::new(&self.sass.entry_pattern).unwrap_or_else(|_| DEFAULT_ENTRY_RE.clone())
    }

    /// Overrides applying to `file`, shortest scope first.
    fn scopes_for(&self, file: &Path) -> Vec<&ScopedOverride> {
        let mut scopes: Vec<_> = self
            .sass
            .overrides
            .iter()
            .filter(|o| file.starts_with(resolve_against(&self.root, &o.path)))
            .collect();
        scopes.sort_by_key(|o| o.path.components().count());
        scopes
    }

    /// Compass settings with the project root made absolute.
    fn absolute_compass(&self, compass: &Compass) -> Compass {
        Compass {
            project_root: resolve_against(&self.root, &compass.project_root),
        }
    }
}

impl Preferences for SassConfig {
    fn enabled(&self, file: &Path) -> bool {
        self.scopes_for(file)
            .iter()
            .rev()
            .find_map(|o| o.enabled)
            .unwrap_or(self.sass.enabled)
    }

    fn compiler(&self, file: &Path) -> Compiler {
        self.scopes_for(file)
            .iter()
            .rev()
            .find_map(|o| o.compiler)
            .unwrap_or(self.sass.compiler)
    }

    fn compass(&self, file: &Path) -> Option<Compass> {
        self.scopes_for(file)
            .iter()
            .rev()
            .find_map(|o| o.compass.as_ref())
            .or(self.sass.compass.as_ref())
            .map(|c| self.absolute_compass(c))
    }

    fn options(&self, file: &Path) -> OptionsPatch {
        self.scopes_for(file)
            .into_iter()
            .fold(self.sass.options.clone(), |acc, scope| {
                scope.options.clone().over(&acc)
            })
    }

    fn timeout(&self) -> TimeoutMs {
        self.sass.timeout
    }
}

// ============================================================================
// Live handle
// ============================================================================

/// Atomically swappable config, re-read when the file changes.
pub struct PreferenceStore {
    current: ArcSwap<SassConfig>,
    hash: AtomicU64,
}

impl PreferenceStore {
    pub fn new(config: SassConfig) -> Self {
        let hash = file_hash(&config.config_path).unwrap_or(0);
        Self {
            current: ArcSwap::from_pointee(config),
            hash: AtomicU64::new(hash),
        }
    }

    #[inline]
    pub fn get(&self) -> Arc<SassConfig> {
        self.current.load_full()
    }

    /// Replace the config wholesale.
    pub fn store(&self, config: SassConfig) {
        self.current.store(Arc::new(config));
    }

    /// Reload config from disk if content changed.
    ///
    /// Returns `Ok(true)` if config was updated, `Ok(false)` if unchanged.
    pub fn reload(&self) -> Result<bool, ConfigError> {
        let current = self.get();
        let path = &current.config_path;
        let Some(new_hash) = file_hash(path) else {
            return Ok(false);
        };
        if new_hash == self.hash.load(Ordering::Relaxed) {
            return Ok(false);
        }

        let config = SassConfig::load(path)?;
        self.current.store(Arc::new(config));
        self.hash.store(new_hash, Ordering::Relaxed);
        Ok(true)
    }
}

fn file_hash(path: &Path) -> Option<u64> {
    let content = fs::read(path).ok()?;
    let mut hasher = FxHasher::default();
    hasher.write(&content);
    Some(hasher.finish())
}

impl Preferences for PreferenceStore {
    fn enabled(&self, file: &Path) -> bool {
        self.get().enabled(file)
    }

    fn compiler(&self, file: &Path) -> Compiler {
        self.get().compiler(file)
    }

    fn compass(&self, file: &Path) -> Option<Compass> {
        self.get().compass(file)
    }

    fn options(&self, file: &Path) -> OptionsPatch {
        self.get().options(file)
    }

    fn timeout(&self) -> TimeoutMs {
        self.get().timeout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> SassConfig {
        SassConfig::parse(content, Path::new("/proj")).unwrap()
    }

    #[test]
    fn test_empty_config_defaults() {
        let config = parse("");
        assert!(config.sass.enabled);
        assert_eq!(config.sass.compiler, Compiler::Libsass);
        assert_eq!(config.sass.timeout, TimeoutMs::DEFAULT);
        assert!(config.compass(Path::new("/proj/a.scss")).is_none());
    }

    #[test]
    fn test_scoped_override_longest_wins() {
        let config = parse(
            r#"
[sass.options]
output_style = "expanded"

[[sass.overrides]]
path = "themes"
options = { output_style = "compact" }

[[sass.overrides]]
path = "themes/dark"
compiler = "ruby"
options = { output_style = "compressed" }
"#,
        );

        let dark = Path::new("/proj/themes/dark/main.scss");
        assert_eq!(config.options(dark).output_style, Some(OutputStyle::Compressed));
        assert_eq!(config.compiler(dark), Compiler::Ruby);

        let light = Path::new("/proj/themes/light/main.scss");
        assert_eq!(config.options(light).output_style, Some(OutputStyle::Compact));
        assert_eq!(config.compiler(light), Compiler::Libsass);

        let other = Path::new("/proj/site/main.scss");
        assert_eq!(config.options(other).output_style, Some(OutputStyle::Expanded));
    }

    #[test]
    fn test_scoped_disable() {
        let config = parse(
            r#"
[[sass.overrides]]
path = "vendor"
enabled = false
"#,
        );
        assert!(!config.enabled(Path::new("/proj/vendor/bootstrap.scss")));
        assert!(config.enabled(Path::new("/proj/main.scss")));
    }

    #[test]
    fn test_compass_root_made_absolute() {
        let config = parse("[sass.compass]\nproject_root = \"site\"\n");
        let compass = config.compass(Path::new("/proj/site/sass/a.scss")).unwrap();
        assert_eq!(compass.project_root, PathBuf::from("/proj/site"));
    }

    #[test]
    fn test_invalid_compiler_rejected() {
        let err = SassConfig::parse("[sass]\ncompiler = \"dart\"\n", Path::new("/proj"));
        assert!(matches!(err, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_empty_worker_rejected() {
        let err = SassConfig::parse("[sass]\nworker = []\n", Path::new("/proj"));
        assert!(matches!(err, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_store_reload_detects_change() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[sass]\ntimeout = 500\n").unwrap();

        let store = PreferenceStore::new(SassConfig::load(&path).unwrap());
        assert_eq!(store.timeout(), TimeoutMs(500));
        assert!(!store.reload().unwrap());

        fs::write(&path, "[sass]\ntimeout = -1\n").unwrap();
        assert!(store.reload().unwrap());
        assert_eq!(store.timeout(), TimeoutMs(-1));
    }
}
