//! Per-file compile options.
//!
//! [`OptionsPatch`] is the sparse, deserializable form found in
//! `sassmap.toml` and in per-request overrides. [`CompileOptions`] is the
//! resolved, immutable snapshot handed to a single compile.
//!
//! Resolution order: explicit request option → scoped preference →
//! `[sass.options]` → built-in default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::Preferences;
use crate::source::SourceFile;
use crate::utils::path::resolve_against;

// ============================================================================
// Enumerated option values
// ============================================================================

/// CSS output style.
///
/// Unknown values are carried verbatim to the compiler; they fail there,
/// not here.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OutputStyle {
    #[default]
    Nested,
    Expanded,
    Compact,
    Compressed,
    Other(String),
}

impl OutputStyle {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Nested => "nested",
            Self::Expanded => "expanded",
            Self::Compact => "compact",
            Self::Compressed => "compressed",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for OutputStyle {
    fn from(value: String) -> Self {
        match value.as_str() {
            "nested" => Self::Nested,
            "expanded" => Self::Expanded,
            "compact" => Self::Compact,
            "compressed" => Self::Compressed,
            _ => Self::Other(value),
        }
    }
}

impl Serialize for OutputStyle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OutputStyle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}

/// Source comments: off, on (line numbers), or `"map"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceComments {
    Off,
    On,
    #[default]
    Map,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FlagOrString {
    Flag(bool),
    Text(String),
}

impl Serialize for SourceComments {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Off => serializer.serialize_bool(false),
            Self::On => serializer.serialize_bool(true),
            Self::Map => serializer.serialize_str("map"),
        }
    }
}

impl<'de> Deserialize<'de> for SourceComments {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match FlagOrString::deserialize(deserializer)? {
            FlagOrString::Flag(false) => Ok(Self::Off),
            FlagOrString::Flag(true) => Ok(Self::On),
            FlagOrString::Text(s) if s == "map" => Ok(Self::Map),
            FlagOrString::Text(s) => Err(serde::de::Error::custom(format!(
                "source_comments must be true, false or \"map\", got `{s}`"
            ))),
        }
    }
}

/// Compiler backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compiler {
    #[default]
    Libsass,
    Ruby,
}

impl Compiler {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Libsass => "libsass",
            Self::Ruby => "ruby",
        }
    }
}

/// Compass project settings. Presence enables compass.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Compass {
    /// Directory holding `config.rb`.
    #[serde(default, rename(serialize = "projectRoot"), alias = "projectRoot")]
    pub project_root: PathBuf,
}

/// Source-map target: a flag, or an explicit map file path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceMapTarget {
    Enabled(bool),
    Path(PathBuf),
}

impl Default for SourceMapTarget {
    fn default() -> Self {
        Self::Enabled(true)
    }
}

/// Compiler timeout. `-1` (any negative value) disables it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeoutMs(pub i64);

impl TimeoutMs {
    pub const DEFAULT: Self = Self(10_000);

    pub fn duration(self) -> Option<Duration> {
        u64::try_from(self.0).ok().map(Duration::from_millis)
    }
}

impl Default for TimeoutMs {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// ============================================================================
// OptionsPatch
// ============================================================================

/// Sparse option set. `None` means "not specified at this layer".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionsPatch {
    pub include_paths: Option<Vec<PathBuf>>,
    #[serde(deserialize_with = "one_or_many", alias = "image_path")]
    pub image_paths: Option<Vec<PathBuf>>,
    pub output_style: Option<OutputStyle>,
    pub source_comments: Option<SourceComments>,
    /// Output file name, relative to the output directory.
    pub output: Option<PathBuf>,
    /// Output directory, relative to the input file's directory.
    pub output_dir: Option<PathBuf>,
    pub source_map: Option<SourceMapTarget>,
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<PathBuf>>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(PathBuf),
        Many(Vec<PathBuf>),
    }

    Ok(Option::<OneOrMany>::deserialize(deserializer)?.map(|v| match v {
        OneOrMany::One(p) => vec![p],
        OneOrMany::Many(v) => v,
    }))
}

impl OptionsPatch {
    /// Layer `self` on top of `lower`: fields set here win.
    pub fn over(self, lower: &OptionsPatch) -> OptionsPatch {
        OptionsPatch {
            include_paths: self.include_paths.or_else(|| lower.include_paths.clone()),
            image_paths: self.image_paths.or_else(|| lower.image_paths.clone()),
            output_style: self.output_style.or_else(|| lower.output_style.clone()),
            source_comments: self.source_comments.or(lower.source_comments),
            output: self.output.or_else(|| lower.output.clone()),
            output_dir: self.output_dir.or_else(|| lower.output_dir.clone()),
            source_map: self.source_map.or_else(|| lower.source_map.clone()),
        }
    }
}

// ============================================================================
// CompileOptions
// ============================================================================

/// Immutable option snapshot for one compile invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileOptions {
    /// Ordered include paths; the first match wins on name collisions.
    pub include_paths: Vec<PathBuf>,
    pub image_paths: Vec<PathBuf>,
    pub output_style: OutputStyle,
    pub source_comments: SourceComments,
    pub compiler: Compiler,
    pub compass: Option<Compass>,
    pub output: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub source_map: SourceMapTarget,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            include_paths: Vec::new(),
            image_paths: Vec::new(),
            output_style: OutputStyle::Nested,
            source_comments: SourceComments::Map,
            compiler: Compiler::Libsass,
            compass: None,
            output: None,
            output_dir: None,
            source_map: SourceMapTarget::Enabled(true),
        }
    }
}

impl CompileOptions {
    /// Resolve options for `file`, or `None` when compiling is disabled for it.
    ///
    /// Re-run on every compile: preferences may have changed in between.
    pub fn resolve(
        prefs: &dyn Preferences,
        file: &SourceFile,
        explicit: Option<&OptionsPatch>,
    ) -> Option<Self> {
        if !prefs.enabled(file.path()) {
            return None;
        }

        let preferred = prefs.options(file.path());
        let merged = match explicit {
            Some(explicit) => explicit.clone().over(&preferred),
            None => preferred,
        };

        Some(Self::from_patch(
            merged,
            prefs.compiler(file.path()),
            prefs.compass(file.path()),
        ))
    }

    /// Fill unspecified fields with built-in defaults.
    pub fn from_patch(patch: OptionsPatch, compiler: Compiler, compass: Option<Compass>) -> Self {
        let defaults = Self::default();
        Self {
            include_paths: patch.include_paths.unwrap_or(defaults.include_paths),
            image_paths: patch.image_paths.unwrap_or(defaults.image_paths),
            output_style: patch.output_style.unwrap_or(defaults.output_style),
            source_comments: patch.source_comments.unwrap_or(defaults.source_comments),
            compiler,
            compass,
            output: patch.output,
            output_dir: patch.output_dir,
            source_map: patch.source_map.unwrap_or(defaults.source_map),
        }
    }

    /// Nominal CSS output path for `input`.
    ///
    /// Compass projects may redirect output; callers must prefer the path
    /// the compiler reports.
    pub fn output_file(&self, input: &SourceFile) -> PathBuf {
        let dir = match &self.output_dir {
            Some(dir) => resolve_against(input.parent(), dir),
            None => input.parent().to_path_buf(),
        };
        let name = self
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(input.css_name()));
        resolve_against(&dir, &name)
    }

    /// Map file to write next to the output, if map persistence is enabled.
    pub fn map_file(&self, input: &SourceFile) -> Option<PathBuf> {
        match &self.source_map {
            SourceMapTarget::Enabled(false) => None,
            SourceMapTarget::Enabled(true) => Some(default_map_path(&self.output_file(input))),
            SourceMapTarget::Path(p) => Some(resolve_against(input.parent(), p)),
        }
    }

    /// Map target handed to the compiler. Maps are always generated so the
    /// editor can use them even when they are not persisted.
    pub fn map_target(&self, input: &SourceFile) -> PathBuf {
        self.map_file(input)
            .unwrap_or_else(|| default_map_path(&self.output_file(input)))
    }
}

/// `out.css` → `out.css.map`.
pub fn default_map_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".map");
    PathBuf::from(name)
}
