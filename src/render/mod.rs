//! Render pipeline.
//!
//! Builds worker requests from [`CompileOptions`], runs them through the
//! [`CompileQueue`] and rewrites the results for the real project tree.
//!
//! ```text
//! render()  ── message ──► queue ──► rewrite sources (input first)
//! preview() ── stage slot ─► queue ──► rewrite sources + errors out of the slot
//! compile() ── render() ──► mkdirp + write css/map (never on failure)
//! ```

pub mod compass;
mod paths;
mod staging;

pub use staging::{TEMP_NAMESPACE, slot_for};

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::compiler::{CompileQueue, RenderMessage, RenderOutput};
use crate::config::{CompileOptions, SourceMapTarget};
use crate::diagnostics::{CompileError, ErrorPos};
use crate::source::SourceFile;
use crate::store::MapJson;
use crate::utils::path::resolve_against;

use staging::{Stage, StageRequest};

/// Compiled CSS and its rewritten map, handed once to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderResult {
    pub css: String,
    /// Map with `sources` relative to the folder of `css_file()`, input
    /// file first.
    pub map: MapJson,
    pub warning: Option<CompileError>,
    /// Nominal output path derived from the options.
    pub out_file: PathBuf,
    /// Where the map is persisted, when map persistence is enabled.
    pub map_file: Option<PathBuf>,
    /// Output path chosen by compass, which wins over `out_file`.
    pub compass_out_file: Option<PathBuf>,
}

impl RenderResult {
    /// The output path to use.
    pub fn css_file(&self) -> &Path {
        self.compass_out_file.as_deref().unwrap_or(&self.out_file)
    }
}

pub type RenderOutcome = Result<RenderResult, Vec<CompileError>>;

/// Per-session render front end.
pub struct RenderPipeline {
    queue: CompileQueue,
    temp_root: RwLock<PathBuf>,
    /// Slots used since the last cleanup.
    slots: Mutex<FxHashSet<PathBuf>>,
}

impl RenderPipeline {
    /// `temp_parent` defaults to the system temp folder.
    pub fn new(queue: CompileQueue, temp_parent: Option<&Path>) -> Self {
        let parent = temp_parent.map_or_else(std::env::temp_dir, Path::to_path_buf);
        Self {
            queue,
            temp_root: RwLock::new(parent.join(TEMP_NAMESPACE)),
            slots: Mutex::new(FxHashSet::default()),
        }
    }

    pub fn queue(&self) -> &CompileQueue {
        &self.queue
    }

    pub fn temp_root(&self) -> PathBuf {
        self.temp_root.read().clone()
    }

    /// Move preview slots under `dir`. Existing slots stay until
    /// [`delete_temp_files`](Self::delete_temp_files).
    pub fn set_temp_dir(&self, dir: &Path) -> Result<()> {
        let root = dir.join(TEMP_NAMESPACE);
        fs::create_dir_all(&root).with_context(|| format!("Failed to create {}", root.display()))?;
        *self.temp_root.write() = root;
        Ok(())
    }

    /// Remove every slot created since the last cleanup.
    pub fn delete_temp_files(&self) {
        let slots: Vec<PathBuf> = self.slots.lock().drain().collect();
        crate::debug!("preview"; "removing {} temp slot(s)", slots.len());
        staging::remove_slots(&slots);
    }

    /// Compile `input` in place; nothing is written by the pipeline.
    pub async fn render(&self, input: &SourceFile, options: &CompileOptions) -> RenderOutcome {
        let message = build_message(input, options);
        let out_file = options.output_file(input);
        let compass_out_file = options.compass.is_some().then(|| message.out_file.clone());
        let out_dir = parent_of(&message.out_file).to_path_buf();

        let RenderOutput { css, mut map, warning } = self.queue.submit(message).await?;
        paths::rewrite_sources(&mut map, &out_dir, input.path(), &out_dir, &|p: &Path| p.to_path_buf());

        Ok(RenderResult {
            css,
            map,
            warning,
            out_file,
            map_file: options.map_file(input),
            compass_out_file,
        })
    }

    /// Compile `input` against a staged copy where `overrides` (path →
    /// unsaved text) shadow disk content. The project is never touched.
    pub async fn preview(
        &self,
        input: &SourceFile,
        options: &CompileOptions,
        overrides: &FxHashMap<PathBuf, String>,
    ) -> RenderOutcome {
        let real = build_message(input, options);
        let temp_root = self.temp_root();

        let map_target = options.map_target(input);
        let stage = Stage::prepare(
            &temp_root,
            &StageRequest {
                input: input.path(),
                out_file: &real.out_file,
                map_file: &map_target,
                include_paths: &real.include_paths,
                image_paths: &real.image_paths,
                overrides,
            },
        )
        .map_err(|e| vec![staging_error(input.path(), &e)])?;
        self.slots.lock().insert(stage.slot.clone());

        let message = RenderMessage {
            file: stage.file.clone(),
            out_file: stage.out_file.clone(),
            include_paths: stage.include_paths.clone(),
            image_paths: stage.image_paths.clone(),
            source_map: SourceMapTarget::Path(stage.map_file.clone()),
            ..real.clone()
        };

        let slot_text = stage.slot_str();
        let rehome = |p: &Path| stage.real_path(p);
        let fix_error = |mut err: CompileError| {
            paths::rehome_error(&mut err, &stage.file, input.path(), &rehome, Some(&slot_text));
            err
        };

        let output = match self.queue.submit(message).await {
            Ok(output) => output,
            Err(errors) => return Err(errors.into_iter().map(&fix_error).collect()),
        };

        let RenderOutput { css, mut map, warning } = output;
        paths::rewrite_sources(
            &mut map,
            parent_of(&stage.out_file),
            &stage.file,
            parent_of(&real.out_file),
            &rehome,
        );
        crate::debug!("preview"; "{} ({} sources)", input.path().display(), map.sources.len());

        Ok(RenderResult {
            css,
            map,
            warning: warning.map(&fix_error),
            out_file: options.output_file(input),
            map_file: options.map_file(input),
            compass_out_file: options.compass.is_some().then(|| real.out_file.clone()),
        })
    }

    /// Render and write the CSS (and map, if persisted) to disk, creating
    /// folders as needed. A failed compile writes nothing.
    pub async fn compile(&self, input: &SourceFile, options: &CompileOptions) -> RenderOutcome {
        let result = self.render(input, options).await?;
        write_outputs(&result).map_err(|e| {
            crate::log!("error"; "{:#}", e);
            vec![CompileError::new(
                result.css_file(),
                ErrorPos::default(),
                format!("{e:#}"),
            )]
        })?;
        crate::log!("compile"; "{} -> {}", input.path().display(), result.css_file().display());
        Ok(result)
    }
}

/// Worker request for `input`, with every path made absolute.
pub fn build_message(input: &SourceFile, options: &CompileOptions) -> RenderMessage {
    let parent = input.parent();
    let absolute = |paths: &[PathBuf]| -> Vec<PathBuf> {
        paths.iter().map(|p| resolve_against(parent, p)).collect()
    };

    let out_file = match &options.compass {
        Some(compass) => compass::output_file(&compass.project_root, input),
        None => options.output_file(input),
    };

    RenderMessage {
        file: input.path().to_path_buf(),
        out_file,
        include_paths: absolute(&options.include_paths),
        image_paths: absolute(&options.image_paths),
        output_style: options.output_style.clone(),
        source_comments: options.source_comments,
        source_map: SourceMapTarget::Path(options.map_target(input)),
        compiler: options.compiler,
        compass: options.compass.clone(),
    }
}

fn parent_of(path: &Path) -> &Path {
    path.parent().unwrap_or(Path::new("/"))
}

fn staging_error(input: &Path, err: &anyhow::Error) -> CompileError {
    crate::log!("error"; "{:#}", err);
    CompileError::new(input, ErrorPos::default(), format!("Failed to stage preview: {err:#}"))
}

fn write_outputs(result: &RenderResult) -> Result<()> {
    let css_file = result.css_file().to_path_buf();
    write_file(&css_file, &result.css)?;

    if let Some(map_file) = result.map_file.clone() {
        let mut persisted = result.map.clone();
        paths::relocate_sources(&mut persisted, parent_of(&css_file), parent_of(&map_file));
        write_file(&map_file, &persisted.to_text())?;
    }
    Ok(())
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}
