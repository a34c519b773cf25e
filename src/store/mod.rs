//! Source map store.
//!
//! Owns every parsed source map of the session, the reverse dependency
//! index built from them, and the pending state consumers wait on while a
//! map is being recomputed.
//!
//! ```text
//! set_pending(css) ──► Pending ──publish()──► Ready(map)
//!                         │
//!                         └──fail()/parse error──► Ready(previous) | Failed
//! ```
//!
//! Two tiers exist per generated file. A **persisted** map comes from the
//! last compile to disk, a **preview** map from the last in-memory preview.
//! Reads prefer the preview tier. Every mutation runs under one write lock
//! so readers observe either the old or the new state.

mod index;
mod json;
mod mapping_url;

pub use index::DependencyIndex;
pub use json::MapJson;
pub use mapping_url::source_mapping_url;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::watch;

use crate::utils::path::resolve_against;

// ============================================================================
// Types
// ============================================================================

/// Which compile produced a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Persisted,
    Preview,
}

/// A parsed map with its sources resolved to absolute paths.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMap {
    /// Generated CSS file this map describes.
    pub css_file: PathBuf,
    pub map_file: Option<PathBuf>,
    /// Input file of the compile; the first local source unless given.
    pub sass_file: Option<PathBuf>,
    /// `sources` resolved against the map's folder, same order.
    pub local_sources: Vec<PathBuf>,
    pub json: MapJson,
}

impl SourceMap {
    /// Raw `sources` as emitted by the compiler.
    pub fn sources(&self) -> &[String] {
        &self.json.sources
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("malformed source map for {}: {message}", file.display())]
    Parse { file: PathBuf, message: String },
    #[error("cannot read source map {}: {message}", path.display())]
    MapFile { path: PathBuf, message: String },
    #[error("no sourceMappingURL in {}", .0.display())]
    NoReference(PathBuf),
    #[error("compile of {} failed: {message}", file.display())]
    Compile { file: PathBuf, message: String },
    #[error("no source map for {}", .0.display())]
    Missing(PathBuf),
    #[error("pending source map for {} was superseded", .0.display())]
    Superseded(PathBuf),
}

#[derive(Debug, Clone)]
enum MapState {
    Pending,
    Ready(Arc<SourceMap>),
    Failed(StoreError),
}

/// Waits for a map that is being recomputed.
#[derive(Debug)]
pub struct PendingMap {
    file: PathBuf,
    rx: watch::Receiver<MapState>,
}

impl PendingMap {
    pub async fn wait(mut self) -> Result<Arc<SourceMap>, StoreError> {
        let state = self
            .rx
            .wait_for(|s| !matches!(s, MapState::Pending))
            .await
            .map_err(|_| StoreError::Superseded(self.file.clone()))?;
        match &*state {
            MapState::Ready(map) => Ok(Arc::clone(map)),
            MapState::Failed(err) => Err(err.clone()),
            MapState::Pending => Err(StoreError::Superseded(self.file.clone())),
        }
    }
}

/// Result of [`SourceMapStore::get`].
#[derive(Debug)]
pub enum MapLookup {
    Ready(Arc<SourceMap>),
    Pending(PendingMap),
    Missing(PathBuf),
}

impl MapLookup {
    /// Wait for the map if it is pending.
    pub async fn resolve(self) -> Result<Arc<SourceMap>, StoreError> {
        match self {
            Self::Ready(map) => Ok(map),
            Self::Pending(pending) => pending.wait().await,
            Self::Missing(file) => Err(StoreError::Missing(file)),
        }
    }
}

/// One generated file that depends on a source.
#[derive(Debug, Clone)]
pub struct Usage {
    pub css_file: PathBuf,
    pub map: Arc<SourceMap>,
}

/// Current text of open editor documents.
pub trait DocumentSource: Send + Sync {
    /// In-memory text for `path`, or `None` to fall back to disk.
    fn text(&self, path: &Path) -> Option<String>;
}

impl DocumentSource for FxHashMap<PathBuf, String> {
    fn text(&self, path: &Path) -> Option<String> {
        self.get(path).cloned()
    }
}

impl DocumentSource for RwLock<FxHashMap<PathBuf, String>> {
    fn text(&self, path: &Path) -> Option<String> {
        self.read().get(path).cloned()
    }
}

/// Text of one local source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub text: String,
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Default)]
struct Tiers {
    persisted: Option<Arc<SourceMap>>,
    preview: Option<Arc<SourceMap>>,
}

impl Tiers {
    fn effective(&self) -> Option<&Arc<SourceMap>> {
        self.preview.as_ref().or(self.persisted.as_ref())
    }
}

#[derive(Debug, Default)]
struct State {
    maps: FxHashMap<PathBuf, Tiers>,
    pending: FxHashMap<PathBuf, watch::Sender<MapState>>,
    index: DependencyIndex,
}

impl State {
    fn effective(&self, css_file: &Path) -> Option<Arc<SourceMap>> {
        self.maps.get(css_file).and_then(Tiers::effective).cloned()
    }

    /// Re-index `css_file` from whichever map is now in effect.
    fn reindex(&mut self, css_file: &Path) {
        match self.effective(css_file) {
            Some(map) => self.index.record(css_file, &map.local_sources),
            None => {
                self.index.remove(css_file);
            }
        }
    }

    fn mark_pending(&mut self, css_file: &Path) {
        let live = self
            .pending
            .get(css_file)
            .is_some_and(|tx| matches!(*tx.borrow(), MapState::Pending));
        if !live {
            let (tx, _) = watch::channel(MapState::Pending);
            self.pending.insert(css_file.to_path_buf(), tx);
        }
    }

    fn settle(&mut self, css_file: &Path, state: MapState) {
        if let Some(tx) = self.pending.get(css_file) {
            tx.send_replace(state);
        }
    }

    /// Generated files whose maps (either tier) were compiled from `input`.
    fn generated_from(&self, input: &Path) -> Vec<PathBuf> {
        self.maps
            .iter()
            .filter(|(_, tiers)| {
                [&tiers.persisted, &tiers.preview]
                    .into_iter()
                    .flatten()
                    .any(|map| map.sass_file.as_deref() == Some(input))
            })
            .map(|(css_file, _)| css_file.clone())
            .collect()
    }

    fn drop_generated(&mut self, css_file: &Path) {
        self.maps.remove(css_file);
        self.index.remove(css_file);
        if let Some(tx) = self.pending.remove(css_file) {
            tx.send_replace(MapState::Failed(StoreError::Superseded(css_file.to_path_buf())));
        }
    }

    /// Settle with the map in effect, or `error` when there is none.
    fn settle_or_fail(&mut self, css_file: &Path, error: StoreError) {
        let state = match self.effective(css_file) {
            Some(map) => MapState::Ready(map),
            None => MapState::Failed(error),
        };
        self.settle(css_file, state);
    }
}

/// Per-session source map state.
#[derive(Debug, Default)]
pub struct SourceMapStore {
    state: RwLock<State>,
}

impl SourceMapStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the map of `css_file` as being recomputed.
    ///
    /// An unresolved pending state is reused; a settled one is replaced.
    pub fn set_pending(&self, css_file: &Path) {
        self.state.write().mark_pending(css_file);
    }

    /// Parse `map_text` and publish it for `css_file`.
    ///
    /// On a parse error the previous map, if any, stays in effect and
    /// pending consumers receive it; otherwise they receive the error.
    pub fn publish(
        &self,
        tier: Tier,
        css_file: &Path,
        map_file: Option<&Path>,
        map_text: &str,
    ) -> Result<Arc<SourceMap>, StoreError> {
        match MapJson::parse(map_text) {
            Ok(json) => Ok(self.publish_map(tier, css_file, map_file, json, None)),
            Err(e) => {
                let error = StoreError::Parse {
                    file: css_file.to_path_buf(),
                    message: e.to_string(),
                };
                crate::log!("store"; "{}", error);
                let mut state = self.state.write();
                state.mark_pending(css_file);
                state.settle_or_fail(css_file, error.clone());
                Err(error)
            }
        }
    }

    /// Publish an already parsed map.
    pub fn publish_map(
        &self,
        tier: Tier,
        css_file: &Path,
        map_file: Option<&Path>,
        mut json: MapJson,
        sass_file: Option<&Path>,
    ) -> Arc<SourceMap> {
        let base = map_file
            .or(Some(css_file))
            .and_then(Path::parent)
            .unwrap_or(Path::new("/"));
        let base = match &json.source_root {
            Some(root) if !root.is_empty() => resolve_against(base, Path::new(root)),
            _ => base.to_path_buf(),
        };

        let local_sources: Vec<PathBuf> = json
            .sources
            .iter()
            .map(|source| resolve_against(&base, Path::new(source)))
            .collect();

        if json.file.is_none()
            && let Some(name) = map_file.and_then(Path::file_name)
        {
            let name = name.to_string_lossy();
            json.file = Some(name.strip_suffix(".map").unwrap_or(&name).to_string());
        }

        let map = Arc::new(SourceMap {
            css_file: css_file.to_path_buf(),
            map_file: map_file.map(Path::to_path_buf),
            sass_file: sass_file
                .map(Path::to_path_buf)
                .or_else(|| local_sources.first().cloned()),
            local_sources,
            json,
        });

        let mut state = self.state.write();
        let tiers = state.maps.entry(css_file.to_path_buf()).or_default();
        match tier {
            Tier::Persisted => {
                // The saved state supersedes any earlier preview.
                tiers.persisted = Some(Arc::clone(&map));
                tiers.preview = None;
            }
            Tier::Preview => tiers.preview = Some(Arc::clone(&map)),
        }
        state.reindex(css_file);

        let effective = state.effective(css_file).unwrap_or_else(|| Arc::clone(&map));
        state.settle(css_file, MapState::Ready(effective));
        crate::debug!("store"; "published {} ({} sources, {} tracked)",
            css_file.display(), map.local_sources.len(), state.index.reverse_count());
        map
    }

    /// A recompile of `css_file` failed. Pending consumers keep the
    /// previous map if there is one.
    pub fn fail(&self, css_file: &Path, error: StoreError) {
        self.state.write().settle_or_fail(css_file, error);
    }

    /// Drop the preview tier of `css_file` (unsaved edits discarded).
    pub fn discard_preview(&self, css_file: &Path) {
        let mut state = self.state.write();
        if let Some(tiers) = state.maps.get_mut(css_file) {
            tiers.preview = None;
        }
        state.reindex(css_file);
    }

    /// Map for `css_file`, preview tier first.
    pub fn get(&self, css_file: &Path) -> MapLookup {
        let state = self.state.read();
        if let Some(tx) = state.pending.get(css_file)
            && matches!(*tx.borrow(), MapState::Pending)
        {
            return MapLookup::Pending(PendingMap {
                file: css_file.to_path_buf(),
                rx: tx.subscribe(),
            });
        }
        if let Some(map) = state.effective(css_file) {
            return MapLookup::Ready(map);
        }
        match state.pending.get(css_file) {
            Some(tx) => MapLookup::Pending(PendingMap {
                file: css_file.to_path_buf(),
                rx: tx.subscribe(),
            }),
            None => MapLookup::Missing(css_file.to_path_buf()),
        }
    }

    /// Generated files whose map lists `source`.
    pub fn get_usage(&self, source: &Path) -> Vec<Usage> {
        let state = self.state.read();
        let Some(dependents) = state.index.used_by(source) else {
            return Vec::new();
        };
        let mut usage: Vec<Usage> = dependents
            .iter()
            .filter_map(|css_file| {
                state.effective(css_file).map(|map| Usage {
                    css_file: css_file.clone(),
                    map,
                })
            })
            .collect();
        usage.sort_by(|a, b| a.css_file.cmp(&b.css_file));
        usage
    }

    /// Purge every tier, pending state and index entry keyed by or
    /// pointing to `file`.
    ///
    /// When `file` is the input of a generated file, that generated file's
    /// maps go too, so it no longer shows up as a dependent of the input's
    /// partials.
    pub fn delete(&self, file: &Path) {
        let mut state = self.state.write();
        let mut orphans = state.generated_from(file);
        orphans.push(file.to_path_buf());
        for generated in &orphans {
            state.drop_generated(generated);
        }
        let dependents = state.index.forget_source(file);
        crate::debug!("store"; "deleted {} ({} dependents, {} orphaned)",
            file.display(), dependents.len(), orphans.len() - 1);
    }

    /// Input file of the map for `css_file`, once ready.
    pub async fn input_file(&self, css_file: &Path) -> Result<PathBuf, StoreError> {
        let map = self.get(css_file).resolve().await?;
        map.sass_file
            .clone()
            .ok_or_else(|| StoreError::Missing(css_file.to_path_buf()))
    }

    /// Current text of every local source of `css_file`'s map.
    ///
    /// Open documents win over disk; unreadable sources are skipped.
    pub async fn source_documents(
        &self,
        css_file: &Path,
        docs: &dyn DocumentSource,
    ) -> Result<Vec<SourceDocument>, StoreError> {
        let map = self.get(css_file).resolve().await?;
        Ok(map
            .local_sources
            .iter()
            .filter_map(|path| {
                let text = docs
                    .text(path)
                    .or_else(|| std::fs::read_to_string(path).ok())?;
                Some(SourceDocument {
                    path: path.clone(),
                    text,
                })
            })
            .collect())
    }

    /// Load the map of an existing CSS file into the persisted tier.
    ///
    /// `map_ref` defaults to the CSS file's `sourceMappingURL` and is
    /// resolved against the CSS file's folder.
    pub fn load_map_file(
        &self,
        css_file: &Path,
        map_ref: Option<&str>,
    ) -> Result<Arc<SourceMap>, StoreError> {
        self.set_pending(css_file);
        let result = read_map_file(css_file, map_ref);
        match result {
            Ok((map_path, text)) => self.publish(Tier::Persisted, css_file, Some(&map_path), &text),
            Err(error) => {
                crate::debug!("store"; "{}", error);
                self.fail(css_file, error.clone());
                Err(error)
            }
        }
    }

    /// Drop everything; pending consumers see their maps superseded.
    pub fn clear(&self) {
        let mut state = self.state.write();
        for (file, tx) in state.pending.drain() {
            tx.send_replace(MapState::Failed(StoreError::Superseded(file)));
        }
        state.maps.clear();
        state.index.clear();
    }
}

fn read_map_file(css_file: &Path, map_ref: Option<&str>) -> Result<(PathBuf, String), StoreError> {
    let owned;
    let map_ref = match map_ref {
        Some(r) => r,
        None => {
            owned = std::fs::read_to_string(css_file).map_err(|e| StoreError::MapFile {
                path: css_file.to_path_buf(),
                message: e.to_string(),
            })?;
            source_mapping_url(&owned).ok_or_else(|| StoreError::NoReference(css_file.to_path_buf()))?
        }
    };

    let map_ref = map_ref.strip_prefix("file://").unwrap_or(map_ref);
    let parent = css_file.parent().unwrap_or(Path::new("/"));
    let map_path = resolve_against(parent, Path::new(map_ref));
    let text = std::fs::read_to_string(&map_path).map_err(|e| StoreError::MapFile {
        path: map_path.clone(),
        message: e.to_string(),
    })?;
    Ok((map_path, text))
}
