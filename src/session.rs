//! Host facade.
//!
//! A [`Session`] owns every component for one editor session and wires
//! them together:
//!
//! ```text
//! Session
//! ├── PreferenceStore   live sassmap.toml
//! ├── RenderPipeline    ──► CompileQueue ──► worker
//! ├── SourceMapStore    maps + reverse index
//! └── ErrorReconciler   scan tickets + partial buckets
//! ```
//!
//! Every compile or preview publishes its map (or failure) to the store and
//! completes the error scan of its input. Nothing here outlives the
//! session: [`Session::shutdown`] aborts pending scans, drops all maps,
//! removes temp slots and kills the worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use jwalk::WalkDir;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;

use crate::compiler::{BackendFactory, CompileQueue, WorkerFactory};
use crate::config::{CompileOptions, ConfigError, PreferenceStore, SassConfig};
use crate::diagnostics::{ErrorReconciler, ScanResult, ScanTicket};
use crate::orchestrator::{self, Orchestrator, OrchestratorHandle, Report};
use crate::render::{self, RenderOutcome, RenderPipeline};
use crate::source::SourceFile;
use crate::store::{DocumentSource, MapLookup, SourceMapStore, StoreError, Tier};

enum Job<'a> {
    Compile,
    Preview(&'a FxHashMap<PathBuf, String>),
}

pub struct Session {
    prefs: PreferenceStore,
    pipeline: RenderPipeline,
    store: SourceMapStore,
    reconciler: ErrorReconciler,
    docs: Arc<dyn DocumentSource>,
}

impl Session {
    /// Session using the configured compiler backends.
    ///
    /// Must be called inside a tokio runtime (the compile queue is spawned
    /// immediately).
    pub fn new(config: SassConfig, docs: Arc<dyn DocumentSource>) -> Self {
        let factory = BackendFactory::from_config(&config);
        Self::with_factory(config, factory, docs)
    }

    pub fn with_factory<F: WorkerFactory>(
        config: SassConfig,
        factory: F,
        docs: Arc<dyn DocumentSource>,
    ) -> Self {
        let queue = CompileQueue::spawn(factory, config.sass.timeout);
        let pipeline = RenderPipeline::new(queue, config.sass.temp_dir.as_deref());
        Self {
            prefs: PreferenceStore::new(config),
            pipeline,
            store: SourceMapStore::new(),
            reconciler: ErrorReconciler::new(),
            docs,
        }
    }

    /// Start the change orchestrator for this session. Compile outcomes are
    /// sent to `reports` when given.
    pub fn start(
        self: &Arc<Self>,
        reports: Option<mpsc::UnboundedSender<Report>>,
    ) -> OrchestratorHandle {
        Orchestrator::spawn(Arc::clone(self), reports)
    }

    /// Release everything the session holds. Stop the orchestrator first.
    pub async fn shutdown(&self) {
        self.reconciler.clear();
        self.store.clear();
        self.pipeline.delete_temp_files();
        self.pipeline.queue().kill_process().await;
        crate::debug!("compile"; "session closed");
    }

    pub fn prefs(&self) -> &PreferenceStore {
        &self.prefs
    }

    pub fn store(&self) -> &SourceMapStore {
        &self.store
    }

    pub fn reconciler(&self) -> &ErrorReconciler {
        &self.reconciler
    }

    pub fn pipeline(&self) -> &RenderPipeline {
        &self.pipeline
    }

    pub fn documents(&self) -> &dyn DocumentSource {
        &*self.docs
    }

    // ========================================================================
    // Compiling
    // ========================================================================

    /// Compile `path` to disk. `None` when it is not a SASS file or
    /// compiling is disabled for it.
    pub async fn compile(&self, path: &Path) -> Option<RenderOutcome> {
        self.run(path, Job::Compile).await
    }

    /// Compile `path` in memory with `overrides` (path → unsaved text)
    /// shadowing disk content.
    pub async fn preview(
        &self,
        path: &Path,
        overrides: &FxHashMap<PathBuf, String>,
    ) -> Option<RenderOutcome> {
        self.run(path, Job::Preview(overrides)).await
    }

    async fn run(&self, path: &Path, job: Job<'_>) -> Option<RenderOutcome> {
        let input = SourceFile::new(path)?;
        let Some(options) = CompileOptions::resolve(&self.prefs, &input, None) else {
            crate::debug!("compile"; "disabled for {}", path.display());
            return None;
        };

        let css_file = render::build_message(&input, &options).out_file;
        self.store.set_pending(&css_file);

        let (tier, outcome) = match job {
            Job::Compile => (Tier::Persisted, self.pipeline.compile(&input, &options).await),
            Job::Preview(overrides) => (
                Tier::Preview,
                self.pipeline.preview(&input, &options, overrides).await,
            ),
        };

        match &outcome {
            Ok(result) => {
                let map = self.store.publish_map(
                    tier,
                    result.css_file(),
                    None,
                    result.map.clone(),
                    Some(input.path()),
                );
                self.reconciler
                    .finish_scan(input.path(), Vec::new(), map.local_sources.iter().cloned());
            }
            Err(errors) => {
                let message = errors.first().map(ToString::to_string).unwrap_or_default();
                self.store.fail(
                    &css_file,
                    StoreError::Compile {
                        file: css_file.clone(),
                        message,
                    },
                );
                // Partials known from the last good map still get answered.
                let related = match self.store.get(&css_file) {
                    MapLookup::Ready(map) => map.local_sources.clone(),
                    _ => Vec::new(),
                };
                self.reconciler
                    .finish_scan(input.path(), errors.clone(), related);
            }
        }
        Some(outcome)
    }

    /// The editor dropped the unsaved buffer of `path`: every preview map
    /// built from it falls back to the saved compile.
    pub fn discard_preview(&self, path: &Path) {
        for target in self.targets_for(path) {
            if let Some(css_file) = SourceFile::new(target).and_then(|t| self.output_of(&t)) {
                self.store.discard_preview(&css_file);
            }
        }
    }

    /// Generated CSS file of `input`, unless compiling it is disabled.
    fn output_of(&self, input: &SourceFile) -> Option<PathBuf> {
        let options = CompileOptions::resolve(&self.prefs, input, None)?;
        Some(render::build_message(input, &options).out_file)
    }

    // ========================================================================
    // Queries and settings
    // ========================================================================

    /// Open an error scan for `path`; a scan still pending for it is aborted.
    pub fn get_errors(&self, path: &Path) -> ScanTicket {
        self.reconciler.get_errors(path)
    }

    /// Entry files to recompile when `path` changes.
    pub fn targets_for(&self, path: &Path) -> Vec<PathBuf> {
        orchestrator::resolve_targets(&self.store, &self.prefs.get().entry_regex(), path)
    }

    /// Re-read `sassmap.toml`. Returns whether anything changed.
    pub async fn reload_preferences(&self) -> Result<bool, ConfigError> {
        let changed = self.prefs.reload()?;
        if changed {
            self.apply_preferences().await;
        }
        Ok(changed)
    }

    /// Replace the preferences wholesale.
    pub async fn set_preferences(&self, config: SassConfig) {
        self.prefs.store(config);
        self.apply_preferences().await;
    }

    async fn apply_preferences(&self) {
        let config = self.prefs.get();
        self.pipeline.queue().set_timeout(config.sass.timeout).await;
        if let Some(dir) = &config.sass.temp_dir
            && let Err(e) = self.pipeline.set_temp_dir(dir)
        {
            crate::log!("error"; "{:#}", e);
        }
        crate::log!("compile"; "preferences reloaded");
    }

    pub fn set_temp_dir(&self, dir: &Path) -> Result<()> {
        self.pipeline.set_temp_dir(dir)
    }

    pub fn delete_temp_files(&self) {
        self.pipeline.delete_temp_files();
    }

    pub async fn kill_process(&self) {
        self.pipeline.queue().kill_process().await;
    }

    /// Load the existing maps of every entry file under `root`, so changes
    /// to partials find their dependents before the first compile.
    /// Returns the number of maps loaded.
    pub fn discover(&self, root: &Path) -> usize {
        let pattern = self.prefs.get().entry_regex();
        let mut loaded = 0;

        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(input) = SourceFile::new(entry.path()) else {
                continue;
            };
            if !input.is_entry_with(&pattern) {
                continue;
            }
            let Some(css_file) = self.output_of(&input) else {
                continue;
            };
            if !css_file.is_file() {
                continue;
            }
            if self.store.load_map_file(&css_file, None).is_ok() {
                loaded += 1;
            }
        }

        crate::debug!("store"; "discovered {} map(s) under {}", loaded, root.display());
        loaded
    }
}

// ============================================================================
// Lint integration
// ============================================================================

/// Diagnostics provider for editor linting.
pub trait ScanProvider {
    /// Scan `path` whose current buffer holds `text`.
    fn scan_file(&self, text: &str, path: &Path) -> impl Future<Output = ScanResult> + Send;
}

impl ScanProvider for Session {
    /// An entry file previews itself; a partial previews every entry that
    /// includes it. The answer for `path` comes from the reconciled errors
    /// of those previews.
    async fn scan_file(&self, text: &str, path: &Path) -> ScanResult {
        let ticket = self.get_errors(path);

        let mut overrides = FxHashMap::default();
        overrides.insert(path.to_path_buf(), text.to_string());

        for target in self.targets_for(path) {
            self.preview(&target, &overrides).await;
        }

        // Nothing covered `path` (no known entry, or a failure unrelated to it).
        self.reconciler
            .settle(path, self.reconciler.partial_errors(path));
        ticket.wait().await
    }
}

#[cfg(test)]
pub(crate) mod tests;
