//! Change orchestrator.
//!
//! Turns file-system and editor events into compiles:
//!
//! ```text
//! ChangeMsg ──► Debouncer (timing, dedup) ──► targets (entry itself + get_usage)
//!                                               │
//!                  Created/Modified/Removed ────┼──► Session::compile
//!                  Edited (unsaved buffer) ─────┴──► Session::preview
//! ```
//!
//! Dependents of one change are compiled in path order; callers must not
//! rely on any particular order between them.

mod debouncer;
mod watcher;


pub use debouncer::ChangeKind;
pub use watcher::Watcher;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::diagnostics::CompileError;
use crate::render::RenderOutcome;
use crate::session::Session;
use crate::source::{SourceFile, is_sass_path};
use crate::store::SourceMapStore;
use crate::utils::path::normalize_path;
use debouncer::Debouncer;

/// Input of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeMsg {
    /// `entry` changed; for a directory, `added` / `removed` list its
    /// new and vanished children.
    Fs {
        entry: PathBuf,
        added: Vec<PathBuf>,
        removed: Vec<PathBuf>,
    },
    /// An open document has unsaved edits.
    DocumentDirty { path: PathBuf },
    /// An open document was closed without saving its edits.
    DocumentClosed { path: PathBuf },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Compile,
    Preview,
}

/// Outcome of one orchestrated compile.
#[derive(Debug, Clone)]
pub struct Report {
    pub input: PathBuf,
    pub mode: Mode,
    /// Generated CSS file, or the errors that prevented it.
    pub outcome: Result<PathBuf, Vec<CompileError>>,
}

/// Entry files affected by a change of `path`: the file itself when it is
/// an entry, plus the input of every map listing it.
pub fn resolve_targets(store: &SourceMapStore, entry_pattern: &Regex, path: &Path) -> Vec<PathBuf> {
    let mut targets = BTreeSet::new();
    if let Some(file) = SourceFile::new(path)
        && file.is_entry_with(entry_pattern)
    {
        targets.insert(path.to_path_buf());
    }
    for usage in store.get_usage(path) {
        if let Some(sass_file) = &usage.map.sass_file {
            targets.insert(sass_file.clone());
        }
    }
    targets.into_iter().collect()
}

/// Running orchestrator.
pub struct OrchestratorHandle {
    tx: mpsc::Sender<ChangeMsg>,
    task: JoinHandle<()>,
}

impl OrchestratorHandle {
    pub fn sender(&self) -> mpsc::Sender<ChangeMsg> {
        self.tx.clone()
    }

    /// Returns false once the orchestrator stopped.
    pub async fn send(&self, msg: ChangeMsg) -> bool {
        self.tx.send(msg).await.is_ok()
    }

    /// Stop and wait for the current batch to finish.
    pub async fn shutdown(self) {
        let _ = self.tx.send(ChangeMsg::Shutdown).await;
        let _ = self.task.await;
    }
}

pub struct Orchestrator {
    session: Arc<Session>,
    rx: mpsc::Receiver<ChangeMsg>,
    debouncer: Debouncer,
    reports: Option<mpsc::UnboundedSender<Report>>,
}

impl Orchestrator {
    pub fn spawn(
        session: Arc<Session>,
        reports: Option<mpsc::UnboundedSender<Report>>,
    ) -> OrchestratorHandle {
        let (tx, rx) = mpsc::channel(64);
        let actor = Self {
            session,
            rx,
            debouncer: Debouncer::new(),
            reports,
        };
        OrchestratorHandle {
            tx,
            task: tokio::spawn(actor.run()),
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                msg = self.rx.recv() => match msg {
                    Some(ChangeMsg::Fs { entry, added, removed }) => {
                        self.on_fs(&entry, &added, &removed);
                    }
                    Some(ChangeMsg::DocumentDirty { path }) => {
                        self.debouncer.push(&path, ChangeKind::Edited);
                    }
                    Some(ChangeMsg::DocumentClosed { path }) => {
                        self.debouncer.forget_edit(&path);
                        self.session.discard_preview(&path);
                    }
                    Some(ChangeMsg::Shutdown) | None => break,
                },
                _ = tokio::time::sleep(self.debouncer.sleep_duration()) => {
                    if let Some(changes) = self.debouncer.take_if_ready() {
                        self.process(changes).await;
                    }
                }
            }
        }
        crate::debug!("watch"; "orchestrator stopped");
    }

    fn on_fs(&mut self, entry: &Path, added: &[PathBuf], removed: &[PathBuf]) {
        if !entry.is_dir() {
            self.debouncer.push(entry, ChangeKind::Modified);
        }
        for path in added {
            self.debouncer.push(path, ChangeKind::Created);
        }
        for path in removed {
            self.debouncer.push(path, ChangeKind::Removed);
        }
    }

    /// Compile everything affected by one debounced batch.
    async fn process(&self, changes: FxHashMap<PathBuf, ChangeKind>) {
        let config_path = normalize_path(&self.session.prefs().get().config_path);
        let mut changes: Vec<_> = changes.into_iter().collect();
        changes.sort_by(|a, b| a.0.cmp(&b.0));

        let mut compile = BTreeSet::new();
        let mut preview = BTreeSet::new();
        let mut edited = Vec::new();

        for (path, kind) in changes {
            if path == config_path {
                if let Err(e) = self.session.reload_preferences().await {
                    crate::log!("error"; "{}", e);
                }
                continue;
            }

            if kind == ChangeKind::Removed {
                let dependents = self.session.targets_for(&path);
                self.session.store().delete(&path);
                compile.extend(dependents.into_iter().filter(|t| *t != path));
                continue;
            }

            if !is_sass_path(&path) {
                continue;
            }
            let targets = self.session.targets_for(&path);
            crate::debug!("watch"; "{} {} -> {} target(s)", kind.label(), path.display(), targets.len());
            if kind == ChangeKind::Edited {
                preview.extend(targets);
                edited.push(path);
            } else {
                compile.extend(targets);
            }
        }

        for target in compile {
            let outcome = self.session.compile(&target).await;
            self.report(target, Mode::Compile, outcome);
        }

        if preview.is_empty() {
            return;
        }
        let docs = self.session.documents();
        let overrides: FxHashMap<PathBuf, String> = edited
            .into_iter()
            .filter_map(|path| docs.text(&path).map(|text| (path, text)))
            .collect();
        for target in preview {
            let outcome = self.session.preview(&target, &overrides).await;
            self.report(target, Mode::Preview, outcome);
        }
    }

    fn report(&self, input: PathBuf, mode: Mode, outcome: Option<RenderOutcome>) {
        let Some(outcome) = outcome else {
            return;
        };
        let outcome = match outcome {
            Ok(result) => Ok(result.css_file().to_path_buf()),
            Err(errors) => {
                for err in &errors {
                    crate::log!("error"; "{}", err);
                }
                Err(errors)
            }
        };
        if let Some(reports) = &self.reports {
            let _ = reports.send(Report {
                input,
                mode,
                outcome,
            });
        }
    }
}
