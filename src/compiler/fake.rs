//! Scripted in-process workers for tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::json;

use super::protocol::{RawError, RawPos, RenderMessage, WorkerReply};
use super::worker::{Worker, WorkerFactory, WorkerFailure};
use crate::utils::path::relative_to;

/// What the fake does with one request.
pub enum Script {
    Reply(WorkerReply),
    /// Never answer.
    Hang,
    /// Die with a signal.
    Crash,
}

type ScriptFn = dyn Fn(&RenderMessage) -> Script + Send + Sync;

#[derive(Clone)]
pub struct FakeFactory {
    script: Arc<ScriptFn>,
    pub spawned: Arc<AtomicUsize>,
    pub seen: Arc<Mutex<Vec<RenderMessage>>>,
}

impl FakeFactory {
    pub fn new(script: impl Fn(&RenderMessage) -> Script + Send + Sync + 'static) -> Self {
        Self {
            script: Arc::new(script),
            spawned: Arc::default(),
            seen: Arc::default(),
        }
    }

    /// A fake that "compiles" by inlining `@import`s from disk.
    pub fn inliner() -> Self {
        Self::new(|msg| Script::Reply(inline_imports(msg)))
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn seen_files(&self) -> Vec<PathBuf> {
        self.seen.lock().iter().map(|m| m.file.clone()).collect()
    }
}

pub struct FakeWorker {
    script: Arc<ScriptFn>,
    seen: Arc<Mutex<Vec<RenderMessage>>>,
    alive: bool,
}

impl WorkerFactory for FakeFactory {
    type Worker = FakeWorker;

    fn spawn(&self) -> Result<FakeWorker, WorkerFailure> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        Ok(FakeWorker {
            script: Arc::clone(&self.script),
            seen: Arc::clone(&self.seen),
            alive: true,
        })
    }
}

impl Worker for FakeWorker {
    async fn render(&mut self, message: &RenderMessage) -> Result<WorkerReply, WorkerFailure> {
        self.seen.lock().push(message.clone());
        match (self.script)(message) {
            Script::Reply(reply) => Ok(reply),
            Script::Hang => std::future::pending().await,
            Script::Crash => {
                self.alive = false;
                Err(WorkerFailure::Exited {
                    code: None,
                    signal: Some("SIGSEGV".into()),
                })
            }
        }
    }

    fn is_alive(&mut self) -> bool {
        self.alive
    }

    async fn kill(&mut self) {
        self.alive = false;
    }
}

/// Success reply with `sources` relative to the output folder.
pub fn css_reply(css: &str, sources: &[&str]) -> WorkerReply {
    WorkerReply::Success {
        css: css.to_string(),
        map: json!({ "version": 3, "sources": sources, "names": [], "mappings": "AAAA" }),
        warning: None,
    }
}

/// Resolve `@import 'name';` lines against the input's folder and the
/// include paths (`_name.scss` or `name.scss`), recursively.
fn inline_imports(msg: &RenderMessage) -> WorkerReply {
    let mut search = vec![msg.file.parent().unwrap_or(Path::new("/")).to_path_buf()];
    search.extend(msg.include_paths.iter().cloned());

    let mut css = String::new();
    let mut sources = Vec::new();
    if let Err(err) = inline_file(&msg.file, &search, &mut css, &mut sources) {
        return WorkerReply::Failure(err);
    }

    let out_dir = msg.out_file.parent().unwrap_or(Path::new("/"));
    let sources: Vec<String> = sources
        .iter()
        .map(|s| relative_to(s, out_dir).to_string_lossy().replace('\\', "/"))
        .collect();
    WorkerReply::Success {
        css,
        map: json!({ "version": 3, "sources": sources, "names": [], "mappings": "AAAA" }),
        warning: None,
    }
}

fn inline_file(
    file: &Path,
    search: &[PathBuf],
    css: &mut String,
    sources: &mut Vec<PathBuf>,
) -> Result<(), RawError> {
    let text = std::fs::read_to_string(file).map_err(|e| RawError {
        path: file.to_path_buf(),
        message: e.to_string(),
        ..Default::default()
    })?;
    sources.push(file.to_path_buf());

    for (line_no, line) in text.lines().enumerate() {
        let Some(name) = line
            .trim()
            .strip_prefix("@import")
            .map(|rest| rest.trim().trim_end_matches(';').trim_matches(['\'', '"']))
        else {
            css.push_str(line);
            css.push('\n');
            continue;
        };

        let found = search.iter().find_map(|dir| {
            [format!("_{name}.scss"), format!("{name}.scss")]
                .into_iter()
                .map(|candidate| dir.join(candidate))
                .find(|p| p.is_file())
        });
        let Some(found) = found else {
            return Err(RawError {
                path: file.to_path_buf(),
                pos: Some(RawPos {
                    line: Some(line_no as i64),
                    ch: 0,
                }),
                message: format!("File to import not found or unreadable: {name}"),
                ..Default::default()
            });
        };
        inline_file(&found, search, css, sources)?;
    }
    Ok(())
}
