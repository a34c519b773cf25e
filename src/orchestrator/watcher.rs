//! File-system watcher feeding the orchestrator.
//!
//! notify delivers events on its own thread; a bridge thread translates
//! them into [`ChangeMsg::Fs`] and forwards them with `blocking_send`.

use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;

use super::ChangeMsg;

/// Keeps the notify watcher alive. Dropping it stops the bridge thread.
pub struct Watcher {
    _watcher: RecommendedWatcher,
}

impl Watcher {
    /// Watch `roots` recursively, forwarding changes to `tx`.
    pub fn start(roots: &[PathBuf], tx: mpsc::Sender<ChangeMsg>) -> notify::Result<Self> {
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = notify_tx.send(res);
        })?;

        for root in roots {
            watcher.watch(root, RecursiveMode::Recursive)?;
            crate::debug!("watch"; "watching {}", root.display());
        }

        std::thread::spawn(move || {
            while let Ok(result) = notify_rx.recv() {
                match result {
                    Ok(event) => {
                        for msg in to_messages(&event) {
                            if tx.blocking_send(msg).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => crate::log!("watch"; "notify error: {}", e),
                }
            }
        });

        Ok(Self { _watcher: watcher })
    }
}

/// Translate one notify event. Metadata-only changes are dropped.
fn to_messages(event: &notify::Event) -> Vec<ChangeMsg> {
    let paths = &event.paths;
    let Some(first) = paths.first() else {
        return Vec::new();
    };

    let listing = |added: &[PathBuf], removed: &[PathBuf]| ChangeMsg::Fs {
        entry: first.parent().unwrap_or(Path::new("/")).to_path_buf(),
        added: added.to_vec(),
        removed: removed.to_vec(),
    };

    match event.kind {
        EventKind::Create(_) => vec![listing(paths.as_slice(), &[])],
        EventKind::Remove(_) => vec![listing(&[], paths.as_slice())],
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => vec![listing(&[], paths.as_slice())],
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => vec![listing(paths.as_slice(), &[])],
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => {
            vec![listing(&paths[1..], &paths[..1])]
        }
        EventKind::Modify(_) => paths
            .iter()
            .map(|path| ChangeMsg::Fs {
                entry: path.clone(),
                added: Vec::new(),
                removed: Vec::new(),
            })
            .collect(),
        _ => Vec::new(),
    }
}
