//! Change debouncing.
//!
//! Pure timing and per-path deduplication. No store or compiler access.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::utils::path::normalize_path;

pub(crate) const DEBOUNCE_MS: u64 = 300;
pub(crate) const REBUILD_COOLDOWN_MS: u64 = 800;
const IDLE_SLEEP: Duration = Duration::from_secs(86400);

/// What happened to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
    /// Unsaved editor buffer changed.
    Edited,
}

impl ChangeKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Removed => "removed",
            Self::Edited => "edited",
        }
    }
}

pub(crate) struct Debouncer {
    pub(crate) changes: FxHashMap<PathBuf, ChangeKind>,
    last_event: Option<Instant>,
    last_compile: Option<Instant>,
}

impl Debouncer {
    pub(crate) fn new() -> Self {
        Self {
            changes: FxHashMap::default(),
            last_event: None,
            last_compile: None,
        }
    }

    /// Record one change, applying the transition rules:
    /// - Removed → Created/Modified: restored, take the new kind
    /// - Modified → Removed: deleted, upgrade to Removed
    /// - Created → Removed: appeared then vanished, drop it
    /// - Edited ↔ Modified: latest wins
    /// - otherwise the first event wins
    ///
    /// Noise (see [`is_noise`]) is dropped before it can arm the timer.
    pub(crate) fn push(&mut self, path: &Path, kind: ChangeKind) {
        if is_noise(path, kind) {
            return;
        }
        let path = normalize_path(path);

        match self.changes.get(&path).copied() {
            None => {
                crate::debug!("watch"; "event {}: {}", kind.label(), path.display());
                self.changes.insert(path, kind);
            }
            Some(existing) => match (existing, kind) {
                (ChangeKind::Removed, ChangeKind::Created | ChangeKind::Modified)
                | (ChangeKind::Edited, ChangeKind::Modified)
                | (ChangeKind::Modified, ChangeKind::Edited) => {
                    crate::debug!("watch"; "{}->{}: {}", existing.label(), kind.label(), path.display());
                    self.changes.insert(path, kind);
                }
                (ChangeKind::Modified | ChangeKind::Edited, ChangeKind::Removed) => {
                    crate::debug!("watch"; "upgrade {}->removed: {}", existing.label(), path.display());
                    self.changes.insert(path, ChangeKind::Removed);
                }
                (ChangeKind::Created, ChangeKind::Removed) => {
                    crate::debug!("watch"; "discard created+removed: {}", path.display());
                    self.changes.remove(&path);
                }
                _ => {}
            },
        }
        self.last_event = Some(Instant::now());
    }

    /// Drop a pending unsaved-buffer change of `path`.
    pub(crate) fn forget_edit(&mut self, path: &Path) {
        let path = normalize_path(path);
        if self.changes.get(&path) == Some(&ChangeKind::Edited) {
            self.changes.remove(&path);
        }
    }

    /// Earliest instant the batch may be compiled: the quiet window after
    /// the last event, pushed back by the cooldown after the last compile.
    fn due_at(&self) -> Option<Instant> {
        let quiet = self.last_event? + Duration::from_millis(DEBOUNCE_MS);
        let cooled = self
            .last_compile
            .map(|at| at + Duration::from_millis(REBUILD_COOLDOWN_MS));
        Some(cooled.map_or(quiet, |cooled| quiet.max(cooled)))
    }

    pub(crate) fn is_ready(&self) -> bool {
        !self.changes.is_empty() && self.due_at().is_some_and(|due| due <= Instant::now())
    }

    /// Hand out the batch once it is due.
    pub(crate) fn take_if_ready(&mut self) -> Option<FxHashMap<PathBuf, ChangeKind>> {
        if !self.is_ready() {
            // A batch emptied by Created→Removed leaves nothing to wait for.
            if self.changes.is_empty() {
                self.last_event = None;
            }
            return None;
        }
        self.last_event = None;
        self.last_compile = Some(Instant::now());
        Some(std::mem::take(&mut self.changes))
    }

    /// How long the actor may sleep before checking again.
    pub(crate) fn sleep_duration(&self) -> Duration {
        match self.due_at() {
            Some(due) => due
                .saturating_duration_since(Instant::now())
                .max(Duration::from_millis(1)),
            None => IDLE_SLEEP,
        }
    }
}

/// Events that never lead to a compile.
///
/// Editor backups and swap files are ignored outright. Generated `.css`
/// and `.map` files are written by our own compiles, so only their removal
/// matters (it drops the stale map from the store).
fn is_noise(path: &Path, kind: ChangeKind) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    let scratch = matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.');
    let output = matches!(ext, "css" | "map") && kind != ChangeKind::Removed;
    scratch || output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_of(debouncer: &Debouncer, path: &str) -> Option<ChangeKind> {
        debouncer.changes.get(&normalize_path(Path::new(path))).copied()
    }

    #[test]
    fn test_empty_is_idle() {
        let debouncer = Debouncer::new();
        assert!(!debouncer.is_ready());
        assert_eq!(debouncer.sleep_duration(), IDLE_SLEEP);
    }

    #[test]
    fn test_transitions() {
        let mut debouncer = Debouncer::new();
        let path = Path::new("/tmp/x.scss");

        debouncer.push(path, ChangeKind::Removed);
        debouncer.push(path, ChangeKind::Created);
        assert_eq!(kind_of(&debouncer, "/tmp/x.scss"), Some(ChangeKind::Created));

        debouncer.push(path, ChangeKind::Modified);
        assert_eq!(kind_of(&debouncer, "/tmp/x.scss"), Some(ChangeKind::Created));

        debouncer.push(path, ChangeKind::Removed);
        assert_eq!(kind_of(&debouncer, "/tmp/x.scss"), None);

        let other = Path::new("/tmp/y.scss");
        debouncer.push(other, ChangeKind::Modified);
        debouncer.push(other, ChangeKind::Removed);
        assert_eq!(kind_of(&debouncer, "/tmp/y.scss"), Some(ChangeKind::Removed));
    }

    #[test]
    fn test_edit_then_save() {
        let mut debouncer = Debouncer::new();
        let path = Path::new("/tmp/_vars.scss");

        debouncer.push(path, ChangeKind::Edited);
        assert_eq!(kind_of(&debouncer, "/tmp/_vars.scss"), Some(ChangeKind::Edited));
        debouncer.push(path, ChangeKind::Modified);
        assert_eq!(kind_of(&debouncer, "/tmp/_vars.scss"), Some(ChangeKind::Modified));
    }

    #[test]
    fn test_temp_files_ignored() {
        let mut debouncer = Debouncer::new();
        debouncer.push(Path::new("/tmp/main.scss~"), ChangeKind::Modified);
        debouncer.push(Path::new("/tmp/.main.scss.swp"), ChangeKind::Modified);
        debouncer.push(Path::new("/tmp/main.bak"), ChangeKind::Modified);
        assert!(debouncer.changes.is_empty());
        assert!(debouncer.last_event.is_none());
    }

    #[test]
    fn test_generated_output_ignored_unless_removed() {
        let mut debouncer = Debouncer::new();
        debouncer.push(Path::new("/tmp/main.css"), ChangeKind::Modified);
        debouncer.push(Path::new("/tmp/main.css.map"), ChangeKind::Created);
        assert!(debouncer.changes.is_empty());
        assert!(debouncer.last_event.is_none());

        debouncer.push(Path::new("/tmp/main.css.map"), ChangeKind::Removed);
        assert_eq!(kind_of(&debouncer, "/tmp/main.css.map"), Some(ChangeKind::Removed));
    }

    #[test]
    fn test_forget_edit_keeps_saved_changes() {
        let mut debouncer = Debouncer::new();
        debouncer.push(Path::new("/tmp/_a.scss"), ChangeKind::Edited);
        debouncer.push(Path::new("/tmp/_b.scss"), ChangeKind::Modified);

        debouncer.forget_edit(Path::new("/tmp/_a.scss"));
        debouncer.forget_edit(Path::new("/tmp/_b.scss"));
        assert_eq!(kind_of(&debouncer, "/tmp/_a.scss"), None);
        assert_eq!(kind_of(&debouncer, "/tmp/_b.scss"), Some(ChangeKind::Modified));
    }

    #[test]
    fn test_ready_after_quiet_window() {
        let mut debouncer = Debouncer::new();
        debouncer.push(Path::new("/tmp/a.scss"), ChangeKind::Modified);
        assert!(!debouncer.is_ready());
        assert!(debouncer.take_if_ready().is_none());
        assert!(debouncer.sleep_duration() <= Duration::from_millis(DEBOUNCE_MS));

        debouncer.last_event = Some(Instant::now() - Duration::from_millis(DEBOUNCE_MS + 10));
        let changes = debouncer.take_if_ready().unwrap();
        assert_eq!(changes.len(), 1);
        assert!(debouncer.changes.is_empty());

        // A fresh burst right after a rebuild waits for the cooldown.
        debouncer.push(Path::new("/tmp/b.scss"), ChangeKind::Modified);
        debouncer.last_event = Some(Instant::now() - Duration::from_millis(DEBOUNCE_MS + 10));
        assert!(!debouncer.is_ready());
        assert!(debouncer.sleep_duration() > Duration::from_millis(DEBOUNCE_MS));
    }
}
