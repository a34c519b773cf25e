//! Error reconciliation and scan tickets.
//!
//! One compile of an entry file answers the error scan of every partial it
//! includes. Errors reported against a partial are bucketed under that
//! partial's path; the entry's own result keeps them with the line removed
//! and the partial's path in the message.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;

use super::{CompileError, ScanResult, Severity};

/// Receiver side of one pending scan.
#[derive(Debug)]
pub struct ScanTicket {
    rx: oneshot::Receiver<ScanResult>,
}

impl ScanTicket {
    /// Wait for the scan outcome. A ticket whose reconciler went away
    /// reports as aborted.
    pub async fn wait(self) -> ScanResult {
        self.rx.await.unwrap_or_else(|_| ScanResult::aborted())
    }
}

#[derive(Default)]
struct State {
    /// At most one live ticket per path.
    tickets: FxHashMap<PathBuf, oneshot::Sender<ScanResult>>,
    /// Errors of the last scan, keyed by the partial they belong to.
    partial_errors: FxHashMap<PathBuf, Vec<CompileError>>,
}

/// Owns scan tickets and per-partial error buckets for one session.
#[derive(Default)]
pub struct ErrorReconciler {
    state: Mutex<State>,
}

impl ErrorReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a scan for `path`, aborting any scan still pending for it.
    pub fn get_errors(&self, path: &Path) -> ScanTicket {
        let (tx, rx) = oneshot::channel();
        let previous = self.state.lock().tickets.insert(path.to_path_buf(), tx);
        if let Some(previous) = previous {
            crate::debug!("scan"; "abort superseded scan: {}", path.display());
            let _ = previous.send(ScanResult::aborted());
        }
        ScanTicket { rx }
    }

    /// Whether a scan for `path` is still waiting.
    pub fn is_pending(&self, path: &Path) -> bool {
        self.state
            .lock()
            .tickets
            .get(path)
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Errors bucketed for `path` by the last scan.
    pub fn partial_errors(&self, path: &Path) -> Vec<CompileError> {
        self.state
            .lock()
            .partial_errors
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    /// Complete the scan of `file` with the compiler's `raw` errors.
    ///
    /// Pending tickets for `related` paths (the sources the compile of
    /// `file` covers) and for every path that received bucketed errors are
    /// resolved too, with that path's bucket (possibly empty).
    pub fn finish_scan(
        &self,
        file: &Path,
        raw: Vec<CompileError>,
        related: impl IntoIterator<Item = PathBuf>,
    ) -> ScanResult {
        let extension = file.extension().map(|e| e.to_os_string());
        let mut buckets: FxHashMap<PathBuf, Vec<CompileError>> = FxHashMap::default();
        let mut errors = Vec::with_capacity(raw.len());

        for mut err in raw {
            if err.path != file {
                let mut cloned = err.clone();
                // Partials may be reported without their extension.
                if cloned.path.extension().is_none()
                    && let Some(ext) = &extension
                {
                    cloned.path.set_extension(ext);
                }
                buckets.entry(cloned.path.clone()).or_default().push(cloned);

                err.pos.line = None;
                err.message = format!("{} - {}", err.path.display(), err.message);
            }
            err.severity = Severity::Error;
            errors.push(err);
        }

        let result = ScanResult::completed(errors);

        let mut state = self.state.lock();
        if let Some(tx) = state.tickets.remove(file) {
            let _ = tx.send(result.clone());
        }

        let mut targets: Vec<PathBuf> = related.into_iter().filter(|p| p != file).collect();
        targets.extend(buckets.keys().cloned());
        targets.sort();
        targets.dedup();

        for path in targets {
            let Some(tx) = state.tickets.remove(&path) else {
                continue;
            };
            let bucket = buckets.get(&path).cloned().unwrap_or_default();
            crate::debug!("scan"; "resolve partial {} ({} errors)", path.display(), bucket.len());
            let _ = tx.send(ScanResult::completed(bucket));
        }

        state.partial_errors = buckets;
        result
    }

    /// Resolve a still pending scan of `path` with `errors` as they are,
    /// leaving the partial buckets alone. Returns false when no scan was
    /// waiting.
    pub fn settle(&self, path: &Path, errors: Vec<CompileError>) -> bool {
        let Some(tx) = self.state.lock().tickets.remove(path) else {
            return false;
        };
        tx.send(ScanResult::completed(errors)).is_ok()
    }

    /// Abort every pending scan (session shutdown).
    pub fn clear(&self) {
        let mut state = self.state.lock();
        for (_, tx) in state.tickets.drain() {
            let _ = tx.send(ScanResult::aborted());
        }
        state.partial_errors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::ErrorPos;

    const MAIN: &str = "/p/scss/main.scss";
    const MIXINS: &str = "/p/scss/_mixins.scss";

    fn raw(path: &str, line: usize, message: &str) -> CompileError {
        CompileError::new(path, ErrorPos::at(line, 3), message)
    }

    #[tokio::test]
    async fn test_second_request_aborts_first() {
        let reconciler = ErrorReconciler::new();
        let first = reconciler.get_errors(Path::new(MAIN));
        let second = reconciler.get_errors(Path::new(MAIN));

        assert_eq!(first.wait().await, ScanResult::aborted());

        reconciler.finish_scan(Path::new(MAIN), Vec::new(), []);
        let fresh = second.wait().await;
        assert!(!fresh.aborted);
        assert!(fresh.errors.is_empty());
    }

    #[tokio::test]
    async fn test_partial_error_retargeted() {
        let reconciler = ErrorReconciler::new();
        let main_ticket = reconciler.get_errors(Path::new(MAIN));
        let partial_ticket = reconciler.get_errors(Path::new(MIXINS));

        let result = reconciler.finish_scan(
            Path::new(MAIN),
            vec![raw(MIXINS, 4, "undefined mixin")],
            [],
        );

        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].pos.line, None);
        assert!(result.errors[0].message.starts_with(MIXINS));
        assert!(result.errors[0].message.ends_with("undefined mixin"));
        assert_eq!(main_ticket.wait().await, result);

        let partial = partial_ticket.wait().await;
        assert!(!partial.aborted);
        assert_eq!(partial.errors.len(), 1);
        assert_eq!(partial.errors[0].pos, ErrorPos::at(4, 3));
        assert_eq!(partial.errors[0].message, "undefined mixin");
    }

    #[tokio::test]
    async fn test_own_errors_kept_verbatim() {
        let reconciler = ErrorReconciler::new();
        let mut warning = raw(MAIN, 2, "bad");
        warning.severity = Severity::Warning;

        let result = reconciler.finish_scan(Path::new(MAIN), vec![warning], []);
        assert_eq!(result.errors[0].pos, ErrorPos::at(2, 3));
        assert_eq!(result.errors[0].message, "bad");
        assert_eq!(result.errors[0].severity, Severity::Error);
    }

    #[tokio::test]
    async fn test_related_clean_partial_resolved_empty() {
        let reconciler = ErrorReconciler::new();
        let ticket = reconciler.get_errors(Path::new(MIXINS));
        let unrelated = reconciler.get_errors(Path::new("/p/other.scss"));

        reconciler.finish_scan(Path::new(MAIN), Vec::new(), [PathBuf::from(MIXINS)]);

        assert_eq!(ticket.wait().await, ScanResult::completed(Vec::new()));
        assert!(reconciler.is_pending(Path::new("/p/other.scss")));
        drop(unrelated);
    }

    #[test]
    fn test_missing_extension_fixed() {
        let reconciler = ErrorReconciler::new();
        reconciler.finish_scan(
            Path::new(MAIN),
            vec![raw("/p/scss/_vars", 0, "oops")],
            [],
        );
        assert_eq!(reconciler.partial_errors(Path::new("/p/scss/_vars.scss")).len(), 1);
        assert!(reconciler.partial_errors(Path::new("/p/scss/_vars")).is_empty());
    }

    #[test]
    fn test_buckets_replaced_each_scan() {
        let reconciler = ErrorReconciler::new();
        reconciler.finish_scan(Path::new(MAIN), vec![raw(MIXINS, 1, "x")], []);
        assert_eq!(reconciler.partial_errors(Path::new(MIXINS)).len(), 1);

        reconciler.finish_scan(Path::new(MAIN), Vec::new(), []);
        assert!(reconciler.partial_errors(Path::new(MIXINS)).is_empty());
    }

    #[tokio::test]
    async fn test_settle_keeps_buckets() {
        let reconciler = ErrorReconciler::new();
        reconciler.finish_scan(Path::new(MAIN), vec![raw(MIXINS, 1, "x")], []);

        let ticket = reconciler.get_errors(Path::new(MIXINS));
        assert!(reconciler.settle(Path::new(MIXINS), reconciler.partial_errors(Path::new(MIXINS))));
        assert_eq!(ticket.wait().await.errors.len(), 1);
        assert_eq!(reconciler.partial_errors(Path::new(MIXINS)).len(), 1);
        assert!(!reconciler.settle(Path::new(MIXINS), Vec::new()));
    }

    #[tokio::test]
    async fn test_clear_aborts_pending() {
        let reconciler = ErrorReconciler::new();
        let ticket = reconciler.get_errors(Path::new(MAIN));
        reconciler.clear();
        assert!(ticket.wait().await.aborted);
    }
}
