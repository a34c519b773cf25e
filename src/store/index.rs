//! Reverse dependency index.
//!
//! Maintains both forward (generated CSS → original sources) and reverse
//! (original source → generated CSS files) mappings.
//!
//! # Invariants
//! - Forward and reverse mappings are always consistent
//! - A generated file's sources are replaced wholesale on every `record`
//! - Empty reverse entries are pruned

use std::path::{Path, PathBuf};

use rustc_hash::{FxHashMap, FxHashSet};

type PathSet = FxHashSet<PathBuf>;
type PathSetMap = FxHashMap<PathBuf, PathSet>;

#[derive(Debug, Default)]
pub struct DependencyIndex {
    /// Forward: generated file → its original sources
    forward: PathSetMap,
    /// Reverse: original source → generated files built from it
    reverse: PathSetMap,
}

impl DependencyIndex {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the sources of `generated`, replacing any previous set.
    pub fn record(&mut self, generated: &Path, sources: &[PathBuf]) {
        self.remove(generated);

        let deps: PathSet = sources.iter().cloned().collect();
        for dep in &deps {
            self.reverse
                .entry(dep.clone())
                .or_default()
                .insert(generated.to_path_buf());
        }
        self.forward.insert(generated.to_path_buf(), deps);
    }

    /// Drop `generated` and prune its reverse entries.
    ///
    /// Returns `false` when nothing was recorded for it.
    pub fn remove(&mut self, generated: &Path) -> bool {
        let Some(old_deps) = self.forward.remove(generated) else {
            return false;
        };

        for dep in old_deps {
            if let Some(dependents) = self.reverse.get_mut(&dep) {
                dependents.remove(generated);
                if dependents.is_empty() {
                    self.reverse.remove(&dep);
                }
            }
        }
        true
    }

    /// Drop `source` from the index, keeping the generated files that
    /// listed it.
    ///
    /// Returns the generated files that referenced it.
    pub fn forget_source(&mut self, source: &Path) -> Vec<PathBuf> {
        let Some(dependents) = self.reverse.remove(source) else {
            return Vec::new();
        };
        for generated in &dependents {
            if let Some(deps) = self.forward.get_mut(generated) {
                deps.remove(source);
            }
        }
        dependents.into_iter().collect()
    }

    /// Generated files that depend on `source`.
    #[inline]
    pub fn used_by(&self, source: &Path) -> Option<&PathSet> {
        self.reverse.get(source)
    }

    /// Sources recorded for `generated`.
    #[inline]
    pub fn uses(&self, generated: &Path) -> Option<&PathSet> {
        self.forward.get(generated)
    }

    #[inline]
    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }

    /// Number of tracked sources (for debugging).
    #[inline]
    pub fn reverse_count(&self) -> usize {
        self.reverse.len()
    }
}
