//! Temp-tree staging for previews.
//!
//! A preview compiles a mirror of the project under a per-input slot, so
//! unsaved buffers can shadow disk content without touching the project:
//!
//! ```text
//! <temp>/sassmap/<blake3(input)>/
//! ├── home/me/proj/scss/main.scss      copy of the input
//! ├── home/me/proj/vendor/...          copies of existing include/image paths
//! └── home/me/proj/scss/_vars.scss     in-memory overrides (always win)
//! ```
//!
//! Paths are mirrored with their drive letter and root removed.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use jwalk::WalkDir;
use rustc_hash::FxHashMap;

use crate::utils::path::{clean_path, resolve_against, rootless};

/// Namespace folder under the temp parent.
pub const TEMP_NAMESPACE: &str = "sassmap";

/// Slot folder for `input` under `temp_root`.
pub fn slot_for(temp_root: &Path, input: &Path) -> PathBuf {
    let hash = blake3::hash(input.as_os_str().as_encoded_bytes());
    temp_root.join(hex::encode(&hash.as_bytes()[..16]))
}

/// A staged preview: where things live in the slot, and how to map them
/// back to the project.
#[derive(Debug, Clone)]
pub struct Stage {
    pub slot: PathBuf,
    /// Copy of the input inside the slot.
    pub file: PathBuf,
    pub out_file: PathBuf,
    pub map_file: PathBuf,
    /// Original parent first, then temp and real include paths.
    pub include_paths: Vec<PathBuf>,
    pub image_paths: Vec<PathBuf>,
    /// Drive prefix and root of the real input, used to re-root paths.
    anchor: PathBuf,
}

pub struct StageRequest<'a> {
    pub input: &'a Path,
    pub out_file: &'a Path,
    pub map_file: &'a Path,
    pub include_paths: &'a [PathBuf],
    pub image_paths: &'a [PathBuf],
    pub overrides: &'a FxHashMap<PathBuf, String>,
}

impl Stage {
    /// Clear the slot for `request.input` and populate it.
    pub fn prepare(temp_root: &Path, request: &StageRequest<'_>) -> Result<Self> {
        let input = clean_path(request.input);
        let slot = slot_for(temp_root, &input);
        let original_parent = input.parent().unwrap_or(Path::new("/")).to_path_buf();
        let temp_folder = slot.join(rootless(&original_parent));

        match fs::remove_dir_all(&slot) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to clear {}", slot.display()));
            }
        }

        let file = slot.join(rootless(&input));
        copy_file(&input, &file)?;

        let mut include_paths = absolute_paths(&original_parent, request.include_paths, &temp_folder);
        let image_paths = absolute_paths(&original_parent, request.image_paths, &temp_folder);

        for dir in include_paths.iter().chain(&image_paths) {
            if dir.starts_with(&slot) || !dir.exists() {
                continue;
            }
            copy_tree(dir, &slot.join(rootless(dir)))?;
        }

        // Relative `../` imports may escape the copied subtree.
        include_paths.insert(0, original_parent);

        for (path, text) in request.overrides {
            let target = slot.join(rootless(path));
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::write(&target, text)
                .with_context(|| format!("Failed to write {}", target.display()))?;
        }

        crate::debug!("preview"; "staged {} in {}", input.display(), slot.display());
        Ok(Self {
            anchor: anchor_of(&input),
            file,
            out_file: slot.join(rootless(request.out_file)),
            map_file: slot.join(rootless(request.map_file)),
            include_paths,
            image_paths,
            slot,
        })
    }

    /// Map a path inside the slot back to the project; others pass through.
    pub fn real_path(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.slot) {
            Ok(rest) => self.anchor.join(rest),
            Err(_) => path.to_path_buf(),
        }
    }

    pub fn slot_str(&self) -> String {
        self.slot.to_string_lossy().into_owned()
    }
}

/// Drive prefix plus root (`C:\`, `/`).
fn anchor_of(path: &Path) -> PathBuf {
    path.components()
        .take_while(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
        .collect()
}

/// Resolve configured paths against the input's parent. Relative entries
/// are also looked up in the temp mirror, which comes first.
fn absolute_paths(original_parent: &Path, paths: &[PathBuf], temp_folder: &Path) -> Vec<PathBuf> {
    let mut out = Vec::with_capacity(paths.len() * 2);
    for path in paths {
        if path.is_relative() {
            out.push(resolve_against(temp_folder, path));
        }
        out.push(resolve_against(original_parent, path));
    }
    out
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::copy(from, to)
        .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
    Ok(())
}

/// Copy a file or directory tree.
fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    if from.is_file() {
        return copy_file(from, to);
    }
    for entry in WalkDir::new(from).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Ok(relative) = path.strip_prefix(from) else {
            continue;
        };
        copy_file(&path, &to.join(relative))?;
    }
    Ok(())
}

/// Remove staged slots.
pub fn remove_slots<'a>(slots: impl IntoIterator<Item = &'a PathBuf>) {
    for slot in slots {
        if let Err(e) = fs::remove_dir_all(slot)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            crate::log!("preview"; "failed to remove {}: {}", slot.display(), e);
        }
    }
}
