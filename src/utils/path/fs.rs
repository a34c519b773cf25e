//! Path normalization utilities.
//!
//! Provides consistent path handling across the codebase:
//! - `normalize_path` - file system paths (canonicalize + fallback)
//! - `clean_path` / `resolve_against` - lexical resolution of `.` and `..`
//! - `relative_to` - lexical relative path between two absolute paths
//! - `rootless` - strip drive letter and root so a path can be re-homed

use std::path::{Component, Path, PathBuf};

/// Normalize a file system path to absolute form.
///
/// Tries `canonicalize()` first (resolves symlinks, `.`, `..`).
/// Falls back to:
/// - Lexically cleaned path if already absolute
/// - Join with current directory if relative
#[inline]
pub fn normalize_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            clean_path(path)
        } else {
            std::env::current_dir()
                .map_or_else(|_| path.to_path_buf(), |cwd| clean_path(&cwd.join(path)))
        }
    })
}

/// Lexically remove `.` and resolve `..` components.
///
/// `..` never climbs above the root of an absolute path.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

/// Resolve `path` against `base` the way `path.resolve(base, path)` would,
/// without touching the filesystem.
#[inline]
pub fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        clean_path(path)
    } else {
        clean_path(&base.join(path))
    }
}

/// Compute the path of `path` relative to the directory `base`.
///
/// Both inputs are cleaned first. When the paths live on different
/// prefixes (Windows drives) the cleaned `path` is returned unchanged.
pub fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let path = clean_path(path);
    let base = clean_path(base);

    let path_parts: Vec<_> = path.components().collect();
    let base_parts: Vec<_> = base.components().collect();

    if let (Some(Component::Prefix(a)), Some(Component::Prefix(b))) =
        (path_parts.first(), base_parts.first())
        && a != b
    {
        return path;
    }

    let common = path_parts
        .iter()
        .zip(&base_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..base_parts.len() {
        out.push("..");
    }
    for part in &path_parts[common..] {
        out.push(part.as_os_str());
    }
    out
}

/// Strip the drive prefix and root, leaving a relative path.
///
/// `C:\Users\me\a.scss` → `Users\me\a.scss`, `/home/me/a.scss` → `home/me/a.scss`.
/// Used to mirror an absolute path under a temp root.
pub fn rootless(path: &Path) -> PathBuf {
    clean_path(path)
        .components()
        .filter(|c| !matches!(c, Component::Prefix(_) | Component::RootDir))
        .collect()
}
