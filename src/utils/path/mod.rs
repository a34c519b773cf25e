//! Path utilities.
//!
//! Pure functions for path manipulation. Only `normalize_path` touches the
//! filesystem (it canonicalizes when it can).
//!
//! - [`fs`]: normalization, lexical resolution, relative paths, drive letters

pub mod fs;

pub use fs::{clean_path, normalize_path, relative_to, resolve_against, rootless};
