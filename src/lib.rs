//! sassmap - source-map aware SASS/SCSS compile engine for editors.
//!
//! Keeps generated CSS and its source maps in sync with edited sources,
//! previews unsaved buffers without touching disk, and maps compiler
//! errors back onto the partial they came from.
//!
//! ```text
//! orchestrator ──► render ──► compiler (queue ──► worker)
//!                    │
//!                    └──► store (maps, reverse index) ──► diagnostics
//! ```
//!
//! [`session::Session`] wires everything for one editor session.

#[macro_use]
pub mod logger;

pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod orchestrator;
pub mod render;
pub mod selector;
pub mod session;
pub mod source;
pub mod store;
pub mod utils;

pub use session::{ScanProvider, Session};
