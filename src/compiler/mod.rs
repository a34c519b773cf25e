//! SASS compiler access.
//!
//! The compiler itself is an external program. This module owns the wire
//! protocol, the worker lifecycle and the single-flight [`CompileQueue`].
//!
//! ```text
//! compiler/
//! ├── protocol   # RenderMessage / WorkerReply line format
//! ├── worker     # Worker + WorkerFactory traits, ProcessWorker
//! ├── sass_cli   # ruby `sass` CLI backend + stderr parser
//! ├── backend    # BackendWorker: libsass worker or ruby CLI per request
//! └── queue      # CompileQueue actor (FIFO, timeout, respawn)
//! ```

mod backend;
pub mod protocol;
mod queue;
mod sass_cli;
mod worker;

#[cfg(test)]
pub(crate) mod fake;
#[cfg(test)]
mod tests;

pub use backend::{BackendFactory, BackendWorker};
pub use protocol::{RawError, RenderMessage, WorkerReply};
pub use queue::{CompileQueue, CompileResult, RenderOutput};
pub use sass_cli::parse_ruby_error;
pub use worker::{ProcessWorker, Worker, WorkerFactory, WorkerFailure};
