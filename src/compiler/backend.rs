//! Production worker: dispatches on the request's `_compiler` field.

use super::protocol::{RenderMessage, WorkerReply};
use super::sass_cli::SassCli;
use super::worker::{ProcessWorker, Worker, WorkerFactory, WorkerFailure};
use crate::config::{Compiler, SassConfig};

/// `libsass` requests go to a long-lived JSON worker (spawned on first
/// use); `ruby` requests run the `sass` CLI.
pub struct BackendWorker {
    worker_command: Vec<String>,
    libsass: Option<ProcessWorker>,
    ruby: SassCli,
}

impl Worker for BackendWorker {
    async fn render(&mut self, message: &RenderMessage) -> Result<WorkerReply, WorkerFailure> {
        match message.compiler {
            Compiler::Ruby => self.ruby.render(message).await,
            Compiler::Libsass => {
                let worker = match self.libsass.take() {
                    Some(worker) => worker,
                    None => ProcessWorker::spawn(&self.worker_command)?,
                };
                self.libsass.insert(worker).render(message).await
            }
        }
    }

    fn is_alive(&mut self) -> bool {
        self.libsass.as_mut().is_none_or(|w| w.is_alive())
    }

    async fn kill(&mut self) {
        if let Some(mut worker) = self.libsass.take() {
            worker.kill().await;
        }
    }
}

/// Builds [`BackendWorker`]s from the `[sass]` config section.
#[derive(Debug, Clone)]
pub struct BackendFactory {
    worker_command: Vec<String>,
    sass_command: Vec<String>,
}

impl BackendFactory {
    pub fn new(worker_command: Vec<String>, sass_command: Vec<String>) -> Self {
        Self {
            worker_command,
            sass_command,
        }
    }

    pub fn from_config(config: &SassConfig) -> Self {
        Self::new(config.sass.worker.clone(), config.sass.sass_command.clone())
    }
}

impl WorkerFactory for BackendFactory {
    type Worker = BackendWorker;

    fn spawn(&self) -> Result<BackendWorker, WorkerFailure> {
        Ok(BackendWorker {
            worker_command: self.worker_command.clone(),
            libsass: None,
            ruby: SassCli::new(self.sass_command.clone()),
        })
    }
}
