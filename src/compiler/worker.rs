//! Compiler worker abstraction.
//!
//! A [`Worker`] answers one [`RenderMessage`] at a time. The queue owns at
//! most one worker and asks its [`WorkerFactory`] for a fresh one whenever
//! the previous one died.

use std::future::Future;
use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::protocol::{Decoded, RenderMessage, WorkerReply, decode_line};

/// Process-level worker failures. Compiler errors are not failures; they
/// arrive as [`WorkerReply::Failure`].
#[derive(Debug, Error)]
pub enum WorkerFailure {
    #[error("failed to start compiler `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("compiler I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed compiler response: {0}")]
    Protocol(String),

    #[error("{}", exit_detail(.code, .signal))]
    Exited {
        code: Option<i32>,
        signal: Option<String>,
    },
}

impl WorkerFailure {
    pub fn from_status(status: ExitStatus) -> Self {
        Self::Exited {
            code: status.code(),
            signal: signal_name(status),
        }
    }
}

/// A long-lived compiler.
pub trait Worker: Send + 'static {
    /// Render one request. Cancel-safe: dropping the future abandons the
    /// request, after which the worker must be killed.
    fn render(
        &mut self,
        message: &RenderMessage,
    ) -> impl Future<Output = Result<WorkerReply, WorkerFailure>> + Send;

    /// Whether the worker can take another request.
    fn is_alive(&mut self) -> bool;

    /// Forcibly terminate the worker.
    fn kill(&mut self) -> impl Future<Output = ()> + Send;
}

/// Creates workers on demand.
pub trait WorkerFactory: Send + Sync + 'static {
    type Worker: Worker;

    fn spawn(&self) -> Result<Self::Worker, WorkerFailure>;
}

// ============================================================================
// Child process worker
// ============================================================================

/// A child process speaking the line protocol on stdin/stdout.
pub struct ProcessWorker {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    line: String,
}

impl ProcessWorker {
    pub fn spawn(command: &[String]) -> Result<Self, WorkerFailure> {
        let display = command.join(" ");
        let (program, args) = command.split_first().ok_or_else(|| WorkerFailure::Spawn {
            command: display.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        })?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| WorkerFailure::Spawn {
                command: display.clone(),
                source,
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(WorkerFailure::Protocol("worker pipes unavailable".into()));
        };

        crate::debug!("queue"; "spawned worker `{}` (pid {:?})", display, child.id());
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            line: String::new(),
        })
    }

    async fn exit_failure(&mut self) -> WorkerFailure {
        match self.child.wait().await {
            Ok(status) => WorkerFailure::from_status(status),
            Err(e) => WorkerFailure::Io(e),
        }
    }
}

impl Worker for ProcessWorker {
    async fn render(&mut self, message: &RenderMessage) -> Result<WorkerReply, WorkerFailure> {
        let request = message
            .to_line()
            .map_err(|e| WorkerFailure::Protocol(e.to_string()))?;
        if let Err(e) = self.stdin.write_all(request.as_bytes()).await {
            crate::debug!("queue"; "worker write failed: {}", e);
            return Err(self.exit_failure().await);
        }
        self.stdin.flush().await?;

        loop {
            self.line.clear();
            if self.stdout.read_line(&mut self.line).await? == 0 {
                return Err(self.exit_failure().await);
            }
            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            match decode_line(line).map_err(|e| WorkerFailure::Protocol(e.to_string()))? {
                Decoded::Reply(reply) => return Ok(reply),
                Decoded::Exit(code) => {
                    crate::debug!("queue"; "worker announced exit code {}", code);
                    let _ = self.child.wait().await;
                    return Err(WorkerFailure::Exited {
                        code: Some(code),
                        signal: None,
                    });
                }
                Decoded::Skip => {}
            }
        }
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            crate::debug!("queue"; "kill worker: {}", e);
        }
    }
}

fn exit_detail(code: &Option<i32>, signal: &Option<String>) -> String {
    match (signal, code) {
        (Some(signal), _) => format!("signal={signal}"),
        (None, Some(code)) => format!("exit code {code}"),
        (None, None) => "signal=null".to_string(),
    }
}

/// Signal name for a killed process, e.g. `SIGKILL`.
#[cfg(unix)]
fn signal_name(status: ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;

    status.signal().map(|sig| {
        match sig {
            1 => "SIGHUP",
            2 => "SIGINT",
            6 => "SIGABRT",
            9 => "SIGKILL",
            11 => "SIGSEGV",
            15 => "SIGTERM",
            _ => return format!("SIG{sig}"),
        }
        .to_string()
    })
}

#[cfg(not(unix))]
fn signal_name(_status: ExitStatus) -> Option<String> {
    None
}
