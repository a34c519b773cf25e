//! Compile queue actor.
//!
//! Serializes render requests onto a single worker:
//!
//! ```text
//! submit() ──Submit──► QueueActor ──render──► Worker
//!    ▲                   │  FIFO, one in flight
//!    └─────oneshot───────┘  timeout → kill + fatal error
//! ```
//!
//! Every request is answered exactly once. A timed-out or crashed worker is
//! dropped and a new one is spawned for the next request.

use std::collections::VecDeque;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use super::protocol::{RenderMessage, WorkerReply};
use super::worker::{Worker, WorkerFactory, WorkerFailure};
use crate::config::TimeoutMs;
use crate::diagnostics::CompileError;
use crate::store::MapJson;

/// Successful compile, before any path post-processing.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutput {
    pub css: String,
    pub map: MapJson,
    /// Non-fatal warning reported with the output.
    pub warning: Option<CompileError>,
}

/// Either the output or the errors that prevented it.
pub type CompileResult = Result<RenderOutput, Vec<CompileError>>;

enum QueueMsg {
    Submit(Job),
    SetTimeout(TimeoutMs),
    Kill(oneshot::Sender<()>),
}

struct Job {
    message: RenderMessage,
    reply: oneshot::Sender<CompileResult>,
}

/// Handle to the queue actor. Cheap to clone.
#[derive(Clone)]
pub struct CompileQueue {
    tx: mpsc::Sender<QueueMsg>,
}

impl CompileQueue {
    /// Start the queue actor on the current tokio runtime.
    pub fn spawn<F: WorkerFactory>(factory: F, timeout: TimeoutMs) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let actor = QueueActor {
            factory,
            worker: None,
            timeout,
            rx,
            pending: VecDeque::new(),
            closed: false,
        };
        tokio::spawn(actor.run());
        Self { tx }
    }

    /// Queue a render and wait for its outcome.
    pub async fn submit(&self, message: RenderMessage) -> CompileResult {
        let file = message.file.clone();
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(QueueMsg::Submit(Job { message, reply }))
            .await
            .is_err()
        {
            return Err(vec![CompileError::fatal(&file, "compile queue stopped")]);
        }
        rx.await
            .unwrap_or_else(|_| Err(vec![CompileError::fatal(&file, "compile queue stopped")]))
    }

    /// Change the timeout; applies from the next dispatched request.
    pub async fn set_timeout(&self, timeout: TimeoutMs) {
        let _ = self.tx.send(QueueMsg::SetTimeout(timeout)).await;
    }

    /// Terminate the worker now. The request in flight, if any, fails with
    /// a fatal error; queued requests run on a fresh worker.
    pub async fn kill_process(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(QueueMsg::Kill(ack)).await.is_ok() {
            let _ = done.await;
        }
    }
}

// ============================================================================
// Actor
// ============================================================================

enum Outcome {
    Done(Result<WorkerReply, WorkerFailure>),
    TimedOut,
    Killed(oneshot::Sender<()>),
}

struct QueueActor<F: WorkerFactory> {
    factory: F,
    worker: Option<F::Worker>,
    timeout: TimeoutMs,
    rx: mpsc::Receiver<QueueMsg>,
    pending: VecDeque<Job>,
    /// All handles dropped; drain `pending` and stop.
    closed: bool,
}

impl<F: WorkerFactory> QueueActor<F> {
    async fn run(mut self) {
        loop {
            let job = match self.pending.pop_front() {
                Some(job) => job,
                None if self.closed => break,
                None => match self.rx.recv().await {
                    Some(QueueMsg::Submit(job)) => job,
                    Some(QueueMsg::SetTimeout(timeout)) => {
                        self.timeout = timeout;
                        continue;
                    }
                    Some(QueueMsg::Kill(ack)) => {
                        self.kill_worker().await;
                        let _ = ack.send(());
                        continue;
                    }
                    None => break,
                },
            };
            self.dispatch(job).await;
        }
        self.kill_worker().await;
        crate::debug!("queue"; "compile queue stopped");
    }

    async fn kill_worker(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.kill().await;
        }
    }

    /// Reuse the live worker or start a new one.
    fn checkout(&mut self) -> Result<F::Worker, WorkerFailure> {
        if let Some(mut worker) = self.worker.take() {
            if worker.is_alive() {
                return Ok(worker);
            }
            crate::log!("queue"; "compiler exited, starting a new one");
        }
        self.factory.spawn()
    }

    async fn dispatch(&mut self, job: Job) {
        let file = job.message.file.clone();
        if job.reply.is_closed() {
            crate::debug!("queue"; "skip abandoned request: {}", file.display());
            return;
        }

        let mut worker = match self.checkout() {
            Ok(worker) => worker,
            Err(failure) => {
                crate::log!("error"; "{}", failure);
                let _ = job.reply.send(Err(vec![CompileError::fatal(&file, failure)]));
                return;
            }
        };

        crate::debug!("queue"; "dispatch {} ({} queued)", file.display(), self.pending.len());
        let started = Instant::now();
        let deadline = self.timeout.duration();

        let outcome = {
            let render = worker.render(&job.message);
            let timer = async move {
                match deadline {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::pin!(render);
            tokio::pin!(timer);

            loop {
                tokio::select! {
                    result = &mut render => break Outcome::Done(result),
                    () = &mut timer => break Outcome::TimedOut,
                    msg = self.rx.recv(), if !self.closed => match msg {
                        Some(QueueMsg::Submit(next)) => self.pending.push_back(next),
                        Some(QueueMsg::SetTimeout(timeout)) => self.timeout = timeout,
                        Some(QueueMsg::Kill(ack)) => break Outcome::Killed(ack),
                        None => self.closed = true,
                    },
                }
            }
        };

        let result = match outcome {
            Outcome::Done(Ok(reply)) => {
                self.worker = Some(worker);
                crate::debug!("queue"; "done {} in {:?}", file.display(), started.elapsed());
                into_result(reply, &file)
            }
            Outcome::Done(Err(failure)) => {
                crate::log!("queue"; "compiler failed on {}: {}", file.display(), failure);
                worker.kill().await;
                Err(vec![CompileError::fatal(&file, failure)])
            }
            Outcome::TimedOut => {
                let limit = self.timeout.0;
                crate::log!("queue"; "compiler timed out after {}ms, restarting", limit);
                worker.kill().await;
                Err(vec![CompileError::fatal(
                    &file,
                    format!("signal=SIGKILL (timed out after {limit}ms)"),
                )])
            }
            Outcome::Killed(ack) => {
                worker.kill().await;
                let _ = ack.send(());
                Err(vec![CompileError::fatal(&file, "signal=SIGTERM (killed)")])
            }
        };

        let _ = job.reply.send(result);
    }
}

fn into_result(reply: WorkerReply, file: &std::path::Path) -> CompileResult {
    match reply {
        WorkerReply::Success { css, map, warning } => {
            let map = MapJson::from_value(map).map_err(|e| {
                vec![CompileError::fatal(file, format!("malformed source map: {e}"))]
            })?;
            Ok(RenderOutput {
                css,
                map,
                warning: warning.map(|w| w.into_compile_error(file)),
            })
        }
        WorkerReply::Failure(raw) => Err(vec![raw.into_compile_error(file)]),
    }
}
