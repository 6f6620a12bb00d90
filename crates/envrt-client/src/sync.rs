//! Blocking facade over an async client
//!
//! The wrapped client lives on a dedicated worker thread running a
//! current-thread tokio runtime. Callers on any thread submit jobs over a
//! channel and block on a per-call reply channel, so the transport is only
//! ever driven from the worker.

use envrt_core::{ResetArgs, StepResponse};
use futures::future::BoxFuture;
use std::sync::mpsc::{RecvTimeoutError, sync_channel};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

use crate::error::{ClientError, Result};
use crate::transport::AsyncEnvClient;

type Job<C> = Box<dyn for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, ()> + Send>;

fn job<C, F>(f: F) -> Job<C>
where
    F: for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, ()> + Send + 'static,
{
    Box::new(f)
}

enum Worker<C> {
    /// Not started yet
    Pending(C),
    Running {
        jobs: UnboundedSender<Job<C>>,
        thread: JoinHandle<()>,
    },
    Closed,
}

/// Blocking client over any [`AsyncEnvClient`]
///
/// The worker starts on first use. Call [`SyncEnvClient::close`] when done;
/// dropping a running facade closes it too, with a warning.
pub struct SyncEnvClient<C: AsyncEnvClient> {
    worker: Mutex<Worker<C>>,
    timeout: Option<Duration>,
}

impl<C: AsyncEnvClient> SyncEnvClient<C> {
    pub fn new(client: C) -> Self {
        Self {
            worker: Mutex::new(Worker::Pending(client)),
            timeout: None,
        }
    }

    /// Default deadline for every call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lock(), Worker::Running { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.lock(), Worker::Closed)
    }

    pub fn connect(&self) -> Result<()> {
        self.run(|client| client.connect())
    }

    pub fn reset(&self, args: ResetArgs) -> Result<StepResponse> {
        self.run(move |client| client.reset(args))
    }

    pub fn step(&self, action: serde_json::Value) -> Result<StepResponse> {
        self.run(move |client| client.step(action))
    }

    pub fn state(&self) -> Result<serde_json::Value> {
        self.run(|client| client.state())
    }

    /// Run any async operation on the wrapped client and block for its result
    pub fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, Result<T>> + Send + 'static,
    {
        self.run_with_timeout(self.timeout, f)
    }

    /// [`SyncEnvClient::run`] with an explicit deadline
    ///
    /// On expiry the call returns [`ClientError::Timeout`] and the late
    /// result is dropped.
    pub fn run_with_timeout<T, F>(&self, timeout: Option<Duration>, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, Result<T>> + Send + 'static,
    {
        let (reply_tx, reply_rx) = sync_channel::<Result<T>>(1);
        self.submit(job(move |client| {
            Box::pin(async move {
                let outcome = f(client).await;
                let _ = reply_tx.send(outcome);
            })
        }))?;

        match timeout {
            Some(limit) => match reply_rx.recv_timeout(limit) {
                Ok(outcome) => outcome,
                Err(RecvTimeoutError::Timeout) => Err(ClientError::Timeout(limit)),
                Err(RecvTimeoutError::Disconnected) => Err(ClientError::Closed),
            },
            None => reply_rx.recv().map_err(|_| ClientError::Closed)?,
        }
    }

    /// Stop the worker, close the wrapped client and join the thread
    ///
    /// Idempotent.
    pub fn close(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.lock(), Worker::Closed);
        match previous {
            Worker::Closed | Worker::Pending(_) => Ok(()),
            Worker::Running { jobs, thread } => {
                drop(jobs);
                thread
                    .join()
                    .map_err(|_| ClientError::Transport("sync client worker panicked".into()))
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Worker<C>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn submit(&self, job: Job<C>) -> Result<()> {
        let mut worker = self.lock();
        let (jobs, thread) = match std::mem::replace(&mut *worker, Worker::Closed) {
            Worker::Pending(client) => spawn_worker(client)?,
            Worker::Running { jobs, thread } => (jobs, thread),
            Worker::Closed => return Err(ClientError::Closed),
        };
        let sent = jobs.send(job).map_err(|_| ClientError::Closed);
        *worker = Worker::Running { jobs, thread };
        sent
    }
}

fn spawn_worker<C: AsyncEnvClient>(mut client: C) -> Result<(UnboundedSender<Job<C>>, JoinHandle<()>)> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| ClientError::Transport(format!("Failed to build runtime: {}", e)))?;
    let (jobs, mut rx) = unbounded_channel::<Job<C>>();

    let thread = std::thread::Builder::new()
        .name("envrt-sync-client".into())
        .spawn(move || {
            runtime.block_on(async move {
                while let Some(job) = rx.recv().await {
                    job(&mut client).await;
                }
                if let Err(e) = client.close().await {
                    tracing::warn!("Closing wrapped client failed: {}", e);
                }
            });
        })
        .map_err(|e| ClientError::Transport(format!("Failed to spawn worker thread: {}", e)))?;

    tracing::debug!("Sync client worker started");
    Ok((jobs, thread))
}

impl<C: AsyncEnvClient> Drop for SyncEnvClient<C> {
    fn drop(&mut self) {
        let running = matches!(
            *self.worker.get_mut().unwrap_or_else(PoisonError::into_inner),
            Worker::Running { .. }
        );
        if running {
            tracing::warn!("SyncEnvClient dropped without close(); closing it now");
        }
        if let Err(e) = self.close() {
            tracing::warn!("Closing dropped SyncEnvClient failed: {}", e);
        }
    }
}
