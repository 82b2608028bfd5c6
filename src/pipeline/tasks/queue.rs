//! Bounded-concurrency task queue with fixed-backoff retries.
//!
//! Handlers enqueue and return; a dispatcher loop runs each attempt on the
//! blocking pool behind a semaphore. Shutdown stops the dispatcher, drops
//! pending retries and waits for attempts already running.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::job::DocumentTaskRunner;
use super::progress::{ProgressStore, TaskProgress};
use crate::pipeline::processor::ProcessingError;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Task queue is shut down")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct TaskQueueConfig {
    /// Attempts allowed to run at once.
    pub concurrency: usize,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            max_retries: 3,
            retry_backoff: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TaskRequest {
    task_id: Uuid,
    document_id: Uuid,
    /// 0 for the first attempt.
    attempt: u32,
}

/// Shared state of the dispatcher and its attempts.
struct Dispatch {
    runner: Arc<DocumentTaskRunner>,
    config: TaskQueueConfig,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    retry_tx: mpsc::UnboundedSender<TaskRequest>,
    active: Mutex<HashSet<Uuid>>,
}

pub struct TaskQueue {
    sender: mpsc::UnboundedSender<TaskRequest>,
    progress: Arc<dyn ProgressStore>,
    cancel: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl TaskQueue {
    /// Spawn the dispatcher. Must be called inside a tokio runtime.
    pub fn start(
        runner: Arc<DocumentTaskRunner>,
        progress: Arc<dyn ProgressStore>,
        config: TaskQueueConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tracing::info!(
            concurrency = config.concurrency,
            max_retries = config.max_retries,
            backoff_secs = config.retry_backoff.as_secs(),
            "Task queue started"
        );

        let dispatch = Arc::new(Dispatch {
            runner,
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
            config,
            cancel: cancel.clone(),
            retry_tx: sender.clone(),
            active: Mutex::new(HashSet::new()),
        });
        let handle = tokio::spawn(dispatch_loop(dispatch, receiver));

        Self {
            sender,
            progress,
            cancel,
            dispatcher: Mutex::new(Some(handle)),
        }
    }

    /// Queue processing of `document_id`. Returns the new task identifier.
    pub fn enqueue(&self, document_id: Uuid) -> Result<Uuid, QueueError> {
        if self.cancel.is_cancelled() {
            return Err(QueueError::Closed);
        }
        let task_id = Uuid::new_v4();
        self.progress.set(TaskProgress::queued(task_id));
        self.sender
            .send(TaskRequest {
                task_id,
                document_id,
                attempt: 0,
            })
            .map_err(|_| QueueError::Closed)?;
        tracing::info!(task_id = %task_id, document_id = %document_id, "Task queued");
        Ok(task_id)
    }

    /// Stop accepting work, cancel pending retries and wait for running
    /// attempts to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Task dispatcher ended abnormally");
            }
        }
        tracing::info!("Task queue stopped");
    }
}

async fn dispatch_loop(dispatch: Arc<Dispatch>, mut receiver: mpsc::UnboundedReceiver<TaskRequest>) {
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = dispatch.cancel.cancelled() => break,
            Some(request) = receiver.recv() => {
                in_flight.spawn(run_request(Arc::clone(&dispatch), request));
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Task supervisor panicked");
                }
            }
        }
    }

    tracing::info!(in_flight = in_flight.len(), "Draining running tasks");
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Task supervisor panicked");
        }
    }
}

/// Run one attempt, then schedule the next one if the failure allows it.
async fn run_request(dispatch: Arc<Dispatch>, request: TaskRequest) {
    let TaskRequest {
        task_id,
        document_id,
        attempt,
    } = request;

    if !lock_active(&dispatch).insert(task_id) {
        tracing::warn!(task_id = %task_id, "Task already running, duplicate dropped");
        return;
    }

    let permit = tokio::select! {
        permit = Arc::clone(&dispatch.semaphore).acquire_owned() => permit,
        _ = dispatch.cancel.cancelled() => {
            lock_active(&dispatch).remove(&task_id);
            return;
        }
    };
    let Ok(permit) = permit else {
        lock_active(&dispatch).remove(&task_id);
        return;
    };

    tracing::info!(task_id = %task_id, document_id = %document_id, attempt, "Task attempt starting");
    let runner = Arc::clone(&dispatch.runner);
    let outcome =
        tokio::task::spawn_blocking(move || runner.run_attempt(task_id, document_id)).await;
    drop(permit);
    lock_active(&dispatch).remove(&task_id);

    let error = match outcome {
        Ok(Ok(_)) => return,
        Ok(Err(e)) => e,
        Err(join_error) => {
            let e = ProcessingError::Worker(join_error.to_string());
            let step = dispatch.runner.last_step(&task_id);
            dispatch.runner.record_failure(task_id, document_id, step, &e);
            e
        }
    };

    if !error.is_retryable() || attempt >= dispatch.config.max_retries {
        tracing::error!(
            task_id = %task_id,
            document_id = %document_id,
            attempts = attempt + 1,
            error = %error,
            "Task failed permanently"
        );
        return;
    }

    tracing::warn!(
        task_id = %task_id,
        attempt,
        backoff_secs = dispatch.config.retry_backoff.as_secs(),
        "Retry scheduled"
    );
    tokio::select! {
        _ = tokio::time::sleep(dispatch.config.retry_backoff) => {
            let retry = TaskRequest { attempt: attempt + 1, ..request };
            if dispatch.retry_tx.send(retry).is_err() {
                tracing::warn!(task_id = %task_id, "Queue closed, retry dropped");
            }
        }
        _ = dispatch.cancel.cancelled() => {
            tracing::info!(task_id = %task_id, "Pending retry cancelled by shutdown");
        }
    }
}

fn lock_active(dispatch: &Dispatch) -> std::sync::MutexGuard<'_, HashSet<Uuid>> {
    dispatch.active.lock().unwrap_or_else(|e| e.into_inner())
}
