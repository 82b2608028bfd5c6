//! Transient per-task progress, overwritten at every transition and
//! forgotten after the retention window whatever the outcome.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::TaskStatus;

/// Steps of one processing run, as reported to clients.
pub const TOTAL_STEPS: u32 = 5;

pub const DEFAULT_PROGRESS_RETENTION: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub current_step: u32,
    pub total_steps: u32,
    pub message: Option<String>,
    /// Set on success only: the processed document.
    pub result_id: Option<Uuid>,
}

impl TaskProgress {
    pub fn queued(task_id: Uuid) -> Self {
        Self {
            task_id,
            status: TaskStatus::Queued,
            current_step: 0,
            total_steps: TOTAL_STEPS,
            message: None,
            result_id: None,
        }
    }

    pub fn processing(task_id: Uuid, step: u32, message: &str) -> Self {
        Self {
            status: TaskStatus::Processing,
            current_step: step,
            message: Some(message.to_string()),
            ..Self::queued(task_id)
        }
    }

    pub fn completed(task_id: Uuid, result_id: Uuid) -> Self {
        Self {
            status: TaskStatus::Completed,
            current_step: TOTAL_STEPS,
            message: Some("Completed".to_string()),
            result_id: Some(result_id),
            ..Self::queued(task_id)
        }
    }

    pub fn failed(task_id: Uuid, step: u32, message: &str) -> Self {
        Self {
            status: TaskStatus::Failed,
            current_step: step,
            message: Some(message.to_string()),
            ..Self::queued(task_id)
        }
    }
}

/// Keyed last-write-wins progress store.
pub trait ProgressStore: Send + Sync {
    fn set(&self, progress: TaskProgress);
    fn get(&self, task_id: &Uuid) -> Option<TaskProgress>;
}

struct Entry {
    progress: TaskProgress,
    expires_at: Instant,
}

/// Process-local progress store. Every write restarts the entry's
/// retention window; expired entries read as absent.
pub struct InMemoryProgressStore {
    entries: Mutex<HashMap<Uuid, Entry>>,
    retention: Duration,
}

impl InMemoryProgressStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retention,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<Uuid, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Purge expired entries every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.purge_expired();
                        if removed > 0 {
                            tracing::debug!(removed, "Expired task progress purged");
                        }
                    }
                }
            }
        })
    }
}

impl Default for InMemoryProgressStore {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_RETENTION)
    }
}

impl ProgressStore for InMemoryProgressStore {
    fn set(&self, progress: TaskProgress) {
        let expires_at = Instant::now() + self.retention;
        self.entries().insert(
            progress.task_id,
            Entry {
                progress,
                expires_at,
            },
        );
    }

    fn get(&self, task_id: &Uuid) -> Option<TaskProgress> {
        let mut entries = self.entries();
        let entry = entries.get(task_id)?;
        if entry.expires_at > Instant::now() {
            return Some(entry.progress.clone());
        }
        entries.remove(task_id);
        None
    }
}
