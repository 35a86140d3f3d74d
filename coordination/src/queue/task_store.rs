//! Task records plus the shared FIFO queue
//!
//! Records live in the [`StateStore`]; this type owns the queue of pending
//! ids and the lifecycle transitions. Claiming and cancelling both happen
//! under the queue lock, so a task is never both cancelled and running.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::state::{SharedStateStore, StoreError, StoreResult, Task, TaskId, TaskStatus};

/// Task records, lifecycle transitions and the pending queue
pub struct TaskStore {
    store: SharedStateStore,
    queue: Mutex<VecDeque<TaskId>>,
    completed: Mutex<Vec<TaskId>>,
    failed: Mutex<Vec<TaskId>>,
    notify: Notify,
}

impl TaskStore {
    pub fn new(store: SharedStateStore) -> Self {
        Self {
            store,
            queue: Mutex::new(VecDeque::new()),
            completed: Mutex::new(Vec::new()),
            failed: Mutex::new(Vec::new()),
            notify: Notify::new(),
        }
    }

    /// Create a shared reference
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Enqueue a new task with the default retry budget
    pub fn submit(
        &self,
        task_type: impl Into<String>,
        payload: Value,
        priority: i32,
    ) -> StoreResult<TaskId> {
        self.submit_task(Task::new(task_type, payload, priority))
    }

    /// Enqueue a prepared task (e.g. with a custom `max_retries`)
    pub fn submit_task(&self, mut task: Task) -> StoreResult<TaskId> {
        task.status = TaskStatus::Pending;
        let task_id = task.id.clone();
        {
            let mut queue = self.queue.lock().map_err(|_| StoreError::LockPoisoned)?;
            self.store.put_task(&task)?;
            queue.push_back(task_id.clone());
        }
        self.notify.notify_one();
        debug!(task_id = %task_id, task_type = %task.task_type, "Task submitted");
        Ok(task_id)
    }

    /// Current record of a task, `None` when unknown
    pub fn status(&self, task_id: &str) -> StoreResult<Option<Task>> {
        self.store.get_task(task_id)
    }

    /// Cancel a task that no worker has claimed yet.
    ///
    /// Returns `false` when the task is unknown or already running/terminal.
    pub fn cancel(&self, task_id: &str) -> StoreResult<bool> {
        let mut queue = self.queue.lock().map_err(|_| StoreError::LockPoisoned)?;
        let Some(mut task) = self.store.get_task(task_id)? else {
            return Ok(false);
        };
        if task.status != TaskStatus::Pending {
            return Ok(false);
        }
        queue.retain(|id| id != task_id);
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(Utc::now());
        self.store.put_task(&task)?;
        debug!(task_id = %task_id, "Task cancelled");
        Ok(true)
    }

    /// Number of queued task ids
    pub fn pending_len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Ids of completed tasks, in completion order
    pub fn completed_ids(&self) -> Vec<TaskId> {
        self.completed.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Ids of tasks that exhausted their retry budget, in failure order
    pub fn failed_ids(&self) -> Vec<TaskId> {
        self.failed.lock().map(|f| f.clone()).unwrap_or_default()
    }

    /// Pop and claim the next pending task (status → Running).
    ///
    /// On a store error the id goes back to the head of the queue.
    fn try_claim(&self) -> StoreResult<Option<Task>> {
        let mut queue = self.queue.lock().map_err(|_| StoreError::LockPoisoned)?;
        while let Some(task_id) = queue.pop_front() {
            let mut task = match self.store.get_task(&task_id) {
                Ok(Some(task)) => task,
                Ok(None) => {
                    warn!(task_id = %task_id, "Queued task has no record; dropping");
                    continue;
                }
                Err(e) => {
                    queue.push_front(task_id);
                    return Err(e);
                }
            };
            if task.status != TaskStatus::Pending {
                continue;
            }
            task.status = TaskStatus::Running;
            task.started_at = Some(Utc::now());
            if let Err(e) = self.store.put_task(&task) {
                queue.push_front(task_id);
                return Err(e);
            }
            return Ok(Some(task));
        }
        Ok(None)
    }

    /// Wait for the next task, waking at least every `poll` to check `shutdown`.
    ///
    /// Returns `None` once shutdown is requested.
    pub async fn next_task(&self, poll: Duration, shutdown: &CancellationToken) -> Option<Task> {
        loop {
            if shutdown.is_cancelled() {
                return None;
            }
            match self.try_claim() {
                Ok(Some(task)) => return Some(task),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Failed to claim task"),
            }
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    /// Record a handler result
    pub fn complete(&self, mut task: Task, result: Value) -> StoreResult<()> {
        task.status = TaskStatus::Completed;
        task.result = Some(result);
        task.error = None;
        task.completed_at = Some(Utc::now());
        self.store.put_task(&task)?;
        self.completed
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .push(task.id);
        Ok(())
    }

    /// Record a handler failure: re-enqueue at the tail while budget remains,
    /// otherwise mark the task Failed. Returns the resulting status.
    pub fn fail(&self, mut task: Task, error: String) -> StoreResult<TaskStatus> {
        task.error = Some(error);
        if task.retry_count < task.max_retries {
            task.retry_count += 1;
            task.status = TaskStatus::Pending;
            {
                let mut queue = self.queue.lock().map_err(|_| StoreError::LockPoisoned)?;
                self.store.put_task(&task)?;
                queue.push_back(task.id.clone());
            }
            self.notify.notify_one();
            return Ok(TaskStatus::Pending);
        }

        self.fail_permanently(task, None)?;
        Ok(TaskStatus::Failed)
    }

    /// Mark a task Failed regardless of its remaining retry budget.
    /// `error` replaces the recorded error when given.
    pub fn fail_permanently(&self, mut task: Task, error: Option<String>) -> StoreResult<()> {
        if let Some(error) = error {
            task.error = Some(error);
        }
        task.status = TaskStatus::Failed;
        task.completed_at = Some(Utc::now());
        self.store.put_task(&task)?;
        self.failed
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .push(task.id);
        Ok(())
    }
}
