//! Fixed-size worker pool draining the shared task queue

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handlers::HandlerRegistry;
use super::task_store::TaskStore;
use crate::config::PoolConfig;
use crate::state::{StoreResult, Task, TaskId, TaskStatus};

/// Store writes tried per task outcome before the task is forced terminal
const RECORD_ATTEMPTS: u32 = 3;
const RECORD_BACKOFF: Duration = Duration::from_millis(50);

/// N workers pulling task ids from one FIFO queue
pub struct WorkerPool {
    tasks: Arc<TaskStore>,
    handlers: Arc<HandlerRegistry>,
    config: PoolConfig,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Build a pool; the registry is frozen from here on
    pub fn new(tasks: Arc<TaskStore>, handlers: HandlerRegistry, config: PoolConfig) -> Self {
        Self {
            tasks,
            handlers: Arc::new(handlers),
            config,
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn tasks(&self) -> &Arc<TaskStore> {
        &self.tasks
    }

    /// Spawn the workers. Calling twice is a no-op.
    pub fn start(&self) {
        let Ok(mut workers) = self.workers.lock() else {
            error!("Worker handle lock poisoned; pool not started");
            return;
        };
        if !workers.is_empty() {
            return;
        }

        let poll = Duration::from_millis(self.config.poll_interval_ms);
        for worker_id in 0..self.config.workers {
            let tasks = Arc::clone(&self.tasks);
            let handlers = Arc::clone(&self.handlers);
            let shutdown = self.shutdown.clone();
            workers.push(tokio::spawn(worker_loop(
                worker_id, tasks, handlers, poll, shutdown,
            )));
        }
        info!(workers = self.config.workers, "Worker pool started");
    }

    /// Signal shutdown and wait for every worker to finish its current task
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = match self.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker exited abnormally");
            }
        }
        info!("Worker pool stopped");
    }

    pub fn submit(&self, task_type: &str, payload: Value, priority: i32) -> StoreResult<TaskId> {
        self.tasks.submit(task_type, payload, priority)
    }

    pub fn submit_task(&self, task: Task) -> StoreResult<TaskId> {
        self.tasks.submit_task(task)
    }

    pub fn status(&self, task_id: &str) -> StoreResult<Option<Task>> {
        self.tasks.status(task_id)
    }

    pub fn cancel(&self, task_id: &str) -> StoreResult<bool> {
        self.tasks.cancel(task_id)
    }

    /// Poll until the task is terminal or `timeout` elapses.
    ///
    /// Returns the last observed record (possibly non-terminal on timeout).
    pub async fn wait_for(&self, task_id: &str, timeout: Duration) -> StoreResult<Option<Task>> {
        let deadline = Instant::now() + timeout;
        loop {
            let task = self.tasks.status(task_id)?;
            let done = task.as_ref().map_or(true, Task::is_terminal);
            if done || Instant::now() >= deadline {
                return Ok(task);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    tasks: Arc<TaskStore>,
    handlers: Arc<HandlerRegistry>,
    poll: Duration,
    shutdown: CancellationToken,
) {
    debug!(worker_id, "Worker started");
    while let Some(task) = tasks.next_task(poll, &shutdown).await {
        run_task(worker_id, &tasks, &handlers, task).await;
    }
    debug!(worker_id, "Worker stopped");
}

async fn run_task(worker_id: usize, tasks: &TaskStore, handlers: &HandlerRegistry, task: Task) {
    let handler = handlers.resolve(&task.task_type);
    debug!(worker_id, task_id = %task.id, task_type = %task.task_type, "Running task");

    let outcome = match AssertUnwindSafe(handler.handle(&task)).catch_unwind().await {
        Ok(result) => result.map_err(|e| format!("{e:#}")),
        Err(panic) => Err(panic_message(panic.as_ref())),
    };

    if let Err(message) = &outcome {
        warn!(worker_id, task_id = %task.id, error = %message, "Task execution failed");
    }

    match record_outcome(tasks, &task, &outcome).await {
        Ok(TaskStatus::Failed) => {
            error!(worker_id, task_id = %task.id, "Task failed after exhausting retries")
        }
        Ok(status) => debug!(worker_id, task_id = %task.id, %status, "Task recorded"),
        Err(e) => {
            error!(worker_id, task_id = %task.id, error = %e, "Failed to record task outcome");
            let task_id = task.id.clone();
            let message = format!("task outcome could not be recorded: {e}");
            if let Err(e) = tasks.fail_permanently(task, Some(message)) {
                error!(worker_id, task_id = %task_id, error = %e, "Task left in running state");
            }
        }
    }
}

/// Persist a handler outcome, retrying transient store errors
async fn record_outcome(
    tasks: &TaskStore,
    task: &Task,
    outcome: &Result<Value, String>,
) -> StoreResult<TaskStatus> {
    let mut attempt = 1;
    loop {
        let recorded = match outcome {
            Ok(result) => tasks
                .complete(task.clone(), result.clone())
                .map(|_| TaskStatus::Completed),
            Err(message) => tasks.fail(task.clone(), message.clone()),
        };
        match recorded {
            Err(e) if attempt < RECORD_ATTEMPTS => {
                warn!(task_id = %task.id, attempt, error = %e, "Retrying task outcome write");
                tokio::time::sleep(RECORD_BACKOFF * attempt).await;
                attempt += 1;
            }
            recorded => return recorded,
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}
