//! Task queue and worker pool
//!
//! Tasks are submitted to a [`TaskStore`], drained in arrival order by a
//! fixed-size [`WorkerPool`], and routed to a [`TaskHandler`] by task type.
//! A failed execution is re-enqueued at the tail until the task's retry
//! budget is spent; handler panics are caught per task.

pub mod handlers;
pub mod pool;
pub mod task_store;

pub use handlers::{FnHandler, HandlerRegistry, NoopHandler, TaskHandler};
pub use pool::WorkerPool;
pub use task_store::TaskStore;
