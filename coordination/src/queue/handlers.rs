//! Task handler seam and the explicit handler registry

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::state::Task;

/// Domain logic bound to one `task_type`.
///
/// An `Err` counts as a failed execution and is subject to the task's retry
/// budget.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> anyhow::Result<Value>;
}

/// Adapter so plain async closures can be registered
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Task) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn handle(&self, task: &Task) -> anyhow::Result<Value> {
        (self.f)(task.clone()).await
    }
}

/// Fallback for unregistered task types: always succeeds
pub struct NoopHandler;

#[async_trait]
impl TaskHandler for NoopHandler {
    async fn handle(&self, task: &Task) -> anyhow::Result<Value> {
        Ok(serde_json::json!({
            "handled": false,
            "task_type": task.task_type,
        }))
    }
}

/// `task_type` → handler map, fixed once the pool is built
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    fallback: Arc<dyn TaskHandler>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Arc::new(NoopHandler),
        }
    }

    /// Bind a handler; a later registration for the same type replaces it
    pub fn register(&mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_type.into(), handler);
    }

    /// Bind an async closure
    pub fn register_fn<F, Fut>(&mut self, task_type: impl Into<String>, f: F)
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register(task_type, Arc::new(FnHandler { f }));
    }

    /// Handler for a type, or the no-op fallback
    pub fn resolve(&self, task_type: &str) -> Arc<dyn TaskHandler> {
        self.handlers
            .get(task_type)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}
