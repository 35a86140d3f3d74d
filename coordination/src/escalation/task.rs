//! `component_repair` task type: runs the escalation engine from the worker pool

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::engine::RepairEscalationEngine;
use crate::queue::TaskHandler;
use crate::state::Task;

/// Task type the handler is registered under
pub const COMPONENT_REPAIR_TASK: &str = "component_repair";

#[derive(Debug, Deserialize)]
struct RepairPayload {
    component: String,
    error_message: String,
    #[serde(default)]
    context: Value,
}

/// Runs one repair session per task; an unrepaired component fails the task
/// so the pool's retry budget drives re-escalation.
pub struct RepairTaskHandler {
    engine: Arc<RepairEscalationEngine>,
}

impl RepairTaskHandler {
    pub fn new(engine: Arc<RepairEscalationEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl TaskHandler for RepairTaskHandler {
    async fn handle(&self, task: &Task) -> anyhow::Result<Value> {
        let payload: RepairPayload = serde_json::from_value(task.payload.clone())
            .context("component_repair payload needs `component` and `error_message`")?;

        let repaired = self
            .engine
            .handle_component_failure(&payload.component, &payload.error_message, &payload.context)
            .await;
        if !repaired {
            anyhow::bail!("component `{}` was not repaired", payload.component);
        }
        Ok(serde_json::json!({
            "component": payload.component,
            "repaired": true,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStore;

    #[tokio::test]
    async fn test_bad_payload_is_an_error() {
        let engine = Arc::new(RepairEscalationEngine::new(MemoryStore::new().shared()));
        let handler = RepairTaskHandler::new(engine);
        let task = Task::new(COMPONENT_REPAIR_TASK, serde_json::json!({"nope": 1}), 0);
        let err = handler.handle(&task).await.unwrap_err();
        assert!(err.to_string().contains("component_repair payload"));
    }
}
