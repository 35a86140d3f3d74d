//! Startup wiring: state store, collaborators, registries, engine and pool

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use coordination::escalation::{
    CommandRestart, CommandSpec, RepairEscalationEngine, RepairTaskHandler,
    COMPONENT_REPAIR_TASK,
};
use coordination::oracle::{CodeGenerationOracle, NullOracle};
use coordination::queue::{HandlerRegistry, TaskStore, WorkerPool};
use coordination::snapshot::{GitSnapshotManager, NoSnapshots, SafetySnapshotManager};
use coordination::state::{MemoryStore, SharedStateStore, Task, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{split_command, AgentConfig};
use crate::oracle::HttpOracle;
use crate::probes::build_probe;

/// One entry of a task file consumed by `repair-agent run`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl TaskSpec {
    fn into_task(self) -> Task {
        let task = Task::new(self.task_type, self.payload, self.priority);
        match self.max_retries {
            Some(n) => task.with_max_retries(n),
            None => task,
        }
    }
}

/// Fully wired repair runtime
pub struct RepairAgent {
    config: AgentConfig,
    engine: Arc<RepairEscalationEngine>,
    pool: WorkerPool,
}

impl RepairAgent {
    /// Build against the configured state store
    pub fn build(config: AgentConfig) -> Result<Self> {
        let store = open_store(config.state_path.as_deref())?;
        Self::with_store(config, store)
    }

    /// Build against an explicit store
    pub fn with_store(config: AgentConfig, store: SharedStateStore) -> Result<Self> {
        let snapshots: Arc<dyn SafetySnapshotManager> = match &config.snapshots.git_dir {
            Some(dir) => Arc::new(
                GitSnapshotManager::new(dir).with_commit_prefix(&config.snapshots.commit_prefix),
            ),
            None => {
                warn!("No snapshot backend configured; repairs cannot be rolled back");
                Arc::new(NoSnapshots)
            }
        };
        let oracle: Arc<dyn CodeGenerationOracle> = match &config.oracle.url {
            Some(_) => Arc::new(HttpOracle::from_config(&config.oracle)?),
            None => Arc::new(NullOracle),
        };

        let mut engine =
            RepairEscalationEngine::with_config(Arc::clone(&store), config.coordination.clone())
                .with_snapshots(snapshots)
                .with_oracle(oracle);

        for (name, component) in &config.components {
            if let Some(restart) = &component.restart {
                let mut spec = CommandSpec::new(
                    split_command(restart).with_context(|| format!("component {name}"))?,
                    config.restart_timeout(component),
                );
                if let Some(dir) = &component.working_dir {
                    spec = spec.with_working_dir(dir);
                }
                engine = engine.with_restart(name.clone(), Arc::new(CommandRestart::new(spec)));
            }
            for probe in &component.probes {
                let probe = build_probe(probe, config.restart_timeout(component))
                    .with_context(|| format!("component {name}"))?;
                engine = engine.with_probe(name.clone(), probe);
            }
        }
        let engine = Arc::new(engine);

        let mut handlers = HandlerRegistry::new();
        handlers.register(
            COMPONENT_REPAIR_TASK,
            Arc::new(RepairTaskHandler::new(Arc::clone(&engine))),
        );
        let tasks = TaskStore::new(store).shared();
        let pool = WorkerPool::new(tasks, handlers, config.coordination.pool.clone());

        info!(
            components = config.components.len(),
            workers = config.coordination.pool.workers,
            oracle = config.oracle.url.is_some(),
            "Repair agent ready"
        );
        Ok(Self {
            config,
            engine,
            pool,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<RepairEscalationEngine> {
        &self.engine
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Run one repair session; the configured goal is added to the context
    pub async fn repair(&self, component: &str, error_message: &str, mut context: Value) -> bool {
        if context.is_null() {
            context = Value::Object(Default::default());
        }
        if let (Some(goal), Value::Object(map)) = (self.config.goal_for(component), &mut context)
        {
            map.entry("goal")
                .or_insert_with(|| Value::String(goal.to_string()));
        }
        self.engine
            .handle_component_failure(component, error_message, &context)
            .await
    }

    /// Diagnostic report, using the configured goal unless `goal` is given
    pub fn report(&self, component: &str, goal: Option<&str>) -> Result<String> {
        let goal = goal.or_else(|| self.config.goal_for(component));
        Ok(self.engine.ledger().diagnostic_report(component, goal)?)
    }

    /// Submit `specs`, drain them with the worker pool and return the final
    /// task records in submission order
    pub async fn run_tasks(&self, specs: Vec<TaskSpec>, timeout: Duration) -> Result<Vec<Task>> {
        self.pool.start();
        let mut ids: Vec<TaskId> = Vec::with_capacity(specs.len());
        for spec in specs {
            ids.push(self.pool.submit_task(spec.into_task())?);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut finished = Vec::with_capacity(ids.len());
        for id in &ids {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if let Some(task) = self.pool.wait_for(id, remaining).await? {
                finished.push(task);
            }
        }
        self.pool.shutdown().await;
        Ok(finished)
    }
}

/// Parse a task file: a JSON array of [`TaskSpec`]
pub fn parse_task_file(raw: &str) -> Result<Vec<TaskSpec>> {
    serde_json::from_str(raw).context("Task file must be a JSON array of tasks")
}

#[cfg(feature = "persistent")]
fn open_store(path: Option<&Path>) -> Result<SharedStateStore> {
    match path {
        Some(path) => {
            let store = coordination::state::RocksStore::open(path)
                .with_context(|| format!("Failed to open state store at {}", path.display()))?;
            info!(path = %path.display(), "Using RocksDB state store");
            Ok(store.shared())
        }
        None => Ok(MemoryStore::new().shared()),
    }
}

#[cfg(not(feature = "persistent"))]
fn open_store(path: Option<&Path>) -> Result<SharedStateStore> {
    if let Some(path) = path {
        warn!(
            path = %path.display(),
            "state_path ignored: built without the `persistent` feature"
        );
    }
    Ok(MemoryStore::new().shared())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_task_file() {
        let specs = parse_task_file(
            r#"[
                {"task_type": "echo"},
                {"task_type": "component_repair", "payload": {"component": "db", "error_message": "down"}, "max_retries": 0}
            ]"#,
        )
        .unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].payload, Value::Null);
        let task = specs[1].clone().into_task();
        assert_eq!(task.max_retries, 0);
        assert_eq!(task.payload["component"], "db");

        assert!(parse_task_file("{}").is_err());
    }

    #[tokio::test]
    async fn test_build_registers_components() {
        let config = AgentConfig::from_toml_str(
            r#"
[components.api]
restart = "true"
goal = "Answer requests"

[[components.api.probes]]
kind = "env"
vars = ["PATH"]
"#,
        )
        .unwrap();
        let agent = RepairAgent::with_store(config, MemoryStore::new().shared()).unwrap();
        let report = agent.report("api", None).unwrap();
        assert!(report.contains("Answer requests"));
    }
}
