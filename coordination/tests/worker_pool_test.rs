//! Worker pool integration tests: queue draining, retries, cancellation and
//! the `component_repair` task type.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use coordination::config::{CoordinationConfig, PoolConfig};
use coordination::escalation::{
    FixedResources, RepairEscalationEngine, RepairTaskHandler, RestartAction,
    COMPONENT_REPAIR_TASK,
};
use coordination::queue::{HandlerRegistry, TaskStore, WorkerPool};
use coordination::state::{HealthStatus, MemoryStore, RepairTier, Task, TaskStatus};

const WAIT: Duration = Duration::from_secs(10);

fn pool_with(handlers: HandlerRegistry, workers: usize) -> WorkerPool {
    let tasks = TaskStore::new(MemoryStore::new().shared()).shared();
    WorkerPool::new(
        tasks,
        handlers,
        PoolConfig {
            workers,
            poll_interval_ms: 20,
        },
    )
}

#[tokio::test]
async fn test_unhandled_task_type_completes() {
    let pool = pool_with(HandlerRegistry::new(), 2);
    pool.start();

    let id = pool.submit("echo", json!({"msg": "hi"}), 0).unwrap();
    let task = pool.wait_for(&id, WAIT).await.unwrap().unwrap();
    pool.shutdown().await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result.unwrap()["task_type"], "echo");
    assert!(task.completed_at.is_some());
}

#[tokio::test]
async fn test_always_failing_task_runs_max_retries_plus_one() {
    let executions = Arc::new(AtomicUsize::new(0));
    let mut handlers = HandlerRegistry::new();
    let counter = executions.clone();
    handlers.register_fn("flaky", move |_task: Task| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<Value, _>(anyhow::anyhow!("upstream unavailable"))
        }
    });

    let pool = pool_with(handlers, 1);
    pool.start();
    let id = pool
        .submit_task(Task::new("flaky", Value::Null, 0).with_max_retries(2))
        .unwrap();
    let task = pool.wait_for(&id, WAIT).await.unwrap().unwrap();
    pool.shutdown().await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 2);
    assert_eq!(executions.load(Ordering::SeqCst), 3);
    assert!(task.error.unwrap().contains("upstream unavailable"));
    assert_eq!(pool.tasks().failed_ids(), vec![id]);
}

#[tokio::test]
async fn test_task_succeeds_after_transient_failure() {
    let mut handlers = HandlerRegistry::new();
    handlers.register_fn("once", |task: Task| async move {
        if task.retry_count == 0 {
            anyhow::bail!("first try fails");
        }
        Ok(json!({"attempt": task.retry_count}))
    });

    let pool = pool_with(handlers, 1);
    pool.start();
    let id = pool.submit("once", Value::Null, 0).unwrap();
    let task = pool.wait_for(&id, WAIT).await.unwrap().unwrap();
    pool.shutdown().await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.retry_count, 1);
    assert_eq!(task.result.unwrap()["attempt"], 1);
}

#[tokio::test]
async fn test_every_task_reaches_one_terminal_state() {
    let mut handlers = HandlerRegistry::new();
    handlers.register_fn("mixed", |task: Task| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if task.payload["n"].as_u64().unwrap_or(0) % 3 == 0 {
            anyhow::bail!("multiple of three");
        }
        Ok(task.payload.clone())
    });

    let pool = pool_with(handlers, 4);
    pool.start();
    let mut ids = Vec::new();
    for n in 0..24u64 {
        let task = Task::new("mixed", json!({"n": n}), 0).with_max_retries(1);
        ids.push(pool.submit_task(task).unwrap());
    }
    for id in &ids {
        let task = pool.wait_for(id, WAIT).await.unwrap().unwrap();
        assert!(task.is_terminal(), "{id} still {}", task.status);
    }
    pool.shutdown().await;

    let completed: HashSet<_> = pool.tasks().completed_ids().into_iter().collect();
    let failed: HashSet<_> = pool.tasks().failed_ids().into_iter().collect();
    assert_eq!(completed.len(), 16);
    assert_eq!(failed.len(), 8);
    assert!(completed.is_disjoint(&failed));
    assert_eq!(completed.len() + failed.len(), ids.len());
}

#[tokio::test]
async fn test_single_worker_preserves_fifo_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handlers = HandlerRegistry::new();
    let seen = order.clone();
    handlers.register_fn("record", move |task: Task| {
        let seen = seen.clone();
        async move {
            seen.lock().unwrap().push(task.payload["n"].as_u64().unwrap_or(0));
            Ok(Value::Null)
        }
    });

    let pool = pool_with(handlers, 1);
    let mut ids = Vec::new();
    // Queue before starting so ordering does not depend on timing
    for n in 0..5u64 {
        ids.push(pool.submit("record", json!({"n": n}), 10 - n as i32).unwrap());
    }
    pool.start();
    for id in &ids {
        pool.wait_for(id, WAIT).await.unwrap();
    }
    pool.shutdown().await;

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_workers_run_tasks_concurrently() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut handlers = HandlerRegistry::new();
    let (a, p) = (active.clone(), peak.clone());
    handlers.register_fn("slow", move |_task: Task| {
        let (active, peak) = (a.clone(), p.clone());
        async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    });

    let pool = pool_with(handlers, 3);
    pool.start();
    let ids: Vec<_> = (0..3)
        .map(|_| pool.submit("slow", Value::Null, 0).unwrap())
        .collect();
    for id in &ids {
        pool.wait_for(id, WAIT).await.unwrap();
    }
    pool.shutdown().await;

    assert!(peak.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_cancel_pending_task() {
    let pool = pool_with(HandlerRegistry::new(), 1);
    let id = pool.submit("echo", Value::Null, 0).unwrap();
    assert!(pool.cancel(&id).unwrap());
    assert!(!pool.cancel(&id).unwrap());

    pool.start();
    let other = pool.submit("echo", Value::Null, 0).unwrap();
    pool.wait_for(&other, WAIT).await.unwrap();
    pool.shutdown().await;

    let task = pool.status(&id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.started_at.is_none());
}

#[tokio::test]
async fn test_shutdown_leaves_queued_tasks_pending() {
    let pool = pool_with(HandlerRegistry::new(), 2);
    pool.start();
    pool.shutdown().await;

    let id = pool.submit("echo", Value::Null, 0).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.status(&id).unwrap().unwrap().status, TaskStatus::Pending);
    assert_eq!(pool.tasks().pending_len(), 1);
}

// =============================================================================
// component_repair through the pool
// =============================================================================

struct CountingRestart {
    calls: AtomicUsize,
}

#[async_trait]
impl RestartAction for CountingRestart {
    fn describe(&self) -> String {
        "counting restart".to_string()
    }

    async fn restart(&self) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("still down")
    }
}

#[tokio::test]
async fn test_component_repair_task_drives_escalation() {
    let restart = Arc::new(CountingRestart {
        calls: AtomicUsize::new(0),
    });
    let engine = Arc::new(
        RepairEscalationEngine::with_config(
            MemoryStore::new().shared(),
            CoordinationConfig::default(),
        )
        .with_resource_probe(Arc::new(FixedResources::default()))
        .with_restart("ollama_service", restart.clone()),
    );

    let mut handlers = HandlerRegistry::new();
    handlers.register(
        COMPONENT_REPAIR_TASK,
        Arc::new(RepairTaskHandler::new(Arc::clone(&engine))),
    );
    let pool = pool_with(handlers, 2);
    pool.start();

    let task = Task::new(
        COMPONENT_REPAIR_TASK,
        json!({
            "component": "ollama_service",
            "error_message": "connection refused",
            "context": {"error_type": "connectivity"},
        }),
        0,
    )
    .with_max_retries(3);
    let id = pool.submit_task(task).unwrap();
    let task = pool.wait_for(&id, WAIT).await.unwrap().unwrap();
    pool.shutdown().await;

    // Each retry is a fresh repair session: three restarts, then Tier 2
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 3);
    let history = engine.ledger().history("ollama_service").unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[3].repair_tier, RepairTier::DependencyRepair);
    assert_eq!(restart.calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        engine.health().status("ollama_service").unwrap(),
        HealthStatus::Critical
    );
}
