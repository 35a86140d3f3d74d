//! Test store whose task reads and writes can be made to fail

use std::sync::atomic::{AtomicUsize, Ordering};

use super::store::{MemoryStore, StateStore, StoreError, StoreResult};
use super::types::*;

/// [`MemoryStore`] that fails the next N task reads or writes on request
#[derive(Default)]
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    failing_reads: AtomicUsize,
    failing_writes: AtomicUsize,
}

impl FlakyStore {
    pub(crate) fn fail_task_reads(&self, n: usize) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    pub(crate) fn fail_task_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl StateStore for FlakyStore {
    fn put_task(&self, task: &Task) -> StoreResult<()> {
        if Self::take(&self.failing_writes) {
            return Err(StoreError::Serialization("write unavailable".into()));
        }
        self.inner.put_task(task)
    }

    fn get_task(&self, task_id: &str) -> StoreResult<Option<Task>> {
        if Self::take(&self.failing_reads) {
            return Err(StoreError::Deserialization("read unavailable".into()));
        }
        self.inner.get_task(task_id)
    }

    fn list_tasks(&self) -> StoreResult<Vec<Task>> {
        self.inner.list_tasks()
    }

    fn put_health(&self, record: &ComponentHealthRecord) -> StoreResult<()> {
        self.inner.put_health(record)
    }

    fn get_health(&self, component: &str) -> StoreResult<Option<ComponentHealthRecord>> {
        self.inner.get_health(component)
    }

    fn list_health(&self) -> StoreResult<Vec<ComponentHealthRecord>> {
        self.inner.list_health()
    }

    fn append_attempt(&self, attempt: &RepairAttempt) -> StoreResult<()> {
        self.inner.append_attempt(attempt)
    }

    fn attempts_for(&self, component: &str) -> StoreResult<Vec<RepairAttempt>> {
        self.inner.attempts_for(component)
    }

    fn all_attempts(&self) -> StoreResult<Vec<RepairAttempt>> {
        self.inner.all_attempts()
    }

    fn append_rollback(&self, event: &RollbackEvent) -> StoreResult<()> {
        self.inner.append_rollback(event)
    }

    fn rollbacks_for(&self, component: &str) -> StoreResult<Vec<RollbackEvent>> {
        self.inner.rollbacks_for(component)
    }
}
