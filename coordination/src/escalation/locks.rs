//! Per-component repair locks

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

/// Async mutex per component name. Sessions for one component are serialized;
/// different components never contend.
///
/// Entries exist only while a session holds or waits for the component.
#[derive(Default)]
pub struct ComponentLocks {
    locks: Mutex<LockMap>,
}

/// Exclusive hold on one component; releasing it drops the map entry once
/// nobody else is waiting
pub struct ComponentGuard<'a> {
    locks: &'a ComponentLocks,
    component: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ComponentGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.map();
        // The map holds the only reference when no session waits
        if locks
            .get(&self.component)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.component);
        }
    }
}

impl ComponentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, LockMap> {
        match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Wait for exclusive access to `component`
    pub async fn acquire(&self, component: &str) -> ComponentGuard<'_> {
        let lock = Arc::clone(
            self.map()
                .entry(component.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        );
        let guard = lock.lock_owned().await;
        ComponentGuard {
            locks: self,
            component: component.to_string(),
            guard: Some(guard),
        }
    }

    /// Whether a session currently holds the component
    pub fn is_locked(&self, component: &str) -> bool {
        self.map()
            .get(component)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Number of components with a live entry
    pub fn tracked(&self) -> usize {
        self.map().len()
    }
}
