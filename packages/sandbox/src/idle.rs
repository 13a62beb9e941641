// ABOUTME: Per-owner idle timers with cancel-and-replace semantics
// ABOUTME: At most one expiry task is armed per owner; re-arming aborts the previous one

use crate::profile::OwnerId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::debug;

struct ArmedTimer {
    generation: u64,
    handle: AbortHandle,
}

#[derive(Default)]
struct TimerTable {
    next_generation: u64,
    timers: HashMap<OwnerId, ArmedTimer>,
}

#[derive(Clone, Default)]
pub struct IdleTimers {
    inner: Arc<Mutex<TimerTable>>,
}

impl IdleTimers {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TimerTable> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Arm the owner's timer, replacing any armed one. `on_expire` runs after
    /// `delay` unless the timer is cancelled or replaced first.
    pub fn arm<F, Fut>(&self, owner_id: &OwnerId, delay: Duration, on_expire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut table = self.lock();
        table.next_generation += 1;
        let generation = table.next_generation;

        let timers = self.clone();
        let key = owner_id.clone();
        // The task cannot claim its slot before the insert below: claim needs the table lock
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if timers.claim(&key, generation) {
                on_expire().await;
            }
        });

        let armed = ArmedTimer {
            generation,
            handle: task.abort_handle(),
        };
        if let Some(previous) = table.timers.insert(owner_id.clone(), armed) {
            previous.handle.abort();
        }
        debug!("Idle timer for {} armed for {:?}", owner_id, delay);
    }

    /// Remove the owner's entry if it still belongs to `generation`.
    ///
    /// Once claimed the firing task owns the expiry; a concurrent re-arm
    /// inserts a new entry instead of aborting it.
    pub fn claim(&self, owner_id: &OwnerId, generation: u64) -> bool {
        let mut table = self.lock();
        match table.timers.get(owner_id) {
            Some(armed) if armed.generation == generation => {
                table.timers.remove(owner_id);
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&self, owner_id: &OwnerId) -> bool {
        match self.lock().timers.remove(owner_id) {
            Some(armed) => {
                armed.handle.abort();
                debug!("Idle timer for {} cancelled", owner_id);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let mut table = self.lock();
        for (_, armed) in table.timers.drain() {
            armed.handle.abort();
        }
    }

    pub fn is_armed(&self, owner_id: &OwnerId) -> bool {
        self.lock().timers.contains_key(owner_id)
    }

    pub fn armed_count(&self) -> usize {
        self.lock().timers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_action(
        counter: &Arc<AtomicUsize>,
    ) -> impl FnOnce() -> std::future::Ready<()> + Send + 'static {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test]
    async fn test_timer_fires_once() {
        let timers = IdleTimers::new();
        let owner = OwnerId::user("alice");
        let fired = Arc::new(AtomicUsize::new(0));

        timers.arm(&owner, Duration::from_millis(20), counter_action(&fired));
        assert!(timers.is_armed(&owner));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timers.is_armed(&owner));
    }

    #[tokio::test]
    async fn test_rearm_replaces_previous_timer() {
        let timers = IdleTimers::new();
        let owner = OwnerId::user("alice");
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        timers.arm(&owner, Duration::from_millis(40), counter_action(&first));
        timers.arm(&owner, Duration::from_millis(80), counter_action(&second));
        assert_eq!(timers.armed_count(), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_prevents_expiry() {
        let timers = IdleTimers::new();
        let owner = OwnerId::user("alice");
        let fired = Arc::new(AtomicUsize::new(0));

        timers.arm(&owner, Duration::from_millis(30), counter_action(&fired));
        assert!(timers.cancel(&owner));
        assert!(!timers.cancel(&owner));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let timers = IdleTimers::new();
        let fired = Arc::new(AtomicUsize::new(0));

        for name in ["alice", "bob", "carol"] {
            timers.arm(
                &OwnerId::user(name),
                Duration::from_millis(30),
                counter_action(&fired),
            );
        }
        assert_eq!(timers.armed_count(), 3);

        timers.cancel_all();
        assert_eq!(timers.armed_count(), 0);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_generation_cannot_claim() {
        let timers = IdleTimers::new();
        let owner = OwnerId::user("alice");

        timers.arm(&owner, Duration::from_secs(60), || std::future::ready(()));
        assert!(!timers.claim(&owner, 0));
        assert!(timers.is_armed(&owner));
        timers.cancel_all();
    }
}
