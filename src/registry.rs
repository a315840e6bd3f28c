//! Registry of launched workers and their lease state.
//!
//! Everything in here is plain data guarded by the pool's single mutex.
//! Nothing in this module blocks or awaits.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;

use crate::launcher::WorkerId;
use crate::queue::WaitQueue;
use crate::recycle::RetirementTimer;
use crate::status::WorkerStatus;
use crate::traits::Worker;

/// One worker slot.
pub(crate) struct WorkerRecord<W> {
    pub(crate) id: WorkerId,
    pub(crate) worker: Arc<W>,
    pub(crate) endpoint: String,
    /// Held by a caller through a lease.
    pub(crate) leased: bool,
    /// Held by the pool itself while it closes and relaunches the worker.
    pub(crate) retiring: bool,
    /// Leases served by the current process, counting its launch as one.
    pub(crate) usage_count: u64,
    pub(crate) retirement: Option<RetirementTimer>,
    pub(crate) launched_at: Instant,
}

impl<W: Worker> WorkerRecord<W> {
    pub(crate) fn new(id: WorkerId, worker: Arc<W>) -> Self {
        Self {
            id,
            endpoint: worker.endpoint().to_string(),
            worker,
            leased: false,
            retiring: false,
            usage_count: 1,
            retirement: None,
            launched_at: Instant::now(),
        }
    }

    /// Swap in a freshly launched process. Usage starts over at 1.
    pub(crate) fn replace_worker(&mut self, worker: Arc<W>) {
        self.endpoint = worker.endpoint().to_string();
        self.worker = worker;
        self.usage_count = 1;
        self.launched_at = Instant::now();
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.leased || self.retiring
    }

    /// Arm a retirement timer, cancelling any previous one.
    pub(crate) fn arm_retirement(&mut self, timer: RetirementTimer) {
        if let Some(previous) = self.retirement.replace(timer) {
            previous.cancel();
        }
    }

    /// Cancel the pending retirement timer, if any.
    pub(crate) fn cancel_retirement(&mut self) {
        if let Some(timer) = self.retirement.take() {
            timer.cancel();
        }
    }

    pub(crate) fn age(&self) -> Duration {
        self.launched_at.elapsed()
    }

    pub(crate) fn status(&self) -> WorkerStatus {
        WorkerStatus {
            id: self.id.to_string(),
            endpoint: self.endpoint.clone(),
            busy: self.is_busy(),
            usage_count: self.usage_count,
            retirement_pending: self.retirement.is_some(),
            age_seconds: self.age().as_secs(),
        }
    }
}

/// Worker records plus the queue of callers waiting for one.
pub(crate) struct Registry<W> {
    pub(crate) records: BTreeMap<WorkerId, WorkerRecord<W>>,
    pub(crate) waiters: WaitQueue<WorkerId>,
    /// Slots claimed by launches still in flight.
    pub(crate) reserved: BTreeSet<WorkerId>,
}

impl<W: Worker> Registry<W> {
    pub(crate) fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            waiters: WaitQueue::new(),
            reserved: BTreeSet::new(),
        }
    }

    /// Uniformly random idle worker.
    pub(crate) fn pick_idle(&self) -> Option<WorkerId> {
        let idle: Vec<WorkerId> = self
            .records
            .values()
            .filter(|record| !record.is_busy())
            .map(|record| record.id)
            .collect();
        idle.choose(&mut rand::thread_rng()).copied()
    }

    /// Claim the lowest free slot if the pool has room for another worker.
    pub(crate) fn reserve_slot(&mut self, capacity: usize) -> Option<WorkerId> {
        if self.records.len() + self.reserved.len() >= capacity {
            return None;
        }
        let id = (0..capacity)
            .map(WorkerId::new)
            .find(|id| !self.records.contains_key(id) && !self.reserved.contains(id))?;
        self.reserved.insert(id);
        Some(id)
    }

    /// Record a launched worker in a reserved slot.
    pub(crate) fn insert(&mut self, id: WorkerId, worker: Arc<W>, leased: bool) {
        self.reserved.remove(&id);
        let mut record = WorkerRecord::new(id, worker);
        record.leased = leased;
        self.records.insert(id, record);
    }

    /// Reverse lookup from endpoint to worker id.
    pub(crate) fn find_by_endpoint(&self, endpoint: &str) -> Option<WorkerId> {
        self.records
            .values()
            .find(|record| record.endpoint == endpoint)
            .map(|record| record.id)
    }

    /// End a lease on `id`. A second release of the same lease is a no-op.
    pub(crate) fn release(&mut self, id: WorkerId) {
        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        if !record.leased {
            return;
        }
        record.leased = false;
        if !record.retiring {
            self.make_available(id);
        }
    }

    /// Give a free worker to the head waiter, or leave it idle.
    pub(crate) fn make_available(&mut self, id: WorkerId) {
        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        if record.is_busy() {
            return;
        }
        record.leased = true;
        if let Some(unclaimed) = self.waiters.hand_off(id) {
            if let Some(record) = self.records.get_mut(&unclaimed) {
                record.leased = false;
            }
        }
    }

    pub(crate) fn busy_count(&self) -> usize {
        self.records.values().filter(|record| record.is_busy()).count()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::WorkerLauncher;
    use crate::launcher::mock::{MockLauncher, MockWorker};

    fn registry_with(n: usize) -> Registry<MockWorker> {
        let launcher = MockLauncher::new();
        let mut registry = Registry::new();
        for _ in 0..n {
            let id = registry.reserve_slot(n).unwrap();
            let worker = Arc::new(launcher.launch(&id).unwrap());
            registry.insert(id, worker, false);
        }
        registry
    }

    /// Verifies that new records start idle with one use.
    #[test]
    fn test_new_record_defaults() {
        let registry = registry_with(3);

        assert_eq!(registry.records.len(), 3);
        for record in registry.records.values() {
            assert_eq!(record.usage_count, 1);
            assert!(!record.is_busy());
            assert!(record.retirement.is_none());
        }
    }

    /// Verifies that only idle records are picked.
    #[test]
    fn test_pick_idle_skips_busy() {
        let mut registry = registry_with(2);
        registry.records.get_mut(&WorkerId::new(0)).unwrap().leased = true;

        for _ in 0..20 {
            assert_eq!(registry.pick_idle(), Some(WorkerId::new(1)));
        }

        registry.records.get_mut(&WorkerId::new(1)).unwrap().retiring = true;
        assert_eq!(registry.pick_idle(), None);
    }

    /// Verifies that idle picks spread evenly over every idle record.
    #[test]
    fn test_pick_idle_is_uniform() {
        let registry = registry_with(3);
        let mut picks: BTreeMap<WorkerId, usize> = BTreeMap::new();

        for _ in 0..3000 {
            *picks.entry(registry.pick_idle().unwrap()).or_default() += 1;
        }

        assert_eq!(picks.len(), 3);
        for (id, count) in picks {
            assert!((800..1200).contains(&count), "{} picked {} times", id, count);
        }
    }

    /// Verifies that slots are reserved lowest-first and bounded by capacity.
    #[test]
    fn test_reserve_slot() {
        let mut registry = registry_with(0);

        assert_eq!(registry.reserve_slot(2), Some(WorkerId::new(0)));
        assert_eq!(registry.reserve_slot(2), Some(WorkerId::new(1)));
        assert_eq!(registry.reserve_slot(2), None);
    }

    /// Verifies endpoint reverse lookup.
    #[test]
    fn test_find_by_endpoint() {
        let registry = registry_with(2);
        let endpoint = registry.records[&WorkerId::new(1)].endpoint.clone();

        assert_eq!(registry.find_by_endpoint(&endpoint), Some(WorkerId::new(1)));
        assert_eq!(registry.find_by_endpoint("mock://gone"), None);
    }

    /// Verifies that release hands the worker to the head waiter.
    #[test]
    fn test_release_hands_off() {
        let mut registry = registry_with(1);
        let id = WorkerId::new(0);
        registry.records.get_mut(&id).unwrap().leased = true;
        let (_ticket, mut rx) = registry.waiters.enqueue();

        registry.release(id);

        assert_eq!(rx.try_recv().unwrap().unwrap(), id);
        assert!(registry.records[&id].leased);
        assert!(registry.waiters.is_empty());
    }

    /// Verifies that release without waiters leaves the worker idle, once.
    #[test]
    fn test_release_is_idempotent() {
        let mut registry = registry_with(1);
        let id = WorkerId::new(0);
        registry.records.get_mut(&id).unwrap().leased = true;

        registry.release(id);
        registry.release(id);

        assert!(!registry.records[&id].is_busy());
        assert_eq!(registry.busy_count(), 0);
    }

    /// Verifies that a retiring worker is not handed out on release.
    #[test]
    fn test_release_while_retiring() {
        let mut registry = registry_with(1);
        let id = WorkerId::new(0);
        {
            let record = registry.records.get_mut(&id).unwrap();
            record.leased = true;
            record.retiring = true;
        }
        let (_ticket, mut rx) = registry.waiters.enqueue();

        registry.release(id);

        assert!(rx.try_recv().is_err());
        assert!(registry.records[&id].is_busy());
    }
}
