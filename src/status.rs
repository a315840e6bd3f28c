//! Read-only snapshots of pool health.
//!
//! [`PoolStatus`] describes the worker pool and [`ContextPoolStatus`] the
//! page-level sub-pool. Taking a snapshot never changes pool state, so two
//! snapshots with no activity in between agree on everything except uptime.

#[cfg(feature = "serde")]
use serde::Serialize;

/// Snapshot of one worker record.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct WorkerStatus {
    /// Stable slot id, e.g. `worker-0`.
    pub id: String,
    /// Endpoint of the current process.
    pub endpoint: String,
    /// Leased, or being relaunched by the pool.
    pub busy: bool,
    /// Leases served by the current process, counting its launch.
    pub usage_count: u64,
    /// A deferred retirement is scheduled.
    pub retirement_pending: bool,
    /// Seconds since the current process was launched.
    pub age_seconds: u64,
}

/// Snapshot of the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PoolStatus {
    /// Maximum number of workers.
    pub capacity: usize,
    /// Workers currently leased or being relaunched.
    pub busy_count: usize,
    /// Callers waiting for a worker.
    pub queue_depth: usize,
    /// Launches in flight for new slots.
    pub launching: usize,
    /// Leases a worker serves before retirement.
    pub usage_budget: u64,
    /// Seconds since the pool was built.
    pub uptime_seconds: u64,
    /// Per-worker detail, ordered by id.
    pub workers: Vec<WorkerStatus>,
}

impl PoolStatus {
    /// Number of registered workers.
    #[inline]
    pub fn total(&self) -> usize {
        self.workers.len()
    }

    /// Number of registered workers not currently busy.
    #[inline]
    pub fn idle_count(&self) -> usize {
        self.workers.len().saturating_sub(self.busy_count)
    }

    /// Whether an acquire right now would be served without waiting.
    #[inline]
    pub fn has_idle(&self) -> bool {
        self.queue_depth == 0 && self.idle_count() > 0
    }
}

impl std::fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PoolStatus {{ workers: {}/{}, busy: {}, queued: {} }}",
            self.total(),
            self.capacity,
            self.busy_count,
            self.queue_depth
        )
    }
}

/// Snapshot of the context pool.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct ContextPoolStatus {
    /// Endpoint of the hosting worker, once launched.
    pub worker_endpoint: Option<String>,
    /// Contexts kept alive even when idle.
    pub min_contexts: usize,
    /// Maximum number of live contexts.
    pub max_contexts: usize,
    /// Contexts currently open.
    pub live: usize,
    /// Contexts currently leased.
    pub busy: usize,
    /// Callers waiting for a context.
    pub queue_depth: usize,
    /// Seconds since the pool was built.
    pub uptime_seconds: u64,
}

impl std::fmt::Display for ContextPoolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ContextPoolStatus {{ live: {} ({}..={}), busy: {}, queued: {} }}",
            self.live, self.min_contexts, self.max_contexts, self.busy, self.queue_depth
        )
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(id: usize, busy: bool) -> WorkerStatus {
        WorkerStatus {
            id: format!("worker-{}", id),
            endpoint: format!("mock://worker-{}/{}", id, id),
            busy,
            usage_count: 1,
            retirement_pending: false,
            age_seconds: 0,
        }
    }

    fn status(workers: Vec<WorkerStatus>, queue_depth: usize) -> PoolStatus {
        PoolStatus {
            capacity: 3,
            busy_count: workers.iter().filter(|w| w.busy).count(),
            queue_depth,
            launching: 0,
            usage_budget: 1000,
            uptime_seconds: 5,
            workers,
        }
    }

    #[test]
    fn test_idle_count() {
        let s = status(vec![worker(0, true), worker(1, false)], 0);
        assert_eq!(s.total(), 2);
        assert_eq!(s.idle_count(), 1);
        assert!(s.has_idle());
    }

    /// Verifies that queued callers mean nothing is free for newcomers.
    #[test]
    fn test_has_idle_with_queue() {
        let s = status(vec![worker(0, false)], 2);
        assert!(!s.has_idle());
    }

    #[test]
    fn test_display() {
        let s = status(vec![worker(0, true), worker(1, false)], 4);
        assert_eq!(s.to_string(), "PoolStatus { workers: 2/3, busy: 1, queued: 4 }");

        let c = ContextPoolStatus {
            worker_endpoint: None,
            min_contexts: 2,
            max_contexts: 8,
            live: 3,
            busy: 1,
            queue_depth: 0,
            uptime_seconds: 0,
        };
        assert_eq!(c.to_string(), "ContextPoolStatus { live: 3 (2..=8), busy: 1, queued: 0 }");
    }
}
