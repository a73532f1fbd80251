//! Per-owner insert batching.
//!
//! Bursts of inserts are coalesced into bounded batches so the graph pays
//! its mutation cost once per batch instead of once per call. Each owner
//! gets a strict FIFO queue; queues for different owners are independent
//! and carry no cross-owner ordering guarantee.
//!
//! A batch becomes due when it reaches `max_batch` entries or its oldest
//! entry has waited longer than `max_delay`. Draining hands the entries
//! back in arrival order for a single construction pass.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::metadata::MemoryMetadata;

/// Batching thresholds.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Entries that force a drain regardless of age.
    pub max_batch: usize,
    /// Oldest-entry age that forces a drain regardless of count.
    pub max_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch: 64,
            max_delay: Duration::from_millis(200),
        }
    }
}

/// One queued insert, waiting for its batch to drain.
#[derive(Debug, Clone)]
pub struct PendingInsert {
    pub id: u64,
    pub embedding: Vec<f32>,
    pub metadata: MemoryMetadata,
    pub enqueued_at: Instant,
}

/// Coalesces inserts per owner into bounded FIFO batches.
#[derive(Debug, Default)]
pub struct BatchScheduler {
    config: BatchConfig,
    queues: HashMap<String, VecDeque<PendingInsert>>,
}

impl BatchScheduler {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            queues: HashMap::new(),
        }
    }

    /// Append to the owner's queue. Returns true when the batch is ready
    /// to drain (count threshold reached).
    pub fn enqueue(
        &mut self,
        owner: &str,
        id: u64,
        embedding: Vec<f32>,
        metadata: MemoryMetadata,
    ) -> bool {
        let queue = self.queues.entry(owner.to_string()).or_default();
        queue.push_back(PendingInsert {
            id,
            embedding,
            metadata,
            enqueued_at: Instant::now(),
        });
        queue.len() >= self.config.max_batch
    }

    /// Whether the owner's batch is due (count or age threshold).
    pub fn ready(&self, owner: &str, now: Instant) -> bool {
        let Some(queue) = self.queues.get(owner) else {
            return false;
        };
        if queue.len() >= self.config.max_batch {
            return true;
        }
        queue
            .front()
            .is_some_and(|p| now.duration_since(p.enqueued_at) >= self.config.max_delay)
    }

    /// Remove and return the owner's pending inserts, in arrival order.
    pub fn drain(&mut self, owner: &str) -> Vec<PendingInsert> {
        let drained: Vec<PendingInsert> = self
            .queues
            .remove(owner)
            .map(|q| q.into_iter().collect())
            .unwrap_or_default();
        if !drained.is_empty() {
            debug!(owner, batch = drained.len(), "draining insert batch");
        }
        drained
    }

    /// Drain every owner whose batch is due.
    pub fn drain_due(&mut self, now: Instant) -> Vec<(String, Vec<PendingInsert>)> {
        let due: Vec<String> = self
            .queues
            .keys()
            .filter(|owner| self.ready(owner.as_str(), now))
            .cloned()
            .collect();
        due.into_iter()
            .map(|owner| {
                let batch = self.drain(&owner);
                (owner, batch)
            })
            .collect()
    }

    /// Pending inserts for an owner.
    pub fn pending(&self, owner: &str) -> usize {
        self.queues.get(owner).map_or(0, VecDeque::len)
    }

    /// Drop an owner's queue without applying it.
    pub fn forget(&mut self, owner: &str) {
        self.queues.remove(owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64) -> (u64, Vec<f32>, MemoryMetadata) {
        (id, vec![id as f32, 0.0], MemoryMetadata::default())
    }

    #[test]
    fn fifo_order_is_preserved_per_owner() {
        let mut sched = BatchScheduler::new(BatchConfig::default());
        for i in 0..10 {
            let (id, v, m) = entry(i);
            sched.enqueue("alice", id, v, m);
        }
        let drained = sched.drain("alice");
        let ids: Vec<u64> = drained.iter().map(|p| p.id).collect();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
        assert_eq!(sched.pending("alice"), 0);
    }

    #[test]
    fn count_threshold_marks_batch_ready() {
        let mut sched = BatchScheduler::new(BatchConfig {
            max_batch: 3,
            max_delay: Duration::from_secs(3600),
        });
        let (id, v, m) = entry(0);
        assert!(!sched.enqueue("o", id, v, m));
        let (id, v, m) = entry(1);
        assert!(!sched.enqueue("o", id, v, m));
        let (id, v, m) = entry(2);
        assert!(sched.enqueue("o", id, v, m));
        assert!(sched.ready("o", Instant::now()));
    }

    #[test]
    fn age_threshold_marks_batch_ready() {
        let mut sched = BatchScheduler::new(BatchConfig {
            max_batch: 1_000,
            max_delay: Duration::from_millis(50),
        });
        let (id, v, m) = entry(0);
        sched.enqueue("o", id, v, m);
        assert!(!sched.ready("o", Instant::now()));
        assert!(sched.ready("o", Instant::now() + Duration::from_millis(60)));
    }

    #[test]
    fn owners_are_independent() {
        let mut sched = BatchScheduler::new(BatchConfig::default());
        let (id, v, m) = entry(1);
        sched.enqueue("a", id, v, m);
        let (id, v, m) = entry(2);
        sched.enqueue("b", id, v, m);

        assert_eq!(sched.drain("a").len(), 1);
        assert_eq!(sched.pending("b"), 1);
    }

    #[test]
    fn drain_due_only_touches_due_owners() {
        let mut sched = BatchScheduler::new(BatchConfig {
            max_batch: 2,
            max_delay: Duration::from_secs(3600),
        });
        let (id, v, m) = entry(1);
        sched.enqueue("full", id, v, m);
        let (id, v, m) = entry(2);
        sched.enqueue("full", id, v, m);
        let (id, v, m) = entry(3);
        sched.enqueue("partial", id, v, m);

        let drained = sched.drain_due(Instant::now());
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0, "full");
        assert_eq!(sched.pending("partial"), 1);
    }
}
