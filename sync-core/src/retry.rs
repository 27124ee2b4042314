//! Push retry queue for tasksync.
//!
//! When pushing merged state to the remote fails after a successful local
//! commit, the local side is already durable but the remote is stale. The
//! snapshot goes into this queue and is retried later with capped
//! exponential backoff.
//!
//! Snapshots flow through the queue in this order:
//! 1. `enqueue()` - add a failed snapshot (a newer one of the same kind
//!    replaces it)
//! 2. `take_due()` - remove due snapshots from the queue, move to in-flight
//! 3. `ack()` - drop from in-flight (push confirmed)
//!
//! If the retry fails, call `nack()` to reschedule it or give up.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tasksync_types::{EntityKind, Project, Task};

/// Default number of attempts before a snapshot is dropped.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Merged state awaiting a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushPayload {
    /// Full merged task collection.
    Tasks(Vec<Task>),
    /// Full merged project collection.
    Projects(Vec<Project>),
}

impl PushPayload {
    /// Entity kind carried by this payload.
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Tasks(_) => EntityKind::Task,
            Self::Projects(_) => EntityKind::Project,
        }
    }

    /// Number of entities in the payload.
    pub fn len(&self) -> usize {
        match self {
            Self::Tasks(tasks) => tasks.len(),
            Self::Projects(projects) => projects.len(),
        }
    }

    /// Check if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A snapshot waiting to be pushed again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPush {
    /// The snapshot.
    pub payload: PushPayload,
    /// Failed attempts so far.
    pub attempts: u32,
    /// Earliest instant for the next attempt.
    pub next_attempt_at: DateTime<Utc>,
}

impl PendingPush {
    /// Entity kind of the snapshot.
    pub fn kind(&self) -> EntityKind {
        self.payload.kind()
    }

    /// Whether the next attempt may run at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_attempt_at
    }
}

/// What happened to a snapshot after a failed push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Rescheduled.
    Scheduled {
        /// Failed attempts so far.
        attempt: u32,
        /// Delay before the next attempt.
        retry_in: Duration,
    },
    /// Out of attempts; the snapshot was discarded.
    Dropped {
        /// Attempts made.
        attempts: u32,
    },
    /// A newer snapshot of the same kind is already queued.
    Superseded,
}

/// Retry queue holding at most one snapshot per entity kind.
#[derive(Debug)]
pub struct PushQueue {
    /// Attempts before a snapshot is dropped.
    max_attempts: u32,
    /// Snapshots waiting for their next attempt.
    queue: Vec<PendingPush>,
    /// Snapshots taken for a retry but not yet acknowledged.
    in_flight: HashMap<EntityKind, PendingPush>,
}

impl PushQueue {
    /// Create a new queue that gives up after `max_attempts` failures.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            queue: Vec::new(),
            in_flight: HashMap::new(),
        }
    }

    /// Queue a snapshot whose first push just failed.
    ///
    /// A queued snapshot of the same kind is replaced; the newer merged
    /// state is a superset of what the older one would have delivered.
    pub fn enqueue(&mut self, payload: PushPayload, now: DateTime<Utc>) -> RetryOutcome {
        let kind = payload.kind();
        self.queue.retain(|p| p.kind() != kind);
        self.schedule(payload, 1, now)
    }

    /// Remove and return every snapshot due at `now`.
    ///
    /// The snapshots move to in-flight until acknowledged.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<PendingPush> {
        let (due, waiting): (Vec<_>, Vec<_>) =
            self.queue.drain(..).partition(|p| p.is_due(now));
        self.queue = waiting;
        for pending in &due {
            self.in_flight.insert(pending.kind(), pending.clone());
        }
        due
    }

    /// Acknowledge a successful retry.
    pub fn ack(&mut self, kind: EntityKind) {
        self.in_flight.remove(&kind);
    }

    /// Report a failed retry.
    pub fn nack(&mut self, kind: EntityKind, now: DateTime<Utc>) -> RetryOutcome {
        let Some(pending) = self.in_flight.remove(&kind) else {
            return RetryOutcome::Superseded;
        };
        if self.queue.iter().any(|p| p.kind() == kind) {
            return RetryOutcome::Superseded;
        }
        self.schedule(pending.payload, pending.attempts.saturating_add(1), now)
    }

    /// Drop the snapshot for `kind`, queued or in flight, because newer
    /// state was delivered. A later `nack` for it reports `Superseded`.
    /// Returns whether there was one.
    pub fn discard(&mut self, kind: EntityKind) -> bool {
        let before = self.queue.len();
        self.queue.retain(|p| p.kind() != kind);
        let in_flight = self.in_flight.remove(&kind).is_some();
        self.queue.len() != before || in_flight
    }

    /// Number of queued snapshots (not including in-flight).
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of in-flight snapshots.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Queued snapshot for `kind`, if any.
    pub fn pending(&self, kind: EntityKind) -> Option<&PendingPush> {
        self.queue.iter().find(|p| p.kind() == kind)
    }

    /// Earliest next-attempt instant across the queue.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.queue.iter().map(|p| p.next_attempt_at).min()
    }

    fn schedule(&mut self, payload: PushPayload, attempts: u32, now: DateTime<Utc>) -> RetryOutcome {
        if attempts >= self.max_attempts {
            return RetryOutcome::Dropped { attempts };
        }
        let retry_in = backoff_delay(attempts);
        let next_attempt_at = now
            + chrono::Duration::milliseconds(i64::try_from(retry_in.as_millis()).unwrap_or(i64::MAX));
        self.queue.push(PendingPush {
            payload,
            attempts,
            next_attempt_at,
        });
        RetryOutcome::Scheduled {
            attempt: attempts,
            retry_in,
        }
    }
}

impl Default for PushQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

/// Calculate retry backoff with jitter.
///
/// Uses exponential backoff with random jitter so many devices that lost
/// the remote at once do not retry in lockstep.
///
/// Formula: min(30s, 2^attempt seconds) + random(0..5000ms)
pub fn backoff_delay(attempt: u32) -> Duration {
    // Base: 2^attempt seconds, capped at 30 seconds
    let base_secs = 2u64.pow(attempt.min(5)).min(30);
    Duration::from_secs(base_secs) + Duration::from_millis(random_jitter_ms())
}

/// Random jitter between 0 and 5000 milliseconds.
///
/// Falls back to no jitter if the OS random source is unavailable.
fn random_jitter_ms() -> u64 {
    let mut bytes = [0u8; 8];
    match getrandom::getrandom(&mut bytes) {
        Ok(()) => u64::from_le_bytes(bytes) % 5001,
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_750_000_000 + secs, 0).unwrap()
    }

    fn tasks(names: &[&str]) -> PushPayload {
        PushPayload::Tasks(names.iter().map(|n| Task::new(n, at(0)).unwrap()).collect())
    }

    fn projects() -> PushPayload {
        PushPayload::Projects(vec![Project::new("Work", at(0)).unwrap()])
    }

    // ===========================================
    // Queueing
    // ===========================================

    #[test]
    fn enqueue_schedules_first_retry() {
        let mut queue = PushQueue::new(5);

        let outcome = queue.enqueue(tasks(&["a"]), at(0));

        assert!(matches!(outcome, RetryOutcome::Scheduled { attempt: 1, .. }));
        assert_eq!(queue.len(), 1);
        let pending = queue.pending(EntityKind::Task).unwrap();
        assert!(pending.next_attempt_at >= at(2));
        assert!(pending.next_attempt_at <= at(7));
    }

    #[test]
    fn newer_snapshot_supersedes_older() {
        let mut queue = PushQueue::new(5);
        queue.enqueue(tasks(&["old"]), at(0));
        queue.enqueue(tasks(&["new", "newer"]), at(1));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending(EntityKind::Task).unwrap().payload.len(), 2);
    }

    #[test]
    fn one_snapshot_per_kind() {
        let mut queue = PushQueue::new(5);
        queue.enqueue(tasks(&["a"]), at(0));
        queue.enqueue(projects(), at(0));

        assert_eq!(queue.len(), 2);
        assert!(queue.pending(EntityKind::Project).is_some());
    }

    #[test]
    fn nothing_due_before_backoff() {
        let mut queue = PushQueue::new(5);
        queue.enqueue(tasks(&["a"]), at(0));

        assert!(queue.take_due(at(1)).is_empty());
        assert_eq!(queue.len(), 1);

        let due = queue.take_due(at(60));
        assert_eq!(due.len(), 1);
        assert!(queue.is_empty());
        assert_eq!(queue.in_flight_count(), 1);
    }

    // ===========================================
    // Ack / nack
    // ===========================================

    #[test]
    fn ack_clears_in_flight() {
        let mut queue = PushQueue::new(5);
        queue.enqueue(tasks(&["a"]), at(0));
        queue.take_due(at(60));

        queue.ack(EntityKind::Task);

        assert_eq!(queue.in_flight_count(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn nack_reschedules_with_more_attempts() {
        let mut queue = PushQueue::new(5);
        queue.enqueue(tasks(&["a"]), at(0));
        queue.take_due(at(60));

        let outcome = queue.nack(EntityKind::Task, at(60));

        assert!(matches!(outcome, RetryOutcome::Scheduled { attempt: 2, .. }));
        let pending = queue.pending(EntityKind::Task).unwrap();
        assert_eq!(pending.attempts, 2);
        assert!(pending.next_attempt_at >= at(64));
    }

    #[test]
    fn nack_gives_up_after_max_attempts() {
        let mut queue = PushQueue::new(3);
        queue.enqueue(tasks(&["a"]), at(0));

        let mut now = 0;
        let mut last = None;
        for _ in 0..3 {
            now += 60;
            if queue.take_due(at(now)).is_empty() {
                break;
            }
            last = Some(queue.nack(EntityKind::Task, at(now)));
        }

        assert_eq!(last, Some(RetryOutcome::Dropped { attempts: 3 }));
        assert!(queue.is_empty());
        assert_eq!(queue.in_flight_count(), 0);
    }

    #[test]
    fn nack_yields_to_newer_snapshot() {
        let mut queue = PushQueue::new(5);
        queue.enqueue(tasks(&["old"]), at(0));
        queue.take_due(at(60));
        queue.enqueue(tasks(&["new"]), at(61));

        let outcome = queue.nack(EntityKind::Task, at(62));

        assert_eq!(outcome, RetryOutcome::Superseded);
        assert_eq!(queue.len(), 1);
        let PushPayload::Tasks(pending) = &queue.pending(EntityKind::Task).unwrap().payload else {
            panic!("expected tasks");
        };
        assert_eq!(pending[0].name, "new");
    }

    #[test]
    fn discard_removes_only_that_kind() {
        let mut queue = PushQueue::new(5);
        queue.enqueue(tasks(&["a"]), at(0));
        queue.enqueue(projects(), at(0));

        assert!(queue.discard(EntityKind::Task));
        assert!(!queue.discard(EntityKind::Task));
        assert_eq!(queue.len(), 1);
        assert!(queue.pending(EntityKind::Project).is_some());
    }

    #[test]
    fn single_attempt_budget_drops_immediately() {
        let mut queue = PushQueue::new(1);
        let outcome = queue.enqueue(projects(), at(0));
        assert_eq!(outcome, RetryOutcome::Dropped { attempts: 1 });
        assert!(queue.is_empty());
    }

    #[test]
    fn next_due_is_earliest() {
        let mut queue = PushQueue::new(5);
        assert!(queue.next_due().is_none());
        queue.enqueue(tasks(&["a"]), at(100));
        queue.enqueue(projects(), at(0));
        assert!(queue.next_due().unwrap() < at(100));
    }

    #[test]
    fn discard_supersedes_in_flight_snapshot() {
        let mut queue = PushQueue::default();
        queue.enqueue(tasks(&["old"]), at(0));
        assert_eq!(queue.take_due(at(60)).len(), 1);

        assert!(queue.discard(EntityKind::Task));

        assert_eq!(queue.in_flight_count(), 0);
        assert_eq!(queue.nack(EntityKind::Task, at(61)), RetryOutcome::Superseded);
        assert!(queue.is_empty());
    }

    #[test]
    fn backoff_increases_with_attempt() {
        let delay1 = backoff_delay(1);
        let delay3 = backoff_delay(3);

        assert!(delay1 >= Duration::from_secs(2));
        assert!(delay1 <= Duration::from_millis(7000));
        assert!(delay3 >= Duration::from_secs(8));
    }

    #[test]
    fn backoff_is_capped() {
        let delay = backoff_delay(20);
        assert!(delay >= Duration::from_secs(30));
        assert!(delay <= Duration::from_millis(35_000));
    }
}
