//! SyncCoordinator - offline-first sync between a local and a remote store.
//!
//! # Architecture
//!
//! The coordinator uses the pure state machine from sync-core for the
//! Idle/Syncing lifecycle and interprets its actions to perform the actual
//! I/O through the data source traits.
//!
//! ```text
//! sync_now / auto-sync / network → SyncCoordinator → LocalDataSource
//!                                        ↓         ↘ RemoteDataSource
//!                               sync-core (state, conflicts, merge)
//! ```
//!
//! # Cycle
//!
//! 1. Read the remote change mark seen last time, and the current one
//! 2. Fetch remote tasks and projects changed since, concurrently
//! 3. Load local tasks and projects
//! 4. Detect conflicts
//! 5. Resolve them on the remote
//! 6. Merge by identity, applying resolutions
//! 7. Persist in one local transaction, recording the current mark
//! 8. Push merged state (failures go to the retry queue)
//! 9. Clear the cache
//! 10. Build the [`SyncResult`]
//! 11. Broadcast [`SyncEvent::SyncCompleted`]
//!
//! If the local store is written by someone else between steps 3 and 7,
//! the commit is refused and steps 3 to 7 run again on the new state.
//!
//! The guard transition happens under a lock before the cycle is spawned
//! on its own task, so only one cycle runs at a time and dropping the
//! caller's future never leaves the coordinator stuck in `Syncing`.
//! Pushes from the cycle and from the retry queue take turns on one lock,
//! so an older snapshot never lands after a newer one.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncPhase};
use crate::source::{write_atomically, LocalDataSource, LocalWrite, RemoteDataSource, SourceError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tasksync_cache::Cache;
use tasksync_core::{
    detect_project_conflicts, detect_task_conflicts, merge_entities, Action, Clock, Event,
    MergeOutcome, NetworkStatus, PushPayload, PushQueue, RejectReason, RetryOutcome, SyncEvent, SyncState,
    SyncTrigger,
};
use tasksync_types::{EntityKind, Project, SyncConflict, SyncResult, Task};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Capacity of the event channel; slow subscribers see `Lagged`.
const EVENT_CAPACITY: usize = 64;

/// Merge-and-persist attempts when the local store keeps changing underneath.
const PERSIST_ATTEMPTS: u32 = 3;

/// Offline-first sync coordinator.
///
/// Cheap to clone; clones share one state machine, retry queue and event
/// channel.
pub struct SyncCoordinator<L, R> {
    inner: Arc<Inner<L, R>>,
}

impl<L, R> Clone for SyncCoordinator<L, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<L, R> {
    config: SyncConfig,
    local: Arc<L>,
    remote: Arc<R>,
    cache: Arc<dyn Cache>,
    clock: Arc<dyn Clock>,
    state: Mutex<SyncState>,
    push_queue: Mutex<PushQueue>,
    /// Held for every push to the remote.
    push_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SyncEvent>,
    /// Bumped by `cancel_sync`; running cycles watch for changes.
    cancel: watch::Sender<u64>,
    background: Mutex<Background>,
}

#[derive(Default)]
struct Background {
    auto_sync: Option<JoinHandle<()>>,
    network: Option<JoinHandle<()>>,
}

impl Background {
    fn stop_all(&mut self) {
        for handle in [self.auto_sync.take(), self.network.take()].into_iter().flatten() {
            handle.abort();
        }
    }
}

impl Drop for Background {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// What a state machine step asked for.
enum Transition {
    Started(SyncTrigger),
    Rejected(RejectReason),
    Unchanged,
}

impl<L, R> SyncCoordinator<L, R>
where
    L: LocalDataSource + 'static,
    R: RemoteDataSource + 'static,
{
    /// Create a coordinator in the Idle state.
    pub fn new(
        config: SyncConfig,
        local: Arc<L>,
        remote: Arc<R>,
        cache: Arc<dyn Cache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (cancel, _) = watch::channel(0);
        let push_queue = PushQueue::new(config.push_max_attempts);
        Self {
            inner: Arc::new(Inner {
                config,
                local,
                remote,
                cache,
                clock,
                state: Mutex::new(SyncState::new()),
                push_queue: Mutex::new(push_queue),
                push_lock: tokio::sync::Mutex::new(()),
                events,
                cancel,
                background: Mutex::new(Background::default()),
            }),
        }
    }

    /// Coordinator configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Subscribe to sync events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SyncState {
        *self.inner.state.lock()
    }

    /// Check if a cycle is running.
    pub fn is_syncing(&self) -> bool {
        self.inner.state.lock().is_syncing()
    }

    /// Snapshots waiting to be pushed again (queued or in flight).
    pub fn pending_push_count(&self) -> usize {
        let queue = self.inner.push_queue.lock();
        queue.len() + queue.in_flight_count()
    }

    /// Check if the auto-sync timer is running.
    pub fn is_auto_sync_enabled(&self) -> bool {
        self.inner
            .background
            .lock()
            .auto_sync
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Run one sync cycle and wait for its result.
    ///
    /// Fails immediately with [`SyncError::AlreadyInProgress`] while another
    /// cycle runs, and with [`SyncError::RemoteUnavailable`] if the remote
    /// reports itself unreachable. The coordinator is Idle again once this
    /// returns, whatever the outcome.
    pub async fn sync_now(&self) -> Result<SyncResult, SyncError> {
        self.request(SyncTrigger::Manual).await
    }

    /// Start the background work the configuration asks for.
    ///
    /// Enables the auto-sync timer when `auto_sync` is set. Must be called
    /// inside a tokio runtime.
    pub fn start(&self) {
        if self.inner.config.auto_sync {
            self.set_auto_sync_enabled(true);
        } else {
            tracing::debug!("Auto-sync disabled by configuration");
        }
    }

    /// Start or stop the periodic auto-sync timer.
    ///
    /// Each tick retries due pushes, then runs a silent cycle whose errors
    /// are logged, never returned. Must be called inside a tokio runtime.
    pub fn set_auto_sync_enabled(&self, enabled: bool) {
        let mut background = self.inner.background.lock();
        if enabled {
            if background.auto_sync.as_ref().is_some_and(|h| !h.is_finished()) {
                return;
            }
            background.auto_sync = Some(spawn_auto_sync(
                Arc::downgrade(&self.inner),
                self.inner.config.interval(),
            ));
        } else if let Some(handle) = background.auto_sync.take() {
            handle.abort();
            tracing::info!("Auto-sync stopped");
        }
    }

    /// React to a network change.
    ///
    /// When the network is online, the remote is available and no cycle is
    /// running, a silent cycle runs and its outcome is returned. Otherwise
    /// nothing happens and `None` is returned.
    pub async fn on_network_status_changed(
        &self,
        status: NetworkStatus,
    ) -> Option<Result<SyncResult, SyncError>> {
        if !status.is_online() {
            tracing::debug!("Network offline, nothing to do");
            return None;
        }
        if self.is_syncing() {
            tracing::debug!("Network restored during a running sync");
            return None;
        }
        let remote_available = self.remote_available().await;
        match self.apply(Event::NetworkChanged {
            status,
            remote_available,
        }) {
            Transition::Started(trigger) => Some(self.run_in_background(trigger).await),
            Transition::Rejected(_) | Transition::Unchanged => {
                tracing::debug!(remote_available, "Network restored, no sync started");
                None
            }
        }
    }

    /// Follow a network status channel, syncing whenever it goes online.
    ///
    /// Replaces any previous watcher. Must be called inside a tokio runtime.
    pub fn watch_network(&self, mut status: watch::Receiver<NetworkStatus>) {
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut last = *status.borrow_and_update();
            while status.changed().await.is_ok() {
                let current = *status.borrow_and_update();
                let came_online = current.is_online() && !last.is_online();
                last = current;
                if !came_online {
                    continue;
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                SyncCoordinator { inner }
                    .on_network_status_changed(current)
                    .await;
            }
            tracing::debug!("Network watcher stopped");
        });

        if let Some(previous) = self.inner.background.lock().network.replace(handle) {
            previous.abort();
        }
    }

    /// Push every due snapshot from the retry queue.
    ///
    /// Returns how many were delivered. Skipped while a cycle runs or the
    /// remote is unavailable.
    pub async fn retry_pending_pushes(&self) -> usize {
        if self.is_syncing() {
            return 0;
        }
        let now = self.inner.clock.now();
        let any_due = self
            .inner
            .push_queue
            .lock()
            .next_due()
            .is_some_and(|at| at <= now);
        if !any_due {
            return 0;
        }
        if !self.remote_available().await {
            tracing::debug!("Remote unavailable, pending pushes keep waiting");
            return 0;
        }

        let _pushing = self.inner.push_lock.lock().await;
        // A cycle may have delivered newer state while we waited.
        let due = self.inner.push_queue.lock().take_due(now);
        let mut cancel = self.inner.cancel.subscribe();
        let mut delivered = 0;

        for pending in due {
            let kind = pending.kind();
            match self.push_payload(&pending.payload, &mut cancel).await {
                Ok(()) => {
                    self.inner.push_queue.lock().ack(kind);
                    tracing::info!("Delivered pending {} push after {} failed attempt(s)", kind, pending.attempts);
                    self.emit(SyncEvent::PushDelivered { kind });
                    delivered += 1;
                }
                Err(error) => {
                    let outcome = self.inner.push_queue.lock().nack(kind, self.inner.clock.now());
                    self.report_retry(kind, outcome, &error);
                }
            }
        }
        delivered
    }

    /// Cancel the remote call the running cycle is waiting on.
    ///
    /// A cycle that is already persisting finishes that step first.
    pub fn cancel_sync(&self) {
        self.inner
            .cancel
            .send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Stop the auto-sync timer and the network watcher, and cancel any
    /// running cycle.
    pub fn shutdown(&self) {
        self.inner.background.lock().stop_all();
        self.cancel_sync();
        tracing::info!("Sync coordinator shut down");
    }

    // ===========================================
    // Lifecycle
    // ===========================================

    async fn request(&self, trigger: SyncTrigger) -> Result<SyncResult, SyncError> {
        // Fail fast without asking the remote.
        if self.is_syncing() {
            return Err(SyncError::AlreadyInProgress);
        }
        let remote_available = self.remote_available().await;
        match self.apply(Event::SyncRequested {
            trigger,
            remote_available,
        }) {
            Transition::Started(trigger) => self.run_in_background(trigger).await,
            Transition::Rejected(RejectReason::AlreadyInProgress) => {
                Err(SyncError::AlreadyInProgress)
            }
            Transition::Rejected(RejectReason::RemoteUnavailable) => {
                Err(SyncError::RemoteUnavailable)
            }
            Transition::Unchanged => Err(SyncError::Internal(
                "sync request produced no transition".into(),
            )),
        }
    }

    /// Feed an event to the state machine under the lock and run its
    /// actions after releasing it.
    fn apply(&self, event: Event) -> Transition {
        let actions = {
            let mut state = self.inner.state.lock();
            let (next, actions) = (*state).on_event(event);
            *state = next;
            actions
        };

        let mut transition = Transition::Unchanged;
        for action in actions {
            match action {
                Action::StartCycle { trigger } => transition = Transition::Started(trigger),
                Action::Reject(reason) => transition = Transition::Rejected(reason),
                Action::EmitEvent(event) => self.emit(event),
            }
        }
        transition
    }

    async fn run_in_background(&self, trigger: SyncTrigger) -> Result<SyncResult, SyncError> {
        let coordinator = self.clone();
        let handle = tokio::spawn(async move {
            let mut guard = CycleGuard {
                coordinator: Some(coordinator.clone()),
                trigger,
            };
            let outcome = coordinator.run_cycle(trigger).await;
            guard.finish(&outcome);
            outcome
        });

        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(SyncError::Internal(format!("sync task failed: {e}"))),
        }
    }

    fn complete(&self, trigger: SyncTrigger, outcome: &Result<SyncResult, SyncError>) {
        let event = match outcome {
            Ok(result) => {
                tracing::info!(%trigger, "Sync completed: {}", result);
                Event::CycleSucceeded {
                    result: result.clone(),
                }
            }
            Err(e) => {
                if trigger.is_silent() {
                    tracing::warn!(%trigger, "Background sync failed: {}", e);
                } else {
                    tracing::debug!(%trigger, "Sync failed: {}", e);
                }
                Event::CycleFailed {
                    error: e.to_string(),
                }
            }
        };
        self.apply(event);
    }

    async fn auto_sync_tick(&self) {
        let delivered = self.retry_pending_pushes().await;
        if delivered > 0 {
            tracing::debug!(delivered, "Auto-sync delivered pending pushes");
        }
        match self.request(SyncTrigger::AutoSync).await {
            Ok(_) => {}
            Err(SyncError::AlreadyInProgress) => {
                tracing::debug!("Auto-sync skipped: sync already in progress")
            }
            Err(SyncError::RemoteUnavailable) => {
                tracing::debug!("Auto-sync skipped: remote unavailable")
            }
            // Logged when the cycle finished.
            Err(_) => {}
        }
    }

    // ===========================================
    // Cycle
    // ===========================================

    async fn run_cycle(&self, trigger: SyncTrigger) -> Result<SyncResult, SyncError> {
        let inner = &self.inner;
        let mut cancel = inner.cancel.subscribe();
        let started_at = inner.clock.now();
        tracing::debug!(%trigger, "Sync cycle started");

        // 1. Mark seen by the last sync, and the remote's current one.
        // Anything stamped after `mark` is fetched again next time.
        let since = inner
            .local
            .last_sync_timestamp()
            .await
            .map_err(SyncError::LocalRead)?;
        let mark = self
            .bounded(SyncPhase::Fetch, &mut cancel, inner.remote.change_mark())
            .await?
            .map_err(SyncError::Fetch)?;

        // 2. Remote changes, both kinds at once
        let (remote_tasks, remote_projects) = self
            .bounded(SyncPhase::Fetch, &mut cancel, async {
                tokio::try_join!(
                    inner.remote.fetch_tasks(since),
                    inner.remote.fetch_projects(since)
                )
            })
            .await?
            .map_err(SyncError::Fetch)?;
        tracing::debug!(
            tasks = remote_tasks.len(),
            projects = remote_projects.len(),
            "Fetched remote changes"
        );

        // 3-7, again if the local store moved underneath
        let mut attempt = 1;
        let merged = loop {
            match self
                .merge_and_persist(&remote_tasks, &remote_projects, mark, &mut cancel)
                .await
            {
                Err(SyncError::Persistence(SourceError::StaleWrite { .. }))
                    if attempt < PERSIST_ATTEMPTS =>
                {
                    tracing::debug!(attempt, "Local store changed during sync, merging again");
                    attempt += 1;
                }
                outcome => break outcome?,
            }
        };

        let mut result = SyncResult::empty(started_at);
        result.tasks_added = merged.tasks.added.len();
        result.tasks_updated = merged.tasks.updated.len();
        result.tasks_deleted = merged.tasks.deleted.len();
        result.projects_added = merged.projects.added.len();
        result.projects_updated = merged.projects.updated.len();
        result.projects_deleted = merged.projects.deleted.len();
        result.conflicts = merged.conflicts;

        // 8. Push, best-effort
        {
            let _pushing = inner.push_lock.lock().await;
            let tasks_deferred = self
                .push_or_defer(PushPayload::Tasks(merged.tasks.merged), &mut cancel)
                .await;
            let projects_deferred = self
                .push_or_defer(PushPayload::Projects(merged.projects.merged), &mut cancel)
                .await;
            result.push_deferred = tasks_deferred || projects_deferred;
        }

        // 9. Invalidate
        inner.cache.clear_all();

        // 10. Summary; 11 is emitted by the state machine
        result.completed_at = inner.clock.now();
        Ok(result)
    }

    /// Steps 3 to 7: load, detect, resolve, merge, persist.
    async fn merge_and_persist(
        &self,
        remote_tasks: &[Task],
        remote_projects: &[Project],
        mark: Option<DateTime<Utc>>,
        cancel: &mut watch::Receiver<u64>,
    ) -> Result<Merged, SyncError> {
        let inner = &self.inner;

        // 3. Local state, and the revision it belongs to
        let revision = inner.local.revision().await.map_err(SyncError::LocalRead)?;
        let (local_tasks, local_projects) =
            tokio::try_join!(inner.local.load_tasks(), inner.local.load_projects())
                .map_err(SyncError::LocalRead)?;

        // 4. Conflicts
        let mut conflicts = detect_task_conflicts(&local_tasks, remote_tasks);
        conflicts.extend(detect_project_conflicts(&local_projects, remote_projects));

        // 5. Resolution
        let resolutions = if conflicts.is_empty() {
            Vec::new()
        } else {
            tracing::debug!(count = conflicts.len(), strategy = %inner.config.strategy, "Resolving conflicts");
            self.bounded(
                SyncPhase::ResolveConflicts,
                cancel,
                inner.remote.resolve_conflicts(&conflicts, inner.config.strategy),
            )
            .await?
            .map_err(SyncError::ConflictResolution)?
        };

        // 6. Merge
        let tasks = merge_entities(&local_tasks, remote_tasks, &conflicts, &resolutions);
        let projects = merge_entities(&local_projects, remote_projects, &conflicts, &resolutions);
        let unmatched = tasks.unmatched_resolutions.len() + projects.unmatched_resolutions.len();
        if unmatched > 0 {
            tracing::warn!(unmatched, "Ignored resolutions that match no conflict");
        }

        // 7. Persist; not cancellable. A remote that never received
        // anything has no mark yet, so the next cycle fetches everything.
        write_atomically(
            inner.local.as_ref(),
            LocalWrite {
                tasks: Some(&tasks.merged),
                projects: Some(&projects.merged),
                synced_at: mark,
                based_on: Some(revision),
            },
        )
        .await
        .map_err(SyncError::Persistence)?;

        Ok(Merged {
            tasks,
            projects,
            conflicts,
        })
    }

    /// Bound a remote call by the configured timeout and by cancellation.
    ///
    /// The outer error is the timeout or cancellation; the inner one is the
    /// call's own failure.
    async fn bounded<T>(
        &self,
        phase: SyncPhase,
        cancel: &mut watch::Receiver<u64>,
        call: impl Future<Output = Result<T, SourceError>>,
    ) -> Result<Result<T, SourceError>, SyncError> {
        let limit = self.inner.config.remote_timeout();
        tokio::select! {
            biased;
            _ = cancel.changed() => Err(SyncError::Cancelled { phase }),
            outcome = tokio::time::timeout(limit, call) => {
                outcome.map_err(|_| SyncError::Timeout { phase, after: limit })
            }
        }
    }

    async fn push_payload(
        &self,
        payload: &PushPayload,
        cancel: &mut watch::Receiver<u64>,
    ) -> Result<(), String> {
        // Pushes upsert, so an empty collection changes nothing.
        if payload.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = payload.len(), "Pushing {}s", payload.kind());
        let remote = &self.inner.remote;
        let outcome = match payload {
            PushPayload::Tasks(tasks) => {
                self.bounded(SyncPhase::Push, cancel, remote.push_tasks(tasks))
                    .await
            }
            PushPayload::Projects(projects) => {
                self.bounded(SyncPhase::Push, cancel, remote.push_projects(projects))
                    .await
            }
        };
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Push a merged snapshot; on failure queue it for retry.
    ///
    /// Returns whether the snapshot is now waiting in the retry queue.
    async fn push_or_defer(&self, payload: PushPayload, cancel: &mut watch::Receiver<u64>) -> bool {
        let kind = payload.kind();
        match self.push_payload(&payload, cancel).await {
            Ok(()) => {
                // Anything still queued for this kind is older than what
                // the remote now holds.
                if self.inner.push_queue.lock().discard(kind) {
                    tracing::debug!("Discarded stale pending {} push", kind);
                }
                false
            }
            Err(error) => {
                let outcome = self
                    .inner
                    .push_queue
                    .lock()
                    .enqueue(payload, self.inner.clock.now());
                self.report_retry(kind, outcome, &error);
                matches!(outcome, RetryOutcome::Scheduled { .. })
            }
        }
    }

    fn report_retry(&self, kind: EntityKind, outcome: RetryOutcome, error: &str) {
        match outcome {
            RetryOutcome::Scheduled { attempt, retry_in } => {
                tracing::warn!(
                    "Push of {}s failed (attempt {}), retrying in {}s: {}",
                    kind,
                    attempt,
                    retry_in.as_secs(),
                    error
                );
                self.emit(SyncEvent::PushDeferred {
                    kind,
                    attempt,
                    retry_in,
                });
            }
            RetryOutcome::Dropped { attempts } => {
                tracing::error!(
                    "Dropping {} push after {} failed attempts: {}",
                    kind,
                    attempts,
                    error
                );
                self.emit(SyncEvent::PushDropped { kind, attempts });
            }
            RetryOutcome::Superseded => {
                tracing::debug!("Failed {} push superseded by a newer snapshot", kind);
            }
        }
    }

    async fn remote_available(&self) -> bool {
        let limit = self.inner.config.remote_timeout();
        match tokio::time::timeout(limit, self.inner.remote.is_available()).await {
            Ok(available) => available,
            Err(_) => {
                tracing::debug!("Remote availability check timed out");
                false
            }
        }
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

/// What steps 3 to 7 produced.
struct Merged {
    tasks: MergeOutcome<Task>,
    projects: MergeOutcome<Project>,
    conflicts: Vec<SyncConflict>,
}

/// Returns the coordinator to Idle if a cycle task ends without reporting,
/// e.g. on panic.
struct CycleGuard<L, R>
where
    L: LocalDataSource + 'static,
    R: RemoteDataSource + 'static,
{
    coordinator: Option<SyncCoordinator<L, R>>,
    trigger: SyncTrigger,
}

impl<L, R> CycleGuard<L, R>
where
    L: LocalDataSource + 'static,
    R: RemoteDataSource + 'static,
{
    fn finish(&mut self, outcome: &Result<SyncResult, SyncError>) {
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.complete(self.trigger, outcome);
        }
    }
}

impl<L, R> Drop for CycleGuard<L, R>
where
    L: LocalDataSource + 'static,
    R: RemoteDataSource + 'static,
{
    fn drop(&mut self) {
        if self.coordinator.is_some() {
            self.finish(&Err(SyncError::Internal("sync cycle aborted".into())));
        }
    }
}

/// Spawn the auto-sync timer.
///
/// The task holds a weak reference and stops once the coordinator is gone.
fn spawn_auto_sync<L, R>(inner: Weak<Inner<L, R>>, period: Duration) -> JoinHandle<()>
where
    L: LocalDataSource + 'static,
    R: RemoteDataSource + 'static,
{
    tokio::spawn(async move {
        tracing::info!("Auto-sync started (interval: {}s)", period.as_secs());

        let mut timer = tokio::time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            SyncCoordinator { inner }.auto_sync_tick().await;
        }
    })
}
