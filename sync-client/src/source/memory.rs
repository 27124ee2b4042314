//! In-memory data sources for testing.
//!
//! Both sources are cheap handles over shared state, so a test can keep a
//! clone to seed data, queue failures and inspect what the coordinator did.

use super::{LocalDataSource, RemoteDataSource, RemoteSnapshot, SourceError, StoreSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tasksync_core::{resolve_all, Clock, SystemClock};
use tasksync_types::{ConflictStrategy, Project, SyncConflict, SyncResolution, Task};
use tokio::sync::Notify;

/// In-memory local store with staged transactions.
#[derive(Debug, Default, Clone)]
pub struct MemoryLocalSource {
    inner: Arc<Mutex<LocalInner>>,
}

#[derive(Debug, Default)]
struct LocalInner {
    committed: StoreSnapshot,
    staged: Option<StoreSnapshot>,
    commits: usize,
    rollbacks: usize,
    fail_next_load: Option<String>,
    fail_next_save_tasks: Option<String>,
    fail_next_save_projects: Option<String>,
    fail_next_commit: Option<String>,
    write_before_next_commit: Option<Task>,
}

impl MemoryLocalSource {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the committed collections.
    pub fn seed(&self, tasks: Vec<Task>, projects: Vec<Project>) {
        let mut inner = self.inner.lock();
        inner.committed.tasks = tasks;
        inner.committed.projects = projects;
        inner.committed.revision += 1;
    }

    /// Committed state.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.lock().committed.clone()
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.inner.lock().staged.is_some()
    }

    /// Number of successful commits.
    pub fn commit_count(&self) -> usize {
        self.inner.lock().commits
    }

    /// Number of rollbacks.
    pub fn rollback_count(&self) -> usize {
        self.inner.lock().rollbacks
    }

    /// Cause the next load_tasks() or load_projects() to fail.
    pub fn fail_next_load(&self, error: &str) {
        self.inner.lock().fail_next_load = Some(error.to_string());
    }

    /// Cause the next save_tasks() to fail.
    pub fn fail_next_save_tasks(&self, error: &str) {
        self.inner.lock().fail_next_save_tasks = Some(error.to_string());
    }

    /// Cause the next save_projects() to fail.
    pub fn fail_next_save_projects(&self, error: &str) {
        self.inner.lock().fail_next_save_projects = Some(error.to_string());
    }

    /// Cause the next commit_transaction() to fail.
    pub fn fail_next_commit(&self, error: &str) {
        self.inner.lock().fail_next_commit = Some(error.to_string());
    }

    /// Have another writer commit `task` just before the next
    /// commit_transaction() runs.
    pub fn write_before_next_commit(&self, task: Task) {
        self.inner.lock().write_before_next_commit = Some(task);
    }
}

impl LocalInner {
    /// Apply a write to the staged copy inside a transaction, else commit
    /// it straight away.
    fn write(&mut self, update: impl FnOnce(&mut StoreSnapshot)) {
        match self.staged.as_mut() {
            Some(staged) => update(staged),
            None => {
                update(&mut self.committed);
                self.committed.revision += 1;
            }
        }
    }
}

#[async_trait]
impl LocalDataSource for MemoryLocalSource {
    async fn load_tasks(&self) -> Result<Vec<Task>, SourceError> {
        let mut inner = self.inner.lock();
        if let Some(error) = inner.fail_next_load.take() {
            return Err(SourceError::Failed(error));
        }
        Ok(inner.committed.tasks.clone())
    }

    async fn load_projects(&self) -> Result<Vec<Project>, SourceError> {
        let mut inner = self.inner.lock();
        if let Some(error) = inner.fail_next_load.take() {
            return Err(SourceError::Failed(error));
        }
        Ok(inner.committed.projects.clone())
    }

    async fn save_tasks(&self, tasks: &[Task]) -> Result<(), SourceError> {
        let mut inner = self.inner.lock();
        if let Some(error) = inner.fail_next_save_tasks.take() {
            return Err(SourceError::Failed(error));
        }
        inner.write(|s| s.tasks = tasks.to_vec());
        Ok(())
    }

    async fn save_projects(&self, projects: &[Project]) -> Result<(), SourceError> {
        let mut inner = self.inner.lock();
        if let Some(error) = inner.fail_next_save_projects.take() {
            return Err(SourceError::Failed(error));
        }
        inner.write(|s| s.projects = projects.to_vec());
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<(), SourceError> {
        let mut inner = self.inner.lock();
        if inner.staged.is_some() {
            return Err(SourceError::TransactionInProgress);
        }
        inner.staged = Some(inner.committed.clone());
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<(), SourceError> {
        let mut inner = self.inner.lock();
        if inner.staged.is_none() {
            return Err(SourceError::NoTransaction);
        }
        // A failed commit leaves the transaction open for rollback.
        if let Some(error) = inner.fail_next_commit.take() {
            return Err(SourceError::Failed(error));
        }
        if let Some(task) = inner.write_before_next_commit.take() {
            inner.committed.tasks.push(task);
            inner.committed.revision += 1;
        }
        let Some(staged) = inner.staged.take() else {
            return Err(SourceError::NoTransaction);
        };
        if staged.revision != inner.committed.revision {
            let error = SourceError::StaleWrite {
                expected: staged.revision,
                actual: inner.committed.revision,
            };
            inner.staged = Some(staged);
            return Err(error);
        }
        inner.committed = StoreSnapshot {
            revision: staged.revision + 1,
            ..staged
        };
        inner.commits += 1;
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<(), SourceError> {
        let mut inner = self.inner.lock();
        if inner.staged.take().is_none() {
            return Err(SourceError::NoTransaction);
        }
        inner.rollbacks += 1;
        Ok(())
    }

    async fn last_sync_timestamp(&self) -> Result<Option<DateTime<Utc>>, SourceError> {
        Ok(self.inner.lock().committed.last_sync)
    }

    async fn set_last_sync_timestamp(&self, at: DateTime<Utc>) -> Result<(), SourceError> {
        self.inner.lock().write(|s| s.last_sync = Some(at));
        Ok(())
    }

    async fn revision(&self) -> Result<u64, SourceError> {
        Ok(self.inner.lock().committed.revision)
    }
}

/// In-memory remote for testing.
///
/// Fetches honor `since` against the change marks, pushes upsert and are
/// captured, and conflicts are resolved with the shared strategy policy.
/// Gates can hold the next fetch, resolve or push open to observe a cycle
/// mid-flight.
#[derive(Debug, Clone)]
pub struct MockRemoteSource {
    inner: Arc<Mutex<RemoteInner>>,
}

#[derive(Debug)]
struct RemoteInner {
    clock: Arc<dyn Clock>,
    available: bool,
    store: RemoteSnapshot,
    pushed_tasks: Vec<Vec<Task>>,
    pushed_projects: Vec<Vec<Project>>,
    fetch_calls: Vec<Option<DateTime<Utc>>>,
    resolve_calls: usize,
    fail_next_fetch_tasks: Option<String>,
    fail_next_fetch_projects: Option<String>,
    fail_next_resolve: Option<String>,
    failing_pushes: usize,
    fetch_gate: GateSlot,
    resolve_gate: GateSlot,
    push_gate: GateSlot,
}

#[derive(Debug, Default)]
struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

/// Holds the next call of one kind until released.
#[derive(Debug, Default)]
struct GateSlot {
    gate: Option<Arc<Gate>>,
    armed: bool,
}

impl GateSlot {
    fn hold(&mut self) {
        self.gate = Some(Arc::default());
        self.armed = true;
    }

    /// The gate the current call must pass, if it is the held one.
    fn take_for_call(&mut self) -> Option<Arc<Gate>> {
        if !self.armed {
            return None;
        }
        self.armed = false;
        self.gate.clone()
    }

    fn release(&mut self) {
        self.armed = false;
        if let Some(gate) = self.gate.take() {
            gate.release.notify_one();
        }
    }
}

impl Default for MockRemoteSource {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl MockRemoteSource {
    /// Create an empty, available remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty remote that stamps changes with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RemoteInner {
                clock,
                available: true,
                store: RemoteSnapshot::default(),
                pushed_tasks: Vec::new(),
                pushed_projects: Vec::new(),
                fetch_calls: Vec::new(),
                resolve_calls: 0,
                fail_next_fetch_tasks: None,
                fail_next_fetch_projects: None,
                fail_next_resolve: None,
                failing_pushes: 0,
                fetch_gate: GateSlot::default(),
                resolve_gate: GateSlot::default(),
                push_gate: GateSlot::default(),
            })),
        }
    }

    /// Upsert entities as if another device had pushed them now.
    pub fn seed(&self, tasks: Vec<Task>, projects: Vec<Project>) {
        let mut inner = self.inner.lock();
        let now = inner.clock.now();
        inner.store.upsert_tasks(&tasks, now);
        inner.store.upsert_projects(&projects, now);
    }

    /// Current remote collections, without change marks.
    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.lock();
        let (tasks, projects) = inner.store.entities();
        StoreSnapshot {
            tasks,
            projects,
            last_sync: inner.store.change_mark,
            ..StoreSnapshot::default()
        }
    }

    /// Toggle availability.
    pub fn set_available(&self, available: bool) {
        self.inner.lock().available = available;
    }

    /// Every task collection pushed so far.
    pub fn pushed_tasks(&self) -> Vec<Vec<Task>> {
        self.inner.lock().pushed_tasks.clone()
    }

    /// Every project collection pushed so far.
    pub fn pushed_projects(&self) -> Vec<Vec<Project>> {
        self.inner.lock().pushed_projects.clone()
    }

    /// `since` argument of every fetch_tasks() call.
    pub fn fetch_calls(&self) -> Vec<Option<DateTime<Utc>>> {
        self.inner.lock().fetch_calls.clone()
    }

    /// Number of resolve_conflicts() calls.
    pub fn resolve_calls(&self) -> usize {
        self.inner.lock().resolve_calls
    }

    /// Cause the next fetch_tasks() to fail.
    pub fn fail_next_fetch_tasks(&self, error: &str) {
        self.inner.lock().fail_next_fetch_tasks = Some(error.to_string());
    }

    /// Cause the next fetch_projects() to fail.
    pub fn fail_next_fetch_projects(&self, error: &str) {
        self.inner.lock().fail_next_fetch_projects = Some(error.to_string());
    }

    /// Cause the next resolve_conflicts() to fail.
    pub fn fail_next_resolve(&self, error: &str) {
        self.inner.lock().fail_next_resolve = Some(error.to_string());
    }

    /// Cause the next `count` pushes (of either kind) to fail.
    pub fn fail_pushes(&self, count: usize) {
        self.inner.lock().failing_pushes = count;
    }

    /// Hold the next fetch_tasks() call until [`release_fetches`] is called.
    ///
    /// [`release_fetches`]: MockRemoteSource::release_fetches
    pub fn hold_fetches(&self) {
        self.inner.lock().fetch_gate.hold();
    }

    /// Wait until the held fetch_tasks() call is parked at the gate.
    pub async fn wait_for_fetch(&self) {
        let gate = self.inner.lock().fetch_gate.gate.clone();
        if let Some(gate) = gate {
            gate.entered.notified().await;
        }
    }

    /// Let the held fetch continue.
    pub fn release_fetches(&self) {
        self.inner.lock().fetch_gate.release();
    }

    /// Hold the next resolve_conflicts() call until [`release_resolve`] is
    /// called.
    ///
    /// [`release_resolve`]: MockRemoteSource::release_resolve
    pub fn hold_next_resolve(&self) {
        self.inner.lock().resolve_gate.hold();
    }

    /// Wait until the held resolve_conflicts() call is parked at the gate.
    pub async fn wait_for_resolve(&self) {
        let gate = self.inner.lock().resolve_gate.gate.clone();
        if let Some(gate) = gate {
            gate.entered.notified().await;
        }
    }

    /// Let the held resolve continue.
    pub fn release_resolve(&self) {
        self.inner.lock().resolve_gate.release();
    }

    /// Hold the next push (of either kind) until [`release_push`] is
    /// called. Later pushes pass straight through.
    ///
    /// [`release_push`]: MockRemoteSource::release_push
    pub fn hold_next_push(&self) {
        self.inner.lock().push_gate.hold();
    }

    /// Wait until the held push is parked at the gate.
    pub async fn wait_for_push(&self) {
        let gate = self.inner.lock().push_gate.gate.clone();
        if let Some(gate) = gate {
            gate.entered.notified().await;
        }
    }

    /// Let the held push continue.
    pub fn release_push(&self) {
        self.inner.lock().push_gate.release();
    }

    /// Fail the push if failures are queued, then pass the push gate.
    async fn before_push(&self) -> Result<(), SourceError> {
        let gate = {
            let mut inner = self.inner.lock();
            if inner.failing_pushes > 0 {
                inner.failing_pushes -= 1;
                return Err(SourceError::Failed("push rejected".into()));
            }
            inner.push_gate.take_for_call()
        };
        if let Some(gate) = gate {
            gate.pass().await;
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteDataSource for MockRemoteSource {
    async fn is_available(&self) -> bool {
        self.inner.lock().available
    }

    async fn change_mark(&self) -> Result<Option<DateTime<Utc>>, SourceError> {
        Ok(self.inner.lock().store.change_mark)
    }

    async fn fetch_tasks(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Task>, SourceError> {
        let gate = {
            let mut inner = self.inner.lock();
            inner.fetch_calls.push(since);
            inner.fetch_gate.take_for_call()
        };
        if let Some(gate) = gate {
            gate.pass().await;
        }

        let mut inner = self.inner.lock();
        if let Some(error) = inner.fail_next_fetch_tasks.take() {
            return Err(SourceError::Failed(error));
        }
        Ok(inner.store.tasks_since(since))
    }

    async fn fetch_projects(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Project>, SourceError> {
        let mut inner = self.inner.lock();
        if let Some(error) = inner.fail_next_fetch_projects.take() {
            return Err(SourceError::Failed(error));
        }
        Ok(inner.store.projects_since(since))
    }

    async fn push_tasks(&self, tasks: &[Task]) -> Result<(), SourceError> {
        self.before_push().await?;
        let mut inner = self.inner.lock();
        let now = inner.clock.now();
        inner.store.upsert_tasks(tasks, now);
        inner.pushed_tasks.push(tasks.to_vec());
        Ok(())
    }

    async fn push_projects(&self, projects: &[Project]) -> Result<(), SourceError> {
        self.before_push().await?;
        let mut inner = self.inner.lock();
        let now = inner.clock.now();
        inner.store.upsert_projects(projects, now);
        inner.pushed_projects.push(projects.to_vec());
        Ok(())
    }

    async fn resolve_conflicts(
        &self,
        conflicts: &[SyncConflict],
        strategy: ConflictStrategy,
    ) -> Result<Vec<SyncResolution>, SourceError> {
        let gate = {
            let mut inner = self.inner.lock();
            inner.resolve_calls += 1;
            inner.resolve_gate.take_for_call()
        };
        if let Some(gate) = gate {
            gate.pass().await;
        }

        let mut inner = self.inner.lock();
        if let Some(error) = inner.fail_next_resolve.take() {
            return Err(SourceError::Failed(error));
        }
        Ok(resolve_all(conflicts, strategy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tasksync_core::ManualClock;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_750_000_000 + secs, 0).unwrap()
    }

    // ===========================================
    // MemoryLocalSource
    // ===========================================

    #[tokio::test]
    async fn writes_outside_transaction_apply_immediately() {
        let local = MemoryLocalSource::new();
        let tasks = vec![Task::new("a", at(0)).unwrap()];

        local.save_tasks(&tasks).await.unwrap();
        local.set_last_sync_timestamp(at(1)).await.unwrap();

        assert_eq!(local.load_tasks().await.unwrap(), tasks);
        assert_eq!(local.last_sync_timestamp().await.unwrap(), Some(at(1)));
    }

    #[tokio::test]
    async fn staged_writes_hidden_until_commit() {
        let local = MemoryLocalSource::new();
        let tasks = vec![Task::new("a", at(0)).unwrap()];

        local.begin_transaction().await.unwrap();
        local.save_tasks(&tasks).await.unwrap();
        assert!(local.load_tasks().await.unwrap().is_empty());

        local.commit_transaction().await.unwrap();
        assert_eq!(local.load_tasks().await.unwrap(), tasks);
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let local = MemoryLocalSource::new();
        local.begin_transaction().await.unwrap();
        local.save_tasks(&[Task::new("a", at(0)).unwrap()]).await.unwrap();
        local.set_last_sync_timestamp(at(1)).await.unwrap();

        local.rollback_transaction().await.unwrap();

        assert_eq!(local.snapshot(), StoreSnapshot::default());
        assert_eq!(local.rollback_count(), 1);
    }

    #[tokio::test]
    async fn failed_commit_keeps_transaction_open() {
        let local = MemoryLocalSource::new();
        local.fail_next_commit("io");
        local.begin_transaction().await.unwrap();

        assert!(local.commit_transaction().await.is_err());
        assert!(local.in_transaction());

        local.rollback_transaction().await.unwrap();
        assert!(!local.in_transaction());
    }

    #[tokio::test]
    async fn nested_transaction_rejected() {
        let local = MemoryLocalSource::new();
        local.begin_transaction().await.unwrap();
        assert!(matches!(
            local.begin_transaction().await,
            Err(SourceError::TransactionInProgress)
        ));
        assert!(matches!(
            MemoryLocalSource::new().commit_transaction().await,
            Err(SourceError::NoTransaction)
        ));
    }

    // ===========================================
    // MockRemoteSource
    // ===========================================

    #[tokio::test]
    async fn fetch_honors_since_by_change_mark() {
        let clock = ManualClock::new(at(0));
        let remote = MockRemoteSource::with_clock(Arc::new(clock.clone()));
        remote.seed(vec![Task::new("first", at(0)).unwrap()], vec![]);
        let mark = remote.change_mark().await.unwrap();
        assert_eq!(mark, Some(at(0)));

        clock.advance(chrono::Duration::seconds(30));
        // Edited before the mark, pushed after it.
        let late = Task::new("late", at(-100)).unwrap();
        remote.push_tasks(&[late.clone()]).await.unwrap();

        assert_eq!(remote.fetch_tasks(None).await.unwrap().len(), 2);
        assert_eq!(remote.fetch_tasks(mark).await.unwrap(), vec![late]);
        assert_eq!(remote.fetch_calls(), vec![None, mark]);
    }

    #[tokio::test]
    async fn push_upserts_and_captures() {
        let remote = MockRemoteSource::new();
        let existing = Task::new("existing", at(0)).unwrap();
        remote.seed(vec![existing.clone()], vec![]);
        let tasks = vec![Task::new("a", at(0)).unwrap()];

        remote.push_tasks(&tasks).await.unwrap();

        assert_eq!(remote.snapshot().tasks, vec![existing, tasks[0].clone()]);
        assert_eq!(remote.pushed_tasks(), vec![tasks]);
    }

    #[tokio::test]
    async fn push_failures_are_counted_down() {
        let remote = MockRemoteSource::new();
        remote.fail_pushes(2);

        assert!(remote.push_tasks(&[]).await.is_err());
        assert!(remote.push_projects(&[]).await.is_err());
        assert!(remote.push_tasks(&[]).await.is_ok());
        assert_eq!(remote.pushed_tasks().len(), 1);
    }

    #[tokio::test]
    async fn resolves_with_strategy() {
        let remote = MockRemoteSource::new();
        let local = Task::new("a", at(0)).unwrap();
        let mut newer = local.clone();
        newer.touch(at(10));
        let conflicts = vec![SyncConflict::Task {
            local: local.clone(),
            remote: newer.clone(),
        }];

        let keep_newest = remote
            .resolve_conflicts(&conflicts, ConflictStrategy::KeepNewest)
            .await
            .unwrap();
        let keep_local = remote
            .resolve_conflicts(&conflicts, ConflictStrategy::KeepLocal)
            .await
            .unwrap();

        assert_eq!(keep_newest[0].as_task(), Some(&newer));
        assert_eq!(keep_local[0].as_task(), Some(&local));
        assert_eq!(remote.resolve_calls(), 2);
    }

    #[tokio::test]
    async fn gate_holds_fetch_until_released() {
        let remote = MockRemoteSource::new();
        remote.hold_fetches();

        let fetch = tokio::spawn({
            let remote = remote.clone();
            async move { remote.fetch_tasks(None).await }
        });
        remote.wait_for_fetch().await;
        assert!(!fetch.is_finished());

        remote.release_fetches();
        assert!(fetch.await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn gate_holds_only_the_next_push() {
        let remote = MockRemoteSource::new();
        remote.hold_next_push();

        let held = tokio::spawn({
            let remote = remote.clone();
            async move { remote.push_tasks(&[Task::new("held", at(0)).unwrap()]).await }
        });
        remote.wait_for_push().await;
        remote.push_projects(&[]).await.unwrap();
        assert!(!held.is_finished());

        remote.release_push();
        held.await.unwrap().unwrap();
        assert_eq!(remote.snapshot().tasks.len(), 1);
    }

    #[tokio::test]
    async fn commits_bump_revision() {
        let local = MemoryLocalSource::new();
        assert_eq!(local.revision().await.unwrap(), 0);

        local.save_tasks(&[]).await.unwrap();
        local.begin_transaction().await.unwrap();
        local.save_tasks(&[Task::new("a", at(0)).unwrap()]).await.unwrap();
        assert_eq!(local.revision().await.unwrap(), 1);
        local.commit_transaction().await.unwrap();

        assert_eq!(local.revision().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn commit_over_newer_state_is_stale() {
        let local = MemoryLocalSource::new();
        let theirs = Task::new("theirs", at(0)).unwrap();
        local.write_before_next_commit(theirs.clone());

        local.begin_transaction().await.unwrap();
        local.save_tasks(&[Task::new("ours", at(1)).unwrap()]).await.unwrap();
        let result = local.commit_transaction().await;

        assert!(matches!(result, Err(SourceError::StaleWrite { .. })));
        assert!(local.in_transaction());
        local.rollback_transaction().await.unwrap();
        assert_eq!(local.snapshot().tasks, vec![theirs]);
    }
}
