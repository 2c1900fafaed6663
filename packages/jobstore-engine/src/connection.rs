//! Per-client façade: read queries, direct writes, lock handles, and
//! transaction construction. The type most embedding frameworks hold one
//! of per worker thread.
//!
//! Grounded in the teacher's `ServerStorage` trait (the per-connection
//! surface in `storage/engine.rs`) layered over the same dispatcher
//! round-trip `MonitoringApi` uses -- reads and writes both cross the
//! worker thread, the only difference is whether the closure mutates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use jobstore_core::{JobKey, JobStorageError, JobStorageResult, KeyProvider, MonotonicClock, Options};

use crate::dispatcher::Dispatcher;
use crate::entities::InvocationData;
use crate::lock_table::LockTable;
use crate::queue_wait::{QueueWaitRegistry, WaitNode};
use crate::transaction::Transaction;

const FETCH_WAIT_SLICE: Duration = Duration::from_secs(1);

/// A cooperative cancellation flag, checked between wait slices. Cloning
/// shares the same underlying flag; `cancel()` from any clone is observed
/// by every other clone and by `fetch_next_job`'s blocking loop within one
/// 1-second slice.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether `cancel` has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Outcome of [`Connection::fetch_next_job`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched<K> {
    /// A job was dequeued from `queue`.
    Job { queue: String, key: K },
    /// The caller's cancellation token fired before anything was dequeued.
    Cancelled,
}

/// Snapshot returned by [`Connection::get_job_data`].
#[derive(Debug, Clone)]
pub struct JobData {
    pub invocation_data: InvocationData,
    /// Always `None` in this engine: invocation bytes are opaque and never
    /// deserialized here. Present so the struct matches the embedding
    /// framework's contract, which does perform that deserialization.
    pub load_exception: Option<String>,
    pub created_at_utc: SystemTime,
    pub state_name: Option<String>,
    pub parameters: Vec<(String, String)>,
}

/// Snapshot returned by [`Connection::get_state_data`].
#[derive(Debug, Clone)]
pub struct StateData {
    pub name: String,
    pub reason: Option<String>,
    pub data: Vec<(String, String)>,
}

/// RAII handle for a distributed lock acquired outside a transaction.
/// Releases the lock when dropped.
pub struct DistributedLock {
    owner: String,
    resource: String,
    table: Arc<LockTable>,
}

impl Drop for DistributedLock {
    fn drop(&mut self) {
        let _ = self.table.release(&self.owner, &self.resource);
    }
}

/// Per-client façade over the dispatcher, lock table, and queue wait
/// registry. Cheap to clone the underlying `Arc`s into a new `Connection`
/// per worker thread; each `Connection` carries its own `owner` identity
/// for lock attribution.
pub struct Connection<K: JobKey, P: KeyProvider<Key = K>> {
    owner: String,
    dispatcher: Arc<Dispatcher<K>>,
    lock_table: Arc<LockTable>,
    queue_waits: Arc<QueueWaitRegistry>,
    clock: Arc<MonotonicClock>,
    options: Arc<Options>,
    key_provider: Arc<P>,
}

impl<K: JobKey, P: KeyProvider<Key = K>> Connection<K, P> {
    pub(crate) fn new(
        owner: String,
        dispatcher: Arc<Dispatcher<K>>,
        lock_table: Arc<LockTable>,
        queue_waits: Arc<QueueWaitRegistry>,
        clock: Arc<MonotonicClock>,
        options: Arc<Options>,
        key_provider: Arc<P>,
    ) -> Self {
        Self { owner, dispatcher, lock_table, queue_waits, clock, options, key_provider }
    }

    // ---- Jobs: writes ---------------------------------------------------

    /// Creates a job that already carries a TTL (the embedding framework's
    /// convention: jobs are born "expiring" until a worker's state
    /// transition persists them).
    pub fn create_expired_job(
        &self,
        invocation_data: InvocationData,
        parameters: Vec<(String, String)>,
        expire_in: Duration,
    ) -> JobStorageResult<K> {
        let key = self.key_provider.next_key();
        let now = self.clock.now();
        let options = self.options.clone();
        let created_key = key.clone();
        self.dispatcher.submit(move |state| {
            state.job_create(created_key, invocation_data, parameters, now, Some(expire_in), false, &options);
        })?;
        Ok(key)
    }

    /// Sets a job parameter. No-op if the job does not exist.
    pub fn set_job_parameter(&self, key: K, name: impl Into<String>, value: impl Into<String>) -> JobStorageResult<()> {
        let name = name.into();
        let value = value.into();
        let comparer = self.options.string_comparer;
        self.dispatcher.submit(move |state| state.job_set_parameter(&key, name, value, comparer))
    }

    // ---- Jobs: reads ------------------------------------------------------

    /// Reads a job parameter by name, using the configured string comparer.
    pub fn get_job_parameter(&self, key: K, name: impl Into<String>) -> JobStorageResult<Option<String>> {
        let name = name.into();
        let comparer = self.options.string_comparer;
        self.dispatcher.submit(move |state| state.job_get(&key).and_then(|j| j.get_parameter(&name, comparer)).map(str::to_string))
    }

    /// Full data snapshot for a job, or `None` if it does not exist.
    pub fn get_job_data(&self, key: K) -> JobStorageResult<Option<JobData>> {
        let clock = self.clock.clone();
        self.dispatcher.submit(move |state| {
            state.job_get(&key).map(|job| JobData {
                invocation_data: job.invocation_data.clone(),
                load_exception: None,
                created_at_utc: clock.to_wall_clock(job.created_at),
                state_name: job.current_state.as_ref().map(|s| s.name.clone()),
                parameters: job.parameters.clone(),
            })
        })
    }

    /// The job's current state record, or `None` if it has no state or does
    /// not exist.
    pub fn get_state_data(&self, key: K) -> JobStorageResult<Option<StateData>> {
        self.dispatcher.submit(move |state| {
            state.job_get(&key)?.current_state.as_ref().map(|s| StateData {
                name: s.name.clone(),
                reason: s.reason.clone(),
                data: s.data.clone(),
            })
        })
    }

    // ---- FetchNextJob ------------------------------------------------------

    /// Dequeues the next job from the first non-empty queue in `queues`
    /// (argument order is priority, not fairness), blocking in up-to-1-second
    /// slices until one is available or `cancel` fires.
    pub fn fetch_next_job(&self, queues: &[String], cancel: &CancellationToken) -> JobStorageResult<Fetched<K>> {
        if queues.is_empty() {
            return Err(JobStorageError::InvalidArgument("queue list must not be empty".into()));
        }
        // One shared node registered on every candidate queue, so a signal
        // on any of them wakes this fetcher, which then re-scans all queues
        // in priority order. `QueueWaitList` has no removal API, so the
        // node is registered at most once per wait (not once per
        // iteration): reused across iterations that time out with no
        // signal, and only replaced once it has actually fired (a fired
        // node is one-shot and would otherwise make every later
        // `wait_timeout` call return instantly, spinning the loop).
        let mut node: Option<Arc<WaitNode>> = None;
        loop {
            if cancel.is_cancelled() {
                return Ok(Fetched::Cancelled);
            }

            let candidates = queues.to_vec();
            let dequeued = self.dispatcher.submit(move |state| {
                for name in &candidates {
                    if let Some(key) = state.queue_dequeue(name) {
                        return Some((name.clone(), key));
                    }
                }
                None
            })?;
            if let Some((queue, key)) = dequeued {
                // Wake the next fetcher waiting on this queue, since ours
                // may not have drained it.
                self.queue_waits.signal_one(&queue);
                return Ok(Fetched::Job { queue, key });
            }

            if cancel.is_cancelled() {
                return Ok(Fetched::Cancelled);
            }
            let waiting = match &node {
                Some(n) if !n.is_fired() => n.clone(),
                _ => {
                    let n = WaitNode::new();
                    for name in queues {
                        self.queue_waits.list_for(name).add(n.clone());
                    }
                    node = Some(n.clone());
                    n
                }
            };
            waiting.wait_timeout(FETCH_WAIT_SLICE);
        }
    }

    // ---- Servers ------------------------------------------------------

    /// Registers (or re-registers) a server.
    pub fn announce_server(&self, id: impl Into<String>, queues: Vec<String>, worker_count: u32) -> JobStorageResult<()> {
        let id = id.into();
        let now = self.clock.now();
        self.dispatcher.submit(move |state| state.server_announce(id, queues, worker_count, now))
    }

    /// Removes a server registration.
    pub fn remove_server(&self, id: impl Into<String>) -> JobStorageResult<()> {
        let id = id.into();
        self.dispatcher.submit(move |state| state.server_delete(&id))
    }

    /// Refreshes a server's heartbeat. Fails with [`JobStorageError::ServerGone`]
    /// if the server is unknown.
    pub fn heartbeat(&self, id: impl Into<String>) -> JobStorageResult<()> {
        let id = id.into();
        let now = self.clock.now();
        let found = self.dispatcher.submit(move |state| state.server_heartbeat(&id, now))?;
        if found {
            Ok(())
        } else {
            Err(JobStorageError::ServerGone { reason: "heartbeat for unknown server".into() })
        }
    }

    /// Removes every server whose heartbeat predates `timeout`. Returns the
    /// number removed.
    pub fn remove_timed_out_servers(&self, timeout: Duration) -> JobStorageResult<usize> {
        let now = self.clock.now();
        self.dispatcher.submit(move |state| state.server_remove_timed_out(now, timeout))
    }

    // ---- Clock ------------------------------------------------------

    /// Current UTC wall-clock time. Reads the clock directly; never
    /// touches `MemoryState` and so never involves the dispatcher thread.
    #[must_use]
    pub fn get_utc_date_time(&self) -> SystemTime {
        self.clock.to_wall_clock(self.clock.now())
    }

    // ---- Sorted sets: reads ------------------------------------------------------

    pub fn set_all(&self, name: impl Into<String>) -> JobStorageResult<Vec<String>> {
        let name = name.into();
        self.dispatcher.submit(move |state| state.set_all(&name))
    }

    pub fn set_first_by_lowest_score(&self, name: impl Into<String>, from: f64, to: f64) -> JobStorageResult<Option<String>> {
        let name = name.into();
        self.dispatcher.submit(move |state| state.set_first_by_lowest_score(&name, from, to))
    }

    pub fn set_first_by_lowest_score_multiple(
        &self,
        name: impl Into<String>,
        from: f64,
        to: f64,
        count: usize,
    ) -> JobStorageResult<Vec<String>> {
        let name = name.into();
        self.dispatcher.submit(move |state| state.set_first_by_lowest_score_multiple(&name, from, to, count))
    }

    pub fn set_contains(&self, name: impl Into<String>, value: impl Into<String>) -> JobStorageResult<bool> {
        let name = name.into();
        let value = value.into();
        self.dispatcher.submit(move |state| state.set_contains(&name, &value))
    }

    pub fn set_count(&self, name: impl Into<String>) -> JobStorageResult<usize> {
        let name = name.into();
        self.dispatcher.submit(move |state| state.set_count(&name))
    }

    /// Per-key member count across several sorted sets, each capped at
    /// `limit` (a cardinality-estimate helper, not a true count past the
    /// cap -- cheap to compute without walking the whole set when the
    /// caller only needs "is this roughly full").
    pub fn set_count_multiple(&self, names: Vec<String>, limit: usize) -> JobStorageResult<Vec<(String, usize)>> {
        self.dispatcher.submit(move |state| names.into_iter().map(|name| { let count = state.set_count(&name).min(limit); (name, count) }).collect())
    }

    pub fn set_range(&self, name: impl Into<String>, start: i64, end: i64) -> JobStorageResult<Vec<String>> {
        let name = name.into();
        self.dispatcher.submit(move |state| state.set_range(&name, start, end))
    }

    /// Remaining TTL, or `None` if the set has no expiration or does not
    /// exist.
    pub fn set_ttl(&self, name: impl Into<String>) -> JobStorageResult<Option<Duration>> {
        let name = name.into();
        let clock = self.clock.clone();
        self.dispatcher.submit(move |state| state.set_expire_at(&name).map(|at| at.saturating_duration_since(clock.now())))
    }

    // ---- Lists: reads ------------------------------------------------------

    pub fn list_count(&self, name: impl Into<String>) -> JobStorageResult<usize> {
        let name = name.into();
        self.dispatcher.submit(move |state| state.list_len(&name))
    }

    pub fn list_ttl(&self, name: impl Into<String>) -> JobStorageResult<Option<Duration>> {
        let name = name.into();
        let clock = self.clock.clone();
        self.dispatcher.submit(move |state| state.list_expire_at(&name).map(|at| at.saturating_duration_since(clock.now())))
    }

    pub fn list_all(&self, name: impl Into<String>) -> JobStorageResult<Vec<String>> {
        let name = name.into();
        self.dispatcher.submit(move |state| state.list_all(&name))
    }

    pub fn list_range(&self, name: impl Into<String>, start: i64, end: i64) -> JobStorageResult<Vec<String>> {
        let name = name.into();
        self.dispatcher.submit(move |state| state.list_range(&name, start, end))
    }

    // ---- Hashes ------------------------------------------------------

    pub fn hash_count(&self, name: impl Into<String>) -> JobStorageResult<usize> {
        let name = name.into();
        self.dispatcher.submit(move |state| state.hash_len(&name))
    }

    pub fn hash_ttl(&self, name: impl Into<String>) -> JobStorageResult<Option<Duration>> {
        let name = name.into();
        let clock = self.clock.clone();
        self.dispatcher.submit(move |state| state.hash_expire_at(&name).map(|at| at.saturating_duration_since(clock.now())))
    }

    /// Direct convenience write, outside any transaction (mirrors the
    /// embedding framework's `SetRangeInHash` being usable standalone, not
    /// only inside a batch).
    pub fn hash_set_range(&self, name: impl Into<String>, entries: Vec<(String, String)>) -> JobStorageResult<()> {
        let name = name.into();
        let comparer = self.options.string_comparer;
        self.dispatcher.submit(move |state| state.hash_set_range(&name, entries, comparer))
    }

    pub fn hash_all_entries(&self, name: impl Into<String>) -> JobStorageResult<Vec<(String, String)>> {
        let name = name.into();
        self.dispatcher.submit(move |state| state.hash_all(&name))
    }

    pub fn hash_get_value(&self, name: impl Into<String>, field: impl Into<String>) -> JobStorageResult<Option<String>> {
        let name = name.into();
        let field = field.into();
        let comparer = self.options.string_comparer;
        self.dispatcher.submit(move |state| state.hash_get(&name, &field, comparer).map(str::to_string))
    }

    // ---- Counters ------------------------------------------------------

    pub fn counter_get(&self, name: impl Into<String>) -> JobStorageResult<i64> {
        let name = name.into();
        self.dispatcher.submit(move |state| state.counter_get(&name))
    }

    // ---- Locks & transactions ------------------------------------------------------

    /// Acquires a distributed lock, blocking up to `timeout` (`None` waits
    /// indefinitely). The returned guard releases the lock on drop.
    pub fn acquire_distributed_lock(&self, resource: impl Into<String>, timeout: Option<Duration>) -> JobStorageResult<DistributedLock> {
        let resource = resource.into();
        self.lock_table.try_acquire(&self.owner, &resource, timeout)?;
        Ok(DistributedLock { owner: self.owner.clone(), resource, table: self.lock_table.clone() })
    }

    /// Starts a new write transaction attributed to this connection's
    /// owner identity.
    pub fn create_write_transaction(&self) -> Transaction<K> {
        Transaction::new(
            self.owner.clone(),
            self.dispatcher.clone(),
            self.lock_table.clone(),
            self.queue_waits.clone(),
            self.clock.clone(),
            self.options.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobstore_core::CounterKeyProvider;

    fn harness() -> Connection<u64, CounterKeyProvider> {
        let clock = Arc::new(MonotonicClock::new());
        let options = Arc::new(Options::default());
        let dispatcher = Arc::new(Dispatcher::new(MonotonicClock::new(), options.command_timeout));
        Connection::new(
            "conn-1".into(),
            dispatcher,
            Arc::new(LockTable::new()),
            Arc::new(QueueWaitRegistry::new()),
            clock,
            options,
            Arc::new(CounterKeyProvider::new()),
        )
    }

    #[test]
    fn create_expired_job_then_get_job_data_round_trips() {
        let conn = harness();
        let key = conn.create_expired_job(InvocationData::new(vec![9]), vec![("a".into(), "1".into())], Duration::from_secs(60)).unwrap();
        let data = conn.get_job_data(key).unwrap().unwrap();
        assert_eq!(data.invocation_data, InvocationData::new(vec![9]));
        assert_eq!(data.parameters, vec![("a".to_string(), "1".to_string())]);
        assert!(data.state_name.is_none());
    }

    #[test]
    fn fetch_next_job_rejects_empty_queue_list() {
        let conn = harness();
        let result = conn.fetch_next_job(&[], &CancellationToken::new());
        assert!(matches!(result, Err(JobStorageError::InvalidArgument(_))));
    }

    #[test]
    fn fetch_next_job_fast_path_returns_immediately_when_non_empty() {
        let conn = harness();
        let key = conn.create_expired_job(InvocationData::new(vec![]), vec![], Duration::from_secs(60)).unwrap();
        let mut txn = conn.create_write_transaction();
        txn.add_to_queue("q1", key);
        txn.commit().unwrap();

        let fetched = conn.fetch_next_job(&["q1".to_string(), "q2".to_string()], &CancellationToken::new()).unwrap();
        assert_eq!(fetched, Fetched::Job { queue: "q1".to_string(), key });
    }

    #[test]
    fn fetch_next_job_honors_queue_priority_order() {
        let conn = harness();
        let k1 = conn.create_expired_job(InvocationData::new(vec![]), vec![], Duration::from_secs(60)).unwrap();
        let k2 = conn.create_expired_job(InvocationData::new(vec![]), vec![], Duration::from_secs(60)).unwrap();
        let mut txn = conn.create_write_transaction();
        txn.add_to_queue("low", k1);
        txn.add_to_queue("high", k2);
        txn.commit().unwrap();

        let fetched = conn.fetch_next_job(&["high".to_string(), "low".to_string()], &CancellationToken::new()).unwrap();
        assert_eq!(fetched, Fetched::Job { queue: "high".to_string(), key: k2 });
    }

    #[test]
    fn fetch_next_job_wakes_on_cross_thread_enqueue() {
        let conn = Arc::new(harness());
        let consumer = conn.clone();
        let handle = std::thread::spawn(move || consumer.fetch_next_job(&["q".to_string()], &CancellationToken::new()).unwrap());

        std::thread::sleep(Duration::from_millis(50));
        let key = conn.create_expired_job(InvocationData::new(vec![]), vec![], Duration::from_secs(60)).unwrap();
        let mut txn = conn.create_write_transaction();
        txn.add_to_queue("q", key);
        txn.commit().unwrap();

        let fetched = handle.join().unwrap();
        assert_eq!(fetched, Fetched::Job { queue: "q".to_string(), key });
    }

    #[test]
    fn fetch_next_job_cancellation_returns_cancelled() {
        let conn = Arc::new(harness());
        let cancel = CancellationToken::new();
        let consumer = conn.clone();
        let consumer_cancel = cancel.clone();
        let handle = std::thread::spawn(move || consumer.fetch_next_job(&["q".to_string()], &consumer_cancel).unwrap());

        std::thread::sleep(Duration::from_millis(50));
        cancel.cancel();
        assert_eq!(handle.join().unwrap(), Fetched::Cancelled);
    }

    #[test]
    fn fetch_next_job_does_not_accumulate_a_wait_node_per_poll_slice() {
        let conn = Arc::new(harness());
        let cancel = CancellationToken::new();
        let consumer = conn.clone();
        let consumer_cancel = cancel.clone();
        // Spans several 1-second wait slices with no producer activity, so
        // a per-iteration node allocation would leave several stale nodes
        // behind; reusing one node across timed-out iterations leaves at
        // most one.
        let handle = std::thread::spawn(move || consumer.fetch_next_job(&["q".to_string()], &consumer_cancel).unwrap());

        std::thread::sleep(Duration::from_millis(2500));
        cancel.cancel();
        assert_eq!(handle.join().unwrap(), Fetched::Cancelled);
        assert!(conn.queue_waits.list_for("q").len() <= 1);
    }

    #[test]
    fn acquire_distributed_lock_releases_on_drop() {
        let conn = harness();
        {
            let _guard = conn.acquire_distributed_lock("R", Some(Duration::from_secs(1))).unwrap();
            assert!(conn.lock_table.contains("R"));
        }
        assert!(conn.lock_table.is_empty());
    }

    #[test]
    fn heartbeat_for_unknown_server_is_server_gone() {
        let conn = harness();
        let result = conn.heartbeat("ghost");
        assert!(matches!(result, Err(JobStorageError::ServerGone { .. })));
    }

    #[test]
    fn hash_set_range_then_get_value_round_trips() {
        let conn = harness();
        conn.hash_set_range("h", vec![("k".into(), "v".into())]).unwrap();
        assert_eq!(conn.hash_get_value("h", "k").unwrap(), Some("v".to_string()));
    }
}
