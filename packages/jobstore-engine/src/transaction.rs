//! Batched, all-or-nothing write transactions.
//!
//! A transaction buffers two ordered lists -- **effects** and
//! **queue-enqueues**, deliberately replayed in that order so a consumer
//! that reads a job right after a queue signal never observes the queue
//! entry before the job it points to. `commit` submits both lists as a
//! single dispatcher callback; only after that callback returns
//! successfully does the transaction fire `signal_one` for every queue it
//! touched, matching §4.7's "signals are a best-effort post-commit hint."

use std::sync::Arc;
use std::time::Duration;

use jobstore_core::{JobKey, JobStorageResult, MonotonicClock, Options, StringComparer};

use crate::commands::Command;
use crate::dispatcher::Dispatcher;
use crate::entities::StateRecord;
use crate::lock_table::LockTable;
use crate::queue_wait::QueueWaitRegistry;

/// A buffered set of writes plus any locks acquired while building it.
pub struct Transaction<K: JobKey> {
    owner: String,
    dispatcher: Arc<Dispatcher<K>>,
    lock_table: Arc<LockTable>,
    queue_waits: Arc<QueueWaitRegistry>,
    clock: Arc<MonotonicClock>,
    options: Arc<Options>,
    effects: Vec<Command<K>>,
    queue_enqueues: Vec<(String, K)>,
    held_locks: Vec<String>,
}

impl<K: JobKey> Transaction<K> {
    pub(crate) fn new(
        owner: String,
        dispatcher: Arc<Dispatcher<K>>,
        lock_table: Arc<LockTable>,
        queue_waits: Arc<QueueWaitRegistry>,
        clock: Arc<MonotonicClock>,
        options: Arc<Options>,
    ) -> Self {
        Self {
            owner,
            dispatcher,
            lock_table,
            queue_waits,
            clock,
            options,
            effects: Vec::new(),
            queue_enqueues: Vec::new(),
            held_locks: Vec::new(),
        }
    }

    fn push(&mut self, command: Command<K>) {
        self.effects.push(command);
    }

    /// Sets (or, with `expire_in = None`, clears/"persists") a job's TTL.
    pub fn expire_job(&mut self, key: K, expire_in: Option<Duration>, ignore_max: bool) {
        self.push(Command::JobExpire { key, expire_in, ignore_max });
    }

    /// Clears a job's TTL so it never expires.
    pub fn persist_job(&mut self, key: K) {
        self.expire_job(key, None, false);
    }

    /// Replaces a job's current state without touching its history.
    pub fn set_job_state(&mut self, key: K, state: StateRecord) {
        self.push(Command::JobSetState { key, state });
    }

    /// Appends a state to a job's bounded history, optionally also making
    /// it the current state.
    pub fn add_job_state(&mut self, key: K, state: StateRecord, set_current: bool) {
        let max_history = self.options.max_state_history_length;
        self.push(Command::JobAddState { key, state, set_current, max_history });
    }

    /// Enqueues `key` onto `queue`. Recorded separately from `effects` so
    /// it replays after every other buffered write.
    pub fn add_to_queue(&mut self, queue: impl Into<String>, key: K) {
        self.queue_enqueues.push((queue.into(), key));
    }

    /// No-op: queue membership cannot be revoked by key once a job has been
    /// enqueued in this engine. Present for interface parity.
    pub fn remove_from_queue(&mut self, queue: impl Into<String>, key: K) {
        self.push(Command::RemoveFromQueue { queue: queue.into(), key });
    }

    /// Increments (or, with a negative delta, decrements) a counter.
    pub fn counter_increment(&mut self, name: impl Into<String>, delta: i64, expire_in: Option<Duration>) {
        self.push(Command::CounterIncrement { name: name.into(), delta, expire_in });
    }

    /// Adds a `(value, score)` pair to a sorted set.
    pub fn set_add(&mut self, name: impl Into<String>, value: impl Into<String>, score: f64) {
        self.push(Command::SortedSetAdd { name: name.into(), value: value.into(), score });
    }

    /// Adds several `(value, score)` pairs to a sorted set.
    pub fn set_add_range(&mut self, name: impl Into<String>, entries: Vec<(String, f64)>) {
        self.push(Command::SortedSetAddRange { name: name.into(), entries });
    }

    /// Removes a value from a sorted set.
    pub fn set_remove(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.push(Command::SortedSetRemove { name: name.into(), value: value.into() });
    }

    /// Deletes a sorted set outright.
    pub fn set_delete(&mut self, name: impl Into<String>) {
        self.push(Command::SortedSetDelete { name: name.into() });
    }

    /// Sets (or, with `expire_in = None`, clears) a sorted set's TTL.
    pub fn set_expire(&mut self, name: impl Into<String>, expire_in: Option<Duration>) {
        self.push(Command::SortedSetExpire { name: name.into(), expire_in });
    }

    /// Inserts a value at the head of a list.
    pub fn list_insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.push(Command::ListInsert { name: name.into(), value: value.into() });
    }

    /// Removes every occurrence of a value from a list.
    pub fn list_remove_all(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.push(Command::ListRemoveAll { name: name.into(), value: value.into() });
    }

    /// Trims a list to an inclusive index range.
    pub fn list_trim(&mut self, name: impl Into<String>, start: i64, end: i64) {
        self.push(Command::ListTrim { name: name.into(), start, end });
    }

    /// Sets (or, with `expire_in = None`, clears) a list's TTL.
    pub fn list_expire(&mut self, name: impl Into<String>, expire_in: Option<Duration>) {
        self.push(Command::ListExpire { name: name.into(), expire_in });
    }

    /// Sets a range of fields on a hash, using the configured comparer.
    pub fn hash_set_range(&mut self, name: impl Into<String>, entries: Vec<(String, String)>, comparer: StringComparer) {
        self.push(Command::HashSetRange { name: name.into(), entries, comparer });
    }

    /// Removes a single field from a hash.
    pub fn hash_remove(&mut self, name: impl Into<String>, field: impl Into<String>, comparer: StringComparer) {
        self.push(Command::HashRemove { name: name.into(), field: field.into(), comparer });
    }

    /// Sets (or, with `expire_in = None`, clears) a hash's TTL.
    pub fn hash_expire(&mut self, name: impl Into<String>, expire_in: Option<Duration>) {
        self.push(Command::HashExpire { name: name.into(), expire_in });
    }

    /// Acquires a distributed lock, tracked by this transaction and
    /// released automatically when the transaction is dropped or commits.
    pub fn acquire_distributed_lock(&mut self, resource: impl Into<String>, timeout: Option<Duration>) -> JobStorageResult<()> {
        let resource = resource.into();
        self.lock_table.try_acquire(&self.owner, &resource, timeout)?;
        self.held_locks.push(resource);
        Ok(())
    }

    /// Runs every buffered effect, then every queue-enqueue, as a single
    /// dispatcher callback. On success, signals one waiter on each touched
    /// queue (best-effort; a timed-out commit skips signalling since the
    /// caller cannot tell whether the write actually landed).
    pub fn commit(mut self) -> JobStorageResult<()> {
        let effects = std::mem::take(&mut self.effects);
        let enqueues = std::mem::take(&mut self.queue_enqueues);
        let touched_queues: Vec<String> = {
            let mut qs: Vec<String> = enqueues.iter().map(|(q, _)| q.clone()).collect();
            qs.sort();
            qs.dedup();
            qs
        };
        let clock = self.clock.clone();
        let options = self.options.clone();

        let result = self.dispatcher.submit(move |state| {
            let now = clock.now();
            for effect in effects {
                effect.execute(state, now, &clock, &options);
            }
            for (queue, key) in enqueues {
                state.queue_enqueue(&queue, key);
            }
        });

        if result.is_ok() {
            for queue in &touched_queues {
                self.queue_waits.signal_one(queue);
            }
        }
        result
    }
}

impl<K: JobKey> Drop for Transaction<K> {
    fn drop(&mut self) {
        for resource in self.held_locks.drain(..) {
            let _ = self.lock_table.release(&self.owner, &resource);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::InvocationData;
    use jobstore_core::Options as JobOptions;

    fn harness() -> (Arc<Dispatcher<u64>>, Arc<LockTable>, Arc<QueueWaitRegistry>, Arc<MonotonicClock>, Arc<JobOptions>) {
        let clock = Arc::new(MonotonicClock::new());
        let options = Arc::new(JobOptions::default());
        let dispatcher = Arc::new(Dispatcher::new(MonotonicClock::new(), options.command_timeout));
        (dispatcher, Arc::new(LockTable::new()), Arc::new(QueueWaitRegistry::new()), clock, options)
    }

    #[test]
    fn commit_applies_effects_then_enqueues_in_order() {
        let (dispatcher, locks, waits, clock, options) = harness();
        dispatcher
            .submit({
                let now = clock.now();
                move |state| {
                    state.job_create(1, InvocationData::new(vec![]), vec![], now, None, false, &JobOptions::default());
                }
            })
            .unwrap();

        let mut txn = Transaction::new("conn-1".into(), dispatcher.clone(), locks, waits, clock, options);
        txn.add_job_state(1, StateRecord::new("Enqueued", MonotonicClock::new().now()), true);
        txn.add_to_queue("q", 1u64);
        txn.commit().unwrap();

        let len = dispatcher.submit(|state| state.queue_len("q")).unwrap();
        assert_eq!(len, 1);
    }

    #[test]
    fn commit_signals_touched_queue() {
        let (dispatcher, locks, waits, clock, options) = harness();
        let node = crate::queue_wait::WaitNode::new();
        waits.list_for("q").add(node.clone());

        let mut txn = Transaction::new("conn-1".into(), dispatcher, locks, waits, clock, options);
        txn.add_to_queue("q", 1u64);
        txn.commit().unwrap();

        assert!(node.is_fired());
    }

    #[test]
    fn drop_releases_locks_acquired_by_transaction() {
        let (dispatcher, locks, waits, clock, options) = harness();
        {
            let mut txn = Transaction::new("conn-1".into(), dispatcher, locks.clone(), waits, clock, options);
            txn.acquire_distributed_lock("R", Some(Duration::from_secs(1))).unwrap();
        }
        assert!(locks.is_empty());
    }
}
