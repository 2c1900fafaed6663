//! The dispatcher-owned mutable container: every entity map, the
//! state-name index, and the five expiration indexes live here. Nothing
//! outside this module ever touches the raw maps; callers only see the
//! typed operations below, executed exclusively on the dispatcher thread.

use std::collections::HashMap;
use std::time::Duration;

use jobstore_core::{JobKey, MonotonicTime, Options, StringComparer};

use crate::entities::{Counter, Hash, InvocationData, Job, List, Queue, Server, SortedSet, StateRecord};
use crate::expiry_index::ExpiryIndex;
use crate::state_index::StateIndex;

/// Central mutable store. Owned exclusively by [`crate::dispatcher::Dispatcher`].
pub struct MemoryState<K: JobKey> {
    jobs: HashMap<K, Job<K>>,
    hashes: HashMap<String, Hash>,
    lists: HashMap<String, List>,
    sorted_sets: HashMap<String, SortedSet>,
    counters: HashMap<String, Counter>,
    queues: HashMap<String, Queue<K>>,
    servers: HashMap<String, Server>,

    state_index: StateIndex<K>,
    job_expiry: ExpiryIndex<K>,
    hash_expiry: ExpiryIndex<String>,
    list_expiry: ExpiryIndex<String>,
    set_expiry: ExpiryIndex<String>,
    counter_expiry: ExpiryIndex<String>,
}

impl<K: JobKey> Default for MemoryState<K> {
    fn default() -> Self {
        Self {
            jobs: HashMap::new(),
            hashes: HashMap::new(),
            lists: HashMap::new(),
            sorted_sets: HashMap::new(),
            counters: HashMap::new(),
            queues: HashMap::new(),
            servers: HashMap::new(),
            state_index: StateIndex::new(),
            job_expiry: ExpiryIndex::new(),
            hash_expiry: ExpiryIndex::new(),
            list_expiry: ExpiryIndex::new(),
            set_expiry: ExpiryIndex::new(),
            counter_expiry: ExpiryIndex::new(),
        }
    }
}

/// Computes a new `expire_at` from `expire_in`, clamped by `options` unless
/// `ignore_max`, removing the entity's old index entry (if any) and
/// inserting the new one. Returns the new `expire_at` to store on the
/// entity.
fn reindex_expiry<IK: Ord + Clone>(
    idx: &mut ExpiryIndex<IK>,
    key: IK,
    old_expire_at: Option<MonotonicTime>,
    now: MonotonicTime,
    expire_in: Option<Duration>,
    ignore_max: bool,
    options: &Options,
) -> Option<MonotonicTime> {
    if let Some(old) = old_expire_at {
        idx.remove(old, &key);
    }
    let new_expire_at = expire_in.map(|d| now + options.clamp_expiration(d, ignore_max));
    if let Some(t) = new_expire_at {
        idx.insert(t, key);
    }
    new_expire_at
}

impl<K: JobKey> MemoryState<K> {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ---- Jobs ----------------------------------------------------------

    /// Creates a job, failing with `false` if `key` already exists.
    pub fn job_create(
        &mut self,
        key: K,
        invocation_data: InvocationData,
        parameters: Vec<(String, String)>,
        created_at: MonotonicTime,
        expire_in: Option<Duration>,
        ignore_max: bool,
        options: &Options,
    ) -> bool {
        if self.jobs.contains_key(&key) {
            return false;
        }
        let mut job = Job::new(key.clone(), invocation_data, created_at);
        job.parameters = parameters;
        job.expire_at = reindex_expiry(&mut self.job_expiry, key.clone(), None, created_at, expire_in, ignore_max, options);
        self.jobs.insert(key, job);
        true
    }

    /// Returns an immutable view of a job, if present.
    #[must_use]
    pub fn job_get(&self, key: &K) -> Option<&Job<K>> {
        self.jobs.get(key)
    }

    /// Sets a job parameter. No-op if the job is absent.
    pub fn job_set_parameter(&mut self, key: &K, name: String, value: String, comparer: StringComparer) {
        if let Some(job) = self.jobs.get_mut(key) {
            job.set_parameter(name, value, comparer);
        }
    }

    /// Appends a state to the job's bounded history, and, when
    /// `set_current` is true, makes it the current state and repositions
    /// the job in the state-name index. No-op if the job is absent.
    pub fn job_add_state(&mut self, key: &K, state: StateRecord, set_current: bool, max_history: usize) {
        let Some(job) = self.jobs.get_mut(key) else { return };
        let job_created_at = job.created_at;
        if set_current {
            let state_created_at = state.created_at;
            let name = state.name.clone();
            job.current_state = Some(state.clone());
            self.state_index.set_state(key.clone(), job_created_at, &name, state_created_at);
        }
        job.push_history(state, max_history);
    }

    /// Replaces a job's current state pointer without touching its bounded
    /// history. No-op if the job is absent.
    pub fn job_set_current_state(&mut self, key: &K, state: StateRecord) {
        let Some(job) = self.jobs.get_mut(key) else { return };
        let job_created_at = job.created_at;
        let state_created_at = state.created_at;
        let name = state.name.clone();
        job.current_state = Some(state);
        self.state_index.set_state(key.clone(), job_created_at, &name, state_created_at);
    }

    /// Sets (or clears, with `expire_in = None`) a job's TTL.
    pub fn job_expire(&mut self, key: &K, now: MonotonicTime, expire_in: Option<Duration>, ignore_max: bool, options: &Options) -> bool {
        let Some(job) = self.jobs.get_mut(key) else { return false };
        job.expire_at = reindex_expiry(&mut self.job_expiry, key.clone(), job.expire_at, now, expire_in, ignore_max, options);
        true
    }

    /// Removes a job entirely, dropping it from the state-name and
    /// expiration indexes first (Invariant 1).
    pub fn job_delete(&mut self, key: &K) -> bool {
        let Some(job) = self.jobs.remove(key) else { return false };
        self.state_index.remove(key);
        if let Some(expire_at) = job.expire_at {
            self.job_expiry.remove(expire_at, key);
        }
        true
    }

    /// Paginated read over a state bucket, in index order.
    #[must_use]
    pub fn jobs_by_state(&self, state_name: &str, from: usize, count: usize) -> Vec<K> {
        self.state_index.page(state_name, from, count)
    }

    /// Number of jobs currently in `state_name`.
    #[must_use]
    pub fn state_count(&self, state_name: &str) -> usize {
        self.state_index.bucket_len(state_name)
    }

    /// All non-empty state buckets with their sizes.
    pub fn state_bucket_sizes(&self) -> impl Iterator<Item = (&str, usize)> {
        self.state_index.bucket_sizes()
    }

    /// Total number of jobs held.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    // ---- Hashes ----------------------------------------------------------

    /// Sets a range of fields on a hash, creating it if absent.
    pub fn hash_set_range(&mut self, name: &str, entries: Vec<(String, String)>, comparer: StringComparer) {
        self.hashes.entry(name.to_string()).or_default().set_range(entries, comparer);
    }

    /// Reads a field's value.
    #[must_use]
    pub fn hash_get(&self, name: &str, field: &str, comparer: StringComparer) -> Option<&str> {
        self.hashes.get(name)?.get(field, comparer)
    }

    /// Reads all fields, in insertion order.
    #[must_use]
    pub fn hash_all(&self, name: &str) -> Vec<(String, String)> {
        self.hashes.get(name).map(|h| h.fields.clone()).unwrap_or_default()
    }

    /// Number of fields.
    #[must_use]
    pub fn hash_len(&self, name: &str) -> usize {
        self.hashes.get(name).map_or(0, Hash::len)
    }

    /// Remaining TTL-bearing timestamp, if any.
    #[must_use]
    pub fn hash_expire_at(&self, name: &str) -> Option<MonotonicTime> {
        self.hashes.get(name)?.expire_at
    }

    /// Removes a field. Deletes the hash entirely if it becomes empty
    /// (Invariant 7).
    pub fn hash_remove(&mut self, name: &str, field: &str, comparer: StringComparer) {
        if let Some(hash) = self.hashes.get_mut(name) {
            hash.remove(field, comparer);
            if hash.is_empty() {
                self.hash_delete(name);
            }
        }
    }

    /// Deletes a hash outright.
    pub fn hash_delete(&mut self, name: &str) {
        if let Some(hash) = self.hashes.remove(name) {
            if let Some(expire_at) = hash.expire_at {
                self.hash_expiry.remove(expire_at, &name.to_string());
            }
        }
    }

    /// Sets or clears a hash's TTL. No-op if absent.
    pub fn hash_expire(&mut self, name: &str, now: MonotonicTime, expire_in: Option<Duration>, options: &Options) {
        if let Some(hash) = self.hashes.get_mut(name) {
            hash.expire_at = reindex_expiry(&mut self.hash_expiry, name.to_string(), hash.expire_at, now, expire_in, false, options);
        }
    }

    // ---- Lists -------------------------------------------------------

    /// Inserts a value at the head of a list, creating it if absent.
    pub fn list_insert(&mut self, name: &str, value: String) {
        self.lists.entry(name.to_string()).or_default().push_front(value);
    }

    /// Removes every occurrence of `value`. Deletes the list if it becomes
    /// empty.
    pub fn list_remove_all(&mut self, name: &str, value: &str) -> usize {
        let Some(list) = self.lists.get_mut(name) else { return 0 };
        let n = list.remove_all(value);
        if list.is_empty() {
            self.list_delete(name);
        }
        n
    }

    /// Trims a list to `[start, end]`. Deletes it if the trim empties it.
    pub fn list_trim(&mut self, name: &str, start: i64, end: i64) {
        let Some(list) = self.lists.get_mut(name) else { return };
        list.trim(start, end);
        if list.is_empty() {
            self.list_delete(name);
        }
    }

    /// Deletes a list outright.
    pub fn list_delete(&mut self, name: &str) {
        if let Some(list) = self.lists.remove(name) {
            if let Some(expire_at) = list.expire_at {
                self.list_expiry.remove(expire_at, &name.to_string());
            }
        }
    }

    /// Sets or clears a list's TTL. No-op if absent.
    pub fn list_expire(&mut self, name: &str, now: MonotonicTime, expire_in: Option<Duration>, options: &Options) {
        if let Some(list) = self.lists.get_mut(name) {
            list.expire_at = reindex_expiry(&mut self.list_expiry, name.to_string(), list.expire_at, now, expire_in, false, options);
        }
    }

    /// Returns elements in `[start, end]`.
    #[must_use]
    pub fn list_range(&self, name: &str, start: i64, end: i64) -> Vec<String> {
        self.lists.get(name).map(|l| l.range(start, end)).unwrap_or_default()
    }

    /// Returns every element, most recent first.
    #[must_use]
    pub fn list_all(&self, name: &str) -> Vec<String> {
        self.lists.get(name).map(List::all).unwrap_or_default()
    }

    /// Number of elements.
    #[must_use]
    pub fn list_len(&self, name: &str) -> usize {
        self.lists.get(name).map_or(0, List::len)
    }

    /// Remaining TTL-bearing timestamp, if any.
    #[must_use]
    pub fn list_expire_at(&self, name: &str) -> Option<MonotonicTime> {
        self.lists.get(name)?.expire_at
    }

    // ---- SortedSets ----------------------------------------------------

    /// Adds a single `(value, score)` pair, creating the set if absent.
    pub fn set_add(&mut self, name: &str, value: String, score: f64) {
        self.sorted_sets.entry(name.to_string()).or_default().add(value, score);
    }

    /// Adds several `(value, score)` pairs, creating the set if absent.
    pub fn set_add_range(&mut self, name: &str, entries: Vec<(String, f64)>) {
        let set = self.sorted_sets.entry(name.to_string()).or_default();
        for (value, score) in entries {
            set.add(value, score);
        }
    }

    /// Removes a value. Deletes the set if it becomes empty.
    pub fn set_remove(&mut self, name: &str, value: &str) {
        let Some(set) = self.sorted_sets.get_mut(name) else { return };
        set.remove(value);
        if set.is_empty() {
            self.set_delete(name);
        }
    }

    /// Deletes a sorted set outright.
    pub fn set_delete(&mut self, name: &str) {
        if let Some(set) = self.sorted_sets.remove(name) {
            if let Some(expire_at) = set.expire_at {
                self.set_expiry.remove(expire_at, &name.to_string());
            }
        }
    }

    /// Sets or clears a sorted set's TTL. No-op if absent.
    pub fn set_expire(&mut self, name: &str, now: MonotonicTime, expire_in: Option<Duration>, options: &Options) {
        if let Some(set) = self.sorted_sets.get_mut(name) {
            set.expire_at = reindex_expiry(&mut self.set_expiry, name.to_string(), set.expire_at, now, expire_in, false, options);
        }
    }

    /// Whether `value` is a member.
    #[must_use]
    pub fn set_contains(&self, name: &str, value: &str) -> bool {
        self.sorted_sets.get(name).is_some_and(|s| s.contains(value))
    }

    /// Number of members.
    #[must_use]
    pub fn set_count(&self, name: &str) -> usize {
        self.sorted_sets.get(name).map_or(0, SortedSet::len)
    }

    /// Lowest-scoring member in `[from, to]`.
    #[must_use]
    pub fn set_first_by_lowest_score(&self, name: &str, from: f64, to: f64) -> Option<String> {
        self.sorted_sets.get(name)?.first_by_lowest_score(from, to)
    }

    /// Up to `count` lowest-scoring members in `[from, to]`.
    #[must_use]
    pub fn set_first_by_lowest_score_multiple(&self, name: &str, from: f64, to: f64, count: usize) -> Vec<String> {
        self.sorted_sets
            .get(name)
            .map(|s| s.first_by_lowest_score_multiple(from, to, count))
            .unwrap_or_default()
    }

    /// Members by rank, `[start, end]`.
    #[must_use]
    pub fn set_range(&self, name: &str, start: i64, end: i64) -> Vec<String> {
        self.sorted_sets.get(name).map(|s| s.range(start, end)).unwrap_or_default()
    }

    /// All members, ascending `(score, value)` order.
    #[must_use]
    pub fn set_all(&self, name: &str) -> Vec<String> {
        self.sorted_sets.get(name).map(SortedSet::all).unwrap_or_default()
    }

    /// Remaining TTL-bearing timestamp, if any.
    #[must_use]
    pub fn set_expire_at(&self, name: &str) -> Option<MonotonicTime> {
        self.sorted_sets.get(name)?.expire_at
    }

    // ---- Counters -------------------------------------------------------

    /// Increments (or decrements, with a negative delta) a counter,
    /// creating it at zero if absent. `MaxExpirationTime` never applies to
    /// counters (Invariant 5).
    pub fn counter_increment(&mut self, name: &str, delta: i64, now: MonotonicTime, expire_in: Option<Duration>, options: &Options) -> i64 {
        let counter = self.counters.entry(name.to_string()).or_default();
        counter.increment(delta);
        if expire_in.is_some() {
            counter.expire_at = reindex_expiry(&mut self.counter_expiry, name.to_string(), counter.expire_at, now, expire_in, true, options);
        }
        counter.value
    }

    /// Reads a counter's current value (zero if it has never been
    /// incremented).
    #[must_use]
    pub fn counter_get(&self, name: &str) -> i64 {
        self.counters.get(name).map_or(0, |c| c.value)
    }

    // ---- Queues --------------------------------------------------------

    /// Returns the queue named `name`, creating it if absent.
    pub fn queue_get_or_create(&mut self, name: &str) -> &mut Queue<K> {
        self.queues.entry(name.to_string()).or_default()
    }

    /// Enqueues `key` onto `name`'s queue, creating it if absent.
    pub fn queue_enqueue(&mut self, name: &str, key: K) {
        self.queue_get_or_create(name).enqueue(key);
    }

    /// Dequeues the head of `name`'s queue, if any.
    pub fn queue_dequeue(&mut self, name: &str) -> Option<K> {
        self.queues.get_mut(name)?.dequeue()
    }

    /// Current queue length.
    #[must_use]
    pub fn queue_len(&self, name: &str) -> usize {
        self.queues.get(name).map_or(0, Queue::len)
    }

    /// Names of all known queues.
    pub fn queue_names(&self) -> impl Iterator<Item = &str> {
        self.queues.keys().map(String::as_str)
    }

    /// All queues by name, for monitoring summaries.
    pub fn queues(&self) -> impl Iterator<Item = (&str, &Queue<K>)> {
        self.queues.iter().map(|(name, q)| (name.as_str(), q))
    }

    // ---- Servers --------------------------------------------------------

    /// Registers or re-registers a server, resetting its heartbeat.
    pub fn server_announce(&mut self, id: String, queues: Vec<String>, worker_count: u32, now: MonotonicTime) {
        self.servers.insert(id.clone(), Server::new(id, queues, worker_count, now));
    }

    /// Refreshes a server's heartbeat. Returns `false` if the server is
    /// unknown (caller surfaces `ServerGone`).
    pub fn server_heartbeat(&mut self, id: &str, now: MonotonicTime) -> bool {
        let Some(server) = self.servers.get_mut(id) else { return false };
        server.heartbeat_at = now;
        true
    }

    /// Removes a server by id.
    pub fn server_delete(&mut self, id: &str) {
        self.servers.remove(id);
    }

    /// Removes every server whose heartbeat is older than `timeout`.
    /// Returns the number removed.
    pub fn server_remove_timed_out(&mut self, now: MonotonicTime, timeout: Duration) -> usize {
        let dead: Vec<String> = self
            .servers
            .iter()
            .filter(|(_, s)| s.is_timed_out(now, timeout))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &dead {
            self.servers.remove(id);
        }
        dead.len()
    }

    /// All registered servers.
    pub fn servers(&self) -> impl Iterator<Item = &Server> {
        self.servers.values()
    }

    // ---- Eviction --------------------------------------------------------

    /// Deletes every expired entity across all five expiration indexes.
    /// `O(k log n)` where `k` is the number of entries that have expired by
    /// `now`. Idempotent: running it twice with the same `now` is a no-op
    /// the second time.
    pub fn evict_expired_entries(&mut self, now: MonotonicTime) {
        while let Some(&(expire_at, ref key)) = self.job_expiry.peek_min() {
            if expire_at > now {
                break;
            }
            let key = key.clone();
            self.job_delete(&key);
        }
        while let Some(&(expire_at, ref name)) = self.hash_expiry.peek_min() {
            if expire_at > now {
                break;
            }
            let name = name.clone();
            self.hash_delete(&name);
        }
        while let Some(&(expire_at, ref name)) = self.list_expiry.peek_min() {
            if expire_at > now {
                break;
            }
            let name = name.clone();
            self.list_delete(&name);
        }
        while let Some(&(expire_at, ref name)) = self.set_expiry.peek_min() {
            if expire_at > now {
                break;
            }
            let name = name.clone();
            self.set_delete(&name);
        }
        while let Some(&(expire_at, ref name)) = self.counter_expiry.peek_min() {
            if expire_at > now {
                break;
            }
            let name = name.clone();
            self.counter_expiry.remove(expire_at, &name);
            self.counters.remove(&name);
        }
    }
}
