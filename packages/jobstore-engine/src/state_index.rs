//! State-name index: maps a job's current state name to an ordered bucket
//! of jobs in that state, keyed `(state.created_at, job.created_at, key)`.
//!
//! Bucket comparisons are case-insensitive regardless of the configured
//! `StringComparer` (Invariant 6) -- a hard-coded compatibility
//! requirement, resolved via [`jobstore_core::state_name_key`] rather than
//! threading `Options` through this module.

use std::collections::{BTreeSet, HashMap};

use jobstore_core::{state_name_key, MonotonicTime};

type Entry<K> = (MonotonicTime, MonotonicTime, K);

/// `folded state name -> ordered set of (state.created_at, job.created_at, key)`.
///
/// A reverse `membership` map lets `remove`/`move_to` find and drop a job's
/// prior bucket entry in `O(log n)` without scanning every bucket.
#[derive(Debug, Clone)]
pub struct StateIndex<K: Ord + Clone> {
    buckets: HashMap<String, BTreeSet<Entry<K>>>,
    membership: HashMap<K, (String, MonotonicTime, MonotonicTime)>,
}

impl<K: Ord + Clone> Default for StateIndex<K> {
    fn default() -> Self {
        Self { buckets: HashMap::new(), membership: HashMap::new() }
    }
}

impl<K: Ord + Clone + std::hash::Hash> StateIndex<K> {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Places `key` into the bucket for `state_name`, first removing it from
    /// any bucket it previously occupied (Invariant 2: a job appears in
    /// exactly one state bucket).
    pub fn set_state(
        &mut self,
        key: K,
        job_created_at: MonotonicTime,
        state_name: &str,
        state_created_at: MonotonicTime,
    ) {
        self.remove(&key);
        let folded = state_name_key(state_name);
        self.buckets
            .entry(folded.clone())
            .or_default()
            .insert((state_created_at, job_created_at, key.clone()));
        self.membership.insert(key, (folded, state_created_at, job_created_at));
    }

    /// Removes `key` from whichever bucket it currently occupies, dropping
    /// the bucket entirely if it becomes empty. No-op if `key` has no
    /// current state.
    pub fn remove(&mut self, key: &K) {
        if let Some((folded, state_created_at, job_created_at)) = self.membership.remove(key) {
            if let Some(bucket) = self.buckets.get_mut(&folded) {
                bucket.remove(&(state_created_at, job_created_at, key.clone()));
                if bucket.is_empty() {
                    self.buckets.remove(&folded);
                }
            }
        }
    }

    /// Number of jobs currently in `state_name`'s bucket.
    #[must_use]
    pub fn bucket_len(&self, state_name: &str) -> usize {
        self.buckets.get(&state_name_key(state_name)).map_or(0, BTreeSet::len)
    }

    /// Paginated read over a state bucket, in `(state.created_at,
    /// job.created_at, key)` order, skipping `from` entries and returning up
    /// to `count`.
    #[must_use]
    pub fn page(&self, state_name: &str, from: usize, count: usize) -> Vec<K> {
        self.buckets
            .get(&state_name_key(state_name))
            .into_iter()
            .flat_map(|b| b.iter())
            .skip(from)
            .take(count)
            .map(|(_, _, k)| k.clone())
            .collect()
    }

    /// Total number of jobs tracked across all buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.membership.len()
    }

    /// Whether the index tracks no jobs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.membership.is_empty()
    }

    /// Names of all non-empty buckets alongside their sizes, for statistics
    /// aggregation.
    pub fn bucket_sizes(&self) -> impl Iterator<Item = (&str, usize)> {
        self.buckets.iter().map(|(name, set)| (name.as_str(), set.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobstore_core::MonotonicClock;
    use std::time::Duration;

    fn clock() -> MonotonicClock {
        MonotonicClock::new()
    }

    #[test]
    fn set_state_places_job_in_single_bucket() {
        let c = clock();
        let t0 = c.now();
        let mut idx: StateIndex<u64> = StateIndex::new();
        idx.set_state(1, t0, "Enqueued", t0);
        assert_eq!(idx.bucket_len("Enqueued"), 1);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn moving_state_removes_from_old_bucket() {
        let c = clock();
        let t0 = c.now();
        let t1 = t0 + Duration::from_secs(1);
        let mut idx: StateIndex<u64> = StateIndex::new();
        idx.set_state(1, t0, "Enqueued", t0);
        idx.set_state(1, t0, "Processing", t1);
        assert_eq!(idx.bucket_len("Enqueued"), 0);
        assert_eq!(idx.bucket_len("Processing"), 1);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn bucket_lookup_is_case_insensitive() {
        let c = clock();
        let t0 = c.now();
        let mut idx: StateIndex<u64> = StateIndex::new();
        idx.set_state(1, t0, "Succeeded", t0);
        assert_eq!(idx.bucket_len("succeeded"), 1);
        assert_eq!(idx.bucket_len("SUCCEEDED"), 1);
    }

    #[test]
    fn remove_drops_empty_bucket() {
        let c = clock();
        let t0 = c.now();
        let mut idx: StateIndex<u64> = StateIndex::new();
        idx.set_state(1, t0, "Enqueued", t0);
        idx.remove(&1);
        assert_eq!(idx.bucket_len("Enqueued"), 0);
        assert!(idx.is_empty());
    }

    #[test]
    fn page_orders_by_state_then_job_created_at() {
        let c = clock();
        let t0 = c.now();
        let mut idx: StateIndex<u64> = StateIndex::new();
        idx.set_state(2, t0 + Duration::from_secs(2), "Enqueued", t0 + Duration::from_secs(1));
        idx.set_state(1, t0 + Duration::from_secs(1), "Enqueued", t0);
        let page = idx.page("Enqueued", 0, 10);
        assert_eq!(page, vec![1, 2]);
    }
}
