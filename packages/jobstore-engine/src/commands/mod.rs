//! Transaction effects: small, stateless operation descriptors executed
//! inside the dispatcher, in submission order, never interleaved with
//! another client's commands (the dispatcher is single-threaded).
//!
//! Reified as enum variants rather than `Box<dyn Trait>` objects, per the
//! source-pattern note in the spec's design notes: a closed catalogue of
//! effects is more testable as data than as opaque closures, and
//! `Transaction::commit` needs a homogeneous `Vec` to replay in order.

use std::time::Duration;

use jobstore_core::{JobKey, MonotonicClock, MonotonicTime, Options, StringComparer};

use crate::entities::StateRecord;
use crate::memory_state::MemoryState;
use crate::statistics::{day_key, hour_key, StatKind};

/// One mutating effect, as accumulated by [`crate::transaction::Transaction`].
///
/// Queue enqueues are deliberately **not** a variant here: they live in the
/// transaction's separate queue-enqueues list so they can be replayed after
/// every effect and so the set of touched queues is available for
/// post-commit signalling (see `transaction.rs`).
pub enum Command<K: JobKey> {
    /// Sets or clears (`expire_in = None`) a job's TTL.
    JobExpire { key: K, expire_in: Option<Duration>, ignore_max: bool },
    /// Replaces a job's current state pointer without touching history.
    JobSetState { key: K, state: StateRecord },
    /// Pushes a state onto history, and, when `set_current`, also replaces
    /// the current state pointer; recognized terminal states additionally
    /// bump the statistics timeline counters.
    JobAddState { key: K, state: StateRecord, set_current: bool, max_history: usize },
    /// No-op: this engine does not maintain queue membership beyond the
    /// FIFO itself, so removing from a queue by key is meaningless once
    /// dequeued. Kept so the `Transaction` surface matches the embedding
    /// framework's contract.
    RemoveFromQueue { queue: String, key: K },
    /// Increments (or decrements) a counter, creating it at zero if absent.
    CounterIncrement { name: String, delta: i64, expire_in: Option<Duration> },
    /// Adds one `(value, score)` pair to a sorted set.
    SortedSetAdd { name: String, value: String, score: f64 },
    /// Adds several `(value, score)` pairs to a sorted set.
    SortedSetAddRange { name: String, entries: Vec<(String, f64)> },
    /// Removes a value from a sorted set.
    SortedSetRemove { name: String, value: String },
    /// Deletes a sorted set outright.
    SortedSetDelete { name: String },
    /// Sets or clears (`expire_in = None`) a sorted set's TTL.
    SortedSetExpire { name: String, expire_in: Option<Duration> },
    /// Inserts a value at the head of a list, creating it if absent.
    ListInsert { name: String, value: String },
    /// Removes every occurrence of a value from a list.
    ListRemoveAll { name: String, value: String },
    /// Trims a list to an inclusive index range.
    ListTrim { name: String, start: i64, end: i64 },
    /// Sets or clears (`expire_in = None`) a list's TTL.
    ListExpire { name: String, expire_in: Option<Duration> },
    /// Sets a range of fields on a hash, creating it if absent.
    HashSetRange { name: String, entries: Vec<(String, String)>, comparer: StringComparer },
    /// Removes a single field from a hash.
    HashRemove { name: String, field: String, comparer: StringComparer },
    /// Sets or clears (`expire_in = None`) a hash's TTL.
    HashExpire { name: String, expire_in: Option<Duration> },
}

impl<K: JobKey> Command<K> {
    /// Applies this effect to `state`. `now` and `clock` are needed for TTL
    /// arithmetic and, for terminal-state transitions, for deriving the
    /// wall-clock statistics bucket.
    pub fn execute(self, state: &mut MemoryState<K>, now: MonotonicTime, clock: &MonotonicClock, options: &Options) {
        match self {
            Command::JobExpire { key, expire_in, ignore_max } => {
                state.job_expire(&key, now, expire_in, ignore_max, options);
            }
            Command::JobSetState { key, state: s } => {
                state.job_set_current_state(&key, s);
            }
            Command::JobAddState { key, state: s, set_current, max_history } => {
                let terminal = if set_current { StatKind::from_state_name(&s.name) } else { None };
                state.job_add_state(&key, s, set_current, max_history);
                if let Some(kind) = terminal {
                    let wall_now = clock.to_wall_clock(now);
                    state.counter_increment(&day_key(kind, wall_now), 1, now, None, options);
                    state.counter_increment(&hour_key(kind, wall_now), 1, now, None, options);
                }
            }
            Command::RemoveFromQueue { .. } => {
                // Intentionally inert; see variant doc comment.
            }
            Command::CounterIncrement { name, delta, expire_in } => {
                state.counter_increment(&name, delta, now, expire_in, options);
            }
            Command::SortedSetAdd { name, value, score } => {
                state.set_add(&name, value, score);
            }
            Command::SortedSetAddRange { name, entries } => {
                state.set_add_range(&name, entries);
            }
            Command::SortedSetRemove { name, value } => {
                state.set_remove(&name, &value);
            }
            Command::SortedSetDelete { name } => {
                state.set_delete(&name);
            }
            Command::SortedSetExpire { name, expire_in } => {
                state.set_expire(&name, now, expire_in, options);
            }
            Command::ListInsert { name, value } => {
                state.list_insert(&name, value);
            }
            Command::ListRemoveAll { name, value } => {
                state.list_remove_all(&name, &value);
            }
            Command::ListTrim { name, start, end } => {
                state.list_trim(&name, start, end);
            }
            Command::ListExpire { name, expire_in } => {
                state.list_expire(&name, now, expire_in, options);
            }
            Command::HashSetRange { name, entries, comparer } => {
                state.hash_set_range(&name, entries, comparer);
            }
            Command::HashRemove { name, field, comparer } => {
                state.hash_remove(&name, &field, comparer);
            }
            Command::HashExpire { name, expire_in } => {
                state.hash_expire(&name, now, expire_in, options);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::InvocationData;
    use jobstore_core::MonotonicClock;

    #[test]
    fn job_add_state_terminal_transition_bumps_statistics() {
        let clock = MonotonicClock::new();
        let now = clock.now();
        let mut state: MemoryState<u64> = MemoryState::new();
        state.job_create(1, InvocationData::new(vec![]), vec![], now, None, false, &Options::default());
        let cmd = Command::JobAddState {
            key: 1,
            state: StateRecord::new("Succeeded", now),
            set_current: true,
            max_history: 10,
        };
        cmd.execute(&mut state, now, &clock, &Options::default());
        let wall_now = clock.to_wall_clock(now);
        assert_eq!(state.counter_get(&day_key(StatKind::Succeeded, wall_now)), 1);
        assert_eq!(state.counter_get(&hour_key(StatKind::Succeeded, wall_now)), 1);
    }

    #[test]
    fn job_add_state_non_terminal_transition_does_not_bump_statistics() {
        let clock = MonotonicClock::new();
        let now = clock.now();
        let mut state: MemoryState<u64> = MemoryState::new();
        state.job_create(1, InvocationData::new(vec![]), vec![], now, None, false, &Options::default());
        let cmd = Command::JobAddState {
            key: 1,
            state: StateRecord::new("Processing", now),
            set_current: true,
            max_history: 10,
        };
        cmd.execute(&mut state, now, &clock, &Options::default());
        let wall_now = clock.to_wall_clock(now);
        assert_eq!(state.counter_get(&day_key(StatKind::Succeeded, wall_now)), 0);
    }

    #[test]
    fn job_set_state_does_not_push_history() {
        let clock = MonotonicClock::new();
        let now = clock.now();
        let mut state: MemoryState<u64> = MemoryState::new();
        state.job_create(1, InvocationData::new(vec![]), vec![], now, None, false, &Options::default());
        let cmd = Command::JobSetState { key: 1, state: StateRecord::new("Enqueued", now) };
        cmd.execute(&mut state, now, &clock, &Options::default());
        assert_eq!(state.job_get(&1).unwrap().history.len(), 0);
        assert_eq!(state.job_get(&1).unwrap().current_state.as_ref().unwrap().name, "Enqueued");
    }

    #[test]
    fn remove_from_queue_is_inert() {
        let clock = MonotonicClock::new();
        let now = clock.now();
        let mut state: MemoryState<u64> = MemoryState::new();
        state.queue_enqueue("q", 1u64);
        let cmd = Command::RemoveFromQueue { queue: "q".into(), key: 1 };
        cmd.execute(&mut state, now, &clock, &Options::default());
        assert_eq!(state.queue_len("q"), 1);
    }
}
