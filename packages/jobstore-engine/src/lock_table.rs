//! Reentrant, owner-tagged distributed locks with blocking wait and
//! timeout, keyed by resource name.
//!
//! Grounded in the teacher's `PhiAccrualFailureDetector`
//! (`cluster/failure_detector.rs`): a `parking_lot::Mutex`-guarded
//! `HashMap` of per-resource state, with per-resource condition variables
//! for the wait queue rather than one table-wide lock held across blocking
//! waits. Lock ordering is strictly table -> entry, never the reverse, to
//! avoid deadlocking with the dispatcher thread.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jobstore_core::{JobStorageError, JobStorageResult};
use parking_lot::{Condvar, Mutex};

struct LockState {
    owner: Option<String>,
    level: u32,
    reference_count: u32,
}

struct LockEntry {
    state: Mutex<LockState>,
    condvar: Condvar,
}

impl LockEntry {
    fn new() -> Self {
        Self {
            state: Mutex::new(LockState { owner: None, level: 0, reference_count: 0 }),
            condvar: Condvar::new(),
        }
    }
}

/// Table of per-resource reentrant locks.
///
/// Invariant (enforced by construction): `level >= 0`, `level > 0 => owner
/// is Some`, `level == 0 => owner is None`, `reference_count >= level`.
#[derive(Default)]
pub struct LockTable {
    table: Mutex<HashMap<String, Arc<LockEntry>>>,
}

impl LockTable {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry_for(&self, resource: &str) -> Arc<LockEntry> {
        let mut table = self.table.lock();
        table.entry(resource.to_string()).or_insert_with(|| Arc::new(LockEntry::new())).clone()
    }

    fn remove_if_dead(&self, resource: &str, entry: &Arc<LockEntry>) {
        let mut table = self.table.lock();
        let state = entry.state.lock();
        if state.reference_count == 0 {
            drop(state);
            table.remove(resource);
        }
    }

    /// Acquires `resource` for `owner`, blocking up to `timeout` (`None`
    /// means wait indefinitely) if held by a different owner. Reentrant:
    /// the same owner may acquire the same resource multiple times and
    /// must release it an equal number of times.
    pub fn try_acquire(&self, owner: &str, resource: &str, timeout: Option<Duration>) -> JobStorageResult<()> {
        let entry = self.entry_for(resource);
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut state = entry.state.lock();
        // Whether this call has already counted itself in `reference_count`
        // by parking on the condvar. A waiter that wakes and finds the
        // resource free is still one of the outstanding references other
        // parked callers were counted against, so it must not reset the
        // count back to 1 and erase them.
        let mut counted = false;
        loop {
            if state.level == 0 {
                state.owner = Some(owner.to_string());
                state.level = 1;
                if !counted {
                    state.reference_count = 1;
                }
                return Ok(());
            }
            if state.owner.as_deref() == Some(owner) {
                state.level += 1;
                state.reference_count += 1;
                return Ok(());
            }

            if !counted {
                state.reference_count += 1;
                counted = true;
            }
            let timed_out = match deadline {
                None => {
                    entry.condvar.wait(&mut state);
                    false
                }
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        true
                    } else {
                        entry.condvar.wait_for(&mut state, dl - now).timed_out()
                    }
                }
            };
            if timed_out {
                state.reference_count -= 1;
                let dead = state.reference_count == 0;
                drop(state);
                if dead {
                    self.remove_if_dead(resource, &entry);
                }
                return Err(JobStorageError::LockTimeout { resource: resource.to_string() });
            }
            // Either woken by a release or a spurious wakeup; loop back to
            // recheck the FSM condition from the top.
        }
    }

    /// Releases one reentry level of `resource` held by `owner`. Fails with
    /// `ProtocolError` if `owner` does not currently hold `resource`.
    pub fn release(&self, owner: &str, resource: &str) -> JobStorageResult<()> {
        let entry = {
            let table = self.table.lock();
            table.get(resource).cloned()
        };
        let Some(entry) = entry else {
            return Err(JobStorageError::ProtocolError(format!(
                "release of resource {resource:?} with no outstanding lock"
            )));
        };
        let mut state = entry.state.lock();
        if state.owner.as_deref() != Some(owner) {
            return Err(JobStorageError::ProtocolError(format!(
                "resource {resource:?} released by non-owner"
            )));
        }
        state.level -= 1;
        if state.level == 0 {
            state.owner = None;
            state.reference_count -= 1;
            let dead = state.reference_count == 0;
            drop(state);
            if dead {
                self.remove_if_dead(resource, &entry);
            } else {
                entry.condvar.notify_one();
            }
        }
        Ok(())
    }

    /// Whether the table currently tracks any entry for `resource` (test
    /// helper -- a clean release sequence should leave no entries behind).
    #[must_use]
    pub fn contains(&self, resource: &str) -> bool {
        self.table.lock().contains_key(resource)
    }

    /// Number of resources currently tracked (locked or mid-wait).
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Whether the table tracks no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn acquire_then_release_leaves_table_empty() {
        let table = LockTable::new();
        table.try_acquire("a", "R", None).unwrap();
        table.release("a", "R").unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn reentrant_acquire_requires_matching_releases() {
        let table = LockTable::new();
        table.try_acquire("a", "R", None).unwrap();
        table.try_acquire("a", "R", None).unwrap();
        table.release("a", "R").unwrap();
        assert!(table.contains("R"));
        table.release("a", "R").unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn timeout_on_contended_resource_surfaces_lock_timeout() {
        let table = LockTable::new();
        table.try_acquire("a", "R", None).unwrap();
        let result = table.try_acquire("b", "R", Some(Duration::from_millis(20)));
        assert!(matches!(result, Err(JobStorageError::LockTimeout { .. })));
    }

    #[test]
    fn release_by_non_owner_is_protocol_error() {
        let table = LockTable::new();
        table.try_acquire("a", "R", None).unwrap();
        let result = table.release("b", "R");
        assert!(matches!(result, Err(JobStorageError::ProtocolError(_))));
    }

    #[test]
    fn second_owner_acquires_promptly_after_release() {
        let table = Arc::new(LockTable::new());
        table.try_acquire("a", "R", None).unwrap();

        let acquired = Arc::new(AtomicBool::new(false));
        let table2 = table.clone();
        let acquired2 = acquired.clone();
        let handle = thread::spawn(move || {
            table2.try_acquire("b", "R", Some(Duration::from_secs(5))).unwrap();
            acquired2.store(true, Ordering::SeqCst);
            table2.release("b", "R").unwrap();
        });

        thread::sleep(Duration::from_millis(50));
        table.release("a", "R").unwrap();
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert!(table.is_empty());
    }

    #[test]
    fn third_waiter_is_not_orphaned_when_second_waiter_wins_the_race() {
        let table = Arc::new(LockTable::new());
        table.try_acquire("a", "R", None).unwrap();

        let b_acquired = Arc::new(AtomicBool::new(false));
        let c_acquired = Arc::new(AtomicBool::new(false));

        let table_b = table.clone();
        let b_acquired2 = b_acquired.clone();
        let handle_b = thread::spawn(move || {
            table_b.try_acquire("b", "R", Some(Duration::from_secs(5))).unwrap();
            b_acquired2.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            table_b.release("b", "R").unwrap();
        });

        // Give B time to land on the condvar before C joins it, so B wins
        // the wakeup race and C is left parked on the same entry.
        thread::sleep(Duration::from_millis(20));
        let table_c = table.clone();
        let c_acquired2 = c_acquired.clone();
        let handle_c = thread::spawn(move || {
            // `None` (wait indefinitely): if C's wakeup is ever lost this
            // hangs the test instead of failing it cleanly, which is exactly
            // the deadlock this test exists to catch.
            table_c.try_acquire("c", "R", None).unwrap();
            c_acquired2.store(true, Ordering::SeqCst);
            table_c.release("c", "R").unwrap();
        });

        thread::sleep(Duration::from_millis(40));
        table.release("a", "R").unwrap();

        handle_b.join().unwrap();
        handle_c.join().unwrap();
        assert!(b_acquired.load(Ordering::SeqCst));
        assert!(c_acquired.load(Ordering::SeqCst));
        assert!(table.is_empty());
    }
}
