//! `jobstore-engine` -- the in-process core of a background-job storage
//! engine: a single-writer dispatcher owning an in-memory data model,
//! a reentrant distributed-lock table, per-queue wait-node stacks for
//! `FetchNextJob`, and the `Connection`/`Transaction`/`MonitoringApi`
//! façades built on top of them.
//!
//! - **Entities** ([`entities`]): jobs, hashes, lists, sorted sets,
//!   counters, queues, servers -- the raw records `MemoryState` holds.
//! - **Indexes** ([`expiry_index`], [`state_index`]): the five expiration
//!   indexes and the case-insensitive state-name index.
//! - **State** ([`memory_state`]): [`MemoryState`], the dispatcher-owned
//!   mutable container; every mutation and typed read lives here.
//! - **Dispatcher** ([`dispatcher`]): the single worker thread serializing
//!   all access to `MemoryState`.
//! - **Locks** ([`lock_table`]): [`LockTable`], reentrant per-resource
//!   locks with blocking wait and timeout.
//! - **Queue waits** ([`queue_wait`]): the wait-node stacks `fetch_next_job`
//!   blocks on between queues going empty and being pushed to.
//! - **Commands** ([`commands`]): the closed catalogue of transactional
//!   write effects.
//! - **Transaction** ([`transaction`]): batched, all-or-nothing writes.
//! - **Statistics** ([`statistics`]): the `stats:<kind>:...` timeline
//!   counter keys.
//! - **Connection** ([`connection`]): the per-client read/write façade.
//! - **Monitoring** ([`monitoring`]): the read-only aggregation façade.

pub mod commands;
pub mod connection;
pub mod dispatcher;
pub mod entities;
pub mod expiry_index;
pub mod lock_table;
pub mod memory_state;
pub mod monitoring;
pub mod queue_wait;
pub mod state_index;
pub mod statistics;
pub mod transaction;

pub use connection::{CancellationToken, Connection, DistributedLock, Fetched, JobData, StateData};
pub use dispatcher::Dispatcher;
pub use lock_table::LockTable;
pub use memory_state::MemoryState;
pub use monitoring::{JobDetails, MonitoringApi, QueueSummary, ServerSummary, Statistics};
pub use queue_wait::QueueWaitRegistry;
pub use transaction::Transaction;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use jobstore_core::{JobKey, KeyProvider, MonotonicClock, Options};

/// Wires together a [`Dispatcher`], [`LockTable`], and [`QueueWaitRegistry`]
/// into the one long-lived object an embedding application constructs
/// per process, then mints [`Connection`]s and a [`MonitoringApi`] from it.
///
/// Each `Connection` gets a distinct `owner` identity for lock attribution,
/// allocated from an internal counter -- a connection is not itself
/// `Sync`-shared across threads in the conventional usage pattern (one per
/// worker thread), but the owner identity must still be unique per
/// connection since the lock table is reentrant *per owner string*.
pub struct JobStorageEngine<K: JobKey, P: KeyProvider<Key = K>> {
    dispatcher: Arc<Dispatcher<K>>,
    lock_table: Arc<LockTable>,
    queue_waits: Arc<QueueWaitRegistry>,
    clock: Arc<MonotonicClock>,
    options: Arc<Options>,
    key_provider: Arc<P>,
    next_owner_id: AtomicU64,
}

impl<K: JobKey, P: KeyProvider<Key = K> + 'static> JobStorageEngine<K, P> {
    /// Builds a new engine, spawning the dispatcher worker thread.
    #[must_use]
    pub fn new(options: Options, key_provider: P) -> Self {
        let clock = MonotonicClock::new();
        let dispatcher_clock = clock.clone();
        let command_timeout = options.command_timeout;
        Self {
            dispatcher: Arc::new(Dispatcher::new(dispatcher_clock, command_timeout)),
            lock_table: Arc::new(LockTable::new()),
            queue_waits: Arc::new(QueueWaitRegistry::new()),
            clock: Arc::new(clock),
            options: Arc::new(options),
            key_provider: Arc::new(key_provider),
            next_owner_id: AtomicU64::new(1),
        }
    }

    /// Mints a new [`Connection`] with a fresh, unique owner identity.
    pub fn connection(&self) -> Connection<K, P> {
        let owner_id = self.next_owner_id.fetch_add(1, Ordering::Relaxed);
        Connection::new(
            format!("conn-{owner_id}"),
            self.dispatcher.clone(),
            self.lock_table.clone(),
            self.queue_waits.clone(),
            self.clock.clone(),
            self.options.clone(),
            self.key_provider.clone(),
        )
    }

    /// Builds a [`MonitoringApi`] reading through this engine's dispatcher.
    pub fn monitoring(&self) -> MonitoringApi<K, P> {
        MonitoringApi::new(self.dispatcher.clone(), self.clock.clone(), self.key_provider.clone())
    }
}
