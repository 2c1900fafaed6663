//! Read-only aggregation API layered over the dispatcher: queue/server
//! summaries, job details, statistics, and paginated job listings.
//!
//! Grounded in the teacher's read-model separation (`service/registry.rs`)
//! and the cursor-style pagination already defined for `StorageEngine`
//! (`storage/engine.rs`): a small struct per listed item, a `from`/`count`
//! pair for paging rather than an opaque cursor token, since the
//! underlying `BTreeSet` supports direct rank-based skip.
//!
//! Every read here is a plain `Dispatcher::submit` round trip -- no
//! `Command`, no lock, no queue-signal bookkeeping -- which is what "fast
//! path" means in this engine (see `SPEC_FULL.md` §9).

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, NaiveDate, Utc};
use jobstore_core::{JobKey, JobStorageResult, KeyProvider, MonotonicClock};

use crate::dispatcher::Dispatcher;
use crate::entities::{InvocationData, StateRecord};
use crate::statistics::{day_key, hour_key, StatKind};

/// One queue's monitoring snapshot.
#[derive(Debug, Clone)]
pub struct QueueSummary {
    pub name: String,
    pub length: usize,
    pub fetched_count: u64,
}

/// One server's monitoring snapshot.
#[derive(Debug, Clone)]
pub struct ServerSummary {
    pub id: String,
    pub queues: Vec<String>,
    pub worker_count: u32,
    pub started_at_utc: SystemTime,
    pub heartbeat_at_utc: SystemTime,
}

/// Full detail view of a single job.
#[derive(Debug, Clone)]
pub struct JobDetails {
    pub id: String,
    pub invocation_data: InvocationData,
    pub created_at_utc: SystemTime,
    pub state_name: Option<String>,
    pub parameters: Vec<(String, String)>,
    pub history: Vec<StateRecord>,
}

/// Aggregate counts across the engine.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    pub counts_by_state: Vec<(String, usize)>,
    pub total_jobs: usize,
}

/// Read-only façade over [`Dispatcher`], parameterized by the same
/// [`KeyProvider`] the owning `Connection` uses, so job ids can be parsed
/// from and formatted to their canonical string form.
pub struct MonitoringApi<K: JobKey, P: KeyProvider<Key = K>> {
    dispatcher: Arc<Dispatcher<K>>,
    clock: Arc<MonotonicClock>,
    key_provider: Arc<P>,
}

impl<K: JobKey, P: KeyProvider<Key = K> + 'static> MonitoringApi<K, P> {
    pub(crate) fn new(dispatcher: Arc<Dispatcher<K>>, clock: Arc<MonotonicClock>, key_provider: Arc<P>) -> Self {
        Self { dispatcher, clock, key_provider }
    }

    /// Current UTC wall-clock time. Reads the clock directly; never
    /// touches `MemoryState` and so never involves the dispatcher thread.
    #[must_use]
    pub fn get_utc_date_time(&self) -> SystemTime {
        self.clock.to_wall_clock(self.clock.now())
    }

    /// One entry per known queue.
    pub fn queue_summaries(&self) -> JobStorageResult<Vec<QueueSummary>> {
        self.dispatcher.submit(|state| {
            state
                .queues()
                .map(|(name, q)| QueueSummary { name: name.to_string(), length: q.len(), fetched_count: q.fetched_count })
                .collect()
        })
    }

    /// One entry per registered server.
    pub fn server_summaries(&self) -> JobStorageResult<Vec<ServerSummary>> {
        let clock = self.clock.clone();
        self.dispatcher.submit(move |state| {
            state
                .servers()
                .map(|s| ServerSummary {
                    id: s.id.clone(),
                    queues: s.queues.clone(),
                    worker_count: s.worker_count,
                    started_at_utc: clock.to_wall_clock(s.started_at),
                    heartbeat_at_utc: clock.to_wall_clock(s.heartbeat_at),
                })
                .collect()
        })
    }

    /// Full detail view of one job, or `None` if it does not exist or `id`
    /// does not parse under the configured key provider.
    pub fn job_details(&self, id: &str) -> JobStorageResult<Option<JobDetails>> {
        let Some(key) = self.key_provider.parse(id) else { return Ok(None) };
        let id = id.to_string();
        let clock = self.clock.clone();
        self.dispatcher.submit(move |state| {
            state.job_get(&key).map(|job| JobDetails {
                id,
                invocation_data: job.invocation_data.clone(),
                created_at_utc: clock.to_wall_clock(job.created_at),
                state_name: job.current_state.as_ref().map(|s| s.name.clone()),
                parameters: job.parameters.clone(),
                history: job.history.iter().cloned().collect(),
            })
        })
    }

    /// Counts of jobs by state name, plus the total job count.
    pub fn statistics(&self) -> JobStorageResult<Statistics> {
        self.dispatcher.submit(|state| Statistics {
            counts_by_state: state.state_bucket_sizes().map(|(name, n)| (name.to_string(), n)).collect(),
            total_jobs: state.job_count(),
        })
    }

    /// Paginated read over one state bucket.
    pub fn jobs_by_state(&self, state_name: &str, from: usize, count: usize) -> JobStorageResult<Vec<JobDetails>> {
        let state_name = state_name.to_string();
        let clock = self.clock.clone();
        let key_provider = self.key_provider.clone();
        self.dispatcher.submit(move |state| {
            state
                .jobs_by_state(&state_name, from, count)
                .into_iter()
                .filter_map(|key| {
                    let job = state.job_get(&key)?;
                    Some(JobDetails {
                        id: key_provider.format(&key),
                        invocation_data: job.invocation_data.clone(),
                        created_at_utc: clock.to_wall_clock(job.created_at),
                        state_name: job.current_state.as_ref().map(|s| s.name.clone()),
                        parameters: job.parameters.clone(),
                        history: job.history.iter().cloned().collect(),
                    })
                })
                .collect()
        })
    }

    /// Per-day counts for `stats:succeeded:YYYY-MM-DD`, for the last
    /// `lookback_days` calendar days (including today).
    pub fn succeeded_by_date(&self, lookback_days: u32) -> JobStorageResult<Vec<(NaiveDate, i64)>> {
        self.by_date(StatKind::Succeeded, lookback_days)
    }

    /// Per-day counts for `stats:failed:YYYY-MM-DD`.
    pub fn failed_by_date(&self, lookback_days: u32) -> JobStorageResult<Vec<(NaiveDate, i64)>> {
        self.by_date(StatKind::Failed, lookback_days)
    }

    fn by_date(&self, kind: StatKind, lookback_days: u32) -> JobStorageResult<Vec<(NaiveDate, i64)>> {
        let now = self.get_utc_date_time();
        let samples: Vec<SystemTime> = (0..lookback_days)
            .filter_map(|n| now.checked_sub(Duration::from_secs(86_400 * u64::from(n))))
            .collect();
        self.dispatcher.submit(move |state| {
            samples
                .into_iter()
                .map(|wall| (DateTime::<Utc>::from(wall).date_naive(), state.counter_get(&day_key(kind, wall))))
                .collect()
        })
    }

    /// Hourly counts for the last 24 hour buckets, `stats:succeeded:*`.
    pub fn hourly_succeeded_counts(&self) -> JobStorageResult<Vec<(DateTime<Utc>, i64)>> {
        self.hourly(StatKind::Succeeded)
    }

    /// Hourly counts for the last 24 hour buckets, `stats:failed:*`.
    pub fn hourly_failed_counts(&self) -> JobStorageResult<Vec<(DateTime<Utc>, i64)>> {
        self.hourly(StatKind::Failed)
    }

    fn hourly(&self, kind: StatKind) -> JobStorageResult<Vec<(DateTime<Utc>, i64)>> {
        let now = self.get_utc_date_time();
        let hours: Vec<(DateTime<Utc>, SystemTime)> = (0..24)
            .filter_map(|n| now.checked_sub(Duration::from_secs(3600 * n)).map(|t| (t.into(), t)))
            .collect();
        self.dispatcher.submit(move |state| {
            hours
                .into_iter()
                .map(|(dt, wall)| (dt, state.counter_get(&hour_key(kind, wall))))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::InvocationData as InvData;
    use jobstore_core::{CounterKeyProvider, Options};

    fn harness() -> (Arc<Dispatcher<u64>>, Arc<MonotonicClock>, Arc<CounterKeyProvider>) {
        let clock = Arc::new(MonotonicClock::new());
        let dispatcher = Arc::new(Dispatcher::new(MonotonicClock::new(), Some(Duration::from_secs(5))));
        (dispatcher, clock, Arc::new(CounterKeyProvider::new()))
    }

    #[test]
    fn queue_summaries_reflect_length_and_fetch_count() {
        let (dispatcher, clock, provider) = harness();
        dispatcher
            .submit(|state| {
                state.queue_enqueue("q", 1u64);
                state.queue_enqueue("q", 2u64);
                state.queue_dequeue("q");
            })
            .unwrap();
        let api = MonitoringApi::new(dispatcher, clock, provider);
        let summaries = api.queue_summaries().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].length, 1);
        assert_eq!(summaries[0].fetched_count, 1);
    }

    #[test]
    fn job_details_returns_none_for_unparseable_id() {
        let (dispatcher, clock, provider) = harness();
        let api = MonitoringApi::new(dispatcher, clock, provider);
        assert!(api.job_details("not-a-number").unwrap().is_none());
    }

    #[test]
    fn job_details_returns_snapshot_for_existing_job() {
        let (dispatcher, clock, provider) = harness();
        let now = clock.now();
        dispatcher
            .submit(move |state| {
                state.job_create(1, InvData::new(vec![1, 2, 3]), vec![("k".into(), "v".into())], now, None, false, &Options::default());
            })
            .unwrap();
        let api = MonitoringApi::new(dispatcher, clock, provider);
        let details = api.job_details("1").unwrap().unwrap();
        assert_eq!(details.parameters, vec![("k".to_string(), "v".to_string())]);
    }

    #[test]
    fn statistics_counts_jobs_by_state() {
        let (dispatcher, clock, provider) = harness();
        let now = clock.now();
        dispatcher
            .submit(move |state| {
                state.job_create(1, InvData::new(vec![]), vec![], now, None, false, &Options::default());
                state.job_add_state(&1, StateRecord::new("Enqueued", now), true, 10);
            })
            .unwrap();
        let api = MonitoringApi::new(dispatcher, clock, provider);
        let stats = api.statistics().unwrap();
        assert_eq!(stats.total_jobs, 1);
        assert!(stats.counts_by_state.iter().any(|(name, n)| name == "enqueued" && *n == 1));
    }
}
