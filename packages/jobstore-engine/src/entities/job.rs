//! Job and state-record entities.

use std::collections::VecDeque;

use jobstore_core::MonotonicTime;

/// Opaque, server-internal blob carrying the serialized job invocation.
///
/// The embedding framework owns the serialization format; the engine never
/// inspects the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationData(pub Vec<u8>);

impl InvocationData {
    /// Wraps raw bytes as invocation data.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// A named lifecycle status for a job, with timestamp and ancillary data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRecord {
    /// State name (e.g. `"Enqueued"`, `"Processing"`, `"Succeeded"`).
    pub name: String,
    /// Optional human-readable reason for the transition.
    pub reason: Option<String>,
    /// When this state was recorded.
    pub created_at: MonotonicTime,
    /// Snapshotted key/value data associated with the state (flat array, not
    /// a map, to minimize allocation -- mirrors `RecordMetadata`'s flat
    /// struct style).
    pub data: Vec<(String, String)>,
}

impl StateRecord {
    /// Creates a new state record with no reason and empty data.
    #[must_use]
    pub fn new(name: impl Into<String>, created_at: MonotonicTime) -> Self {
        Self {
            name: name.into(),
            reason: None,
            created_at,
            data: Vec::new(),
        }
    }

    /// Builder: sets the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Builder: sets the snapshotted data.
    #[must_use]
    pub fn with_data(mut self, data: Vec<(String, String)>) -> Self {
        self.data = data;
        self
    }
}

/// A background job: invocation data, parameters, current state, and a
/// bounded history of past states.
#[derive(Debug, Clone)]
pub struct Job<K> {
    /// Job identifier. Immutable once created.
    pub key: K,
    /// Opaque invocation payload, immutable once created.
    pub invocation_data: InvocationData,
    /// When the job was created.
    pub created_at: MonotonicTime,
    /// Ordered key/value parameters. Typically small (1-5 entries).
    pub parameters: Vec<(String, String)>,
    /// The job's current lifecycle state, if any.
    pub current_state: Option<StateRecord>,
    /// Bounded history of past states, oldest first. Capped at
    /// `Options::max_state_history_length`; the oldest entry is dropped when
    /// a push would exceed the cap.
    pub history: VecDeque<StateRecord>,
    /// Expiration time, if any. `None` means the job never expires.
    pub expire_at: Option<MonotonicTime>,
}

impl<K> Job<K> {
    /// Creates a new job with no current state, empty parameters and history.
    pub fn new(key: K, invocation_data: InvocationData, created_at: MonotonicTime) -> Self {
        Self {
            key,
            invocation_data,
            created_at,
            parameters: Vec::new(),
            current_state: None,
            history: VecDeque::new(),
            expire_at: None,
        }
    }

    /// Gets a parameter value by name, using the configured string comparer
    /// for equality.
    #[must_use]
    pub fn get_parameter(
        &self,
        name: &str,
        comparer: jobstore_core::StringComparer,
    ) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| comparer.eq(k, name))
            .map(|(_, v)| v.as_str())
    }

    /// Sets a parameter, replacing any existing value with the same name
    /// under the configured comparer, or appending if absent.
    pub fn set_parameter(
        &mut self,
        name: String,
        value: String,
        comparer: jobstore_core::StringComparer,
    ) {
        if let Some(entry) = self.parameters.iter_mut().find(|(k, _)| comparer.eq(k, &name)) {
            entry.1 = value;
        } else {
            self.parameters.push((name, value));
        }
    }

    /// Pushes a new state onto the bounded history, dropping the oldest
    /// entry if the push would exceed `max_len`.
    pub fn push_history(&mut self, state: StateRecord, max_len: usize) {
        self.history.push_back(state);
        while self.history.len() > max_len {
            self.history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobstore_core::{MonotonicClock, StringComparer};

    fn now() -> MonotonicTime {
        MonotonicClock::new().now()
    }

    #[test]
    fn set_and_get_parameter_round_trip() {
        let mut job = Job::new(1u64, InvocationData::new(vec![]), now());
        job.set_parameter("retries".into(), "3".into(), StringComparer::Ordinal);
        assert_eq!(job.get_parameter("retries", StringComparer::Ordinal), Some("3"));
    }

    #[test]
    fn set_parameter_overwrites_existing() {
        let mut job = Job::new(1u64, InvocationData::new(vec![]), now());
        job.set_parameter("k".into(), "v1".into(), StringComparer::Ordinal);
        job.set_parameter("k".into(), "v2".into(), StringComparer::Ordinal);
        assert_eq!(job.parameters.len(), 1);
        assert_eq!(job.get_parameter("k", StringComparer::Ordinal), Some("v2"));
    }

    #[test]
    fn push_history_caps_at_max_len_preserving_recent_order() {
        let mut job = Job::new(1u64, InvocationData::new(vec![]), now());
        for i in 0..5 {
            job.push_history(StateRecord::new(format!("S{i}"), now()), 3);
        }
        let names: Vec<_> = job.history.iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["S2", "S3", "S4"]);
    }

    #[test]
    fn get_parameter_missing_returns_none() {
        let job = Job::new(1u64, InvocationData::new(vec![]), now());
        assert_eq!(job.get_parameter("nope", StringComparer::Ordinal), None);
    }
}
