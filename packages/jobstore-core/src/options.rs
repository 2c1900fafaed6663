//! Immutable configuration threaded through every component.
//!
//! Mirrors the teacher crate's `ServerConfig` (`service/config.rs`): a plain
//! struct with a `Default` impl, constructed once by the embedder and passed
//! by reference/`Arc` — no env/CLI parsing here, that belongs to the
//! excluded bootstrap layer.

use std::time::Duration;

use crate::comparer::StringComparer;

/// Which [`crate::key::KeyProvider`] backs job identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdType {
    /// 64-bit unsigned counter, incremented atomically at allocation.
    #[default]
    Counter,
    /// 128-bit UUID (v4).
    Uuid,
}

/// Engine-wide configuration, immutable after construction.
#[derive(Debug, Clone)]
pub struct Options {
    /// Key allocation policy for job identifiers.
    pub id_type: IdType,
    /// String comparison policy for hash/list/set contents. Does not affect
    /// the state-name index (see [`crate::comparer::state_name_key`]).
    pub string_comparer: StringComparer,
    /// Caps any requested TTL for jobs, hashes, lists, and sets. `None`
    /// means uncapped. Counters are never capped by this setting.
    pub max_expiration_time: Option<Duration>,
    /// Maximum number of `StateRecord`s retained in a job's history; the
    /// oldest is dropped when a push would exceed this length. Must be
    /// positive.
    pub max_state_history_length: usize,
    /// How long a client will wait for the dispatcher to complete a
    /// submitted command before giving up with `CommandTimeout`. `None`
    /// means wait indefinitely (the Rust-idiomatic equivalent of the
    /// source's "infinite under debugger" special case).
    pub command_timeout: Option<Duration>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            id_type: IdType::default(),
            string_comparer: StringComparer::default(),
            max_expiration_time: Some(Duration::from_secs(3 * 60 * 60)),
            max_state_history_length: 10,
            command_timeout: Some(Duration::from_secs(15)),
        }
    }
}

impl Options {
    /// Clamps a requested TTL to `max_expiration_time`, unless
    /// `ignore_max` is set (used for counters, which may exceed the cap per
    /// Invariant 5).
    #[must_use]
    pub fn clamp_expiration(&self, requested: Duration, ignore_max: bool) -> Duration {
        if ignore_max {
            return requested;
        }
        match self.max_expiration_time {
            Some(max) if requested > max => max,
            _ => requested,
        }
    }
}
