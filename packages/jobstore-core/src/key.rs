//! Job-identifier policy.
//!
//! Job keys are generic over `K: Ord + Clone + Hash + Send + Sync`; a
//! [`KeyProvider`] owns allocation, parsing, and formatting so the rest of
//! the engine never has to know whether keys are integers or UUIDs.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// A job key type usable throughout the engine.
pub trait JobKey: Ord + Clone + Debug + Hash + Send + Sync + 'static {}

impl<T> JobKey for T where T: Ord + Clone + Debug + Hash + Send + Sync + 'static {}

/// Allocates, parses, and formats job keys.
///
/// Two implementations ship with this crate: [`CounterKeyProvider`] (a
/// 64-bit unsigned counter incremented atomically at allocation) and
/// [`UuidKeyProvider`] (128-bit UUIDs). Job identifiers exposed to clients
/// are always canonical strings; the provider owns that conversion.
pub trait KeyProvider: Send + Sync {
    /// The underlying key type.
    type Key: JobKey;

    /// Allocates the next key. Must never collide with a previously
    /// allocated key for the lifetime of the provider.
    fn next_key(&self) -> Self::Key;

    /// Formats a key as its canonical string representation.
    fn format(&self, key: &Self::Key) -> String;

    /// Parses a canonical string representation back into a key.
    ///
    /// Returns `None` if `s` is not a valid representation for this
    /// provider (e.g. non-numeric string for [`CounterKeyProvider`]).
    fn parse(&self, s: &str) -> Option<Self::Key>;
}

/// 64-bit unsigned counter key provider.
///
/// Keys are allocated by an atomic fetch-and-increment starting at 1 (0 is
/// reserved to make "no key" unambiguous in debugging contexts).
#[derive(Debug, Default)]
pub struct CounterKeyProvider {
    next: AtomicU64,
}

impl CounterKeyProvider {
    /// Creates a counter provider starting allocation at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }
}

impl KeyProvider for CounterKeyProvider {
    type Key = u64;

    fn next_key(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    fn format(&self, key: &u64) -> String {
        key.to_string()
    }

    fn parse(&self, s: &str) -> Option<u64> {
        s.parse().ok()
    }
}

/// 128-bit UUID (v4) key provider.
#[derive(Debug, Default)]
pub struct UuidKeyProvider;

impl UuidKeyProvider {
    /// Creates a new UUID key provider.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl KeyProvider for UuidKeyProvider {
    type Key = Uuid;

    fn next_key(&self) -> Uuid {
        Uuid::new_v4()
    }

    fn format(&self, key: &Uuid) -> String {
        key.to_string()
    }

    fn parse(&self, s: &str) -> Option<Uuid> {
        Uuid::parse_str(s).ok()
    }
}
