//! `jobstore-core` -- monotonic clock, key providers, options, and error
//! kinds shared by the `jobstore-engine` storage engine.
//!
//! This crate provides the foundation layer for the in-process background
//! job storage engine:
//!
//! - **Clock** ([`clock`]): [`MonotonicClock`], immune to wall-clock
//!   adjustments, plus [`ManualClock`] for deterministic tests.
//! - **Key** ([`key`]): [`KeyProvider`] trait with [`CounterKeyProvider`] and
//!   [`UuidKeyProvider`] implementations.
//! - **Comparer** ([`comparer`]): [`StringComparer`] policy for hash/list/set
//!   contents.
//! - **Options** ([`options`]): immutable engine-wide configuration.
//! - **Error** ([`error`]): [`JobStorageError`], the error enum surfaced at
//!   every crate boundary.

pub mod clock;
pub mod comparer;
pub mod error;
pub mod key;
pub mod options;

pub use clock::{ManualClock, MonotonicClock, MonotonicTime};
pub use comparer::{state_name_key, StringComparer};
pub use error::{JobStorageError, JobStorageResult};
pub use key::{CounterKeyProvider, JobKey, KeyProvider, UuidKeyProvider};
pub use options::{IdType, Options};
