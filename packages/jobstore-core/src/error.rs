//! Error kinds surfaced by the storage engine.
//!
//! A single `thiserror`-derived enum, mirroring the pattern used by
//! `OperationError`/`ClassifyError` in the teacher crate's
//! `service/operation.rs`: one flat enum per crate boundary, `#[from]` for
//! infrastructure errors that just need to propagate.

use thiserror::Error;

/// Errors surfaced from the core to callers (`Connection`, `Transaction`,
/// the monitoring façade).
#[derive(Debug, Error)]
pub enum JobStorageError {
    /// `acquire_distributed_lock` exceeded its timeout without acquiring.
    #[error("timed out waiting for lock on resource {resource:?}")]
    LockTimeout {
        /// Resource name the caller tried to lock.
        resource: String,
    },

    /// The dispatcher did not complete the command within `command_timeout`.
    #[error("command timed out after {elapsed_ms}ms")]
    CommandTimeout {
        /// How long the caller actually waited before giving up.
        elapsed_ms: u64,
    },

    /// Submission or heartbeat for a server that no longer exists, or the
    /// dispatcher thread has shut down.
    #[error("server is gone: {reason}")]
    ServerGone {
        /// Human-readable explanation (unknown server id, or dispatcher shutdown).
        reason: String,
    },

    /// Deserializing a job's invocation data failed. Attached to the result
    /// rather than raised, per the embedding framework's job-loading contract.
    #[error("failed to load job invocation data: {0}")]
    JobLoadException(String),

    /// A caller-supplied argument violated a precondition (inverted range,
    /// empty queue list, non-positive timeout where one is required).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `job_create` was called with a key that already exists. Should not
    /// occur with the key providers shipped in this crate, but is surfaced
    /// rather than silently overwritten.
    #[error("key already exists: {0}")]
    AlreadyExists(String),

    /// An internal engine invariant was violated (lock released by a
    /// non-owner, or similar). Fatal to the operation that triggered it, but
    /// does not take down the dispatcher thread.
    #[error("protocol error: {0}")]
    ProtocolError(String),
}

/// Convenience alias used throughout the engine.
pub type JobStorageResult<T> = Result<T, JobStorageError>;
