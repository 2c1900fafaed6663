//! Statistics timeline counters: `stats:<kind>:YYYY-MM-DD[-HH]`, backed by
//! the [`crate::entities::Counter`] entity. Triggered atomically inside
//! `JobAddState` for recognized terminal states (Invariant 6: recognition
//! is case-insensitive regardless of `Options::string_comparer`).

use std::time::SystemTime;

use chrono::{DateTime, Utc};

/// The two timeline kinds tracked. `as_str` matches the `<kind>` segment of
/// the counter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    /// Job reached a `"Succeeded"` terminal state.
    Succeeded,
    /// Job reached a `"Failed"` terminal state.
    Failed,
}

impl StatKind {
    fn as_str(self) -> &'static str {
        match self {
            StatKind::Succeeded => "succeeded",
            StatKind::Failed => "failed",
        }
    }

    /// Resolves a state name to a tracked kind, case-insensitively. Returns
    /// `None` for any state name that is not a recognized terminal state.
    #[must_use]
    pub fn from_state_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("Succeeded") {
            Some(StatKind::Succeeded)
        } else if name.eq_ignore_ascii_case("Failed") {
            Some(StatKind::Failed)
        } else {
            None
        }
    }
}

/// Day-bucket counter key: `stats:<kind>:YYYY-MM-DD`.
#[must_use]
pub fn day_key(kind: StatKind, wall_now: SystemTime) -> String {
    let dt: DateTime<Utc> = wall_now.into();
    format!("stats:{}:{}", kind.as_str(), dt.format("%Y-%m-%d"))
}

/// Hour-bucket counter key: `stats:<kind>:YYYY-MM-DD-HH`.
#[must_use]
pub fn hour_key(kind: StatKind, wall_now: SystemTime) -> String {
    let dt: DateTime<Utc> = wall_now.into();
    format!("stats:{}:{}", kind.as_str(), dt.format("%Y-%m-%d-%H"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn terminal_state_recognition_is_case_insensitive() {
        assert_eq!(StatKind::from_state_name("succeeded"), Some(StatKind::Succeeded));
        assert_eq!(StatKind::from_state_name("FAILED"), Some(StatKind::Failed));
        assert_eq!(StatKind::from_state_name("Processing"), None);
    }

    #[test]
    fn day_and_hour_keys_use_utc_calendar_fields() {
        // 2024-03-05 14:30:00 UTC
        let t = UNIX_EPOCH + Duration::from_secs(1709648200);
        assert_eq!(day_key(StatKind::Succeeded, t), "stats:succeeded:2024-03-05");
        assert_eq!(hour_key(StatKind::Succeeded, t), "stats:succeeded:2024-03-05-14");
    }
}
