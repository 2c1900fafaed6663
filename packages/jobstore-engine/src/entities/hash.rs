//! Hash entity: an ordered string-to-string mapping.

use jobstore_core::{MonotonicTime, StringComparer};

/// `key -> ordered mapping (string -> string)` using the configured string
/// comparer.
///
/// Stored as a flat `Vec` rather than a `HashMap` because entries are
/// typically small and insertion order matters for `all_entries`.
#[derive(Debug, Clone, Default)]
pub struct Hash {
    /// Field/value pairs, in insertion order.
    pub fields: Vec<(String, String)>,
    /// Expiration time, if any.
    pub expire_at: Option<MonotonicTime>,
}

impl Hash {
    /// Creates an empty hash.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a range of fields, overwriting existing values and appending new
    /// ones, in the order given.
    pub fn set_range(&mut self, entries: Vec<(String, String)>, comparer: StringComparer) {
        for (name, value) in entries {
            if let Some(existing) = self.fields.iter_mut().find(|(k, _)| comparer.eq(k, &name)) {
                existing.1 = value;
            } else {
                self.fields.push((name, value));
            }
        }
    }

    /// Gets a field's value.
    #[must_use]
    pub fn get(&self, name: &str, comparer: StringComparer) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| comparer.eq(k, name))
            .map(|(_, v)| v.as_str())
    }

    /// Removes a field by name. Returns `true` if a field was removed.
    pub fn remove(&mut self, name: &str, comparer: StringComparer) -> bool {
        let before = self.fields.len();
        self.fields.retain(|(k, _)| !comparer.eq(k, name));
        self.fields.len() != before
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the hash has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_range_then_get_all_matches_insertion() {
        let mut hash = Hash::new();
        hash.set_range(
            vec![("a".into(), "1".into()), ("b".into(), "2".into())],
            StringComparer::Ordinal,
        );
        assert_eq!(
            hash.fields,
            vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn set_range_overwrites_existing_field() {
        let mut hash = Hash::new();
        hash.set_range(vec![("a".into(), "1".into())], StringComparer::Ordinal);
        hash.set_range(vec![("a".into(), "2".into())], StringComparer::Ordinal);
        assert_eq!(hash.len(), 1);
        assert_eq!(hash.get("a", StringComparer::Ordinal), Some("2"));
    }

    #[test]
    fn remove_then_empty_check() {
        let mut hash = Hash::new();
        hash.set_range(vec![("a".into(), "1".into())], StringComparer::Ordinal);
        assert!(hash.remove("a", StringComparer::Ordinal));
        assert!(hash.is_empty());
        assert!(!hash.remove("a", StringComparer::Ordinal));
    }

    #[test]
    fn case_insensitive_comparer_matches_folded_field() {
        let mut hash = Hash::new();
        hash.set_range(vec![("Name".into(), "x".into())], StringComparer::OrdinalIgnoreCase);
        assert_eq!(hash.get("name", StringComparer::OrdinalIgnoreCase), Some("x"));
    }
}
