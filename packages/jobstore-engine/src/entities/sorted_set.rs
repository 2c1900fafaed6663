//! Sorted-set entity: unique values ordered primarily by score.

use std::collections::{BTreeSet, HashMap};

use jobstore_core::MonotonicTime;
use ordered_float::OrderedFloat;

/// `key -> set of (value, score)` pairs. Primary order is `(score, value)`;
/// the value set is unique by value (re-adding a value updates its score and
/// re-positions it).
#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    /// Primary ordered index: `(score, value)`.
    by_score: BTreeSet<(OrderedFloat<f64>, String)>,
    /// Fast value -> score lookup, kept in sync with `by_score`.
    scores: HashMap<String, f64>,
    /// Expiration time, if any.
    pub expire_at: Option<MonotonicTime>,
}

impl SortedSet {
    /// Creates an empty sorted set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value` with `score`, replacing any existing entry for the same
    /// value (re-positioning it under the new score).
    pub fn add(&mut self, value: String, score: f64) {
        if let Some(&old_score) = self.scores.get(&value) {
            self.by_score.remove(&(OrderedFloat(old_score), value.clone()));
        }
        self.by_score.insert((OrderedFloat(score), value.clone()));
        self.scores.insert(value, score);
    }

    /// Removes `value`. Returns `true` if it was present.
    pub fn remove(&mut self, value: &str) -> bool {
        if let Some(score) = self.scores.remove(value) {
            self.by_score.remove(&(OrderedFloat(score), value.to_string()));
            true
        } else {
            false
        }
    }

    /// Whether `value` is a member of the set.
    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        self.scores.contains_key(value)
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Whether the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Returns the member with the lowest score in `[from, to]`, or `None`
    /// if no member's score falls in that range.
    #[must_use]
    pub fn first_by_lowest_score(&self, from: f64, to: f64) -> Option<String> {
        self.by_score
            .range((OrderedFloat(from), String::new())..)
            .find(|(score, _)| score.0 <= to)
            .map(|(_, v)| v.clone())
    }

    /// Returns up to `count` members with the lowest scores in `[from, to]`,
    /// in ascending score order.
    #[must_use]
    pub fn first_by_lowest_score_multiple(&self, from: f64, to: f64, count: usize) -> Vec<String> {
        self.by_score
            .range((OrderedFloat(from), String::new())..)
            .take_while(|(score, _)| score.0 <= to)
            .take(count)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Number of members with score in `[from, to]`.
    #[must_use]
    pub fn count_in_range(&self, from: f64, to: f64) -> usize {
        self.by_score
            .range((OrderedFloat(from), String::new())..)
            .take_while(|(score, _)| score.0 <= to)
            .count()
    }

    /// Returns members by rank, inclusive `[start, end]`, in ascending
    /// `(score, value)` order.
    #[must_use]
    pub fn range(&self, start: i64, end: i64) -> Vec<String> {
        let len = self.by_score.len() as i64;
        if len == 0 || start > end {
            return Vec::new();
        }
        let start = start.max(0) as usize;
        let end = end.min(len - 1);
        if end < 0 {
            return Vec::new();
        }
        let end = end as usize;
        self.by_score
            .iter()
            .skip(start)
            .take(end - start + 1)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Returns all members in ascending `(score, value)` order.
    #[must_use]
    pub fn all(&self) -> Vec<String> {
        self.by_score.iter().map(|(_, v)| v.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_orders_by_score_then_value() {
        let mut set = SortedSet::new();
        set.add("a".into(), 1.0);
        set.add("b".into(), 2.0);
        set.add("c".into(), 1.5);
        assert_eq!(set.all(), vec!["a".to_string(), "c".to_string(), "b".to_string()]);
    }

    #[test]
    fn first_by_lowest_score_finds_member_in_range() {
        let mut set = SortedSet::new();
        set.add("a".into(), 1.0);
        set.add("b".into(), 2.0);
        set.add("c".into(), 1.5);
        assert_eq!(set.first_by_lowest_score(1.2, 1.8), Some("c".to_string()));
    }

    #[test]
    fn first_by_lowest_score_out_of_range_returns_none() {
        let mut set = SortedSet::new();
        set.add("a".into(), 1.0);
        assert_eq!(set.first_by_lowest_score(5.0, 10.0), None);
    }

    #[test]
    fn range_returns_by_rank() {
        let mut set = SortedSet::new();
        set.add("a".into(), 1.0);
        set.add("b".into(), 2.0);
        set.add("c".into(), 1.5);
        assert_eq!(set.range(0, 2), vec!["a".to_string(), "c".to_string(), "b".to_string()]);
    }

    #[test]
    fn add_then_contains_then_remove_then_not_contains() {
        let mut set = SortedSet::new();
        set.add("v".into(), 3.0);
        assert!(set.contains("v"));
        set.remove("v");
        assert!(!set.contains("v"));
    }

    #[test]
    fn re_adding_value_updates_score_and_position() {
        let mut set = SortedSet::new();
        set.add("a".into(), 5.0);
        set.add("b".into(), 1.0);
        set.add("a".into(), 0.0);
        assert_eq!(set.len(), 2);
        assert_eq!(set.all(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn count_in_range_matches_members_in_bounds() {
        let mut set = SortedSet::new();
        set.add("a".into(), 1.0);
        set.add("b".into(), 2.0);
        set.add("c".into(), 3.0);
        assert_eq!(set.count_in_range(1.5, 2.5), 1);
    }
}
