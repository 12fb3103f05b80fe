// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2025 Crossbar contributors. All rights reserved.
//
//  Licensed under the MIT License (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://opensource.org/licenses/MIT
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! The subset-matching pattern index.
//!
//! Stores `(pattern, payload)` pairs with insertion sequence numbers and
//! answers "which registered pattern best matches this request?" under a
//! configurable match order. Lookup is a pure function of the index contents
//! and never suspends; callers convert a miss to an error themselves.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::pattern::Pattern;

/// The policy choosing among multiple matching entries.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MatchOrder {
    /// The match with the greatest number of non-meta keys wins; ties are
    /// broken by earlier insertion.
    #[default]
    Depth,
    /// The earliest-inserted match wins.
    Insertion,
}

/// One registered entry: a pattern, its payload, and its insertion sequence.
#[derive(Clone, Debug)]
pub struct IndexEntry<T> {
    /// The registered pattern.
    pub pattern: Pattern,
    /// The payload stored at registration.
    pub payload: T,
    /// The insertion sequence number, monotonically increasing per index.
    pub seq: u64,
}

/// A subset-matching index from patterns to payloads.
#[derive(Clone, Debug)]
pub struct PatternIndex<T> {
    entries: Vec<IndexEntry<T>>,
    match_order: MatchOrder,
    next_seq: u64,
}

impl<T> PatternIndex<T> {
    /// Creates a new empty [`PatternIndex`] with the given match order.
    #[must_use]
    pub const fn new(match_order: MatchOrder) -> Self {
        Self {
            entries: Vec::new(),
            match_order,
            next_seq: 0,
        }
    }

    /// Returns the configured match order.
    #[must_use]
    pub const fn match_order(&self) -> MatchOrder {
        self.match_order
    }

    /// Returns the number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the index has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry<T>> {
        self.entries.iter()
    }

    /// Inserts an entry for `pattern`.
    pub fn add(&mut self, pattern: Pattern, payload: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(IndexEntry {
            pattern,
            payload,
            seq,
        });
    }

    /// Removes the first entry whose pattern equals `pattern`.
    ///
    /// Returns the removed entry, or `None` when nothing matched; missing
    /// entries are not an error.
    pub fn remove(&mut self, pattern: &Pattern) -> Option<IndexEntry<T>> {
        let position = self.entries.iter().position(|e| &e.pattern == pattern)?;
        Some(self.entries.remove(position))
    }

    /// Returns the first entry whose pattern is exactly equal to `pattern`.
    #[must_use]
    pub fn lookup_exact(&self, pattern: &Pattern) -> Option<&IndexEntry<T>> {
        self.entries.iter().find(|e| &e.pattern == pattern)
    }

    /// Returns the best entry matching `query` under the configured match
    /// order, or `None` when nothing matches.
    #[must_use]
    pub fn lookup(&self, query: &Map<String, Value>) -> Option<&IndexEntry<T>> {
        let mut best: Option<&IndexEntry<T>> = None;
        for entry in &self.entries {
            if !entry.pattern.matches(query) {
                continue;
            }
            best = match (self.match_order, best) {
                (_, None) => Some(entry),
                // Entries iterate in insertion order, so the first match wins
                (MatchOrder::Insertion, Some(current)) => Some(current),
                (MatchOrder::Depth, Some(current)) => {
                    if entry.pattern.depth() > current.pattern.depth() {
                        Some(entry)
                    } else {
                        Some(current)
                    }
                }
            };
        }
        best
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn index(order: MatchOrder, patterns: &[&str]) -> PatternIndex<usize> {
        let mut index = PatternIndex::new(order);
        for (i, p) in patterns.iter().enumerate() {
            index.add(Pattern::parse(p).unwrap(), i);
        }
        index
    }

    #[rstest]
    fn test_add_then_lookup_self() {
        let index = index(MatchOrder::Depth, &["role:math, cmd:sum"]);
        let entry = index
            .lookup(&obj(json!({"role": "math", "cmd": "sum"})))
            .unwrap();
        assert_eq!(entry.payload, 0);
    }

    #[rstest]
    fn test_lookup_superset_query() {
        let index = index(MatchOrder::Depth, &["role:math"]);
        let entry = index
            .lookup(&obj(json!({"role": "math", "cmd": "sum", "a": 2, "b": 3})))
            .unwrap();
        assert_eq!(entry.payload, 0);
    }

    #[rstest]
    fn test_lookup_miss_returns_none() {
        let index = index(MatchOrder::Depth, &["role:math"]);
        assert!(index.lookup(&obj(json!({"role": "other"}))).is_none());
        assert!(index.lookup(&obj(json!({"cmd": "sum"}))).is_none());
    }

    #[rstest]
    fn test_add_remove_restores_prior_state() {
        let mut index = index(MatchOrder::Depth, &["role:a"]);
        let pattern = Pattern::parse("role:b").unwrap();
        index.add(pattern.clone(), 1);
        assert_eq!(index.len(), 2);

        index.remove(&pattern);
        assert_eq!(index.len(), 1);
        assert!(index.lookup(&obj(json!({"role": "b"}))).is_none());
        assert!(index.lookup(&obj(json!({"role": "a"}))).is_some());
    }

    #[rstest]
    fn test_remove_is_idempotent() {
        let mut index = index(MatchOrder::Depth, &["role:a"]);
        let pattern = Pattern::parse("role:missing").unwrap();
        assert!(index.remove(&pattern).is_none());
        assert!(index.remove(&pattern).is_none());
        assert_eq!(index.len(), 1);
    }

    #[rstest]
    fn test_remove_takes_first_equal_only() {
        let mut index = PatternIndex::new(MatchOrder::Insertion);
        let pattern = Pattern::parse("role:a").unwrap();
        index.add(pattern.clone(), 0);
        index.add(pattern.clone(), 1);

        let removed = index.remove(&pattern).unwrap();
        assert_eq!(removed.payload, 0);
        assert_eq!(index.len(), 1);
        let entry = index.lookup(&obj(json!({"role": "a"}))).unwrap();
        assert_eq!(entry.payload, 1);
    }

    #[rstest]
    fn test_depth_order_most_specific_wins() {
        let index = index(MatchOrder::Depth, &["r:x", "r:x, k:1"]);
        let entry = index.lookup(&obj(json!({"r": "x", "k": "1"}))).unwrap();
        assert_eq!(entry.payload, 1);
    }

    #[rstest]
    fn test_depth_order_ties_break_to_earlier_insertion() {
        let index = index(MatchOrder::Depth, &["r:x, k:1", "r:x, j:1"]);
        let entry = index
            .lookup(&obj(json!({"r": "x", "k": "1", "j": "1"})))
            .unwrap();
        assert_eq!(entry.payload, 0);
    }

    #[rstest]
    fn test_depth_ignores_meta_keys() {
        let index = index(MatchOrder::Depth, &["r:x, $timeout:5, $slow:5", "r:x, k:1"]);
        let entry = index.lookup(&obj(json!({"r": "x", "k": "1"}))).unwrap();
        assert_eq!(entry.payload, 1);
    }

    #[rstest]
    fn test_insertion_order_first_wins() {
        let index = index(MatchOrder::Insertion, &["r:x", "r:x"]);
        let entry = index.lookup(&obj(json!({"r": "x"}))).unwrap();
        assert_eq!(entry.payload, 0);
    }

    #[rstest]
    fn test_insertion_order_ignores_depth() {
        let index = index(MatchOrder::Insertion, &["r:x", "r:x, k:1"]);
        let entry = index.lookup(&obj(json!({"r": "x", "k": "1"}))).unwrap();
        assert_eq!(entry.payload, 0);
    }

    #[rstest]
    fn test_lookup_exact_requires_equality() {
        let index = index(MatchOrder::Depth, &["r:x, k:1"]);
        assert!(
            index
                .lookup_exact(&Pattern::parse("r:x, k:1").unwrap())
                .is_some()
        );
        assert!(index.lookup_exact(&Pattern::parse("r:x").unwrap()).is_none());
    }

    #[rstest]
    #[case("depth", MatchOrder::Depth)]
    #[case("insertion", MatchOrder::Insertion)]
    fn test_match_order_from_str(#[case] s: &str, #[case] expected: MatchOrder) {
        use std::str::FromStr;
        assert_eq!(MatchOrder::from_str(s).unwrap(), expected);
    }
}
