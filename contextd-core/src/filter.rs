//! Payload filter structure for [`crate::vectorstore::VectorStore::search_with_filters`].
//!
//! Filters are a configuration struct with enumerated variants, not a
//! variadic builder — unrecognised shapes are a compile error, not a
//! silently-ignored field (spec §9, "Builder vs options").

use crate::document::PayloadValue;
use serde::{Deserialize, Serialize};

/// A composable payload filter expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Payload key equals value.
    Eq(String, PayloadValue),
    /// Payload key's string-list value contains the given string.
    Contains(String, String),
    /// All sub-filters must match.
    And(Vec<Filter>),
    /// Any sub-filter must match.
    Or(Vec<Filter>),
    /// Sub-filter must not match.
    Not(Box<Filter>),
}

impl Filter {
    /// Collect every payload key this filter expression references,
    /// including nested `And`/`Or`/`Not` branches. Used by the tenant
    /// isolation layer to reject filters that touch reserved scope keys.
    #[must_use]
    pub fn referenced_keys(&self) -> Vec<&str> {
        let mut keys = Vec::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Filter::Eq(key, _) | Filter::Contains(key, _) => out.push(key),
            Filter::And(filters) | Filter::Or(filters) => {
                for f in filters {
                    f.collect_keys(out);
                }
            }
            Filter::Not(inner) => inner.collect_keys(out),
        }
    }

    /// Evaluate this filter against a document's payload.
    #[must_use]
    pub fn matches(&self, payload: &crate::document::Payload) -> bool {
        match self {
            Filter::Eq(key, value) => payload.get(key) == Some(value),
            Filter::Contains(key, needle) => payload
                .get(key)
                .and_then(PayloadValue::as_string_list)
                .is_some_and(|list| list.iter().any(|v| v == needle)),
            Filter::And(filters) => filters.iter().all(|f| f.matches(payload)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(payload)),
            Filter::Not(inner) => !inner.matches(payload),
        }
    }

    /// Combine two filters with AND, flattening when either side is already
    /// an `And` to keep the tree shallow.
    #[must_use]
    pub fn and(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), b) => {
                a.push(b);
                Filter::And(a)
            }
            (a, Filter::And(mut b)) => {
                b.insert(0, a);
                Filter::And(b)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }
}

/// Search options (spec §4.6). A plain struct, not keyword arguments:
/// unrecognised fields are a compile error rather than being silently
/// dropped.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Maximum number of results to return.
    pub limit: usize,
    /// Drop results scoring below this threshold.
    pub min_score: f32,
    /// Additional caller-supplied filter, composed with the tenant filter.
    pub filters: Option<Filter>,
    /// Whether archived memories should be included (default `false`).
    pub include_archived: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            min_score: 0.0,
            filters: None,
            include_archived: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referenced_keys_covers_nested_filters() {
        let f = Filter::And(vec![
            Filter::Eq("tenant_id".into(), "acme".into()),
            Filter::Or(vec![Filter::Contains("tags".into(), "rust".into())]),
        ]);
        let keys = f.referenced_keys();
        assert!(keys.contains(&"tenant_id"));
        assert!(keys.contains(&"tags"));
    }

    #[test]
    fn and_flattens() {
        let f = Filter::Eq("a".into(), "1".into()).and(Filter::Eq("b".into(), "2".into()));
        match f {
            Filter::And(items) => assert_eq!(items.len(), 2),
            _ => panic!("expected And"),
        }
    }
}
