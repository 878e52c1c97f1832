//! Presentation helpers over aggregation results.
//!
//! Aggregation results are ordered by key; these helpers produce the
//! orderings and proportions the charts need.

use crate::models::{AggregationResult, GroupTotal, Share};
use std::cmp::Ordering;

/// Groups sorted by descending total, ties broken by key.
pub fn ranked(result: &AggregationResult) -> Vec<(&str, &GroupTotal)> {
    let mut groups: Vec<_> = result.iter().map(|(k, g)| (k.as_str(), g)).collect();
    groups.sort_by(|a, b| {
        b.1.total
            .partial_cmp(&a.1.total)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });
    groups
}

/// The `n` largest groups.
pub fn top_groups(result: &AggregationResult, n: usize) -> Vec<(&str, &GroupTotal)> {
    let mut groups = ranked(result);
    groups.truncate(n);
    groups
}

/// Per-group share of the level total, largest first.
///
/// A level whose totals sum to zero yields zero percentages.
pub fn shares(result: &AggregationResult) -> Vec<Share> {
    let level_total = result.sum_of_totals();

    ranked(result)
        .into_iter()
        .map(|(key, group)| {
            let percent = if level_total > 0.0 {
                round2(group.total / level_total * 100.0)
            } else {
                0.0
            };
            Share {
                key: key.to_string(),
                total: group.total,
                percent,
            }
        })
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
