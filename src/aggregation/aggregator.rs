//! Paginated emission aggregation.
//!
//! This module pulls pages from a [`RecordSource`], folds the surviving
//! records into per-group fixed-point sums and rounds every level once
//! the source is exhausted.

use crate::aggregation::fixed::FixedSum;
use crate::models::{AggregationResult, Dimension, DimensionFilter, EmissionRecord, GroupTotal};
use crate::source::{RecordSource, SourceError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Number of records requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Errors raised by an aggregation call.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// The record source could not deliver a page.
    #[error("record source unavailable at offset {offset}: {source}")]
    SourceUnavailable {
        offset: usize,
        #[source]
        source: SourceError,
    },

    #[error("at most two group dimensions are supported, got {0}")]
    TooManyDimensions(usize),
}

/// The dimension path a call groups by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupBy {
    /// Only the grand total.
    Total,
    One(Dimension),
    /// Outer dimension with a nested breakdown by the inner one.
    Nested(Dimension, Dimension),
}

impl GroupBy {
    /// Builds a grouping from an ordered dimension list of length 0-2.
    pub fn from_dimensions(dimensions: &[Dimension]) -> Result<Self, AggregateError> {
        match dimensions {
            [] => Ok(GroupBy::Total),
            [outer] => Ok(GroupBy::One(*outer)),
            [outer, inner] => Ok(GroupBy::Nested(*outer, *inner)),
            more => Err(AggregateError::TooManyDimensions(more.len())),
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupBy::Total => f.write_str("total"),
            GroupBy::One(outer) => write!(f, "{}", outer),
            GroupBy::Nested(outer, inner) => write!(f, "{}/{}", outer, inner),
        }
    }
}

/// Everything an aggregation call hands back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationOutcome {
    pub result: AggregationResult,
    /// Rows excluded (fully or from the nested level) for data-quality reasons.
    pub skipped_count: usize,
    /// Rounded sum of every folded emission.
    pub total: f64,
    pub records_folded: usize,
    pub pages_fetched: usize,
}

/// Why a row was excluded from (part of) the fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SkipReason {
    /// The source could not read the row as a record at all.
    Unreadable,
    MissingEmission,
    InvalidEmission,
    InvalidMonth,
    MissingKey(Dimension),
    MissingNestedKey(Dimension),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Unreadable => f.write_str("unreadable row"),
            SkipReason::MissingEmission => f.write_str("missing emission"),
            SkipReason::InvalidEmission => f.write_str("negative or non-finite emission"),
            SkipReason::InvalidMonth => f.write_str("month outside 1-12"),
            SkipReason::MissingKey(dim) => write!(f, "missing {}", dim),
            SkipReason::MissingNestedKey(dim) => write!(f, "missing {} (kept in parent total)", dim),
        }
    }
}

#[derive(Debug, Default)]
struct GroupFold {
    total: FixedSum,
    unattributed: FixedSum,
    has_unattributed: bool,
    children: BTreeMap<String, FixedSum>,
}

/// Running state of one aggregation call.
#[derive(Debug)]
struct Fold {
    group_by: GroupBy,
    grand_total: FixedSum,
    groups: BTreeMap<String, GroupFold>,
    skipped: BTreeMap<SkipReason, usize>,
    folded: usize,
    filtered_out: usize,
}

impl Fold {
    fn new(group_by: GroupBy) -> Self {
        Self {
            group_by,
            grand_total: FixedSum::default(),
            groups: BTreeMap::new(),
            skipped: BTreeMap::new(),
            folded: 0,
            filtered_out: 0,
        }
    }

    fn skip(&mut self, reason: SkipReason, record: &EmissionRecord) {
        debug!("Skipping record ({}): {:?}", reason, record);
        *self.skipped.entry(reason).or_default() += 1;
    }

    fn reject(&mut self, count: usize) {
        if count > 0 {
            *self.skipped.entry(SkipReason::Unreadable).or_default() += count;
        }
    }

    fn push(&mut self, filter: &DimensionFilter, record: &EmissionRecord) {
        if !filter.matches(record) {
            self.filtered_out += 1;
            return;
        }

        let emission = match record.emission {
            None => return self.skip(SkipReason::MissingEmission, record),
            Some(value) if value < 0.0 => return self.skip(SkipReason::InvalidEmission, record),
            Some(value) => match FixedSum::from_emission(value) {
                Some(fixed) => fixed,
                None => return self.skip(SkipReason::InvalidEmission, record),
            },
        };

        if record.month.is_some_and(|m| !(1..=12).contains(&m)) {
            return self.skip(SkipReason::InvalidMonth, record);
        }

        match self.group_by {
            GroupBy::Total => {}
            GroupBy::One(outer) => {
                let Some(key) = outer.key_of(record) else {
                    return self.skip(SkipReason::MissingKey(outer), record);
                };
                self.groups.entry(key).or_default().total += emission;
            }
            GroupBy::Nested(outer, inner) => {
                let Some(key) = outer.key_of(record) else {
                    return self.skip(SkipReason::MissingKey(outer), record);
                };
                let inner_key = inner.key_of(record);
                let group = self.groups.entry(key).or_default();
                group.total += emission;
                match inner_key {
                    Some(child) => *group.children.entry(child).or_default() += emission,
                    None => {
                        group.unattributed += emission;
                        group.has_unattributed = true;
                        self.skip(SkipReason::MissingNestedKey(inner), record);
                    }
                }
            }
        }

        self.grand_total += emission;
        self.folded += 1;
    }

    fn finish(self, pages_fetched: usize) -> AggregationOutcome {
        let nested = matches!(self.group_by, GroupBy::Nested(..));
        let skipped_count: usize = self.skipped.values().sum();

        if skipped_count > 0 {
            let breakdown: Vec<String> = self
                .skipped
                .iter()
                .map(|(reason, count)| format!("{} {}", count, reason))
                .collect();
            warn!(
                "Excluded {} record(s) for data quality: {}",
                skipped_count,
                breakdown.join(", ")
            );
        }
        debug!(
            "Folded {} record(s), {} outside the filter",
            self.folded, self.filtered_out
        );

        let mut result = AggregationResult::new();
        for (key, group) in self.groups {
            let children = nested.then(|| {
                group
                    .children
                    .into_iter()
                    .map(|(child, sum)| (child, GroupTotal::leaf(sum.rounded())))
                    .collect()
            });
            result.insert(
                key,
                GroupTotal {
                    total: group.total.rounded(),
                    children,
                    unattributed: group
                        .has_unattributed
                        .then(|| group.unattributed.rounded()),
                },
            );
        }

        AggregationOutcome {
            result,
            skipped_count,
            total: self.grand_total.rounded(),
            records_folded: self.folded,
            pages_fetched,
        }
    }
}

/// Aggregates emission records page by page.
#[derive(Debug, Clone)]
pub struct Aggregator {
    page_size: usize,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl Aggregator {
    /// Create an aggregator requesting `page_size` records per page.
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Fold every record matching `filter` into totals grouped by `group_by`.
    ///
    /// Pages are requested until one comes back empty, short, or flagged
    /// as the last. A source failure aborts the call; malformed rows never do.
    pub async fn aggregate<S>(
        &self,
        source: &S,
        filter: &DimensionFilter,
        group_by: GroupBy,
    ) -> Result<AggregationOutcome, AggregateError>
    where
        S: RecordSource + ?Sized,
    {
        info!("Aggregating by {} ({})", group_by, filter);

        let mut fold = Fold::new(group_by);
        let mut offset = 0;
        let mut pages = 0;

        loop {
            let page = source
                .fetch_page(filter, offset, self.page_size)
                .await
                .map_err(|source| AggregateError::SourceUnavailable { offset, source })?;
            pages += 1;

            let received = page.rows.len() + page.rejected;
            debug!(
                "Page {} at offset {}: {} row(s), {} unreadable, has_more={}",
                pages, offset, received, page.rejected, page.has_more
            );

            if received == 0 {
                break;
            }

            fold.reject(page.rejected);
            for record in &page.rows {
                fold.push(filter, record);
            }

            if !page.has_more || received < self.page_size {
                break;
            }
            offset += self.page_size;
        }

        Ok(fold.finish(pages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{InMemorySource, RecordPage};
    use async_trait::async_trait;
    use std::sync::Mutex;

    async fn aggregate<S: RecordSource + ?Sized>(
        source: &S,
        filter: &DimensionFilter,
        group_by: GroupBy,
    ) -> Result<AggregationOutcome, AggregateError> {
        Aggregator::default().aggregate(source, filter, group_by).await
    }

    fn rec(building: &str, room: &str, emission: f64) -> EmissionRecord {
        EmissionRecord::new("Ganesha", building, room, "Meter", 2024, 1, emission)
    }

    /// Serves pre-built pages in order, recording the offsets it was asked for.
    struct ScriptedSource {
        pages: Vec<Vec<EmissionRecord>>,
        /// Unreadable rows reported alongside each page.
        rejected: Vec<usize>,
        calls: Mutex<Vec<(usize, usize)>>,
    }

    impl ScriptedSource {
        fn new(pages: Vec<Vec<EmissionRecord>>) -> Self {
            Self {
                pages,
                rejected: Vec::new(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RecordSource for ScriptedSource {
        async fn fetch_page(
            &self,
            _filter: &DimensionFilter,
            offset: usize,
            limit: usize,
        ) -> Result<RecordPage, SourceError> {
            let mut calls = self.calls.lock().unwrap();
            let index = calls.len();
            calls.push((offset, limit));
            let rows = self.pages.get(index).cloned().unwrap_or_default();
            let has_more = index + 1 < self.pages.len();
            let rejected = self.rejected.get(index).copied().unwrap_or_default();
            Ok(RecordPage {
                rows,
                has_more,
                rejected,
            })
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    struct FailingSource;

    #[async_trait]
    impl RecordSource for FailingSource {
        async fn fetch_page(
            &self,
            _filter: &DimensionFilter,
            _offset: usize,
            _limit: usize,
        ) -> Result<RecordPage, SourceError> {
            Err(SourceError::Unavailable("connection refused".to_string()))
        }

        fn describe(&self) -> String {
            "failing".to_string()
        }
    }

    #[tokio::test]
    async fn test_nested_building_room_scenario() {
        let source = InMemorySource::new(vec![rec("Lab", "R1", 10.0005), rec("Lab", "R2", 5.0)]);
        let filter = DimensionFilter::all().with_campus("Ganesha");
        let outcome = aggregate(
            &source,
            &filter,
            GroupBy::Nested(Dimension::Building, Dimension::Room),
        )
        .await
        .unwrap();

        let lab = outcome.result.get("Lab").unwrap();
        assert_eq!(lab.total, 15.001);
        let rooms = lab.children.as_ref().unwrap();
        assert_eq!(rooms.get("R1").unwrap().total, 10.001);
        assert_eq!(rooms.get("R2").unwrap().total, 5.0);
        assert!(lab.unattributed.is_none());
        assert_eq!(outcome.skipped_count, 0);
        assert_eq!(outcome.total, 15.001);
    }

    #[tokio::test]
    async fn test_pagination_consumes_final_short_page() {
        let page = |n: usize| vec![rec("Lab", "R1", 1.0); n];
        let source = ScriptedSource::new(vec![page(1000), page(1000), page(3)]);

        let outcome = aggregate(&source, &DimensionFilter::all(), GroupBy::Total)
            .await
            .unwrap();

        assert_eq!(outcome.records_folded, 2003);
        assert_eq!(outcome.pages_fetched, 3);
        assert_eq!(outcome.total, 2003.0);
        let calls = source.calls.lock().unwrap();
        assert_eq!(*calls, vec![(0, 1000), (1000, 1000), (2000, 1000)]);
    }

    #[tokio::test]
    async fn test_pagination_stops_on_empty_page() {
        let source = ScriptedSource::new(vec![vec![rec("Lab", "R1", 1.0); 2], vec![]]);

        let outcome = Aggregator::new(2)
            .aggregate(&source, &DimensionFilter::all(), GroupBy::Total)
            .await
            .unwrap();

        assert_eq!(outcome.records_folded, 2);
        assert_eq!(outcome.pages_fetched, 2);
    }

    #[tokio::test]
    async fn test_unreadable_rows_are_counted_as_skipped() {
        let mut source = ScriptedSource::new(vec![
            vec![rec("Lab", "R1", 1.0); 2],
            vec![rec("Annex", "A1", 2.0)],
        ]);
        source.rejected = vec![1, 1];

        let outcome = Aggregator::new(3)
            .aggregate(&source, &DimensionFilter::all(), GroupBy::One(Dimension::Building))
            .await
            .unwrap();

        assert_eq!(outcome.skipped_count, 2);
        assert_eq!(outcome.records_folded, 3);
        assert_eq!(outcome.total, 4.0);
        assert_eq!(outcome.pages_fetched, 2);
        let calls = source.calls.lock().unwrap();
        assert_eq!(*calls, vec![(0, 3), (3, 3)]);
    }

    #[tokio::test]
    async fn test_missing_room_counts_at_building_level() {
        let mut roomless = rec("Lab", "", 2.5);
        roomless.room = None;
        let source = InMemorySource::new(vec![
            rec("Lab", "R1", 1.0),
            roomless,
            rec("Annex", "A1", 4.0),
        ]);

        let outcome = aggregate(
            &source,
            &DimensionFilter::all(),
            GroupBy::Nested(Dimension::Building, Dimension::Room),
        )
        .await
        .unwrap();

        let lab = outcome.result.get("Lab").unwrap();
        assert_eq!(lab.total, 3.5);
        assert_eq!(lab.unattributed, Some(2.5));
        assert_eq!(lab.children.as_ref().unwrap().len(), 1);
        assert_eq!(outcome.skipped_count, 1);
        assert_eq!(outcome.total, 7.5);
    }

    #[tokio::test]
    async fn test_bad_rows_are_skipped_not_fatal() {
        let mut no_emission = rec("Lab", "R1", 0.0);
        no_emission.emission = None;
        let mut no_building = rec("Lab", "R1", 9.0);
        no_building.building = None;
        let mut bad_month = rec("Lab", "R1", 4.0);
        bad_month.month = Some(13);
        let source = InMemorySource::new(vec![
            rec("Lab", "R1", 1.0),
            no_emission,
            no_building,
            bad_month,
            rec("Lab", "R1", -3.0),
            rec("Lab", "R1", f64::NAN),
        ]);

        let outcome = aggregate(
            &source,
            &DimensionFilter::all(),
            GroupBy::One(Dimension::Building),
        )
        .await
        .unwrap();

        assert_eq!(outcome.skipped_count, 5);
        assert_eq!(outcome.records_folded, 1);
        assert_eq!(outcome.result.get("Lab").unwrap().total, 1.0);
    }

    #[tokio::test]
    async fn test_group_totals_conserve_grand_total() {
        let records: Vec<EmissionRecord> = (0..250)
            .map(|i| {
                rec(
                    &format!("B{}", i % 7),
                    &format!("R{}", i % 3),
                    (i as f64) * 0.123_456 + 0.000_5,
                )
            })
            .collect();
        let source = InMemorySource::new(records);
        let aggregator = Aggregator::new(64);

        let by_building = aggregator
            .aggregate(&source, &DimensionFilter::all(), GroupBy::One(Dimension::Building))
            .await
            .unwrap();
        let total = aggregator
            .aggregate(&source, &DimensionFilter::all(), GroupBy::Total)
            .await
            .unwrap();

        let tolerance = 0.001 * by_building.result.len() as f64;
        assert!((by_building.result.sum_of_totals() - total.total).abs() <= tolerance);
        assert_eq!(by_building.total, total.total);
        assert!(total.result.is_empty());
    }

    #[tokio::test]
    async fn test_reaggregating_rounded_values_is_stable() {
        let source = InMemorySource::new(vec![rec("Lab", "R1", 10.0005), rec("Annex", "A1", 0.3333)]);
        let first = aggregate(&source, &DimensionFilter::all(), GroupBy::One(Dimension::Building))
            .await
            .unwrap();

        let rounded: Vec<EmissionRecord> = first
            .result
            .iter()
            .map(|(building, group)| rec(building, "R", group.total))
            .collect();
        let second = aggregate(
            &InMemorySource::new(rounded),
            &DimensionFilter::all(),
            GroupBy::One(Dimension::Building),
        )
        .await
        .unwrap();

        assert_eq!(first.result, second.result);
    }

    #[tokio::test]
    async fn test_all_sentinel_spans_every_year() {
        let mut older = rec("Lab", "R1", 2.0);
        older.year = Some(2023);
        let source = InMemorySource::new(vec![rec("Lab", "R1", 1.0), older]);

        let all: DimensionFilter = serde_json::from_str(r#"{"campus": "All", "year": "All"}"#).unwrap();
        let outcome = aggregate(&source, &all, GroupBy::One(Dimension::Year))
            .await
            .unwrap();
        assert_eq!(outcome.result.len(), 2);

        let only_2023 = DimensionFilter::all().with_year(2023);
        let outcome = aggregate(&source, &only_2023, GroupBy::One(Dimension::Year))
            .await
            .unwrap();
        assert_eq!(outcome.result.len(), 1);
        assert!(outcome.result.contains_key("2023"));
    }

    #[tokio::test]
    async fn test_empty_source_yields_empty_result() {
        let source = InMemorySource::new(vec![]);
        let outcome = aggregate(&source, &DimensionFilter::all(), GroupBy::One(Dimension::Month))
            .await
            .unwrap();
        assert!(outcome.result.is_empty());
        assert_eq!(outcome.total, 0.0);
        assert_eq!(outcome.pages_fetched, 1);
    }

    #[tokio::test]
    async fn test_source_failure_is_reported() {
        let err = aggregate(&FailingSource, &DimensionFilter::all(), GroupBy::Total)
            .await
            .unwrap_err();
        assert!(matches!(err, AggregateError::SourceUnavailable { offset: 0, .. }));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_group_by_from_dimensions() {
        assert_eq!(GroupBy::from_dimensions(&[]).unwrap(), GroupBy::Total);
        assert_eq!(
            GroupBy::from_dimensions(&[Dimension::Building, Dimension::Room]).unwrap(),
            GroupBy::Nested(Dimension::Building, Dimension::Room)
        );
        assert!(matches!(
            GroupBy::from_dimensions(&[Dimension::Campus, Dimension::Building, Dimension::Room]),
            Err(AggregateError::TooManyDimensions(3))
        ));
        assert_eq!(
            GroupBy::Nested(Dimension::Building, Dimension::Room).to_string(),
            "building/room"
        );
    }
}
