//! Data models for emission aggregation.
//!
//! This module contains the record shape delivered by record sources,
//! the dimension filter used to narrow aggregations, and the typed
//! nested totals returned to the view layer.

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Sentinel accepted wherever a selector may be unconstrained.
pub const ALL: &str = "All";

/// A single emission event as delivered by a record source.
///
/// Every field is optional on the wire so that a malformed row survives
/// deserialization and can be skipped (and counted) during aggregation
/// instead of failing a whole page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmissionRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campus: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub building: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    /// Calendar month (1-12).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
    /// Emitted amount, expected to be non-negative.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emission: Option<f64>,
}

impl EmissionRecord {
    /// Creates a fully-populated record.
    #[cfg(test)]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        campus: &str,
        building: &str,
        room: &str,
        device: &str,
        year: i32,
        month: u32,
        emission: f64,
    ) -> Self {
        Self {
            campus: Some(campus.to_string()),
            building: Some(building.to_string()),
            room: Some(room.to_string()),
            device: Some(device.to_string()),
            year: Some(year),
            month: Some(month),
            emission: Some(emission),
        }
    }
}

/// A text field as used for grouping and filtering: trimmed, blank as missing.
fn normalized(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// An axis along which emission records can be grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Campus,
    Building,
    Room,
    Device,
    Year,
    Month,
}

impl Dimension {
    /// Extracts this dimension's group key from a record.
    ///
    /// Blank strings and out-of-range months count as missing.
    pub fn key_of(&self, record: &EmissionRecord) -> Option<String> {
        let text = |value: &Option<String>| normalized(value).map(String::from);

        match self {
            Dimension::Campus => text(&record.campus),
            Dimension::Building => text(&record.building),
            Dimension::Room => text(&record.room),
            Dimension::Device => text(&record.device),
            Dimension::Year => record.year.map(|y| y.to_string()),
            Dimension::Month => record
                .month
                .filter(|m| (1..=12).contains(m))
                .map(|m| m.to_string()),
        }
    }

    /// Lowercase name used in CLI flags and query strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Campus => "campus",
            Dimension::Building => "building",
            Dimension::Room => "room",
            Dimension::Device => "device",
            Dimension::Year => "year",
            Dimension::Month => "month",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "campus" => Ok(Dimension::Campus),
            "building" => Ok(Dimension::Building),
            "room" => Ok(Dimension::Room),
            "device" => Ok(Dimension::Device),
            "year" => Ok(Dimension::Year),
            "month" => Ok(Dimension::Month),
            other => Err(format!(
                "unknown dimension '{}' (expected campus, building, room, device, year or month)",
                other
            )),
        }
    }
}

/// An equality constraint that may be lifted with the `"All"` sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Selector<T> {
    /// No constraint.
    #[default]
    All,
    /// Only records carrying exactly this value.
    Only(T),
}

impl<T: PartialEq> Selector<T> {
    /// Returns true if a record field with this value passes the constraint.
    ///
    /// A missing field never passes a concrete constraint.
    pub fn admits(&self, value: Option<&T>) -> bool {
        match self {
            Selector::All => true,
            Selector::Only(expected) => value == Some(expected),
        }
    }
}

impl<T> Selector<T> {
    pub fn is_all(&self) -> bool {
        matches!(self, Selector::All)
    }

    pub fn as_option(&self) -> Option<&T> {
        match self {
            Selector::All => None,
            Selector::Only(value) => Some(value),
        }
    }
}

impl<T: fmt::Display> fmt::Display for Selector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::All => f.write_str(ALL),
            Selector::Only(value) => write!(f, "{}", value),
        }
    }
}

impl<T: FromStr> FromStr for Selector<T> {
    type Err = T::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(ALL) {
            Ok(Selector::All)
        } else {
            trimmed.parse().map(Selector::Only)
        }
    }
}

impl<T: Serialize> Serialize for Selector<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Selector::All => serializer.serialize_str(ALL),
            Selector::Only(value) => value.serialize(serializer),
        }
    }
}

impl<'de, T> Deserialize<'de> for Selector<T>
where
    T: Deserialize<'de> + FromStr,
    T::Err: fmt::Display,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw<V> {
            Text(String),
            Value(V),
        }

        match Raw::<T>::deserialize(deserializer)? {
            Raw::Text(text) => text.parse().map_err(de::Error::custom),
            Raw::Value(value) => Ok(Selector::Only(value)),
        }
    }
}

/// Optional equality constraints narrowing which records are folded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct DimensionFilter {
    pub campus: Selector<String>,
    pub year: Selector<i32>,
    pub building: Selector<String>,
    pub room: Selector<String>,
}

impl DimensionFilter {
    /// The coarsest filter: every record passes.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_campus(mut self, campus: impl Into<String>) -> Self {
        self.campus = Selector::Only(campus.into());
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Selector::Only(year);
        self
    }

    pub fn with_building(mut self, building: impl Into<String>) -> Self {
        self.building = Selector::Only(building.into());
        self
    }

    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = Selector::Only(room.into());
        self
    }

    /// Returns true if the record passes every constraint.
    ///
    /// Text fields compare the same normalized value they are grouped by.
    pub fn matches(&self, record: &EmissionRecord) -> bool {
        fn text(selector: &Selector<String>, value: &Option<String>) -> bool {
            match selector {
                Selector::All => true,
                Selector::Only(expected) => normalized(value) == Some(expected.trim()),
            }
        }

        text(&self.campus, &record.campus)
            && self.year.admits(record.year.as_ref())
            && text(&self.building, &record.building)
            && text(&self.room, &record.room)
    }

    pub fn is_unconstrained(&self) -> bool {
        self.campus.is_all() && self.year.is_all() && self.building.is_all() && self.room.is_all()
    }
}

impl fmt::Display for DimensionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "campus={}, year={}, building={}, room={}",
            self.campus, self.year, self.building, self.room
        )
    }
}

/// Rounded total for one group key, with optional nested breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupTotal {
    /// Sum of emissions in this group, rounded to three decimals.
    pub total: f64,
    /// Breakdown by the second requested dimension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<AggregationResult>,
    /// Emission counted in `total` whose records lacked the inner key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unattributed: Option<f64>,
}

impl GroupTotal {
    pub fn leaf(total: f64) -> Self {
        Self {
            total,
            children: None,
            unattributed: None,
        }
    }
}

/// Mapping from group key to its rounded total.
///
/// Keys are kept sorted so identical inputs serialize identically;
/// display ordering is left to the caller (see `aggregation::ranked`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregationResult(BTreeMap<String, GroupTotal>);

impl AggregationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, group: GroupTotal) {
        self.0.insert(key.into(), group);
    }

    pub fn get(&self, key: &str) -> Option<&GroupTotal> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &GroupTotal)> {
        self.0.iter()
    }

    /// Plain sum of the (already rounded) group totals.
    pub fn sum_of_totals(&self) -> f64 {
        self.0.values().map(|g| g.total).sum()
    }
}

impl FromIterator<(String, GroupTotal)> for AggregationResult {
    fn from_iter<I: IntoIterator<Item = (String, GroupTotal)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A single slice of a pie chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Share {
    pub key: String,
    pub total: f64,
    /// Percentage of the level total, rounded to two decimals.
    pub percent: f64,
}

/// Metadata about an aggregation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Human-readable description of the record source.
    pub source: String,
    pub filter: DimensionFilter,
    /// Grouping path, e.g. `building/room`.
    pub grouping: String,
    pub generated_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub pages_fetched: usize,
    pub records_folded: usize,
    pub skipped_count: usize,
}

/// The complete aggregation report handed to the renderers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationReport {
    pub metadata: ReportMetadata,
    /// Rounded sum of every folded emission.
    pub total: f64,
    pub result: AggregationResult,
    /// Top-level pie-chart shares, largest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shares: Vec<Share>,
}
