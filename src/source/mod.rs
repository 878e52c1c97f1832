//! Paginated record sources.
//!
//! The aggregator reads emission records through the [`RecordSource`]
//! trait. Two implementations ship with the crate: an in-memory source
//! (also used to serve JSON files) and an HTTP client for a remote
//! record service.

pub mod http;
pub mod memory;

use crate::models::{DimensionFilter, EmissionRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use http::{HttpSource, HttpSourceConfig};
pub use memory::InMemorySource;

/// One page of records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordPage {
    #[serde(default)]
    pub rows: Vec<EmissionRecord>,
    #[serde(default)]
    pub has_more: bool,
    /// Rows the source received but could not read as records.
    #[serde(default)]
    pub rejected: usize,
}

/// A page as it arrives on the wire, rows still untyped.
#[derive(Debug, Default, Deserialize)]
pub struct RawRecordPage {
    #[serde(default)]
    pub rows: Vec<Value>,
    #[serde(default)]
    pub has_more: bool,
}

impl From<RawRecordPage> for RecordPage {
    fn from(raw: RawRecordPage) -> Self {
        let (rows, rejected) = decode_rows(raw.rows);
        Self {
            rows,
            has_more: raw.has_more,
            rejected,
        }
    }
}

/// Convert raw JSON rows to records one at a time.
///
/// Returns the records and the number of rows whose fields had the wrong
/// shape (a string emission, a negative month, a non-object row).
pub fn decode_rows(values: Vec<Value>) -> (Vec<EmissionRecord>, usize) {
    let mut records = Vec::with_capacity(values.len());
    let mut rejected = 0;

    for (index, value) in values.into_iter().enumerate() {
        match serde_json::from_value::<EmissionRecord>(value) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::debug!("Row {}: {}", index, e);
                rejected += 1;
            }
        }
    }

    (records, rejected)
}

/// Failure to obtain a page from a record source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("record source unavailable: {0}")]
    Unavailable(String),

    #[error("record source returned an invalid page: {0}")]
    InvalidPage(String),
}

/// A paginated, read-only reader of emission records.
///
/// Implementations own their own timeout and retry policy; callers treat
/// any error as final for the current request.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch up to `limit` records matching `filter`, starting at `offset`.
    async fn fetch_page(
        &self,
        filter: &DimensionFilter,
        offset: usize,
        limit: usize,
    ) -> Result<RecordPage, SourceError>;

    /// Short description used in logs and report metadata.
    fn describe(&self) -> String;
}
