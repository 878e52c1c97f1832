//! In-memory record source and JSON record loading.

use crate::models::{DimensionFilter, EmissionRecord};
use crate::source::{decode_rows, RecordPage, RecordSource, SourceError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info, warn};

/// Serves a fixed set of records in offset/limit pages.
///
/// Entries that could not be read when the records were loaded have no
/// fields to filter on; they are reported with the first page of every
/// query.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    records: Vec<EmissionRecord>,
    rejected: usize,
    label: String,
}

impl InMemorySource {
    pub fn new(records: Vec<EmissionRecord>) -> Self {
        Self {
            label: format!("in-memory ({} records)", records.len()),
            records,
            rejected: 0,
        }
    }

    /// Load records from a JSON array or JSON-lines file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let (records, rejected) = load_records(path)?;
        info!("Loaded {} records from {}", records.len(), path.display());
        let mut source = Self::new(records);
        source.rejected = rejected;
        source.label = path.display().to_string();
        Ok(source)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RecordSource for InMemorySource {
    async fn fetch_page(
        &self,
        filter: &DimensionFilter,
        offset: usize,
        limit: usize,
    ) -> Result<RecordPage, SourceError> {
        let mut matching = self.records.iter().filter(|r| filter.matches(r)).skip(offset);
        let rows: Vec<EmissionRecord> = matching.by_ref().take(limit).cloned().collect();
        let has_more = matching.next().is_some();

        Ok(RecordPage {
            rows,
            has_more,
            rejected: if offset == 0 { self.rejected } else { 0 },
        })
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Read emission records from a file, returning them with the number of
/// entries that could not be read.
///
/// A file whose first non-blank character is `[` is parsed as a JSON
/// array; anything else is treated as JSON lines. Either way, entries
/// that do not read as records are skipped with a warning.
pub fn load_records(path: &Path) -> Result<(Vec<EmissionRecord>, usize)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read record file: {}", path.display()))?;

    let (records, rejected) = if content.trim_start().starts_with('[') {
        let values: Vec<serde_json::Value> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse record file: {}", path.display()))?;
        decode_rows(values)
    } else {
        parse_json_lines(&content)
    };

    if rejected > 0 {
        warn!(
            "Ignored {} unreadable record(s) in {}",
            rejected,
            path.display()
        );
    }
    Ok((records, rejected))
}

/// Parse JSON-lines content, returning the records and the rejected line count.
fn parse_json_lines(content: &str) -> (Vec<EmissionRecord>, usize) {
    let mut records = Vec::new();
    let mut rejected = 0;

    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }

        match serde_json::from_str::<EmissionRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                debug!("Line {}: {}", number + 1, e);
                rejected += 1;
            }
        }
    }

    (records, rejected)
}
