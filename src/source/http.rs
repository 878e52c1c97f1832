//! HTTP client for a remote emission record service.
//!
//! The service is expected to answer `GET {base}/emissions` with a JSON
//! body of the form `{"rows": [...], "has_more": bool}`.

use crate::models::DimensionFilter;
use crate::source::{RawRecordPage, RecordPage, RecordSource, SourceError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// Connection settings for [`HttpSource`].
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
    /// Extra attempts after the first failure.
    pub retries: usize,
    /// Delay before the first retry; later retries wait proportionally longer.
    pub retry_delay: Duration,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_seconds: 30,
            retries: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl From<&crate::config::SourceConfig> for HttpSourceConfig {
    fn from(config: &crate::config::SourceConfig) -> Self {
        Self {
            base_url: config.url.clone().unwrap_or_default(),
            timeout_seconds: config.timeout_seconds,
            retries: config.retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

/// Paginated reader backed by an HTTP record service.
pub struct HttpSource {
    config: HttpSourceConfig,
    http_client: reqwest::Client,
}

impl HttpSource {
    pub fn new(config: HttpSourceConfig) -> Result<Self, SourceError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| SourceError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/emissions", self.config.base_url.trim_end_matches('/'))
    }

    async fn fetch_once(&self, query: &[(&str, String)]) -> Result<RecordPage, SourceError> {
        let response = self
            .http_client
            .get(self.endpoint())
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceError::Unavailable(format!(
                        "request timed out after {}s",
                        self.config.timeout_seconds
                    ))
                } else if e.is_connect() {
                    SourceError::Unavailable(format!(
                        "cannot connect to {}",
                        self.config.base_url
                    ))
                } else {
                    SourceError::Unavailable(format!("failed to send request: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Unavailable(format!("HTTP {}: {}", status, body)));
        }

        let raw = response
            .json::<RawRecordPage>()
            .await
            .map_err(|e| SourceError::InvalidPage(e.to_string()))?;

        let page = RecordPage::from(raw);
        if page.rejected > 0 {
            warn!("{} row(s) in page could not be read as records", page.rejected);
        }
        Ok(page)
    }
}

/// Query parameters for one page; unconstrained selectors are omitted.
fn page_query(filter: &DimensionFilter, offset: usize, limit: usize) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();

    if let Some(campus) = filter.campus.as_option() {
        query.push(("campus", campus.clone()));
    }
    if let Some(year) = filter.year.as_option() {
        query.push(("year", year.to_string()));
    }
    if let Some(building) = filter.building.as_option() {
        query.push(("building", building.clone()));
    }
    if let Some(room) = filter.room.as_option() {
        query.push(("room", room.clone()));
    }
    query.push(("offset", offset.to_string()));
    query.push(("limit", limit.to_string()));

    query
}

#[async_trait]
impl RecordSource for HttpSource {
    async fn fetch_page(
        &self,
        filter: &DimensionFilter,
        offset: usize,
        limit: usize,
    ) -> Result<RecordPage, SourceError> {
        let query = page_query(filter, offset, limit);
        let mut attempt = 0;

        loop {
            debug!("GET {} (attempt {})", self.endpoint(), attempt + 1);

            match self.fetch_once(&query).await {
                Ok(page) => return Ok(page),
                Err(SourceError::Unavailable(reason)) if attempt < self.config.retries => {
                    attempt += 1;
                    warn!(
                        "Record service request failed ({}), retry {}/{}",
                        reason, attempt, self.config.retries
                    );
                    tokio::time::sleep(self.config.retry_delay * attempt as u32).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn describe(&self) -> String {
        self.endpoint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_query_omits_all_selectors() {
        let query = page_query(&DimensionFilter::all(), 2000, 1000);
        assert_eq!(
            query,
            vec![("offset", "2000".to_string()), ("limit", "1000".to_string())]
        );
    }

    #[test]
    fn test_page_query_includes_constraints() {
        let filter = DimensionFilter::all().with_campus("Ganesha").with_year(2024);
        let query = page_query(&filter, 0, 1000);
        assert!(query.contains(&("campus", "Ganesha".to_string())));
        assert!(query.contains(&("year", "2024".to_string())));
        assert!(!query.iter().any(|(k, _)| *k == "building"));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let source = HttpSource::new(HttpSourceConfig {
            base_url: "http://records.local/api/".to_string(),
            ..HttpSourceConfig::default()
        })
        .unwrap();
        assert_eq!(source.describe(), "http://records.local/api/emissions");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let source = HttpSource::new(HttpSourceConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_seconds: 2,
            retries: 1,
            retry_delay: Duration::from_millis(10),
        })
        .unwrap();

        let err = source
            .fetch_page(&DimensionFilter::all(), 0, 1000)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));
    }
}
