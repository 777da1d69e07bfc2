// src/core/osint/wayback.rs

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::info;
use url::Url;

use super::HistoricalUrlSource;

pub const WAYBACK_CDX_ENDPOINT: &str = "http://web.archive.org/cdx/search/cdx";

/// Historical URLs from the Wayback Machine CDX API.
#[derive(Debug, Clone)]
pub struct WaybackSource {
    client: Client,
    endpoint: String,
}

impl WaybackSource {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            endpoint: WAYBACK_CDX_ENDPOINT.to_string(),
        }
    }

    pub fn query_url(&self, domain: &str) -> Result<Url, String> {
        Url::parse_with_params(
            &self.endpoint,
            &[
                ("url", format!("{domain}/*")),
                ("output", "json".to_string()),
                ("fl", "original".to_string()),
                ("collapse", "urlkey".to_string()),
            ],
        )
        .map_err(|e| format!("Invalid Wayback URL: {e}"))
    }
}

/// The first row of a CDX JSON answer is the column header.
pub fn parse_cdx_response(body: &str, limit: usize) -> Result<Vec<String>, String> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<Vec<String>> = serde_json::from_str(body).map_err(|e| format!("Invalid CDX JSON: {e}"))?;
    Ok(rows
        .into_iter()
        .skip(1)
        .filter_map(|row| row.into_iter().next())
        .take(limit)
        .collect())
}

#[async_trait]
impl HistoricalUrlSource for WaybackSource {
    async fn historical_urls(&self, domain: &str, limit: usize) -> Result<Vec<String>, String> {
        let url = self.query_url(domain)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Wayback request failed: {e}"))?;
        if response.status() != StatusCode::OK {
            return Err(format!("Wayback returned HTTP {}", response.status().as_u16()));
        }
        let body = response.text().await.map_err(|e| format!("Wayback body unreadable: {e}"))?;
        let urls = parse_cdx_response(&body, limit)?;
        info!(domain, count = urls.len(), "Historical URLs collected.");
        Ok(urls)
    }
}
