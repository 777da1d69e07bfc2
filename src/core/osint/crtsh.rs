// src/core/osint/crtsh.rs

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::info;
use url::Url;

use super::SubdomainSource;

pub const CRTSH_ENDPOINT: &str = "https://crt.sh/";

#[derive(Debug, Deserialize)]
struct CrtShEntry {
    #[serde(default)]
    name_value: String,
}

/// Certificate-transparency subdomain search through the crt.sh JSON API.
#[derive(Debug, Clone)]
pub struct CrtShSource {
    client: Client,
    endpoint: String,
}

impl CrtShSource {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            endpoint: CRTSH_ENDPOINT.to_string(),
        }
    }

    pub fn query_url(&self, domain: &str) -> Result<Url, String> {
        Url::parse_with_params(&self.endpoint, &[("q", format!("%.{domain}")), ("output", "json".to_string())])
            .map_err(|e| format!("Invalid crt.sh URL: {e}"))
    }
}

/// Raw `name_value` fields; one entry may carry several names.
pub fn parse_crtsh_response(body: &str) -> Result<Vec<String>, String> {
    let entries: Vec<CrtShEntry> = serde_json::from_str(body).map_err(|e| format!("Invalid crt.sh JSON: {e}"))?;
    Ok(entries
        .into_iter()
        .map(|e| e.name_value)
        .filter(|n| !n.is_empty())
        .collect())
}

#[async_trait]
impl SubdomainSource for CrtShSource {
    async fn subdomains(&self, domain: &str) -> Result<Vec<String>, String> {
        let url = self.query_url(domain)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("crt.sh request failed: {e}"))?;
        if response.status() != StatusCode::OK {
            return Err(format!("crt.sh returned HTTP {}", response.status().as_u16()));
        }
        let body = response.text().await.map_err(|e| format!("crt.sh body unreadable: {e}"))?;
        let names = parse_crtsh_response(&body)?;
        info!(domain, entries = names.len(), "Certificate transparency entries collected.");
        Ok(names)
    }
}
