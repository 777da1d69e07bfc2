// src/core/scanner/fingerprint_scanner.rs

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{redirect, Client};
use scraper::{Html, Selector};
use tracing::{debug, error, info, warn};
use url::Url;

use super::headers_scanner::{collect_security_headers, flatten_headers};
use crate::core::knowledge_base::{KnowledgeBase, TechnologyKind, Version, HEADER_RULES};
use crate::core::models::{Confidence, DetectedTechnology, DiscoveredPath, HttpFingerprint, ServiceFingerprint, StageOutcome};

/// Paths probed for exposed admin panels and leaked files.
pub const COMMON_PATHS: &[&str] = &[
    "/admin",
    "/administrator",
    "/login",
    "/wp-admin",
    "/phpmyadmin",
    "/dashboard",
    "/admin.php",
    "/manager",
    "/console",
    "/.git",
    "/.env",
    "/robots.txt",
    "/sitemap.xml",
];

const PLAIN_HTTP_PORTS: &[u16] = &[80, 8080, 8000];
const TLS_HTTP_PORTS: &[u16] = &[443, 8443];

#[derive(Debug, Clone)]
pub struct FingerprintOptions {
    pub http_timeout: Duration,
    pub path_timeout: Duration,
    /// Pause between consecutive path probes.
    pub path_probe_delay: Duration,
    pub max_redirects: usize,
    /// Ignored (always on) when built with the `strict-tls` feature.
    pub verify_tls: bool,
    pub user_agent: String,
}

impl Default for FingerprintOptions {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(10),
            path_timeout: Duration::from_secs(5),
            path_probe_delay: Duration::from_millis(200),
            max_redirects: 5,
            verify_tls: false,
            user_agent: concat!("VanguardProfiler/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// URL scheme to speak on a port, or `None` when it is not a web service.
pub fn web_scheme(port: u16, service_hint: Option<&str>) -> Option<&'static str> {
    if PLAIN_HTTP_PORTS.contains(&port) || matches!(service_hint, Some("http" | "http-proxy" | "http-alt")) {
        Some("http")
    } else if TLS_HTTP_PORTS.contains(&port) || matches!(service_hint, Some("https" | "https-alt")) {
        Some("https")
    } else {
        None
    }
}

/// HTTP probing and technology detection against one target.
pub struct ServiceFingerprinter {
    client: Client,
    probe_client: Client,
    knowledge: Arc<KnowledgeBase>,
    options: FingerprintOptions,
}

impl ServiceFingerprinter {
    pub fn new(knowledge: Arc<KnowledgeBase>, options: FingerprintOptions) -> Result<Self, reqwest::Error> {
        let verify = options.verify_tls || cfg!(feature = "strict-tls");
        if !verify {
            debug!("TLS certificate verification disabled for fingerprinting.");
        }

        let client = Client::builder()
            .user_agent(&options.user_agent)
            .timeout(options.http_timeout)
            .redirect(redirect::Policy::limited(options.max_redirects))
            .danger_accept_invalid_certs(!verify)
            .build()?;
        let probe_client = Client::builder()
            .user_agent(&options.user_agent)
            .timeout(options.path_timeout)
            .redirect(redirect::Policy::none())
            .danger_accept_invalid_certs(!verify)
            .build()?;

        Ok(Self {
            client,
            probe_client,
            knowledge,
            options,
        })
    }

    /// Issues one GET and extracts headers, cookies, title and technologies.
    pub async fn fingerprint_http(&self, url: &str) -> Result<HttpFingerprint, String> {
        info!(target = url, "Starting HTTP fingerprint.");

        let response = self.client.get(url).send().await.map_err(|e| {
            error!(url, error = %e, "HTTP request failed");
            if e.is_timeout() {
                "Connection timeout".to_string()
            } else {
                format!("HTTP request failed: {}", e)
            }
        })?;
        info!(status = %response.status(), "Received HTTP response.");

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let raw_headers = response.headers().clone();
        let headers = flatten_headers(&raw_headers);
        let cookies = raw_headers
            .get_all("set-cookie")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();
        let security = collect_security_headers(&raw_headers);

        // An unreadable body still leaves a useful header fingerprint.
        let body = match response.text().await {
            Ok(text) => {
                debug!(bytes = %text.len(), "Successfully read response body.");
                text
            }
            Err(e) => {
                warn!(url, error = %e, "Failed to read response body");
                String::new()
            }
        };

        let fingerprint = HttpFingerprint {
            url: url.to_string(),
            final_url,
            status,
            server: headers.get("server").cloned(),
            powered_by: headers.get("x-powered-by").cloned(),
            cookies,
            security_headers: security.present,
            missing_security_headers: security.missing,
            title: extract_title(&body),
            technologies: detect_technologies(&self.knowledge, &body, &headers),
            headers,
        };
        info!(count = %fingerprint.technologies.len(), "HTTP fingerprint finished.");
        Ok(fingerprint)
    }

    /// Fingerprints one open port. Only web ports get HTTP details.
    pub async fn fingerprint_service(&self, host: &str, port: u16, service_hint: Option<&str>) -> ServiceFingerprint {
        let details = match web_scheme(port, service_hint) {
            Some(scheme) => {
                let url = format!("{scheme}://{host}:{port}");
                Some(StageOutcome::from_result(self.fingerprint_http(&url).await))
            }
            None => {
                debug!(port, "No fingerprinting logic for this service.");
                None
            }
        };

        ServiceFingerprint {
            host: host.to_string(),
            port,
            service: service_hint.map(str::to_string),
            details,
        }
    }

    /// Serially requests each of `COMMON_PATHS`, without following redirects.
    pub async fn probe_common_paths(&self, base_url: &str) -> Result<Vec<DiscoveredPath>, String> {
        let base = Url::parse(base_url).map_err(|e| format!("Invalid base URL '{}': {}", base_url, e))?;
        info!(target = base_url, paths = COMMON_PATHS.len(), "Probing common paths.");

        let mut discovered = Vec::new();
        for (i, path) in COMMON_PATHS.iter().enumerate() {
            if i > 0 && !self.options.path_probe_delay.is_zero() {
                tokio::time::sleep(self.options.path_probe_delay).await;
            }
            let url = match base.join(path) {
                Ok(url) => url,
                Err(e) => {
                    warn!(path, error = %e, "Could not build probe URL.");
                    continue;
                }
            };
            match self.probe_client.get(url.clone()).send().await {
                Ok(response) if response.status().as_u16() < 400 => {
                    info!(url = %url, status = %response.status(), "Discovered path.");
                    discovered.push(DiscoveredPath {
                        path: path.to_string(),
                        url: url.to_string(),
                        status: response.status().as_u16(),
                        size: response.content_length(),
                    });
                }
                Ok(response) => debug!(url = %url, status = %response.status(), "Path not exposed."),
                Err(e) => debug!(url = %url, error = %e, "Path probe failed."),
            }
        }
        Ok(discovered)
    }
}

/// Text of the first `<title>` element, trimmed.
pub fn extract_title(body: &str) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let document = Html::parse_document(body);
    let title = document.select(&selector).next()?.text().collect::<String>();
    let title = title.trim();
    (!title.is_empty()).then(|| title.to_string())
}

/// Matches body patterns (medium confidence), then lets `Server` and
/// `X-Powered-By` add or override entries at high confidence.
///
/// `headers` keys are expected lowercase, as produced by `flatten_headers`.
pub fn detect_technologies(
    knowledge: &KnowledgeBase,
    body: &str,
    headers: &BTreeMap<String, String>,
) -> Vec<DetectedTechnology> {
    let mut found: BTreeMap<TechnologyKind, DetectedTechnology> = BTreeMap::new();

    for rule in knowledge.detection_rules() {
        if let Some(pattern) = rule.patterns.iter().find(|p| p.is_match(body)) {
            debug!(tech = %rule.kind, pattern = %pattern.as_str(), "Body pattern matched.");
            found.insert(
                rule.kind,
                DetectedTechnology {
                    kind: rule.kind,
                    version: None,
                    evidence: Some(pattern.as_str().to_string()),
                    confidence: Confidence::Medium,
                },
            );
        }
    }

    let mut inspected: Vec<&str> = Vec::new();
    for rule in HEADER_RULES {
        // Only the first matching rule per header counts.
        if inspected.contains(&rule.header) {
            continue;
        }
        let Some(value) = headers.get(rule.header) else {
            continue;
        };
        if value.to_lowercase().contains(rule.needle) {
            inspected.push(rule.header);
            let version = Version::extract(value).map(|v| v.to_string());
            debug!(tech = %rule.kind, version = ?version, "Header rule matched.");
            found.insert(
                rule.kind,
                DetectedTechnology {
                    kind: rule.kind,
                    version,
                    evidence: Some(value.clone()),
                    confidence: Confidence::High,
                },
            );
        }
    }

    found.into_values().collect()
}
