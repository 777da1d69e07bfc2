// src/core/osint/mod.rs

//! Open-source intelligence: WHOIS, certificate-transparency subdomains and
//! web-archive URL history, queried in parallel with isolated failures.

pub mod crtsh;
pub mod wayback;
pub mod whois;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::models::{OsintReport, StageOutcome, WhoisInfo};

pub use crtsh::CrtShSource;
pub use wayback::WaybackSource;
pub use whois::TcpWhoisSource;

pub const DISABLED_REASON: &str = "disabled by configuration";

#[async_trait]
pub trait WhoisSource: Send + Sync + 'static {
    async fn lookup(&self, domain: &str) -> Result<WhoisInfo, String>;
}

/// Returns raw names; normalization happens in the aggregator.
#[async_trait]
pub trait SubdomainSource: Send + Sync + 'static {
    async fn subdomains(&self, domain: &str) -> Result<Vec<String>, String>;
}

#[async_trait]
pub trait HistoricalUrlSource: Send + Sync + 'static {
    async fn historical_urls(&self, domain: &str, limit: usize) -> Result<Vec<String>, String>;
}

/// Lowercases, strips wildcard labels and trailing dots, keeps only names at
/// or under `domain`, and returns them sorted without duplicates.
///
/// Entries may hold several names separated by whitespace, as crt.sh does.
pub fn normalize_subdomains<I, S>(domain: &str, raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let domain = domain.trim().trim_end_matches('.').to_lowercase();
    let suffix = format!(".{domain}");
    let mut names = BTreeSet::new();
    for entry in raw {
        for name in entry.as_ref().split_whitespace() {
            let mut name = name.trim_end_matches('.').to_lowercase();
            while let Some(stripped) = name.strip_prefix("*.") {
                name = stripped.to_string();
            }
            if name == domain || name.ends_with(&suffix) {
                names.insert(name);
            }
        }
    }
    names.into_iter().collect()
}

/// Runs the configured sources concurrently, one task per source.
pub struct OsintAggregator {
    whois: Option<Arc<dyn WhoisSource>>,
    subdomains: Option<Arc<dyn SubdomainSource>>,
    history: Option<Arc<dyn HistoricalUrlSource>>,
    history_limit: usize,
    timeout: Duration,
}

impl OsintAggregator {
    /// `None` for a source means it is disabled.
    pub fn new(
        whois: Option<Arc<dyn WhoisSource>>,
        subdomains: Option<Arc<dyn SubdomainSource>>,
        history: Option<Arc<dyn HistoricalUrlSource>>,
        history_limit: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            whois,
            subdomains,
            history,
            history_limit,
            timeout,
        }
    }

    pub async fn collect_osint(&self, target: &str) -> OsintReport {
        info!(target, "Collecting OSINT.");
        let domain = target.to_string();
        let limit = self.history_limit;

        let whois_task = self.whois.clone().map(|source| {
            let domain = domain.clone();
            spawn_bounded(self.timeout, async move { source.lookup(&domain).await })
        });
        let subdomain_task = self.subdomains.clone().map(|source| {
            let domain = domain.clone();
            spawn_bounded(self.timeout, async move {
                source
                    .subdomains(&domain)
                    .await
                    .map(|raw| normalize_subdomains(&domain, raw))
            })
        });
        let history_task = self.history.clone().map(|source| {
            let domain = domain.clone();
            spawn_bounded(self.timeout, async move {
                source
                    .historical_urls(&domain, limit)
                    .await
                    .map(|mut urls| {
                        urls.truncate(limit);
                        urls
                    })
            })
        });

        let (whois, subdomains, historical_urls) = tokio::join!(
            settle("whois", whois_task),
            settle("subdomains", subdomain_task),
            settle("historical_urls", history_task)
        );

        let subdomain_count = subdomains.success().map_or(0, Vec::len);
        let report = OsintReport {
            target: target.to_string(),
            whois,
            subdomains,
            historical_urls,
            subdomain_count,
        };
        info!(target, subdomains = subdomain_count, failures = report.failure_count(), "OSINT collection complete.");
        report
    }
}

/// Aborts the task when dropped, so a cancelled collection stops its queries.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn spawn_bounded<T, F>(limit: Duration, work: F) -> AbortOnDrop<Result<T, String>>
where
    T: Send + 'static,
    F: Future<Output = Result<T, String>> + Send + 'static,
{
    AbortOnDrop(tokio::spawn(async move {
        tokio::time::timeout(limit, work)
            .await
            .unwrap_or_else(|_| Err(format!("timed out after {}s", limit.as_secs())))
    }))
}

/// Turns a (possibly disabled, failed or panicked) task into a field outcome.
async fn settle<T>(field: &str, task: Option<AbortOnDrop<Result<T, String>>>) -> StageOutcome<T> {
    let Some(mut task) = task else {
        warn!(field, "OSINT source skipped: {}.", DISABLED_REASON);
        return StageOutcome::failed(DISABLED_REASON);
    };
    match (&mut task.0).await {
        Ok(result) => {
            if let Err(e) = &result {
                warn!(field, error = %e, "OSINT source failed.");
            }
            StageOutcome::from_result(result)
        }
        Err(e) => {
            warn!(field, error = %e, "OSINT task did not complete.");
            StageOutcome::failed(format!("task failed: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedWhois;

    #[async_trait]
    impl WhoisSource for FixedWhois {
        async fn lookup(&self, domain: &str) -> Result<WhoisInfo, String> {
            Ok(WhoisInfo {
                domain: domain.to_string(),
                registrar: Some("Example Registrar".into()),
                ..WhoisInfo::default()
            })
        }
    }

    struct PanickingSubdomains;

    #[async_trait]
    impl SubdomainSource for PanickingSubdomains {
        async fn subdomains(&self, _domain: &str) -> Result<Vec<String>, String> {
            panic!("source crashed")
        }
    }

    struct FixedSubdomains(Vec<&'static str>);

    #[async_trait]
    impl SubdomainSource for FixedSubdomains {
        async fn subdomains(&self, _domain: &str) -> Result<Vec<String>, String> {
            Ok(self.0.iter().map(|s| s.to_string()).collect())
        }
    }

    struct FailingHistory;

    #[async_trait]
    impl HistoricalUrlSource for FailingHistory {
        async fn historical_urls(&self, _domain: &str, _limit: usize) -> Result<Vec<String>, String> {
            Err("HTTP 503".into())
        }
    }

    struct EndlessHistory;

    #[async_trait]
    impl HistoricalUrlSource for EndlessHistory {
        async fn historical_urls(&self, domain: &str, _limit: usize) -> Result<Vec<String>, String> {
            Ok((0..500).map(|i| format!("http://{domain}/page/{i}")).collect())
        }
    }

    #[test]
    fn subdomains_are_normalized() {
        let raw = vec![
            "*.Example.com\nwww.example.com",
            "api.example.com.",
            "WWW.EXAMPLE.COM",
            "example.com",
            "evil-example.com",
            "example.com.attacker.net",
        ];
        assert_eq!(
            normalize_subdomains("example.com", raw),
            vec!["api.example.com", "example.com", "www.example.com"]
        );
    }

    #[tokio::test]
    async fn one_failing_source_does_not_affect_the_others() {
        let aggregator = OsintAggregator::new(
            Some(Arc::new(FixedWhois)),
            Some(Arc::new(PanickingSubdomains)),
            Some(Arc::new(FailingHistory)),
            100,
            Duration::from_secs(5),
        );
        let report = aggregator.collect_osint("example.com").await;

        assert_eq!(
            report.whois.success().and_then(|w| w.registrar.as_deref()),
            Some("Example Registrar")
        );
        assert!(report.subdomains.error().unwrap().starts_with("task failed"));
        assert_eq!(report.historical_urls.error(), Some("HTTP 503"));
        assert_eq!(report.subdomain_count, 0);
        assert_eq!(report.failure_count(), 2);
    }

    #[tokio::test]
    async fn disabled_sources_are_recorded_and_history_is_capped() {
        let aggregator = OsintAggregator::new(
            None,
            Some(Arc::new(FixedSubdomains(vec!["a.example.com", "*.b.example.com"]))),
            Some(Arc::new(EndlessHistory)),
            100,
            Duration::from_secs(5),
        );
        let report = aggregator.collect_osint("example.com").await;

        assert_eq!(report.whois.error(), Some(DISABLED_REASON));
        assert_eq!(report.subdomain_count, 2);
        assert_eq!(report.historical_urls.success().map(Vec::len), Some(100));
    }
}
