// src/core/scanner/dns_scanner.rs

use tracing::{debug, info, warn};

use crate::core::models::{DnsInfo, MxRecord};
use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::TokioAsyncResolver;
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;
use std::time::Duration;

/// Per-query timeout handed to the resolver.
pub const DNS_TIMEOUT: Duration = Duration::from_secs(5);

static RE_DOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?\.)*[a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?$")
        .unwrap()
});

pub fn is_valid_ip(target: &str) -> bool {
    target.parse::<IpAddr>().is_ok()
}

pub fn is_valid_domain(target: &str) -> bool {
    !target.is_empty() && target.len() <= 253 && RE_DOMAIN.is_match(target)
}

/// The resolution contract the profiler depends on.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// Forward records for a domain, or the reverse name for an IP.
    async fn resolve_target(&self, target: &str) -> Result<DnsInfo, String>;
}

/// System-independent resolver backed by hickory.
pub struct HickoryResolver {
    resolver: TokioAsyncResolver,
}

impl Default for HickoryResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl HickoryResolver {
    pub fn new() -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = DNS_TIMEOUT;
        opts.attempts = 1;
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), opts),
        }
    }

    async fn lookup_a(&self, target: &str) -> Vec<String> {
        match self.resolver.ipv4_lookup(target).await {
            Ok(records) => records.iter().map(|r| r.to_string()).collect(),
            Err(e) => {
                debug!(target, error = %e, "A lookup returned nothing.");
                Vec::new()
            }
        }
    }

    async fn lookup_aaaa(&self, target: &str) -> Vec<String> {
        match self.resolver.ipv6_lookup(target).await {
            Ok(records) => records.iter().map(|r| r.to_string()).collect(),
            Err(e) => {
                debug!(target, error = %e, "AAAA lookup returned nothing.");
                Vec::new()
            }
        }
    }

    async fn lookup_mx(&self, target: &str) -> Vec<MxRecord> {
        match self.resolver.mx_lookup(target).await {
            Ok(records) => records
                .iter()
                .map(|mx| MxRecord {
                    priority: mx.preference(),
                    server: mx.exchange().to_string(),
                })
                .collect(),
            Err(e) => {
                debug!(target, error = %e, "MX lookup returned nothing.");
                Vec::new()
            }
        }
    }

    async fn lookup_txt(&self, target: &str) -> Vec<String> {
        match self.resolver.txt_lookup(target).await {
            Ok(records) => records.iter().map(|r| r.to_string()).collect(),
            Err(e) => {
                debug!(target, error = %e, "TXT lookup returned nothing.");
                Vec::new()
            }
        }
    }

    async fn lookup_ns(&self, target: &str) -> Vec<String> {
        match self.resolver.ns_lookup(target).await {
            Ok(records) => records.iter().map(|r| r.to_string()).collect(),
            Err(e) => {
                debug!(target, error = %e, "NS lookup returned nothing.");
                Vec::new()
            }
        }
    }

    async fn lookup_cname(&self, target: &str) -> Vec<String> {
        match self.resolver.lookup(target, RecordType::CNAME).await {
            Ok(records) => records.iter().map(|r| r.to_string()).collect(),
            Err(e) => {
                debug!(target, error = %e, "CNAME lookup returned nothing.");
                Vec::new()
            }
        }
    }

    async fn reverse(&self, ip: IpAddr) -> Option<String> {
        match self.resolver.reverse_lookup(ip).await {
            Ok(names) => names.iter().next().map(|n| n.to_string()),
            Err(e) => {
                debug!(ip = %ip, error = %e, "Reverse lookup failed.");
                None
            }
        }
    }
}

#[async_trait]
impl DnsResolver for HickoryResolver {
    async fn resolve_target(&self, target: &str) -> Result<DnsInfo, String> {
        info!(target, "Starting DNS resolution.");

        let mut info = DnsInfo {
            target: target.to_string(),
            is_ip: is_valid_ip(target),
            is_domain: is_valid_domain(target),
            ..DnsInfo::default()
        };

        if let Ok(ip) = target.parse::<IpAddr>() {
            info.hostname = self.reverse(ip).await;
        } else if info.is_domain {
            let (a, aaaa, mx, txt, ns, cname) = tokio::join!(
                self.lookup_a(target),
                self.lookup_aaaa(target),
                self.lookup_mx(target),
                self.lookup_txt(target),
                self.lookup_ns(target),
                self.lookup_cname(target)
            );
            info.a_records = a;
            info.aaaa_records = aaaa;
            info.mx_records = mx;
            info.txt_records = txt;
            info.ns_records = ns;
            info.cname_records = cname;
        } else {
            warn!(target, "Target is neither an IP address nor a valid domain.");
        }

        info!(a = %info.a_records.len(), mx = %info.mx_records.len(), "DNS resolution finished.");
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_validation() {
        assert!(is_valid_domain("example.com"));
        assert!(is_valid_domain("a-b.sub.example.co.uk"));
        assert!(is_valid_domain("localhost"));
        assert!(!is_valid_domain(""));
        assert!(!is_valid_domain("-bad.example.com"));
        assert!(!is_valid_domain("bad_underscore.com"));
        assert!(!is_valid_domain(&"a".repeat(254)));
    }

    #[test]
    fn ip_validation() {
        assert!(is_valid_ip("93.184.216.34"));
        assert!(is_valid_ip("::1"));
        assert!(!is_valid_ip("example.com"));
    }

    #[tokio::test]
    async fn invalid_target_resolves_to_empty_record() {
        let resolver = HickoryResolver::new();
        let info = resolver.resolve_target("not a host!").await.unwrap();
        assert!(!info.is_ip && !info.is_domain);
        assert!(info.a_records.is_empty());
        assert!(info.hostname.is_none());
    }
}
