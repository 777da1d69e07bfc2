// src/core/profiler.rs

//! Drives one profiling run through its stages and assembles the `Profile`.
//!
//! Stages run in a fixed order (DNS, SCAN, FINGERPRINT, OSINT, RISK, SEAL).
//! The requested depth decides which analysis stages run, and SEAL runs only
//! when evidence is collected. A stage that fails is recorded as failed on the
//! profile and the run moves on.

use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::ProfilerConfig;
use crate::core::error::ConfigError;
use crate::core::evidence::collector::EvidenceCollector;
use crate::core::knowledge_base::KnowledgeBase;
use crate::core::models::{
    CertificateInfo, Depth, DiscoveredPath, HttpFingerprint, PortResult, Profile, ServiceFingerprint, Stage,
    StageOutcome,
};
use crate::core::osint::{
    CrtShSource, HistoricalUrlSource, OsintAggregator, SubdomainSource, TcpWhoisSource, WaybackSource, WhoisSource,
};
use crate::core::risk::RiskAssessor;
use crate::core::scanner::fingerprint_scanner::web_scheme;
use crate::core::scanner::{ssl_scanner, DnsResolver, HickoryResolver, NetworkProbe, PortScanner, ServiceFingerprinter};

/// Evidence type names, one per analysis stage.
pub const EVIDENCE_DNS: &str = "dns_resolution";
pub const EVIDENCE_SCAN: &str = "network_scan";
pub const EVIDENCE_FINGERPRINT: &str = "service_fingerprinting";
pub const EVIDENCE_OSINT: &str = "osint";
pub const EVIDENCE_RISK: &str = "vulnerability_assessment";

const TLS_PORT: u16 = 443;
const PLAIN_WEB_PORT: u16 = 80;

/// Knobs of the orchestrator that are not owned by a collaborator.
#[derive(Debug, Clone)]
pub struct ProfilerSettings {
    pub evidence_dir: PathBuf,
    pub collector: String,
    /// Fixed case id; generated from the host and start time when `None`.
    pub case_id: Option<String>,
    pub max_service_fingerprints: usize,
    pub stage_deadline: Option<Duration>,
    pub tls_timeout: Duration,
}

impl Default for ProfilerSettings {
    fn default() -> Self {
        Self {
            evidence_dir: PathBuf::from("evidence"),
            collector: "vanguard-profiler".to_string(),
            case_id: None,
            max_service_fingerprints: 10,
            stage_deadline: None,
            tls_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&ProfilerConfig> for ProfilerSettings {
    fn from(cfg: &ProfilerConfig) -> Self {
        Self {
            evidence_dir: cfg.evidence_dir.clone(),
            collector: cfg.collector.clone(),
            case_id: cfg.case_id.clone(),
            max_service_fingerprints: cfg.max_service_fingerprints,
            stage_deadline: cfg.stage_deadline(),
            tls_timeout: Duration::from_secs(cfg.http_timeout_secs),
        }
    }
}

/// Results of the FINGERPRINT stage before they are written to the profile.
#[derive(Serialize)]
struct FingerprintStage {
    services: Vec<ServiceFingerprint>,
    http_fingerprint: Option<StageOutcome<HttpFingerprint>>,
    tls_certificate: Option<StageOutcome<CertificateInfo>>,
    discovered_paths: Option<StageOutcome<Vec<DiscoveredPath>>>,
}

/// Runs profiling sessions against injected collaborators.
pub struct ProfileOrchestrator {
    resolver: Arc<dyn DnsResolver>,
    scanner: Arc<dyn NetworkProbe>,
    fingerprinter: Arc<ServiceFingerprinter>,
    osint: Arc<OsintAggregator>,
    risk: Arc<RiskAssessor>,
    settings: ProfilerSettings,
}

impl ProfileOrchestrator {
    /// Builds an orchestrator from already constructed collaborators.
    ///
    /// # Arguments
    /// * `resolver` - DNS stage.
    /// * `scanner` - Port scan stage.
    /// * `fingerprinter` - HTTP, service, TLS-adjacent and path probing.
    /// * `osint` - Passive sources, each already enabled or disabled.
    /// * `risk` - Vulnerability matching and scoring with a validated policy.
    /// * `settings` - Evidence location, deadlines and fingerprint limits.
    pub fn new(
        resolver: Arc<dyn DnsResolver>,
        scanner: Arc<dyn NetworkProbe>,
        fingerprinter: Arc<ServiceFingerprinter>,
        osint: Arc<OsintAggregator>,
        risk: Arc<RiskAssessor>,
        settings: ProfilerSettings,
    ) -> Self {
        Self {
            resolver,
            scanner,
            fingerprinter,
            osint,
            risk,
            settings,
        }
    }

    /// Wires the production network sources from configuration.
    ///
    /// # Returns
    /// An orchestrator backed by hickory DNS, TCP connects and the enabled
    /// OSINT sources, or a `ConfigError` if the knowledge base, the risk
    /// policy or an HTTP client is invalid.
    pub fn from_config(cfg: &ProfilerConfig) -> Result<Self, ConfigError> {
        let knowledge = Arc::new(KnowledgeBase::load_with(cfg.extra_vulnerabilities.clone())?);
        let vulnerability_count = knowledge.vulnerability_count();
        let fingerprint_options = cfg.fingerprint_options();
        let osint_client = Client::builder()
            .user_agent(&fingerprint_options.user_agent)
            .timeout(cfg.osint_timeout())
            .build()?;
        let fingerprinter = ServiceFingerprinter::new(Arc::clone(&knowledge), fingerprint_options)?;
        let risk = RiskAssessor::new(knowledge, cfg.risk_policy.clone())?;

        let sources = &cfg.osint_sources;
        let whois: Option<Arc<dyn WhoisSource>> = sources
            .whois
            .then(|| Arc::new(TcpWhoisSource::new(cfg.osint_timeout())) as Arc<dyn WhoisSource>);
        let subdomains: Option<Arc<dyn SubdomainSource>> = sources
            .certificate_transparency
            .then(|| Arc::new(CrtShSource::new(osint_client.clone())) as Arc<dyn SubdomainSource>);
        let history: Option<Arc<dyn HistoricalUrlSource>> = sources
            .web_archive
            .then(|| Arc::new(WaybackSource::new(osint_client)) as Arc<dyn HistoricalUrlSource>);
        let osint = OsintAggregator::new(whois, subdomains, history, cfg.historical_url_limit, cfg.osint_timeout());

        info!(
            vulnerabilities = vulnerability_count,
            max_concurrent = cfg.max_concurrent,
            "Profiler initialized."
        );
        Ok(Self::new(
            Arc::new(HickoryResolver::new()),
            Arc::new(PortScanner::tcp(cfg.scan_options())),
            Arc::new(fingerprinter),
            Arc::new(osint),
            Arc::new(risk),
            ProfilerSettings::from(cfg),
        ))
    }

    pub fn settings(&self) -> &ProfilerSettings {
        &self.settings
    }

    /// DNS only, no evidence.
    pub async fn quick_profile(&self, target: &str) -> Profile {
        self.profile_target(target, Depth::Basic, false).await
    }

    /// Every stage except path probing, with evidence sealed.
    pub async fn full_profile(&self, target: &str) -> Profile {
        self.profile_target(target, Depth::Full, true).await
    }

    /// Every stage, including common path probing, with evidence sealed.
    pub async fn deep_profile(&self, target: &str) -> Profile {
        self.profile_target(target, Depth::Deep, true).await
    }

    /// Runs every stage the depth asks for and returns the completed profile.
    ///
    /// # Arguments
    /// * `target` - A domain, an IP address or a URL. Only the host is probed.
    /// * `depth` - Which stages run and which port range is scanned.
    /// * `collect_evidence` - Seal each stage's output under the evidence
    ///   directory. The case id comes from the settings or from the host and
    ///   start time.
    ///
    /// # Returns
    /// The completed profile. This never fails: stage errors are recorded on
    /// the profile itself.
    pub async fn profile_target(&self, target: &str, depth: Depth, collect_evidence: bool) -> Profile {
        let host = target_host(target);
        info!(target, host = %host, depth = %depth, collect_evidence, "Starting profile.");

        let mut profile = Profile::new(target, depth);
        let mut evidence = collect_evidence.then(|| {
            let case_id = self
                .settings
                .case_id
                .clone()
                .unwrap_or_else(|| format!("{}_{}", sanitize(&host), Utc::now().format("%Y%m%d_%H%M%S")));
            EvidenceCollector::new(&self.settings.collector, &case_id, self.settings.evidence_dir.join(&case_id))
        });

        // DNS always runs.
        let dns = self
            .within_deadline(Stage::Dns, self.resolver.resolve_target(&host))
            .await
            .and_then(|r| r);
        let dns = StageOutcome::from_result(dns);
        record(&mut evidence, &mut profile.evidence_errors, EVIDENCE_DNS, &dns);
        profile.dns_info = Some(dns);

        if depth.runs(Stage::Scan) {
            let scan_host = profile
                .dns_info
                .as_ref()
                .and_then(StageOutcome::success)
                .and_then(|info| info.a_records.first().cloned())
                .unwrap_or_else(|| host.clone());
            let scan = self
                .within_deadline(Stage::Scan, self.scanner.scan_target(&scan_host, depth.scan_range()))
                .await;
            let scan = StageOutcome::from_result(scan);
            record(&mut evidence, &mut profile.evidence_errors, EVIDENCE_SCAN, &scan);
            profile.network_scan = Some(scan);
        }

        if depth.runs(Stage::Fingerprint) {
            let open_ports = profile.open_ports().to_vec();
            match self
                .within_deadline(Stage::Fingerprint, self.fingerprint(&host, &open_ports, depth))
                .await
            {
                Ok(stage) => {
                    record(&mut evidence, &mut profile.evidence_errors, EVIDENCE_FINGERPRINT, &stage);
                    profile.services = Some(StageOutcome::Success(stage.services));
                    profile.http_fingerprint = stage.http_fingerprint;
                    profile.tls_certificate = stage.tls_certificate;
                    profile.discovered_paths = stage.discovered_paths;
                }
                Err(reason) => {
                    let failed: StageOutcome<Vec<ServiceFingerprint>> = StageOutcome::failed(reason);
                    record(&mut evidence, &mut profile.evidence_errors, EVIDENCE_FINGERPRINT, &failed);
                    profile.services = Some(failed);
                }
            }
        }

        if depth.runs(Stage::Osint) {
            let osint = self
                .within_deadline(Stage::Osint, self.osint.collect_osint(&host))
                .await;
            let osint = StageOutcome::from_result(osint);
            record(&mut evidence, &mut profile.evidence_errors, EVIDENCE_OSINT, &osint);
            profile.osint = Some(osint);
        }

        if depth.runs(Stage::Risk) {
            profile.vulnerabilities = self.risk.match_vulnerabilities(profile.technologies());
            let assessment = self.risk.assess_risk_score(&profile);
            info!(score = assessment.score, level = %assessment.level, "Risk assessment finished.");
            record(
                &mut evidence,
                &mut profile.evidence_errors,
                EVIDENCE_RISK,
                &json!({
                    "vulnerabilities": &profile.vulnerabilities,
                    "risk_assessment": &assessment,
                }),
            );
            profile.risk_assessment = Some(StageOutcome::Success(assessment));
        }

        if let Some(collector) = evidence.as_mut() {
            debug!(stage = %Stage::Seal, items = collector.items().len(), "Sealing evidence.");
            let summary = collector.save_all();
            profile.evidence_sealed = summary.failures.is_empty() && !summary.saved.is_empty();
            profile.evidence_files = summary.saved;
            profile.evidence_errors.extend(summary.failures);
            if !profile.evidence_sealed {
                warn!(errors = profile.evidence_errors.len(), "Evidence was not fully sealed.");
            }
        }

        profile.complete();
        info!(target, depth = %depth, sealed = profile.evidence_sealed, "Profile complete.");
        profile
    }

    /// Service fingerprints, the main HTTP fingerprint, the certificate and
    /// (deep only) exposed paths.
    async fn fingerprint(&self, host: &str, open_ports: &[PortResult], depth: Depth) -> FingerprintStage {
        let mut services = Vec::new();
        for port in open_ports.iter().take(self.settings.max_service_fingerprints) {
            services.push(
                self.fingerprinter
                    .fingerprint_service(host, port.port, Some(port.service.as_str()))
                    .await,
            );
        }

        let base_url = web_base_url(host, open_ports);
        let http_fingerprint = match &base_url {
            Some(url) => Some(StageOutcome::from_result(self.fingerprinter.fingerprint_http(url).await)),
            None => {
                debug!(host, "No open web port, skipping HTTP fingerprint.");
                None
            }
        };

        let tls_certificate = if open_ports.iter().any(|p| p.port == TLS_PORT) {
            Some(StageOutcome::from_result(
                ssl_scanner::inspect_certificate(host, TLS_PORT, self.settings.tls_timeout).await,
            ))
        } else {
            None
        };

        let discovered_paths = match (&base_url, depth.probes_paths()) {
            (Some(url), true) => Some(StageOutcome::from_result(self.fingerprinter.probe_common_paths(url).await)),
            _ => None,
        };

        FingerprintStage {
            services,
            http_fingerprint,
            tls_certificate,
            discovered_paths,
        }
    }

    /// Runs `work` under the per-stage deadline. Expiry drops the future,
    /// which aborts any workers it owns.
    async fn within_deadline<T, F>(&self, stage: Stage, work: F) -> Result<T, String>
    where
        F: Future<Output = T>,
    {
        let Some(limit) = self.settings.stage_deadline else {
            return Ok(work.await);
        };
        tokio::time::timeout(limit, work).await.map_err(|_| {
            warn!(stage = %stage, deadline_secs = limit.as_secs_f64(), "Stage deadline exceeded.");
            format!("{stage} stage exceeded its deadline of {:.1}s", limit.as_secs_f64())
        })
    }
}

/// The host part of a target, which may be given as a URL.
///
/// # Examples
/// `https://[::1]:8443/x` gives `::1`, and `example.com.` gives `example.com`.
pub fn target_host(target: &str) -> String {
    let trimmed = target.trim();
    if trimmed.contains("://") {
        if let Some(host) = Url::parse(trimmed).ok().as_ref().and_then(Url::host_str) {
            return host.trim_start_matches('[').trim_end_matches(']').to_string();
        }
    }
    trimmed.trim_end_matches('.').to_string()
}

/// Picks the endpoint for the main HTTP fingerprint: HTTPS on 443, then plain
/// HTTP on 80, then the first other open web service.
fn web_base_url(host: &str, open_ports: &[PortResult]) -> Option<String> {
    let is_open = |port: u16| open_ports.iter().any(|p| p.port == port);
    if is_open(TLS_PORT) {
        return Some(format!("https://{host}"));
    }
    if is_open(PLAIN_WEB_PORT) {
        return Some(format!("http://{host}"));
    }
    open_ports.iter().find_map(|p| {
        web_scheme(p.port, Some(p.service.as_str())).map(|scheme| format!("{scheme}://{host}:{}", p.port))
    })
}

fn sanitize(host: &str) -> String {
    host.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

/// Adds one stage output to the evidence collector, if evidence is on.
fn record<S: Serialize>(
    evidence: &mut Option<EvidenceCollector>,
    errors: &mut Vec<String>,
    evidence_type: &str,
    data: &S,
) {
    let Some(collector) = evidence.as_mut() else { return };
    match serde_json::to_value(data) {
        Ok(value) => {
            collector.collect(evidence_type, value);
        }
        Err(e) => {
            error!(evidence_type, error = %e, "Could not serialize stage output as evidence.");
            errors.push(format!("{evidence_type}: {e}"));
        }
    }
}
