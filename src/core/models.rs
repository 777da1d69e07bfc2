// src/core/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use strum::{Display, EnumIter, EnumString};

use crate::core::knowledge_base::TechnologyKind;

// --- Reusable Result Types ---

/// The uniform result of one pipeline stage (or one sub-query inside a stage).
///
/// A stage that was never requested is represented by the *absence* of its
/// section (`Option::None` on the profile), never by `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome<T> {
    Success(T),
    Failed { error: String },
}

impl<T> StageOutcome<T> {
    /// A failed stage with a human-readable reason.
    pub fn failed(reason: impl Into<String>) -> Self {
        StageOutcome::Failed { error: reason.into() }
    }

    /// Converts any `Result` whose error can be displayed into an outcome.
    pub fn from_result<E: fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => StageOutcome::Success(value),
            Err(e) => StageOutcome::failed(e.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success(_))
    }

    /// The stage value, if it succeeded.
    pub fn success(&self) -> Option<&T> {
        match self {
            StageOutcome::Success(value) => Some(value),
            StageOutcome::Failed { .. } => None,
        }
    }

    /// The failure reason, if it failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            StageOutcome::Success(_) => None,
            StageOutcome::Failed { error } => Some(error),
        }
    }
}

/// Severity of a matched vulnerability. Ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

// --- Pipeline Control ---

/// Requested thoroughness of a profiling run.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Depth {
    Basic,
    #[default]
    Standard,
    Full,
    Deep,
}

/// One step of the profiling state machine, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Stage {
    Dns,
    Scan,
    Fingerprint,
    Osint,
    Risk,
    Seal,
}

impl Depth {
    /// The analysis stages gated by this depth. `Seal` is gated by evidence
    /// collection instead and therefore never appears here.
    pub fn stages(self) -> &'static [Stage] {
        match self {
            Depth::Basic => &[Stage::Dns],
            Depth::Standard => &[Stage::Dns, Stage::Scan],
            Depth::Full | Depth::Deep => &[
                Stage::Dns,
                Stage::Scan,
                Stage::Fingerprint,
                Stage::Osint,
                Stage::Risk,
            ],
        }
    }

    /// Whether `stage` is part of this depth.
    pub fn runs(self, stage: Stage) -> bool {
        self.stages().contains(&stage)
    }

    /// Port range scanned at this depth.
    pub fn scan_range(self) -> ScanRange {
        match self {
            Depth::Deep => ScanRange::Full,
            _ => ScanRange::Quick,
        }
    }

    /// Only `Deep` probes common paths.
    pub fn probes_paths(self) -> bool {
        self == Depth::Deep
    }
}

/// Which port list a scan covers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScanRange {
    Quick,
    Full,
}

// --- DNS Models ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MxRecord {
    pub priority: u16,
    pub server: String,
}

/// Forward (or reverse, for IP targets) resolution data for a target.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DnsInfo {
    pub target: String,
    pub is_ip: bool,
    pub is_domain: bool,
    pub hostname: Option<String>,
    pub a_records: Vec<String>,
    pub aaaa_records: Vec<String>,
    pub mx_records: Vec<MxRecord>,
    pub txt_records: Vec<String>,
    pub ns_records: Vec<String>,
    pub cname_records: Vec<String>,
}

// --- Port Scanner Models ---

/// Classification of a single TCP probe. Exactly one per scanned port.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortResult {
    pub port: u16,
    pub state: PortState,
    pub service: String,
    pub banner: Option<String>,
    /// Transport error message, present only when `state` is `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkScan {
    pub host: String,
    pub scan_type: ScanRange,
    /// Number of probes that produced a classification other than `error`.
    pub total_ports_scanned: usize,
    pub open_ports: Vec<PortResult>,
    pub filtered_ports: Vec<PortResult>,
    pub all_results: Vec<PortResult>,
}

impl NetworkScan {
    /// Builds a scan summary from per-port results.
    ///
    /// # Arguments
    /// * `host` - The address that was scanned.
    /// * `scan_type` - The range the results came from.
    /// * `results` - One result per probed port, in any order.
    ///
    /// # Returns
    /// The scan with open and filtered ports split out. Results classified as
    /// `error` are kept but not counted as scanned.
    pub fn from_results(host: &str, scan_type: ScanRange, results: Vec<PortResult>) -> Self {
        let by_state = |state: PortState| -> Vec<PortResult> {
            results.iter().filter(|r| r.state == state).cloned().collect()
        };
        Self {
            host: host.to_string(),
            scan_type,
            total_ports_scanned: results.iter().filter(|r| r.state != PortState::Error).count(),
            open_ports: by_state(PortState::Open),
            filtered_ports: by_state(PortState::Filtered),
            all_results: results,
        }
    }

    pub fn is_open(&self, port: u16) -> bool {
        self.open_ports.iter().any(|p| p.port == port)
    }
}

// --- Fingerprint Models ---

/// How sure the fingerprinter is about a detected technology.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Confidence {
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectedTechnology {
    pub kind: TechnologyKind,
    pub version: Option<String>,
    /// The header value the detection came from, if any.
    pub evidence: Option<String>,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HttpFingerprint {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub server: Option<String>,
    pub powered_by: Option<String>,
    pub cookies: Vec<String>,
    pub security_headers: BTreeMap<String, String>,
    pub missing_security_headers: Vec<String>,
    pub title: Option<String>,
    pub technologies: Vec<DetectedTechnology>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceFingerprint {
    pub host: String,
    pub port: u16,
    pub service: Option<String>,
    /// HTTP details for web ports; `None` for services without a dedicated probe.
    pub details: Option<StageOutcome<HttpFingerprint>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveredPath {
    pub path: String,
    pub url: String,
    pub status: u16,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CertificateInfo {
    pub subject_name: String,
    pub issuer_name: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub days_until_expiry: i64,
    pub is_valid: bool,
}

// --- OSINT Models ---

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WhoisInfo {
    pub domain: String,
    pub registrar: Option<String>,
    pub creation_date: Option<String>,
    pub expiration_date: Option<String>,
    pub name_servers: Vec<String>,
    pub status: Vec<String>,
    pub raw: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OsintReport {
    pub target: String,
    pub whois: StageOutcome<WhoisInfo>,
    pub subdomains: StageOutcome<Vec<String>>,
    pub historical_urls: StageOutcome<Vec<String>>,
    pub subdomain_count: usize,
}

impl OsintReport {
    /// Number of sub-queries that failed.
    pub fn failure_count(&self) -> usize {
        [
            self.whois.is_success(),
            self.subdomains.is_success(),
            self.historical_urls.is_success(),
        ]
        .iter()
        .filter(|ok| !**ok)
        .count()
    }
}

// --- Risk Models ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vulnerability {
    pub id: String,
    pub technology: TechnologyKind,
    pub detected_version: Option<String>,
    /// False when the technology version was unknown and the entry is version-qualified.
    pub version_confirmed: bool,
    pub severity: Severity,
    pub description: String,
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskFactor {
    pub code: String,
    pub description: String,
    pub points: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAssessment {
    pub score: u8,
    pub level: RiskLevel,
    pub factors: Vec<RiskFactor>,
    pub recommendations: Vec<String>,
}

// --- Main Profile ---

/// The aggregated result of one profiling run.
///
/// Stages mutate it inside the crate while it is in progress; once
/// `completed_at` is set it is handed out and only readable through accessors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub(crate) target: String,
    pub(crate) profile_depth: Depth,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) dns_info: Option<StageOutcome<DnsInfo>>,
    pub(crate) network_scan: Option<StageOutcome<NetworkScan>>,
    pub(crate) services: Option<StageOutcome<Vec<ServiceFingerprint>>>,
    pub(crate) http_fingerprint: Option<StageOutcome<HttpFingerprint>>,
    pub(crate) tls_certificate: Option<StageOutcome<CertificateInfo>>,
    pub(crate) discovered_paths: Option<StageOutcome<Vec<DiscoveredPath>>>,
    pub(crate) osint: Option<StageOutcome<OsintReport>>,
    pub(crate) vulnerabilities: Vec<Vulnerability>,
    pub(crate) risk_assessment: Option<StageOutcome<RiskAssessment>>,
    pub(crate) evidence_sealed: bool,
    pub(crate) evidence_files: Vec<PathBuf>,
    pub(crate) evidence_errors: Vec<String>,
}

impl Profile {
    pub(crate) fn new(target: &str, depth: Depth) -> Self {
        Self {
            target: target.to_string(),
            profile_depth: depth,
            started_at: Utc::now(),
            completed_at: None,
            dns_info: None,
            network_scan: None,
            services: None,
            http_fingerprint: None,
            tls_certificate: None,
            discovered_paths: None,
            osint: None,
            vulnerabilities: Vec::new(),
            risk_assessment: None,
            evidence_sealed: false,
            evidence_files: Vec::new(),
            evidence_errors: Vec::new(),
        }
    }

    pub(crate) fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn depth(&self) -> Depth {
        self.profile_depth
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Set once the pipeline has finished, whatever the stage outcomes.
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn dns_info(&self) -> Option<&StageOutcome<DnsInfo>> {
        self.dns_info.as_ref()
    }

    pub fn network_scan(&self) -> Option<&StageOutcome<NetworkScan>> {
        self.network_scan.as_ref()
    }

    pub fn services(&self) -> Option<&StageOutcome<Vec<ServiceFingerprint>>> {
        self.services.as_ref()
    }

    pub fn http_fingerprint(&self) -> Option<&StageOutcome<HttpFingerprint>> {
        self.http_fingerprint.as_ref()
    }

    pub fn tls_certificate(&self) -> Option<&StageOutcome<CertificateInfo>> {
        self.tls_certificate.as_ref()
    }

    pub fn discovered_paths(&self) -> Option<&StageOutcome<Vec<DiscoveredPath>>> {
        self.discovered_paths.as_ref()
    }

    pub fn osint(&self) -> Option<&StageOutcome<OsintReport>> {
        self.osint.as_ref()
    }

    /// Vulnerabilities matched against detected technologies. Empty when the
    /// risk stage did not run.
    pub fn vulnerabilities(&self) -> &[Vulnerability] {
        &self.vulnerabilities
    }

    pub fn risk_assessment(&self) -> Option<&StageOutcome<RiskAssessment>> {
        self.risk_assessment.as_ref()
    }

    /// True only if at least one evidence file was written and none failed.
    pub fn evidence_sealed(&self) -> bool {
        self.evidence_sealed
    }

    pub fn evidence_files(&self) -> &[PathBuf] {
        &self.evidence_files
    }

    pub fn evidence_errors(&self) -> &[String] {
        &self.evidence_errors
    }

    /// Open ports from a successful scan, or nothing.
    pub fn open_ports(&self) -> &[PortResult] {
        match self.network_scan.as_ref().and_then(StageOutcome::success) {
            Some(scan) => &scan.open_ports,
            None => &[],
        }
    }

    /// Technologies from a successful HTTP fingerprint, or nothing.
    pub fn technologies(&self) -> &[DetectedTechnology] {
        match self.http_fingerprint.as_ref().and_then(StageOutcome::success) {
            Some(fp) => &fp.technologies,
            None => &[],
        }
    }
}
