//! This module acts as the central "brain" of the profiler.
//! It holds the static, read-only tables the fingerprinter and the risk
//! assessor consult: technology detection patterns, known vulnerabilities and
//! human-readable remediation advice for every risk factor.
//! All string-keyed data is resolved against the closed `TechnologyKind`
//! enumeration and validated once in `KnowledgeBase::load`.

use crate::core::error::KnowledgeBaseError;
use crate::core::models::Severity;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Every technology the fingerprinter can recognise.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, EnumIter,
)]
pub enum TechnologyKind {
    WordPress,
    Joomla,
    Drupal,
    Laravel,
    Django,
    React,
    Angular,
    #[serde(rename = "Vue.js")]
    #[strum(serialize = "Vue.js")]
    VueJs,
    #[serde(rename = "jQuery")]
    #[strum(serialize = "jQuery")]
    JQuery,
    Bootstrap,
    #[serde(rename = "PHP")]
    #[strum(serialize = "PHP")]
    Php,
    #[serde(rename = "ASP.NET")]
    #[strum(serialize = "ASP.NET")]
    AspNet,
    Apache,
    #[serde(rename = "nginx")]
    #[strum(serialize = "nginx")]
    Nginx,
    #[serde(rename = "IIS")]
    #[strum(serialize = "IIS")]
    Iis,
}

// --- Technology Detection Tables ---

/// Body patterns per technology, matched case-insensitively. Order matters:
/// the first matching pattern wins for its technology.
static BODY_PATTERNS: &[(TechnologyKind, &[&str])] = &[
    (TechnologyKind::WordPress, &[r"wp-content", r"wordpress"]),
    (TechnologyKind::Joomla, &[r"joomla", r"/components/com_"]),
    (TechnologyKind::Drupal, &[r"drupal", r"sites/default"]),
    (TechnologyKind::Laravel, &[r"laravel"]),
    (TechnologyKind::Django, &[r"csrfmiddlewaretoken", r"__admin"]),
    (TechnologyKind::React, &[r"react", r"data-reactroot"]),
    (TechnologyKind::Angular, &[r"ng-app", r"angular"]),
    (TechnologyKind::VueJs, &[r"vue", r"data-v-"]),
    (TechnologyKind::JQuery, &[r"jquery"]),
    (TechnologyKind::Bootstrap, &[r"bootstrap"]),
    (TechnologyKind::Php, &[r"\.php"]),
    (TechnologyKind::AspNet, &[r"__VIEWSTATE", r"ASP\.NET"]),
    (TechnologyKind::Apache, &[r"Apache Server at"]),
    (TechnologyKind::Nginx, &[r"<hr><center>nginx</center>"]),
    (TechnologyKind::Iis, &[r"IIS Windows Server"]),
];

/// A header substring that identifies a technology at high confidence.
pub struct HeaderRule {
    pub header: &'static str,
    /// Lowercase needle searched in the lowercased header value.
    pub needle: &'static str,
    pub kind: TechnologyKind,
}

pub static HEADER_RULES: &[HeaderRule] = &[
    HeaderRule { header: "x-powered-by", needle: "php", kind: TechnologyKind::Php },
    HeaderRule { header: "x-powered-by", needle: "asp.net", kind: TechnologyKind::AspNet },
    HeaderRule { header: "server", needle: "apache", kind: TechnologyKind::Apache },
    HeaderRule { header: "server", needle: "nginx", kind: TechnologyKind::Nginx },
    HeaderRule { header: "server", needle: "microsoft-iis", kind: TechnologyKind::Iis },
];

// --- Vulnerability Table ---

/// A vulnerability entry as written in the static table or in configuration.
///
/// `technology` deserializes through `TechnologyKind`, so a misspelled
/// technology in a configuration file is rejected when it is loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VulnerabilitySpec {
    pub id: String,
    pub technology: TechnologyKind,
    /// Inclusive lower bound.
    #[serde(default)]
    pub min_version: Option<String>,
    /// Exclusive upper bound.
    #[serde(default)]
    pub max_version: Option<String>,
    pub severity: Severity,
    pub description: String,
}

struct StaticVulnerability {
    id: &'static str,
    technology: TechnologyKind,
    min_version: Option<&'static str>,
    max_version: Option<&'static str>,
    severity: Severity,
    description: &'static str,
}

static VULNERABILITIES: &[StaticVulnerability] = &[
    StaticVulnerability {
        id: "CVE-2021-41773",
        technology: TechnologyKind::Apache,
        min_version: Some("2.4.49"),
        max_version: Some("2.4.50"),
        severity: Severity::Critical,
        description: "Path traversal and remote code execution in Apache HTTP Server 2.4.49.",
    },
    StaticVulnerability {
        id: "CVE-2021-42013",
        technology: TechnologyKind::Apache,
        min_version: Some("2.4.49"),
        max_version: Some("2.4.51"),
        severity: Severity::Critical,
        description: "Incomplete fix for CVE-2021-41773 allows path traversal and RCE in 2.4.49 and 2.4.50.",
    },
    StaticVulnerability {
        id: "CVE-2021-23017",
        technology: TechnologyKind::Nginx,
        min_version: Some("0.6.18"),
        max_version: Some("1.20.1"),
        severity: Severity::High,
        description: "Off-by-one memory overwrite in the nginx DNS resolver.",
    },
    StaticVulnerability {
        id: "CVE-2017-7269",
        technology: TechnologyKind::Iis,
        min_version: Some("6.0"),
        max_version: Some("6.1"),
        severity: Severity::Critical,
        description: "WebDAV buffer overflow in IIS 6.0 allowing remote code execution.",
    },
    StaticVulnerability {
        id: "CVE-2024-4577",
        technology: TechnologyKind::Php,
        min_version: None,
        max_version: Some("8.1.29"),
        severity: Severity::Critical,
        description: "PHP-CGI argument injection on Windows hosts with certain code pages.",
    },
    StaticVulnerability {
        id: "CVE-2020-11022",
        technology: TechnologyKind::JQuery,
        min_version: Some("1.2"),
        max_version: Some("3.5.0"),
        severity: Severity::Medium,
        description: "Cross-site scripting when untrusted HTML is passed to jQuery DOM manipulation methods.",
    },
    StaticVulnerability {
        id: "CVE-2018-7600",
        technology: TechnologyKind::Drupal,
        min_version: None,
        max_version: Some("7.58"),
        severity: Severity::Critical,
        description: "Drupalgeddon2: remote code execution through the Form API.",
    },
    StaticVulnerability {
        id: "CVE-2022-21661",
        technology: TechnologyKind::WordPress,
        min_version: None,
        max_version: Some("5.8.3"),
        severity: Severity::High,
        description: "SQL injection through WP_Query in WordPress core.",
    },
    StaticVulnerability {
        id: "CVE-2023-23752",
        technology: TechnologyKind::Joomla,
        min_version: Some("4.0.0"),
        max_version: Some("4.2.8"),
        severity: Severity::Medium,
        description: "Improper access check exposes Joomla webservice endpoints and configuration.",
    },
    StaticVulnerability {
        id: "CVE-2021-3129",
        technology: TechnologyKind::Laravel,
        min_version: None,
        max_version: Some("8.4.2"),
        severity: Severity::Critical,
        description: "Remote code execution through the Ignition debug page when debug mode is enabled.",
    },
    StaticVulnerability {
        id: "CVE-2019-8331",
        technology: TechnologyKind::Bootstrap,
        min_version: None,
        max_version: Some("3.4.1"),
        severity: Severity::Medium,
        description: "Cross-site scripting in the tooltip and popover data-template attribute.",
    },
    StaticVulnerability {
        id: "CVE-2022-34265",
        technology: TechnologyKind::Django,
        min_version: Some("3.2"),
        max_version: Some("3.2.14"),
        severity: Severity::Critical,
        description: "SQL injection through the Trunc() and Extract() database functions.",
    },
];

// --- Versions ---

static RE_VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)*").unwrap());

/// A dotted numeric version. Missing components compare as zero, so `6.0 == 6`.
#[derive(Debug, Clone)]
pub struct Version(Vec<u64>);

impl Version {
    /// Parses a version made only of digits and dots.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        raw.split('.')
            .map(|part| part.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()
            .map(Version)
    }

    /// Finds the first dotted number inside free text such as `Apache/2.4.49 (Unix)`.
    pub fn extract(text: &str) -> Option<Self> {
        RE_VERSION.find(text).and_then(|m| Self::parse(m.as_str()))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let a = self.0.get(i).copied().unwrap_or(0);
            let b = other.0.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u64::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

/// `[min, max)` over versions; either side may be open.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionRange {
    pub min: Option<Version>,
    pub max: Option<Version>,
}

impl VersionRange {
    /// True when neither bound is set, i.e. every version is affected.
    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// Half-open check: `min <= version < max`, with a missing bound left open.
    pub fn contains(&self, version: &Version) -> bool {
        self.min.as_ref().is_none_or(|min| version >= min)
            && self.max.as_ref().is_none_or(|max| version < max)
    }
}

/// A validated vulnerability record.
#[derive(Debug, Clone)]
pub struct VulnerabilityRecord {
    pub id: String,
    pub technology: TechnologyKind,
    pub versions: VersionRange,
    pub severity: Severity,
    pub description: String,
}

impl VulnerabilityRecord {
    /// Whether this record applies to a detected version.
    ///
    /// Returns `Some(true)` for a confirmed match, `Some(false)` when the
    /// version is unknown but the record is version-qualified, `None` when the
    /// known version falls outside the range.
    pub fn applies_to(&self, version: Option<&str>) -> Option<bool> {
        if self.versions.is_unbounded() {
            return Some(true);
        }
        match version.and_then(Version::extract) {
            Some(v) if self.versions.contains(&v) => Some(true),
            Some(_) => None,
            None => Some(false),
        }
    }

    fn from_spec(spec: VulnerabilitySpec) -> Result<Self, KnowledgeBaseError> {
        let parse = |raw: &Option<String>| -> Result<Option<Version>, KnowledgeBaseError> {
            match raw {
                None => Ok(None),
                Some(text) => Version::parse(text).map(Some).ok_or_else(|| KnowledgeBaseError::Version {
                    id: spec.id.clone(),
                    version: text.clone(),
                }),
            }
        };
        let versions = VersionRange {
            min: parse(&spec.min_version)?,
            max: parse(&spec.max_version)?,
        };
        if let (Some(min), Some(max)) = (&versions.min, &versions.max) {
            if min >= max {
                return Err(KnowledgeBaseError::EmptyRange {
                    id: spec.id.clone(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
            }
        }
        Ok(Self {
            id: spec.id,
            technology: spec.technology,
            versions,
            severity: spec.severity,
            description: spec.description,
        })
    }
}

/// Compiled body patterns for one technology.
#[derive(Debug)]
pub struct DetectionRule {
    pub kind: TechnologyKind,
    pub patterns: Vec<Regex>,
}

/// The validated, compiled form of every table in this module.
#[derive(Debug)]
pub struct KnowledgeBase {
    detection: Vec<DetectionRule>,
    vulnerabilities: Vec<VulnerabilityRecord>,
}

impl KnowledgeBase {
    /// Compiles and validates the built-in tables.
    pub fn load() -> Result<Self, KnowledgeBaseError> {
        Self::load_with(Vec::new())
    }

    /// Like `load`, appending extra vulnerability entries (e.g. from configuration).
    pub fn load_with(extra: Vec<VulnerabilitySpec>) -> Result<Self, KnowledgeBaseError> {
        let mut detection = Vec::with_capacity(BODY_PATTERNS.len());
        for (kind, patterns) in BODY_PATTERNS {
            let compiled = patterns
                .iter()
                .map(|p| {
                    RegexBuilder::new(p)
                        .case_insensitive(true)
                        .build()
                        .map_err(|source| KnowledgeBaseError::Pattern {
                            technology: kind.to_string(),
                            source,
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            detection.push(DetectionRule { kind: *kind, patterns: compiled });
        }

        for kind in TechnologyKind::iter() {
            let has_body = detection.iter().any(|r| r.kind == kind && !r.patterns.is_empty());
            let has_header = HEADER_RULES.iter().any(|r| r.kind == kind);
            if !has_body && !has_header {
                return Err(KnowledgeBaseError::Uncovered(kind.to_string()));
            }
        }

        let builtin = VULNERABILITIES.iter().map(|v| VulnerabilitySpec {
            id: v.id.to_string(),
            technology: v.technology,
            min_version: v.min_version.map(str::to_string),
            max_version: v.max_version.map(str::to_string),
            severity: v.severity,
            description: v.description.to_string(),
        });

        let mut seen = HashSet::new();
        let mut vulnerabilities = Vec::new();
        for spec in builtin.chain(extra) {
            if !seen.insert(spec.id.clone()) {
                return Err(KnowledgeBaseError::Duplicate(spec.id));
            }
            vulnerabilities.push(VulnerabilityRecord::from_spec(spec)?);
        }

        Ok(Self { detection, vulnerabilities })
    }

    /// Body detection rules in table order, with their patterns compiled.
    pub fn detection_rules(&self) -> &[DetectionRule] {
        &self.detection
    }

    /// Known vulnerabilities for one technology.
    ///
    /// # Arguments
    /// * `kind` - The detected technology.
    ///
    /// # Returns
    /// Every record for `kind`, unbounded and version-qualified alike. Use
    /// `VulnerabilityRecord::applies_to` to test a concrete version.
    pub fn vulnerabilities_for(&self, kind: TechnologyKind) -> impl Iterator<Item = &VulnerabilityRecord> {
        self.vulnerabilities.iter().filter(move |v| v.technology == kind)
    }

    pub fn vulnerability_count(&self) -> usize {
        self.vulnerabilities.len()
    }
}

// --- Risk Factor Knowledge ---

/// Human-readable information about a risk factor code.
pub struct FindingDetail {
    /// A unique, machine-readable identifier (e.g. "HEADERS_CSP_MISSING").
    pub code: &'static str,
    /// Short heading shown in front of the remediation.
    pub title: &'static str,
    /// Clear, actionable steps that remove the factor.
    pub remediation: &'static str,
}

/// Risk factor codes that are not tied to a single header.
pub const RISK_HIGH_RISK_PORT: &str = "NETWORK_HIGH_RISK_PORT";
pub const RISK_KNOWN_VULNERABILITY: &str = "SOFTWARE_KNOWN_VULNERABILITY";
pub const RISK_UNENCRYPTED_TRANSPORT: &str = "TRANSPORT_UNENCRYPTED";

static FINDINGS: &[FindingDetail] = &[
    FindingDetail {
        code: RISK_HIGH_RISK_PORT,
        title: "High-Risk Service Exposed",
        remediation: "Close or firewall administrative, file-sharing and database ports; expose them only over a VPN or to an allow-listed set of addresses.",
    },
    FindingDetail {
        code: "HEADERS_HSTS_MISSING",
        title: "HSTS Header Missing",
        remediation: "Send 'Strict-Transport-Security: max-age=31536000; includeSubDomains' on every HTTPS response.",
    },
    FindingDetail {
        code: "HEADERS_CSP_MISSING",
        title: "CSP Header Missing",
        remediation: "Define a restrictive Content-Security-Policy that lists trusted script and style sources.",
    },
    FindingDetail {
        code: "HEADERS_X_FRAME_OPTIONS_MISSING",
        title: "X-Frame-Options Missing",
        remediation: "Send 'X-Frame-Options: DENY' or 'SAMEORIGIN', or a CSP frame-ancestors directive.",
    },
    FindingDetail {
        code: "HEADERS_X_CONTENT_TYPE_OPTIONS_MISSING",
        title: "X-Content-Type-Options Missing",
        remediation: "Send 'X-Content-Type-Options: nosniff'.",
    },
    FindingDetail {
        code: "HEADERS_X_XSS_PROTECTION_MISSING",
        title: "X-XSS-Protection Missing",
        remediation: "Send 'X-XSS-Protection: 0' together with a strong CSP, or '1; mode=block' for legacy clients.",
    },
    FindingDetail {
        code: RISK_KNOWN_VULNERABILITY,
        title: "Known Vulnerable Software",
        remediation: "Upgrade the affected components to a patched release and remove version banners from responses.",
    },
    FindingDetail {
        code: RISK_UNENCRYPTED_TRANSPORT,
        title: "No Transport Encryption",
        remediation: "Serve the site over HTTPS with a valid certificate and redirect all HTTP traffic to it.",
    },
];

/// Retrieves the detail for a risk factor code.
///
/// # Arguments
/// * `code` - A `RISK_*` constant or a `HEADERS_*_MISSING` code.
///
/// # Returns
/// The static title and remediation, or `None` for an unknown code.
pub fn get_finding_detail(code: &str) -> Option<&'static FindingDetail> {
    FINDINGS.iter().find(|f| f.code == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_tables_validate() {
        let kb = KnowledgeBase::load().expect("built-in knowledge base must load");
        assert_eq!(kb.detection_rules().len(), BODY_PATTERNS.len());
        assert_eq!(kb.vulnerability_count(), VULNERABILITIES.len());
    }

    #[test]
    fn every_technology_has_a_display_name_that_round_trips() {
        for kind in TechnologyKind::iter() {
            let name = kind.to_string();
            assert_eq!(name.parse::<TechnologyKind>().unwrap(), kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{name}\""));
        }
    }

    #[test]
    fn misspelled_technology_in_config_fails_fast() {
        let raw = r#"{"id":"X-1","technology":"Wordpres","severity":"high","description":"d"}"#;
        assert!(serde_json::from_str::<VulnerabilitySpec>(raw).is_err());
    }

    #[test]
    fn duplicate_and_inverted_entries_are_rejected() {
        let dup = VulnerabilitySpec {
            id: "CVE-2021-41773".into(),
            technology: TechnologyKind::Apache,
            min_version: None,
            max_version: None,
            severity: Severity::Low,
            description: "dup".into(),
        };
        assert!(matches!(
            KnowledgeBase::load_with(vec![dup]),
            Err(KnowledgeBaseError::Duplicate(_))
        ));

        let inverted = VulnerabilitySpec {
            id: "LOCAL-1".into(),
            technology: TechnologyKind::Nginx,
            min_version: Some("2.0".into()),
            max_version: Some("1.0".into()),
            severity: Severity::Low,
            description: "inverted".into(),
        };
        assert!(matches!(
            KnowledgeBase::load_with(vec![inverted]),
            Err(KnowledgeBaseError::EmptyRange { .. })
        ));
    }

    #[test]
    fn versions_compare_numerically() {
        let v = |s| Version::parse(s).unwrap();
        assert!(v("2.4.10") > v("2.4.9"));
        assert_eq!(v("6.0"), v("6"));
        assert_eq!(Version::extract("Apache/2.4.49 (Unix)"), Some(v("2.4.49")));
        assert!(Version::parse("2.x").is_none());
    }

    #[test]
    fn version_qualified_records_report_confirmation() {
        let kb = KnowledgeBase::load().unwrap();
        let record = kb
            .vulnerabilities_for(TechnologyKind::Apache)
            .find(|r| r.id == "CVE-2021-41773")
            .unwrap();
        assert_eq!(record.applies_to(Some("Apache/2.4.49 (Unix)")), Some(true));
        assert_eq!(record.applies_to(Some("Apache/2.4.57")), None);
        assert_eq!(record.applies_to(None), Some(false));
    }

    #[test]
    fn finding_details_cover_risk_codes() {
        for code in [RISK_HIGH_RISK_PORT, RISK_KNOWN_VULNERABILITY, RISK_UNENCRYPTED_TRANSPORT] {
            let detail = get_finding_detail(code).unwrap();
            assert!(!detail.title.is_empty() && !detail.remediation.is_empty(), "{code}");
        }
        assert!(get_finding_detail("NOT_A_CODE").is_none());
    }
}
