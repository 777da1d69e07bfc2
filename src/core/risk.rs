// src/core/risk.rs

//! Vulnerability matching and composite risk scoring.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::error::ConfigError;
use crate::core::knowledge_base::{
    get_finding_detail, KnowledgeBase, RISK_HIGH_RISK_PORT, RISK_KNOWN_VULNERABILITY, RISK_UNENCRYPTED_TRANSPORT,
};
use crate::core::models::{
    DetectedTechnology, HttpFingerprint, PortResult, Profile, RiskAssessment, RiskFactor, RiskLevel, Severity,
    StageOutcome, Vulnerability,
};
use crate::core::scanner::headers_scanner::missing_header_code;

/// Services that are routinely attacked when reachable from outside.
pub const HIGH_RISK_PORTS: &[u16] = &[21, 23, 135, 139, 445, 1433, 1521, 3306, 3389, 5432, 5900, 6379, 9200, 27017];

const PLAIN_WEB_PORTS: &[u16] = &[80, 8000, 8080];
const TLS_WEB_PORTS: &[u16] = &[443, 8443];

/// Upper bound of the score, and of any single configured weight or cap.
const MAX_SCORE: u32 = 100;

/// Minimum score for each level. Must be strictly descending.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskThresholds {
    pub critical: u8,
    pub high: u8,
    pub medium: u8,
    pub low: u8,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            critical: 80,
            high: 60,
            medium: 40,
            low: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SeverityWeights {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            critical: 25,
            high: 15,
            medium: 8,
            low: 3,
        }
    }
}

impl SeverityWeights {
    pub fn points(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }
}

/// Weights, caps and level thresholds. Unsigned fields make negative weights
/// unrepresentable; `validate` checks the rest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskPolicy {
    pub thresholds: RiskThresholds,
    pub high_risk_port_points: u32,
    pub high_risk_port_cap: u32,
    pub missing_header_points: u32,
    pub missing_header_cap: u32,
    pub severity_weights: SeverityWeights,
    pub vulnerability_cap: u32,
    pub unencrypted_transport_points: u32,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            thresholds: RiskThresholds::default(),
            high_risk_port_points: 10,
            high_risk_port_cap: 30,
            missing_header_points: 4,
            missing_header_cap: 20,
            severity_weights: SeverityWeights::default(),
            vulnerability_cap: 40,
            unencrypted_transport_points: 15,
        }
    }
}

impl RiskPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thresholds;
        if t.critical > 100 {
            return Err(ConfigError::Policy(format!("critical threshold {} exceeds 100", t.critical)));
        }
        if !(t.critical > t.high && t.high > t.medium && t.medium > t.low) {
            return Err(ConfigError::Policy(format!(
                "thresholds must be strictly descending (critical {}, high {}, medium {}, low {})",
                t.critical, t.high, t.medium, t.low
            )));
        }
        let bounded = [
            ("high_risk_port_points", self.high_risk_port_points),
            ("high_risk_port_cap", self.high_risk_port_cap),
            ("missing_header_points", self.missing_header_points),
            ("missing_header_cap", self.missing_header_cap),
            ("vulnerability_cap", self.vulnerability_cap),
            ("unencrypted_transport_points", self.unencrypted_transport_points),
            ("severity_weights.critical", self.severity_weights.critical),
        ];
        if let Some((name, value)) = bounded.iter().find(|(_, v)| *v > MAX_SCORE) {
            return Err(ConfigError::Policy(format!("{name} is {value}, above the {MAX_SCORE} point maximum")));
        }
        let w = &self.severity_weights;
        if !(w.critical >= w.high && w.high >= w.medium && w.medium >= w.low) {
            return Err(ConfigError::Policy(
                "severity weights must not decrease with severity".to_string(),
            ));
        }
        Ok(())
    }

    pub fn level_for(&self, score: u8) -> RiskLevel {
        let t = &self.thresholds;
        match score {
            s if s >= t.critical => RiskLevel::Critical,
            s if s >= t.high => RiskLevel::High,
            s if s >= t.medium => RiskLevel::Medium,
            s if s >= t.low => RiskLevel::Low,
            _ => RiskLevel::Minimal,
        }
    }
}

/// Adds factors to a running total that stops at `cap`.
struct CappedGroup<'a> {
    factors: &'a mut Vec<RiskFactor>,
    remaining: u32,
}

impl CappedGroup<'_> {
    fn add(&mut self, code: &str, description: String, points: u32) {
        let granted = points.min(self.remaining);
        self.remaining -= granted;
        self.factors.push(RiskFactor {
            code: code.to_string(),
            description,
            points: granted,
        });
    }
}

pub struct RiskAssessor {
    knowledge: Arc<KnowledgeBase>,
    policy: RiskPolicy,
}

impl RiskAssessor {
    pub fn new(knowledge: Arc<KnowledgeBase>, policy: RiskPolicy) -> Result<Self, ConfigError> {
        policy.validate()?;
        Ok(Self { knowledge, policy })
    }

    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    /// Every known vulnerability that applies to the detected technologies.
    pub fn match_vulnerabilities(&self, technologies: &[DetectedTechnology]) -> Vec<Vulnerability> {
        let mut matched: Vec<Vulnerability> = Vec::new();
        for tech in technologies {
            for record in self.knowledge.vulnerabilities_for(tech.kind) {
                let Some(confirmed) = record.applies_to(tech.version.as_deref()) else {
                    debug!(id = %record.id, version = ?tech.version, "Detected version outside vulnerable range.");
                    continue;
                };
                if matched.iter().any(|v| v.id == record.id) {
                    continue;
                }
                matched.push(Vulnerability {
                    id: record.id.clone(),
                    technology: tech.kind,
                    detected_version: tech.version.clone(),
                    version_confirmed: confirmed,
                    severity: record.severity,
                    description: record.description.clone(),
                });
            }
        }
        matched.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.id.cmp(&b.id)));
        info!(count = %matched.len(), "Vulnerability matching finished.");
        matched
    }

    pub fn assess_risk_score(&self, profile: &Profile) -> RiskAssessment {
        let fingerprint = profile.http_fingerprint().and_then(StageOutcome::success);
        self.assess(profile.open_ports(), fingerprint, profile.vulnerabilities())
    }

    /// Scores the raw ingredients of a profile.
    pub fn assess(
        &self,
        open_ports: &[PortResult],
        fingerprint: Option<&HttpFingerprint>,
        vulnerabilities: &[Vulnerability],
    ) -> RiskAssessment {
        let policy = &self.policy;
        let mut factors = Vec::new();

        let mut ports = CappedGroup { factors: &mut factors, remaining: policy.high_risk_port_cap };
        for port in open_ports.iter().filter(|p| HIGH_RISK_PORTS.contains(&p.port)) {
            ports.add(
                RISK_HIGH_RISK_PORT,
                format!("Port {} ({}) is open", port.port, port.service),
                policy.high_risk_port_points,
            );
        }

        if let Some(fp) = fingerprint {
            let mut headers = CappedGroup { factors: &mut factors, remaining: policy.missing_header_cap };
            for name in &fp.missing_security_headers {
                if let Some(code) = missing_header_code(name) {
                    headers.add(code, format!("{name} header is missing"), policy.missing_header_points);
                }
            }
        }

        // Most severe first, so the cap keeps the findings that matter.
        let mut ordered: Vec<&Vulnerability> = vulnerabilities.iter().collect();
        ordered.sort_by(|a, b| b.severity.cmp(&a.severity));
        let mut vulns = CappedGroup { factors: &mut factors, remaining: policy.vulnerability_cap };
        for vuln in ordered {
            let qualifier = if vuln.version_confirmed { "" } else { " (version unconfirmed)" };
            vulns.add(
                RISK_KNOWN_VULNERABILITY,
                format!("{} in {}{}: {}", vuln.id, vuln.technology, qualifier, vuln.description),
                policy.severity_weights.points(vuln.severity),
            );
        }

        let serves_plain = open_ports.iter().any(|p| PLAIN_WEB_PORTS.contains(&p.port));
        let serves_tls = open_ports.iter().any(|p| TLS_WEB_PORTS.contains(&p.port));
        if serves_plain && !serves_tls {
            factors.push(RiskFactor {
                code: RISK_UNENCRYPTED_TRANSPORT.to_string(),
                description: "Web service reachable only over plain HTTP".to_string(),
                points: policy.unencrypted_transport_points,
            });
        }

        let total = factors.iter().fold(0u32, |acc, f| acc.saturating_add(f.points));
        let score = total.min(MAX_SCORE) as u8;
        let level = policy.level_for(score);

        let mut recommendations: Vec<String> = Vec::new();
        for factor in &factors {
            if let Some(detail) = get_finding_detail(&factor.code) {
                let text = format!("{}: {}", detail.title, detail.remediation);
                if !recommendations.contains(&text) {
                    recommendations.push(text);
                }
            }
        }

        info!(score = %score, level = %level, factors = %factors.len(), "Risk assessment finished.");
        RiskAssessment {
            score,
            level,
            factors,
            recommendations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::knowledge_base::TechnologyKind;
    use crate::core::models::{Confidence, PortState};

    fn assessor() -> RiskAssessor {
        RiskAssessor::new(Arc::new(KnowledgeBase::load().unwrap()), RiskPolicy::default()).unwrap()
    }

    fn open(port: u16, service: &str) -> PortResult {
        PortResult {
            port,
            state: PortState::Open,
            service: service.to_string(),
            banner: None,
            error: None,
        }
    }

    fn tech(kind: TechnologyKind, version: Option<&str>) -> DetectedTechnology {
        DetectedTechnology {
            kind,
            version: version.map(str::to_string),
            evidence: None,
            confidence: Confidence::High,
        }
    }

    fn vuln(id: &str, severity: Severity) -> Vulnerability {
        Vulnerability {
            id: id.to_string(),
            technology: TechnologyKind::Apache,
            detected_version: None,
            version_confirmed: true,
            severity,
            description: "test".to_string(),
        }
    }

    #[test]
    fn matching_respects_version_ranges() {
        let assessor = assessor();
        let hits = assessor.match_vulnerabilities(&[tech(TechnologyKind::Apache, Some("2.4.49"))]);
        let ids: Vec<&str> = hits.iter().map(|v| v.id.as_str()).collect();
        assert!(ids.contains(&"CVE-2021-41773"));
        assert!(hits.iter().all(|v| v.version_confirmed));

        let patched = assessor.match_vulnerabilities(&[tech(TechnologyKind::Apache, Some("2.4.58"))]);
        assert!(patched.iter().all(|v| v.id != "CVE-2021-41773"));
    }

    #[test]
    fn unknown_version_matches_but_is_unconfirmed() {
        let hits = assessor().match_vulnerabilities(&[tech(TechnologyKind::Apache, None)]);
        let cve = hits.iter().find(|v| v.id == "CVE-2021-41773").unwrap();
        assert!(!cve.version_confirmed);
        assert_eq!(cve.detected_version, None);
    }

    #[test]
    fn clean_target_is_minimal() {
        let assessment = assessor().assess(&[open(443, "https")], None, &[]);
        assert_eq!(assessment.score, 0);
        assert_eq!(assessment.level, RiskLevel::Minimal);
        assert!(assessment.factors.is_empty());
        assert!(assessment.recommendations.is_empty());
    }

    #[test]
    fn factors_are_capped_and_total_clamped() {
        let ports: Vec<PortResult> = HIGH_RISK_PORTS.iter().map(|&p| open(p, "x")).chain([open(80, "http")]).collect();
        let fp = HttpFingerprint {
            missing_security_headers: vec![
                "Strict-Transport-Security".into(),
                "Content-Security-Policy".into(),
                "X-Frame-Options".into(),
                "X-Content-Type-Options".into(),
                "X-XSS-Protection".into(),
            ],
            ..HttpFingerprint::default()
        };
        let vulns: Vec<Vulnerability> = (0..10).map(|i| vuln(&format!("CVE-{i}"), Severity::Critical)).collect();

        let assessment = assessor().assess(&ports, Some(&fp), &vulns);
        let sum_for = |code: &str| -> u32 {
            assessment.factors.iter().filter(|f| f.code == code).map(|f| f.points).sum()
        };
        assert_eq!(sum_for(RISK_HIGH_RISK_PORT), 30);
        assert_eq!(sum_for(RISK_KNOWN_VULNERABILITY), 40);
        assert_eq!(sum_for(RISK_UNENCRYPTED_TRANSPORT), 15);
        assert_eq!(assessment.score, 100);
        assert_eq!(assessment.level, RiskLevel::Critical);
        assert!(assessment.recommendations.len() >= 4);
    }

    #[test]
    fn recommendations_are_titled_and_deduplicated() {
        let assessment = assessor().assess(&[open(21, "ftp"), open(23, "telnet"), open(80, "http")], None, &[]);
        assert_eq!(assessment.factors.len(), 3);
        assert_eq!(assessment.recommendations.len(), 2);
        assert!(assessment.recommendations[0].starts_with("High-Risk Service Exposed: Close or firewall"));
        assert!(assessment.recommendations[1].starts_with("No Transport Encryption: "));
    }

    #[test]
    fn adding_more_severe_vulnerabilities_never_lowers_the_score() {
        let assessor = assessor();
        let ports = [open(3389, "rdp"), open(80, "http")];
        let mut vulns = vec![vuln("CVE-A", Severity::Low)];
        let mut previous = assessor.assess(&ports, None, &vulns).score;

        for (i, severity) in [Severity::Medium, Severity::High, Severity::Critical, Severity::Critical]
            .into_iter()
            .enumerate()
        {
            vulns.push(vuln(&format!("CVE-{i}"), severity));
            let score = assessor.assess(&ports, None, &vulns).score;
            assert!(score >= previous, "score dropped from {previous} to {score}");
            previous = score;
        }
        assert_eq!(previous, 10 + 15 + 40);
    }

    #[test]
    fn policy_validation() {
        let mut policy = RiskPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.level_for(80), RiskLevel::Critical);
        assert_eq!(policy.level_for(79), RiskLevel::High);
        assert_eq!(policy.level_for(19), RiskLevel::Minimal);

        policy.thresholds.high = 90;
        assert!(matches!(policy.validate(), Err(ConfigError::Policy(_))));

        let negative = r#"{"high_risk_port_points": -5}"#;
        assert!(serde_json::from_str::<RiskPolicy>(negative).is_err());
    }

    #[test]
    fn oversized_policy_values_are_rejected() {
        let huge = RiskPolicy {
            high_risk_port_points: u32::MAX,
            ..RiskPolicy::default()
        };
        assert!(matches!(huge.validate(), Err(ConfigError::Policy(msg)) if msg.contains("high_risk_port_points")));

        let mut weights = RiskPolicy::default();
        weights.severity_weights.critical = 101;
        assert!(weights.validate().is_err());

        let at_limit = RiskPolicy {
            vulnerability_cap: 100,
            unencrypted_transport_points: 100,
            ..RiskPolicy::default()
        };
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn score_saturates_instead_of_overflowing() {
        // Built directly so the policy skips validation.
        let assessor = RiskAssessor {
            knowledge: Arc::new(KnowledgeBase::load().unwrap()),
            policy: RiskPolicy {
                high_risk_port_points: u32::MAX,
                high_risk_port_cap: u32::MAX,
                unencrypted_transport_points: u32::MAX,
                ..RiskPolicy::default()
            },
        };
        let assessment = assessor.assess(&[open(21, "ftp"), open(80, "http")], None, &[]);
        assert_eq!(assessment.score, 100);
        assert_eq!(assessment.level, RiskLevel::Critical);
    }
}
