// tests/profile_pipeline.rs

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

use vanguard_profiler::core::evidence::collector::EvidenceCollector;
use vanguard_profiler::core::evidence::ledger::{read_entries, AuditEntry, HashChainLedger};
use vanguard_profiler::core::knowledge_base::KnowledgeBase;
use vanguard_profiler::core::models::{Depth, DnsInfo, NetworkScan, PortResult, PortState, ScanRange, StageOutcome};
use vanguard_profiler::core::osint::{OsintAggregator, DISABLED_REASON};
use vanguard_profiler::core::profiler::{ProfileOrchestrator, ProfilerSettings};
use vanguard_profiler::core::risk::{RiskAssessor, RiskPolicy};
use vanguard_profiler::core::scanner::{DnsResolver, FingerprintOptions, NetworkProbe, ServiceFingerprinter};

struct FixedDns;

#[async_trait]
impl DnsResolver for FixedDns {
    async fn resolve_target(&self, target: &str) -> Result<DnsInfo, String> {
        Ok(DnsInfo {
            target: target.to_string(),
            is_domain: true,
            a_records: vec!["93.184.216.34".to_string()],
            ..DnsInfo::default()
        })
    }
}

/// Port 22 and 3306 open, everything else closed.
struct FixedScan;

#[async_trait]
impl NetworkProbe for FixedScan {
    async fn scan_target(&self, host: &str, range: ScanRange) -> NetworkScan {
        let result = |port: u16, state: PortState, service: &str| PortResult {
            port,
            state,
            service: service.to_string(),
            banner: None,
            error: None,
        };
        NetworkScan::from_results(
            host,
            range,
            vec![
                result(22, PortState::Open, "ssh"),
                result(3306, PortState::Open, "mysql"),
                result(23, PortState::Closed, "telnet"),
            ],
        )
    }
}

fn profiler(settings: ProfilerSettings) -> ProfileOrchestrator {
    let knowledge = Arc::new(KnowledgeBase::load().unwrap());
    let fingerprinter = ServiceFingerprinter::new(Arc::clone(&knowledge), FingerprintOptions::default()).unwrap();
    let osint = OsintAggregator::new(None, None, None, 100, Duration::from_secs(1));
    let risk = RiskAssessor::new(knowledge, RiskPolicy::default()).unwrap();
    ProfileOrchestrator::new(
        Arc::new(FixedDns),
        Arc::new(FixedScan),
        Arc::new(fingerprinter),
        Arc::new(osint),
        Arc::new(risk),
        settings,
    )
}

#[tokio::test]
async fn basic_profile_with_stubbed_dns() {
    let profile = profiler(ProfilerSettings::default())
        .profile_target("example.com", Depth::Basic, false)
        .await;

    let dns = profile.dns_info().and_then(StageOutcome::success).unwrap();
    assert_eq!(dns.a_records, vec!["93.184.216.34"]);
    assert!(profile.network_scan().is_none());
    assert!(profile.open_ports().is_empty());
    assert!(profile.is_complete());
    assert!(profile.completed_at().unwrap() >= profile.started_at());
}

#[tokio::test]
async fn full_profile_seals_evidence_that_verifies() {
    let dir = tempdir().unwrap();
    let settings = ProfilerSettings {
        evidence_dir: dir.path().join("evidence"),
        case_id: Some("case-42".to_string()),
        ..ProfilerSettings::default()
    };
    let profile = profiler(settings).full_profile("example.com").await;

    assert_eq!(profile.open_ports().len(), 2);
    // Neither port is a web service, so no HTTP fingerprint was attempted.
    assert!(profile.http_fingerprint().is_none());
    assert_eq!(profile.services().and_then(StageOutcome::success).unwrap().len(), 2);

    let osint = profile.osint().and_then(StageOutcome::success).unwrap();
    assert_eq!(osint.failure_count(), 3);
    assert_eq!(osint.whois.error(), Some(DISABLED_REASON));

    let risk = profile.risk_assessment().and_then(StageOutcome::success).unwrap();
    assert!(risk.factors.iter().any(|f| f.description.contains("3306")));
    assert!(!risk.factors.iter().any(|f| f.description.contains("Port 22 ")));

    assert!(profile.evidence_sealed(), "{:?}", profile.evidence_errors());
    assert_eq!(profile.evidence_files().len(), 5);
    for path in profile.evidence_files() {
        let sealed = EvidenceCollector::load_evidence(path).unwrap();
        assert_eq!(sealed.evidence.metadata["case_id"], "case-42");
    }
}

#[tokio::test]
async fn tampered_evidence_file_is_rejected() {
    let dir = tempdir().unwrap();
    let settings = ProfilerSettings {
        evidence_dir: dir.path().to_path_buf(),
        case_id: Some("tamper".to_string()),
        ..ProfilerSettings::default()
    };
    let profile = profiler(settings).profile_target("example.com", Depth::Basic, true).await;
    let path = &profile.evidence_files()[0];

    let raw = std::fs::read_to_string(path).unwrap();
    std::fs::write(path, raw.replace("93.184.216.34", "93.184.216.35")).unwrap();
    assert!(EvidenceCollector::load_evidence(path).is_err());
}

#[test]
fn audit_trail_survives_reopen_and_detects_edits() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("audit.log");
    {
        let mut ledger = HashChainLedger::open(&path).unwrap();
        ledger
            .append_entry(AuditEntry::new("analyst", "example.com", "profile:full", "completed"))
            .unwrap();
    }
    {
        let mut ledger = HashChainLedger::open(&path).unwrap();
        assert_eq!(ledger.len(), 1);
        ledger
            .append_entry(AuditEntry::new("analyst", "example.org", "profile:basic", "completed").with_auth_token("ROE-7"))
            .unwrap();
    }
    let entries = read_entries(&path).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].previous_hash, entries[0].hash);
    assert_eq!(entries[1].auth_token.as_deref(), Some("ROE-7"));

    let raw = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, raw.replace("example.org", "example.net")).unwrap();
    assert!(read_entries(&path).is_err());
    assert!(HashChainLedger::open(&path).is_err());
}
