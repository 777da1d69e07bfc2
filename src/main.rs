// src/main.rs

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result, WrapErr};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use vanguard_profiler::config::ProfilerConfig;
use vanguard_profiler::core::evidence::collector::EvidenceCollector;
use vanguard_profiler::core::evidence::ledger::{read_entries, AuditEntry, HashChainLedger};
use vanguard_profiler::core::models::{Depth, Profile, StageOutcome};
use vanguard_profiler::core::profiler::ProfileOrchestrator;
use vanguard_profiler::logging;

#[derive(Parser)]
#[command(name = "vanguard-profiler", version, about = "Authorized target profiling with sealed evidence")]
struct Cli {
    /// Also print debug logs to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Profile a domain, IP address or URL.
    Profile {
        target: String,
        #[arg(short, long, default_value_t = Depth::Standard)]
        depth: Depth,
        /// Skip evidence collection and sealing.
        #[arg(long)]
        no_evidence: bool,
        /// Write the profile as JSON here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Operator recorded in the audit log. Defaults to $USER.
        #[arg(long)]
        user: Option<String>,
        /// Authorization reference recorded with the audit entry.
        #[arg(long)]
        auth_token: Option<String>,
    },
    /// Verify the audit log and list its entries.
    Audit {
        #[arg(long)]
        json: bool,
    },
    /// Check the seal of a saved evidence file.
    VerifyEvidence { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    logging::initialize_logging(cli.verbose)?;

    let cfg = ProfilerConfig::load().wrap_err("could not load configuration")?;
    match cli.command {
        Command::Profile {
            target,
            depth,
            no_evidence,
            output,
            user,
            auth_token,
        } => {
            let user = user
                .or_else(|| std::env::var("USER").ok())
                .unwrap_or_else(|| "unknown".to_string());
            run_profile(&cfg, &target, depth, !no_evidence, output, &user, auth_token.as_deref()).await
        }
        Command::Audit { json } => list_audit(&cfg, json),
        Command::VerifyEvidence { file } => verify_evidence(&file),
    }
}

async fn run_profile(
    cfg: &ProfilerConfig,
    target: &str,
    depth: Depth,
    collect_evidence: bool,
    output: Option<PathBuf>,
    user: &str,
    auth_token: Option<&str>,
) -> Result<()> {
    // Open the ledger first so a tampered log stops the run before any probe.
    let mut ledger = HashChainLedger::open(&cfg.audit_log).wrap_err("audit log is unusable")?;
    let profiler = ProfileOrchestrator::from_config(cfg)?;

    let profile = profiler
        .profile_target(target, depth, collect_evidence && cfg.collect_evidence)
        .await;

    let mut entry = AuditEntry::new(user, target, &format!("profile:{depth}"), &audit_result(&profile));
    if let Some(token) = auth_token {
        entry = entry.with_auth_token(token);
    }
    record_and_report(&mut ledger, entry, &profile, output.as_deref())
}

/// Audits the finished run, then hands the profile to the operator. The entry
/// is appended even if the output cannot be written.
fn record_and_report(
    ledger: &mut HashChainLedger,
    entry: AuditEntry,
    profile: &Profile,
    output: Option<&Path>,
) -> Result<()> {
    let hash = ledger.append_entry(entry)?;
    info!(hash = %hash, "Audit entry appended.");

    let body = serde_json::to_string_pretty(profile)?;
    match output {
        Some(path) => {
            fs::write(path, &body).wrap_err_with(|| format!("could not write {}", path.display()))?;
            print_summary(profile);
            println!("Profile written to {}", path.display());
        }
        None => println!("{body}"),
    }
    Ok(())
}

fn audit_result(profile: &Profile) -> String {
    let risk = profile
        .risk_assessment()
        .and_then(StageOutcome::success)
        .map(|r| format!(" risk={}({})", r.level, r.score))
        .unwrap_or_default();
    format!(
        "completed sealed={} evidence_files={}{}",
        profile.evidence_sealed(),
        profile.evidence_files().len(),
        risk
    )
}

fn stage_status<T>(outcome: Option<&StageOutcome<T>>) -> String {
    match outcome {
        None => "skipped".to_string(),
        Some(StageOutcome::Success(_)) => "ok".to_string(),
        Some(StageOutcome::Failed { error }) => format!("failed ({error})"),
    }
}

fn print_summary(profile: &Profile) {
    println!("Target:      {} ({})", profile.target(), profile.depth());
    println!("DNS:         {}", stage_status(profile.dns_info()));
    println!("Scan:        {}", stage_status(profile.network_scan()));
    println!("Services:    {}", stage_status(profile.services()));
    println!("OSINT:       {}", stage_status(profile.osint()));
    println!("Open ports:  {}", profile.open_ports().len());
    println!("Vulns:       {}", profile.vulnerabilities().len());
    if let Some(risk) = profile.risk_assessment().and_then(StageOutcome::success) {
        println!("Risk:        {} ({}/100)", risk.level, risk.score);
        for rec in &risk.recommendations {
            println!("  - {rec}");
        }
    }
    println!("Evidence:    {} file(s), sealed={}", profile.evidence_files().len(), profile.evidence_sealed());
    for err in profile.evidence_errors() {
        println!("  ! {err}");
    }
}

fn list_audit(cfg: &ProfilerConfig, json: bool) -> Result<()> {
    let entries = read_entries(&cfg.audit_log).map_err(|e| {
        error!(path = %cfg.audit_log.display(), error = %e, "Audit log failed verification.");
        eyre!(e)
    })?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    println!("{} ({} entries, chain verified)", cfg.audit_log.display(), entries.len());
    for entry in &entries {
        println!(
            "{}  {:<12} {:<30} {:<16} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.user,
            entry.target,
            entry.action,
            entry.result
        );
    }
    Ok(())
}

fn verify_evidence(file: &Path) -> Result<()> {
    let sealed = EvidenceCollector::load_evidence(file)
        .wrap_err_with(|| format!("{} failed verification", file.display()))?;
    println!("{}: seal OK", file.display());
    println!("  algorithm: {}", sealed.seal.algorithm);
    println!("  hash:      {}", sealed.seal.hash);
    println!("  sealed at: {}", sealed.seal.sealed_at);
    println!("  metadata:  {}", sealed.evidence.metadata);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;
    use vanguard_profiler::core::knowledge_base::KnowledgeBase;
    use vanguard_profiler::core::models::DnsInfo;
    use vanguard_profiler::core::osint::OsintAggregator;
    use vanguard_profiler::core::profiler::ProfilerSettings;
    use vanguard_profiler::core::risk::{RiskAssessor, RiskPolicy};
    use vanguard_profiler::core::scanner::{
        DnsResolver, FingerprintOptions, PortScanner, ScanOptions, ServiceFingerprinter, TcpTransport,
    };

    struct LocalDns;

    #[async_trait]
    impl DnsResolver for LocalDns {
        async fn resolve_target(&self, target: &str) -> Result<DnsInfo, String> {
            Ok(DnsInfo {
                target: target.to_string(),
                a_records: vec!["127.0.0.1".to_string()],
                ..DnsInfo::default()
            })
        }
    }

    async fn basic_profile() -> Profile {
        let knowledge = Arc::new(KnowledgeBase::load().unwrap());
        let orchestrator = ProfileOrchestrator::new(
            Arc::new(LocalDns),
            Arc::new(PortScanner::new(TcpTransport, ScanOptions::default())),
            Arc::new(ServiceFingerprinter::new(Arc::clone(&knowledge), FingerprintOptions::default()).unwrap()),
            Arc::new(OsintAggregator::new(None, None, None, 10, Duration::from_secs(1))),
            Arc::new(RiskAssessor::new(knowledge, RiskPolicy::default()).unwrap()),
            ProfilerSettings::default(),
        );
        orchestrator.profile_target("localhost", Depth::Basic, false).await
    }

    #[tokio::test]
    async fn unwritable_output_still_leaves_an_audit_entry() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("audit.log");
        let mut ledger = HashChainLedger::open(&log).unwrap();
        let profile = basic_profile().await;
        let entry = AuditEntry::new("analyst", "localhost", "profile:basic", &audit_result(&profile));

        let output = dir.path().join("missing-dir").join("profile.json");
        assert!(record_and_report(&mut ledger, entry, &profile, Some(&output)).is_err());
        assert!(!output.exists());

        let entries = read_entries(&log).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target, "localhost");
        assert!(entries[0].result.starts_with("completed sealed=false"));
    }
}
