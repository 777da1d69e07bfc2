// src/config.rs

//! Runtime configuration: a JSON file, then environment overrides.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::core::error::ConfigError;
use crate::core::knowledge_base::VulnerabilitySpec;
use crate::core::risk::RiskPolicy;
use crate::core::scanner::{FingerprintOptions, ScanOptions};

pub const CONFIG_ENV: &str = "VANGUARD_PROFILER_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "vanguard-profiler.json";

/// Which external intelligence sources may be queried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OsintSources {
    pub whois: bool,
    pub certificate_transparency: bool,
    pub web_archive: bool,
}

impl Default for OsintSources {
    fn default() -> Self {
        Self {
            whois: true,
            certificate_transparency: true,
            web_archive: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProfilerConfig {
    pub connect_timeout_ms: u64,
    pub banner_timeout_ms: u64,
    pub http_timeout_secs: u64,
    pub path_probe_timeout_secs: u64,
    pub osint_timeout_secs: u64,
    pub max_concurrent: usize,
    pub rate_limiting: bool,
    pub inter_attempt_delay_ms: u64,
    pub path_probe_delay_ms: u64,
    pub max_redirects: usize,
    pub verify_tls: bool,
    pub collect_evidence: bool,
    pub evidence_dir: PathBuf,
    pub audit_log: PathBuf,
    pub collector: String,
    pub case_id: Option<String>,
    pub max_service_fingerprints: usize,
    pub historical_url_limit: usize,
    pub stage_deadline_secs: Option<u64>,
    pub osint_sources: OsintSources,
    pub risk_policy: RiskPolicy,
    pub extra_vulnerabilities: Vec<VulnerabilitySpec>,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 1000,
            banner_timeout_ms: 2000,
            http_timeout_secs: 10,
            path_probe_timeout_secs: 5,
            osint_timeout_secs: 30,
            max_concurrent: 50,
            rate_limiting: true,
            inter_attempt_delay_ms: 10,
            path_probe_delay_ms: 200,
            max_redirects: 5,
            verify_tls: false,
            collect_evidence: true,
            evidence_dir: PathBuf::from("evidence"),
            audit_log: PathBuf::from("audit.log"),
            collector: "vanguard-profiler".to_string(),
            case_id: None,
            max_service_fingerprints: 10,
            historical_url_limit: 100,
            stage_deadline_secs: None,
            osint_sources: OsintSources::default(),
            risk_policy: RiskPolicy::default(),
            extra_vulnerabilities: Vec::new(),
        }
    }
}

fn parse_env<T: FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value,
    })
}

fn parse_bool(key: &str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env {
            key: key.to_string(),
            value,
        }),
    }
}

impl ProfilerConfig {
    /// Reads `$VANGUARD_PROFILER_CONFIG` (or `vanguard-profiler.json`) and
    /// applies environment overrides. A missing file means defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let mut cfg = Self::from_file(Path::new(&path))?;
        cfg.apply_env_overrides(|key| env::var(key).ok())?;
        cfg.risk_policy.validate()?;
        info!(path = %path, "Configuration loaded.");
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults.");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// `lookup` is `std::env::var` in production and a map in tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("VP_TIMEOUT_SECS") {
            self.http_timeout_secs = parse_env("VP_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("VP_MAX_CONCURRENT") {
            self.max_concurrent = parse_env("VP_MAX_CONCURRENT", v)?;
        }
        if let Some(v) = lookup("VP_VERIFY_TLS") {
            self.verify_tls = parse_bool("VP_VERIFY_TLS", v)?;
        }
        if let Some(v) = lookup("VP_EVIDENCE_DIR") {
            self.evidence_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("VP_AUDIT_LOG") {
            self.audit_log = PathBuf::from(v);
        }
        if self.max_concurrent == 0 {
            return Err(ConfigError::Env {
                key: "max_concurrent".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            max_concurrency: self.max_concurrent,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            banner_timeout: Duration::from_millis(self.banner_timeout_ms),
            inter_attempt_delay: if self.rate_limiting {
                Duration::from_millis(self.inter_attempt_delay_ms)
            } else {
                Duration::ZERO
            },
        }
    }

    pub fn fingerprint_options(&self) -> FingerprintOptions {
        FingerprintOptions {
            http_timeout: Duration::from_secs(self.http_timeout_secs),
            path_timeout: Duration::from_secs(self.path_probe_timeout_secs),
            path_probe_delay: Duration::from_millis(self.path_probe_delay_ms),
            max_redirects: self.max_redirects,
            verify_tls: self.verify_tls,
            ..FingerprintOptions::default()
        }
    }

    pub fn osint_timeout(&self) -> Duration {
        Duration::from_secs(self.osint_timeout_secs)
    }

    pub fn stage_deadline(&self) -> Option<Duration> {
        self.stage_deadline_secs.map(Duration::from_secs)
    }
}
