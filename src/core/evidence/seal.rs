// src/core/evidence/seal.rs

//! Content seals for arbitrary structured evidence.

use super::{canonical_json, sha256_hex, HASH_ALGORITHM};
use crate::core::error::{IntegrityError, SealError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

pub const SEALER_VERSION: &str = "1.0";

/// Everything the seal hash covers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceEnvelope {
    pub timestamp: DateTime<Utc>,
    pub data: Value,
    pub metadata: Value,
    pub sealer_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Seal {
    pub algorithm: String,
    pub hash: String,
    pub sealed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SealedEvidence {
    pub evidence: EvidenceEnvelope,
    pub seal: Seal,
}

fn envelope_hash(envelope: &EvidenceEnvelope) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(canonical_json(envelope)?.as_bytes()))
}

/// Seals `data` with the current time.
pub fn seal_evidence(data: Value, metadata: Value) -> Result<SealedEvidence, serde_json::Error> {
    seal_evidence_at(data, metadata, Utc::now())
}

/// Seals `data` with an explicit envelope timestamp; the same inputs always
/// produce the same hash.
pub fn seal_evidence_at(
    data: Value,
    metadata: Value,
    timestamp: DateTime<Utc>,
) -> Result<SealedEvidence, serde_json::Error> {
    let evidence = EvidenceEnvelope {
        timestamp,
        data,
        metadata,
        sealer_version: SEALER_VERSION.to_string(),
    };
    let hash = envelope_hash(&evidence)?;
    debug!(hash = %hash, "Evidence sealed.");
    Ok(SealedEvidence {
        evidence,
        seal: Seal {
            algorithm: HASH_ALGORITHM.to_string(),
            hash,
            sealed_at: Utc::now(),
        },
    })
}

pub fn verify_seal(sealed: &SealedEvidence) -> Result<(), IntegrityError> {
    if !sealed.seal.algorithm.eq_ignore_ascii_case(HASH_ALGORITHM) {
        return Err(IntegrityError::UnsupportedAlgorithm(sealed.seal.algorithm.clone()));
    }
    let actual = envelope_hash(&sealed.evidence).map_err(|e| IntegrityError::SealMismatch {
        expected: sealed.seal.hash.clone(),
        actual: format!("<unhashable: {e}>"),
    })?;
    if actual != sealed.seal.hash {
        return Err(IntegrityError::SealMismatch {
            expected: sealed.seal.hash.clone(),
            actual,
        });
    }
    Ok(())
}

/// Writes a sealed item as pretty JSON. Never overwrites an existing file.
pub fn save_sealed(sealed: &SealedEvidence, path: &Path) -> Result<(), SealError> {
    let io_err = |source| SealError::Io { path: path.to_path_buf(), source };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let body = serde_json::to_string_pretty(sealed)?;
    let mut file = OpenOptions::new().write(true).create_new(true).open(path).map_err(io_err)?;
    if let Err(source) = file.write_all(body.as_bytes()) {
        // A half-written seal would block the retry through `create_new`.
        drop(file);
        let _ = fs::remove_file(path);
        return Err(io_err(source));
    }
    info!(path = %path.display(), hash = %sealed.seal.hash, "Sealed evidence saved.");
    Ok(())
}

/// Reads a sealed file and verifies it before handing it back.
pub fn load_sealed(path: &Path) -> Result<SealedEvidence, SealError> {
    let raw = fs::read_to_string(path).map_err(|source| SealError::Io { path: path.to_path_buf(), source })?;
    let sealed: SealedEvidence = serde_json::from_str(&raw)?;
    if let Err(e) = verify_seal(&sealed) {
        warn!(path = %path.display(), error = %e, "Sealed evidence failed verification.");
        return Err(e.into());
    }
    Ok(sealed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::tempdir;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn identical_inputs_give_identical_seals() {
        let a = seal_evidence_at(json!({"port": 22, "state": "open"}), json!({"case_id": "c1"}), fixed_time()).unwrap();
        let b = seal_evidence_at(json!({"state": "open", "port": 22}), json!({"case_id": "c1"}), fixed_time()).unwrap();
        assert_eq!(a.seal.hash, b.seal.hash);
        assert_eq!(a.seal.algorithm, "sha256");
        assert_eq!(a.evidence.sealer_version, SEALER_VERSION);
        assert!(verify_seal(&a).is_ok());
    }

    #[test]
    fn every_data_key_changes_the_seal() {
        let base = json!({"host": "10.0.0.5", "port": 22, "banner": "SSH-2.0"});
        let original = seal_evidence_at(base.clone(), json!({}), fixed_time()).unwrap();
        for key in ["host", "port", "banner"] {
            let mut changed = base.clone();
            changed[key] = json!("altered");
            let resealed = seal_evidence_at(changed, json!({}), fixed_time()).unwrap();
            assert_ne!(original.seal.hash, resealed.seal.hash, "key {key} did not affect the seal");
        }
    }

    #[test]
    fn mutated_payload_fails_verification() {
        let mut sealed = seal_evidence(json!({"open_ports": [22, 80]}), json!({})).unwrap();
        sealed.evidence.data["open_ports"] = json!([22]);
        assert!(matches!(verify_seal(&sealed), Err(IntegrityError::SealMismatch { .. })));
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let mut sealed = seal_evidence(json!(1), json!({})).unwrap();
        sealed.seal.algorithm = "md5".to_string();
        assert!(matches!(verify_seal(&sealed), Err(IntegrityError::UnsupportedAlgorithm(_))));
    }

    #[test]
    fn save_and_load_detects_tampering_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dns_1.sealed");
        let sealed = seal_evidence(json!({"a_records": ["93.184.216.34"]}), json!({"evidence_type": "dns"})).unwrap();
        save_sealed(&sealed, &path).unwrap();

        assert_eq!(load_sealed(&path).unwrap(), sealed);
        assert!(save_sealed(&sealed, &path).is_err());

        let raw = fs::read_to_string(&path).unwrap();
        fs::write(&path, raw.replace("93.184.216.34", "93.184.216.35")).unwrap();
        assert!(matches!(load_sealed(&path), Err(SealError::Integrity(IntegrityError::SealMismatch { .. }))));
    }
}
