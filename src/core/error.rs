// src/core/error.rs

//! Typed errors for the parts of the crate that surface failures to callers.
//!
//! Scanner stages never return these: they degrade to `StageOutcome::Failed`.
//! Integrity failures, on the other hand, are always surfaced.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Why a single hash-linked record failed verification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainFault {
    /// The stored hash differs from the recomputed canonical hash.
    #[error("hash mismatch (stored {stored}, computed {computed})")]
    HashMismatch { stored: String, computed: String },
    /// The record's `previous_hash` does not point at its predecessor.
    #[error("broken chain link (expected previous hash {expected}, found {found})")]
    BrokenLink { expected: String, found: String },
    /// The record could not be parsed at all.
    #[error("malformed record: {0}")]
    Malformed(String),
}

/// Tamper evidence detected while verifying a ledger, a custody chain or a seal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("chain verification failed at record {record} (byte offset {byte_offset}): {fault}")]
    Chain {
        /// 1-based position of the first failing record.
        record: usize,
        /// Byte offset of the failing record in its store (0 for in-memory chains).
        byte_offset: u64,
        fault: ChainFault,
    },

    #[error("evidence seal mismatch: sealed {expected}, recomputed {actual}")]
    SealMismatch { expected: String, actual: String },

    #[error("unsupported seal algorithm '{0}'")]
    UnsupportedAlgorithm(String),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("ledger {0} already has a writer in this process")]
    AlreadyOpen(PathBuf),

    #[error("ledger {0} could not be restored after a failed write; reopen it to verify")]
    Poisoned(PathBuf),

    #[error("refusing to use tampered ledger: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("failed to serialize audit entry: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SealError {
    #[error("evidence I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("evidence is not valid sealed JSON: {0}")]
    Format(#[from] serde_json::Error),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

#[derive(Debug, Error)]
pub enum KnowledgeBaseError {
    #[error("invalid detection pattern for {technology}: {source}")]
    Pattern {
        technology: String,
        #[source]
        source: regex::Error,
    },

    #[error("technology {0} has no detection rule")]
    Uncovered(String),

    #[error("vulnerability {id}: invalid version '{version}'")]
    Version { id: String, version: String },

    #[error("vulnerability {id}: empty version range {min}..{max}")]
    EmptyRange { id: String, min: String, max: String },

    #[error("duplicate vulnerability id {0}")]
    Duplicate(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {key}: {value}")]
    Env { key: String, value: String },

    #[error("invalid risk policy: {0}")]
    Policy(String),

    #[error(transparent)]
    KnowledgeBase(#[from] KnowledgeBaseError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_fault_renders_inside_integrity_error() {
        let err = IntegrityError::Chain {
            record: 3,
            byte_offset: 412,
            fault: ChainFault::BrokenLink { expected: "aa".into(), found: "bb".into() },
        };
        assert_eq!(
            err.to_string(),
            "chain verification failed at record 3 (byte offset 412): \
             broken chain link (expected previous hash aa, found bb)"
        );
        assert_eq!(ChainFault::Malformed("eof".into()).to_string(), "malformed record: eof");
    }
}
