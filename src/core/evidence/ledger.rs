// src/core/evidence/ledger.rs

//! Append-only, hash-chained audit log.
//!
//! One canonical JSON record per line. Each record's `previous_hash` is the
//! `hash` of the line before it (or `GENESIS_HASH`), and its `hash` is the
//! canonical hash of the record without that field. The file is only ever
//! opened in append mode.

use super::{check_link, record_hash, ChainLinked, GENESIS_HASH};
use crate::core::error::{ChainFault, IntegrityError, LedgerError};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// A single auditable action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub target: String,
    pub action: String,
    pub result: String,
    pub auth_token: Option<String>,
    pub previous_hash: String,
    pub hash: String,
}

impl AuditEntry {
    /// Builds an unlinked entry; the ledger fills in both hashes on append.
    pub fn new(user: &str, target: &str, action: &str, result: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            user: user.to_string(),
            target: target.to_string(),
            action: action.to_string(),
            result: result.to_string(),
            auth_token: None,
            previous_hash: String::new(),
            hash: String::new(),
        }
    }

    pub fn with_auth_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_string());
        self
    }
}

impl ChainLinked for AuditEntry {
    fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    fn hash(&self) -> &str {
        &self.hash
    }
}

/// Summary of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    pub entries: usize,
    pub last_hash: String,
}

// Paths that currently have a live writer in this process.
static OPEN_WRITERS: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

struct WriterRegistration(PathBuf);

impl WriterRegistration {
    fn acquire(path: PathBuf) -> Result<Self, LedgerError> {
        let mut writers = OPEN_WRITERS.lock().unwrap_or_else(PoisonError::into_inner);
        if !writers.insert(path.clone()) {
            return Err(LedgerError::AlreadyOpen(path));
        }
        Ok(Self(path))
    }
}

impl Drop for WriterRegistration {
    fn drop(&mut self) {
        OPEN_WRITERS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.0);
    }
}

/// The single writer of an audit log file.
///
/// Not `Clone`; appending needs `&mut self`, and a second ledger on the same
/// path in the same process is refused, so the previous-hash pointer can only
/// ever advance sequentially.
pub struct HashChainLedger {
    path: PathBuf,
    file: File,
    last_hash: String,
    entries: usize,
    /// File length after the last fully written record.
    committed_len: u64,
    poisoned: bool,
    _registration: WriterRegistration,
}

impl HashChainLedger {
    /// Opens (or creates) a ledger, verifying any existing records first.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let io_err = |source| LedgerError::Io { path: path.to_path_buf(), source };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path).map_err(io_err)?;
        let canonical = fs::canonicalize(path).map_err(io_err)?;
        let registration = WriterRegistration::acquire(canonical.clone())?;

        let report = verify_chain_file(&canonical)?;
        let committed_len = file.metadata().map_err(io_err)?.len();
        info!(path = %canonical.display(), entries = report.entries, "Audit ledger opened.");

        Ok(Self {
            path: canonical,
            file,
            last_hash: report.last_hash,
            entries: report.entries,
            committed_len,
            poisoned: false,
            _registration: registration,
        })
    }

    /// Links, hashes and appends one entry.
    ///
    /// # Arguments
    /// * `entry` - The action to record. Its `previous_hash` and `hash` are
    ///   overwritten here.
    ///
    /// # Returns
    /// The entry's new hash. A failed write is cut back to the last complete
    /// record; if that also fails the ledger refuses further appends.
    pub fn append_entry(&mut self, mut entry: AuditEntry) -> Result<String, LedgerError> {
        if self.poisoned {
            return Err(LedgerError::Poisoned(self.path.clone()));
        }
        entry.previous_hash = self.last_hash.clone();
        entry.hash = record_hash(&entry)?;

        let mut line = super::canonical_json(&entry)?;
        line.push('\n');
        if let Err(source) = self.file.write_all(line.as_bytes()).and_then(|_| self.file.flush()) {
            self.roll_back();
            return Err(LedgerError::Io { path: self.path.clone(), source });
        }

        debug!(action = %entry.action, target = %entry.target, hash = %entry.hash, "Audit entry appended.");
        self.committed_len += line.len() as u64;
        self.last_hash = entry.hash.clone();
        self.entries += 1;
        Ok(entry.hash)
    }

    /// Drops whatever part of a record made it to disk.
    fn roll_back(&mut self) {
        if let Err(e) = self.file.set_len(self.committed_len) {
            error!(path = %self.path.display(), error = %e, "Could not truncate torn audit record; ledger poisoned.");
            self.poisoned = true;
        } else {
            warn!(path = %self.path.display(), len = self.committed_len, "Torn audit record truncated.");
        }
    }

    /// Re-reads the whole store and verifies every record.
    pub fn verify_chain(&self) -> Result<ChainReport, LedgerError> {
        verify_chain_file(&self.path)
    }

    /// Verified entries in append order.
    pub fn entries(&self) -> Result<Vec<AuditEntry>, LedgerError> {
        read_entries(&self.path)
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn last_hash(&self) -> &str {
        &self.last_hash
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Walks a ledger file from the first record and stops at the first fault.
///
/// A missing file is an empty, valid chain.
pub fn verify_chain_file(path: &Path) -> Result<ChainReport, LedgerError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ChainReport { entries: 0, last_hash: GENESIS_HASH.to_string() });
        }
        Err(source) => return Err(LedgerError::Io { path: path.to_path_buf(), source }),
    };

    let mut reader = BufReader::new(file);
    let mut expected = GENESIS_HASH.to_string();
    let mut offset: u64 = 0;
    let mut record = 0usize;
    let mut line = String::new();

    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .map_err(|source| LedgerError::Io { path: path.to_path_buf(), source })?;
        if read == 0 {
            break;
        }
        record += 1;

        let fault = match serde_json::from_str::<Value>(line.trim_end_matches(['\n', '\r'])) {
            Ok(value @ Value::Object(_)) => check_link(&value, &expected).map(|hash| expected = hash).err(),
            Ok(_) => Some(ChainFault::Malformed("record is not a JSON object".to_string())),
            Err(e) => Some(ChainFault::Malformed(e.to_string())),
        };
        if let Some(fault) = fault {
            warn!(path = %path.display(), record, offset, %fault, "Audit chain verification failed.");
            return Err(IntegrityError::Chain { record, byte_offset: offset, fault }.into());
        }
        offset += read as u64;
    }

    debug!(path = %path.display(), entries = record, "Audit chain verified.");
    Ok(ChainReport { entries: record, last_hash: expected })
}

/// Reads a ledger, refusing to return anything from a tampered log.
pub fn read_entries(path: &Path) -> Result<Vec<AuditEntry>, LedgerError> {
    verify_chain_file(path)?;
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(LedgerError::Io { path: path.to_path_buf(), source }),
    };
    raw.lines()
        .map(|line| serde_json::from_str::<AuditEntry>(line).map_err(LedgerError::from))
        .collect()
}
