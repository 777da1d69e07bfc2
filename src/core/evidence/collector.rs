// src/core/evidence/collector.rs

//! Per-run evidence items with a hash-linked chain of custody.

use super::seal::{load_sealed, save_sealed, seal_evidence, SealedEvidence};
use super::{record_hash, verify_linked, ChainLinked, GENESIS_HASH};
use crate::core::error::{IntegrityError, SealError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

pub const ACTION_COLLECTED: &str = "collected";
pub const ACTION_SEALED: &str = "sealed_and_saved";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustodyEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub actor: String,
    pub notes: String,
    pub previous_hash: String,
    pub hash: String,
}

impl ChainLinked for CustodyEntry {
    fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    fn hash(&self) -> &str {
        &self.hash
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evidence {
    pub id: String,
    pub evidence_type: String,
    pub data: Value,
    pub collector: String,
    pub case_id: String,
    pub collected_at: DateTime<Utc>,
    chain_of_custody: Vec<CustodyEntry>,
    /// Seal hash, frozen when the item is sealed.
    seal_hash: Option<String>,
}

impl Evidence {
    pub fn new(id: String, evidence_type: &str, data: Value, collector: &str, case_id: &str) -> Self {
        let mut evidence = Self {
            id,
            evidence_type: evidence_type.to_string(),
            data,
            collector: collector.to_string(),
            case_id: case_id.to_string(),
            collected_at: Utc::now(),
            chain_of_custody: Vec::new(),
            seal_hash: None,
        };
        let notes = format!("Evidence collected: {}", evidence.evidence_type);
        evidence.add_to_chain(ACTION_COLLECTED, &notes);
        evidence
    }

    /// Appends a custody entry linked to the previous one.
    pub fn add_to_chain(&mut self, action: &str, notes: &str) {
        let previous_hash = self
            .chain_of_custody
            .last()
            .map(|e| e.hash().to_string())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let mut entry = CustodyEntry {
            timestamp: Utc::now(),
            action: action.to_string(),
            actor: self.collector.clone(),
            notes: notes.to_string(),
            previous_hash,
            hash: String::new(),
        };
        // Only plain strings and a timestamp: serialization cannot fail.
        entry.hash = record_hash(&entry).unwrap_or_default();
        self.chain_of_custody.push(entry);
    }

    pub fn chain_of_custody(&self) -> &[CustodyEntry] {
        &self.chain_of_custody
    }

    pub fn verify_custody(&self) -> Result<(), IntegrityError> {
        verify_linked(&self.chain_of_custody)
    }

    pub fn seal_hash(&self) -> Option<&str> {
        self.seal_hash.as_deref()
    }

    pub fn is_sealed(&self) -> bool {
        self.seal_hash.is_some()
    }

    fn metadata(&self) -> Value {
        json!({
            "collector": self.collector,
            "case_id": self.case_id,
            "evidence_type": self.evidence_type,
        })
    }

    /// Seals the item's current state and freezes the resulting hash.
    pub fn seal(&mut self) -> Result<SealedEvidence, SealError> {
        let (sealed_item, sealed) = self.sealed_copy()?;
        *self = sealed_item;
        Ok(sealed)
    }

    /// Builds the sealed form of this item without touching it.
    ///
    /// # Returns
    /// The item as it will look once sealed (custody entry added, seal hash
    /// set) together with the envelope to persist. Callers commit the first
    /// only after the second is safely stored.
    fn sealed_copy(&self) -> Result<(Self, SealedEvidence), SealError> {
        let mut item = self.clone();
        item.add_to_chain(ACTION_SEALED, "Evidence sealed and saved");
        let data = serde_json::to_value(&item)?;
        let sealed = seal_evidence(data, item.metadata())?;
        item.seal_hash = Some(sealed.seal.hash.clone());
        Ok((item, sealed))
    }
}

/// Outcome of sealing every collected item.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SaveSummary {
    pub saved: Vec<PathBuf>,
    pub failures: Vec<String>,
}

/// Owns the evidence gathered during one profiling run.
pub struct EvidenceCollector {
    collector: String,
    case_id: String,
    output_dir: PathBuf,
    items: Vec<Evidence>,
}

impl EvidenceCollector {
    pub fn new(collector: &str, case_id: &str, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            collector: collector.to_string(),
            case_id: case_id.to_string(),
            output_dir: output_dir.into(),
            items: Vec::new(),
        }
    }

    /// Records one piece of evidence and returns its id.
    pub fn collect(&mut self, evidence_type: &str, data: Value) -> String {
        let id = format!(
            "{}_{}_{:02}",
            evidence_type,
            Utc::now().format("%Y%m%d_%H%M%S_%6f"),
            self.items.len() + 1
        );
        debug!(id = %id, "Evidence collected.");
        self.items.push(Evidence::new(id.clone(), evidence_type, data, &self.collector, &self.case_id));
        id
    }

    pub fn items(&self) -> &[Evidence] {
        &self.items
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn seal_item(item: &mut Evidence, output_dir: &Path) -> Result<PathBuf, SealError> {
        item.verify_custody()?;
        let (sealed_item, sealed) = item.sealed_copy()?;
        let path = output_dir.join(format!("{}.sealed", item.id));
        save_sealed(&sealed, &path)?;
        *item = sealed_item;
        Ok(path)
    }

    /// Seals and saves every unsealed item. One failure does not stop the rest.
    pub fn save_all(&mut self) -> SaveSummary {
        let mut summary = SaveSummary::default();
        for item in self.items.iter_mut().filter(|i| !i.is_sealed()) {
            match Self::seal_item(item, &self.output_dir) {
                Ok(path) => summary.saved.push(path),
                Err(e) => {
                    error!(id = %item.id, error = %e, "Failed to seal evidence.");
                    summary.failures.push(format!("{}: {}", item.id, e));
                }
            }
        }
        info!(saved = summary.saved.len(), failed = summary.failures.len(), "Evidence sealing finished.");
        summary
    }

    /// Loads and verifies a previously saved item.
    pub fn load_evidence(path: &Path) -> Result<SealedEvidence, SealError> {
        load_sealed(path)
    }
}
