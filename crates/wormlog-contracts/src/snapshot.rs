//! Signed snapshot bundle handed to external auditors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::AuditRecord;

/// A self-contained export of a ledger range.
///
/// `previous_chain_hash` is the chain hash of the record immediately before
/// `from_seq` (or the genesis constant), so an auditor can re-walk the chain
/// of the exported records without access to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotBundle {
    pub ledger_id: String,
    pub exported_at: DateTime<Utc>,
    pub from_seq: u64,
    pub to_seq: u64,
    pub record_count: u64,
    pub previous_chain_hash: String,
    pub records: Vec<AuditRecord>,

    /// SHA-256 (hex) of the canonical JSON of every other header field and
    /// `records`.
    pub export_hash: String,

    /// Hex Ed25519 signature over `export_hash`, when a signing key is held.
    pub signature: Option<String>,

    /// Hex public key matching `signature`.
    pub public_key: Option<String>,
}

impl SnapshotBundle {
    /// The chain hash of the last exported record, or `previous_chain_hash`
    /// for an empty bundle.
    pub fn terminal_chain_hash(&self) -> &str {
        self.records
            .last()
            .map(|r| r.chain_hash.as_str())
            .unwrap_or(&self.previous_chain_hash)
    }
}
