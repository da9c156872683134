//! Hash-chain primitives: canonical serialization, content hashing, chain
//! hashing, and record sealing.
//!
//! The canonical form is fixed. Changing it invalidates every hash ever
//! computed, so treat this module as a wire format.
//!
//! Content hash input: the compact JSON object
//!
//! ```text
//! {"action_name":…,"event_id":…,"human_decision":…|null,"metadata":{…},
//!  "requires_approval":…,"risk_tier":…,"sequence_number":…,
//!  "sop_reference":…,"status":…,"timestamp":"YYYY-MM-DDTHH:MM:SS.ffffffZ"}
//! ```
//!
//! with object keys at every depth sorted by their UTF-8 bytes and no
//! insignificant whitespace.
//!
//! Chain hash input: `ascii(content_hash) || ascii(previous_chain_hash)`,
//! where the first record uses `GENESIS_HASH`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use wormlog_contracts::{
    error::{WormError, WormResult},
    record::{AuditRecord, Metadata, NewEvent},
};
use wormlog_core::traits::ChainSigner;

/// The `previous_chain_hash` used for the first record of every ledger.
///
/// 64 hex zeros.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// The hashed fields of a record, borrowed.
#[derive(Debug, Clone, Copy)]
pub struct ContentFields<'a> {
    pub sequence_number: u64,
    pub timestamp: &'a DateTime<Utc>,
    pub event_id: &'a str,
    pub action_name: &'a str,
    pub status: &'a str,
    pub metadata: &'a Metadata,
    pub risk_tier: &'a str,
    pub requires_approval: bool,
    pub human_decision: Option<&'a str>,
    pub sop_reference: &'a str,
}

impl<'a> From<&'a AuditRecord> for ContentFields<'a> {
    fn from(r: &'a AuditRecord) -> Self {
        Self {
            sequence_number: r.sequence_number,
            timestamp: &r.timestamp,
            event_id: &r.event_id,
            action_name: &r.action_name,
            status: &r.status,
            metadata: &r.metadata,
            risk_tier: &r.risk_tier,
            requires_approval: r.requires_approval,
            human_decision: r.human_decision.as_deref(),
            sop_reference: &r.sop_reference,
        }
    }
}

/// Timestamp rendering used in the canonical form and in storage.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Serialize `value` with object keys sorted at every depth.
///
/// Sorting is done here rather than relying on `serde_json::Map` ordering,
/// which changes if any crate in the build enables `preserve_order`.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// The canonical bytes the content hash commits to.
pub fn canonical_content(fields: &ContentFields<'_>) -> String {
    let value = json!({
        "sequence_number": fields.sequence_number,
        "timestamp": format_timestamp(fields.timestamp),
        "event_id": fields.event_id,
        "action_name": fields.action_name,
        "status": fields.status,
        "metadata": fields.metadata,
        "risk_tier": fields.risk_tier,
        "requires_approval": fields.requires_approval,
        "human_decision": fields.human_decision,
        "sop_reference": fields.sop_reference,
    });
    canonical_json(&value)
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Compute the content hash of a record's fields.
pub fn compute_content_hash(fields: &ContentFields<'_>) -> String {
    sha256_hex(canonical_content(fields).as_bytes())
}

/// Compute `SHA-256(content_hash || previous_chain_hash)` as lowercase hex.
pub fn compute_chain_hash(content_hash: &str, previous_chain_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content_hash.as_bytes());
    hasher.update(previous_chain_hash.as_bytes());
    hex::encode(hasher.finalize())
}

/// Reject events the ledger must not accept.
pub fn validate_event(event: &NewEvent) -> WormResult<()> {
    let checks = [
        ("action_name", event.action_name.as_str()),
        ("status", event.status.as_str()),
        ("risk_tier", event.risk_tier.as_str()),
    ];
    for (name, value) in checks {
        if value.trim().is_empty() {
            return Err(WormError::InvalidEvent {
                reason: format!("{name} must not be empty"),
            });
        }
    }
    if let Some(id) = &event.event_id {
        if id.trim().is_empty() {
            return Err(WormError::InvalidEvent {
                reason: "event_id must not be empty when supplied".to_string(),
            });
        }
    }
    Ok(())
}

/// Turn a submitted event into a fully populated record at `sequence_number`,
/// chained to `previous_chain_hash` and signed when a signer is present.
pub fn seal_record(
    event: &NewEvent,
    event_id: &str,
    sequence_number: u64,
    timestamp: DateTime<Utc>,
    previous_chain_hash: &str,
    signer: Option<&dyn ChainSigner>,
) -> WormResult<AuditRecord> {
    let mut record = AuditRecord {
        sequence_number,
        timestamp,
        event_id: event_id.to_string(),
        action_name: event.action_name.clone(),
        status: event.status.clone(),
        metadata: event.metadata.clone(),
        risk_tier: event.risk_tier.clone(),
        requires_approval: event.requires_approval,
        human_decision: event.human_decision.clone(),
        sop_reference: event.effective_sop_reference(),
        content_hash: String::new(),
        chain_hash: String::new(),
        signature: None,
    };

    record.content_hash = compute_content_hash(&ContentFields::from(&record));
    record.chain_hash = compute_chain_hash(&record.content_hash, previous_chain_hash);
    record.signature = signer.map(|s| s.sign(&record.chain_hash)).transpose()?;

    Ok(record)
}
