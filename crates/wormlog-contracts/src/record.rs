//! Ledger record types.
//!
//! `NewEvent` is what a collaborator submits. `AuditRecord` is what the
//! ledger persists: the submitted fields plus the sequence number, capture
//! timestamp, and the hashes that make the ledger tamper-evident.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event-specific detail. Opaque to the ledger, hashed verbatim in canonical
/// form, so construction order never affects the digest.
pub type Metadata = Map<String, Value>;

/// Well-known status values used by the governance collaborators.
///
/// `status` itself is free-form; these are the values the read-side helpers
/// (summary, pending actions) know about.
pub mod status {
    pub const SUCCESS: &str = "SUCCESS";
    pub const BREACH: &str = "BREACH";
    pub const DENIED: &str = "DENIED";
    pub const APPROVED: &str = "APPROVED";
    pub const PENDING: &str = "PENDING";
}

/// A governed event as submitted by a collaborator, before it has a place in
/// the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Caller-supplied idempotency key. Generated when absent.
    #[serde(default)]
    pub event_id: Option<String>,

    /// The governed action, e.g. `"download_model"`.
    pub action_name: String,

    /// Outcome classification, e.g. `"SUCCESS"` or `"PENDING"`.
    pub status: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub risk_tier: String,

    #[serde(default)]
    pub requires_approval: bool,

    #[serde(default)]
    pub human_decision: Option<String>,

    /// Provenance string. Defaults to `SOP-GOV-001-<risk_tier>` when absent.
    #[serde(default)]
    pub sop_reference: Option<String>,
}

impl NewEvent {
    /// Start an event with the three mandatory classification fields.
    pub fn new(
        action_name: impl Into<String>,
        status: impl Into<String>,
        risk_tier: impl Into<String>,
    ) -> Self {
        Self {
            event_id: None,
            action_name: action_name.into(),
            status: status.into(),
            metadata: Metadata::new(),
            risk_tier: risk_tier.into(),
            requires_approval: false,
            human_decision: None,
            sop_reference: None,
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Insert a single metadata entry, replacing any previous value.
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn requiring_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    pub fn with_human_decision(mut self, decision: impl Into<String>) -> Self {
        self.human_decision = Some(decision.into());
        self
    }

    pub fn with_sop_reference(mut self, sop_reference: impl Into<String>) -> Self {
        self.sop_reference = Some(sop_reference.into());
        self
    }

    /// The provenance string that will be recorded for this event.
    pub fn effective_sop_reference(&self) -> String {
        self.sop_reference
            .clone()
            .unwrap_or_else(|| format!("SOP-GOV-001-{}", self.risk_tier))
    }
}

/// The atomic, immutable unit of the ledger.
///
/// Created exactly once, at successful append. Every field above
/// `content_hash` is covered by the content hash; `chain_hash` links the
/// record to its predecessor; `signature` is an optional Ed25519 signature
/// over `chain_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// 1-based, strictly increasing, gap-free position in the ledger.
    pub sequence_number: u64,

    /// Capture time, truncated to microseconds. Advisory only.
    pub timestamp: DateTime<Utc>,

    pub event_id: String,
    pub action_name: String,
    pub status: String,
    pub metadata: Metadata,
    pub risk_tier: String,
    pub requires_approval: bool,
    pub human_decision: Option<String>,
    pub sop_reference: String,

    /// SHA-256 (hex) of the canonical serialization of the fields above.
    pub content_hash: String,

    /// SHA-256 (hex) of `content_hash || previous chain_hash`.
    pub chain_hash: String,

    /// Hex Ed25519 signature over `chain_hash`, or `None` when the ledger has
    /// no signing key. Absence is reported by the verifier, never assumed valid.
    pub signature: Option<String>,
}

impl AuditRecord {
    /// True when the record carries a signature.
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }
}

/// Current time truncated to the microsecond precision the ledger stores.
pub fn capture_timestamp() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
