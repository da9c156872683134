//! Chain verification report types.
//!
//! A verification pass either proves a range intact, yielding a
//! `Checkpoint` usable for incremental re-verification, or stops at the first
//! divergence and names the offending sequence number and mismatch kind.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{WormError, WormResult};

/// What kind of mismatch the verifier found at the divergence point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    /// The record's stored fields no longer hash to its `content_hash`.
    ContentHash,
    /// Content is intact but the chain link is wrong: a prior record was
    /// altered or removed, or records were reordered.
    ChainHash,
    /// A signature is present but does not verify against `chain_hash`.
    Signature,
    /// Signatures are required and this record has none.
    MissingSignature,
    /// The record at this position does not carry the expected sequence
    /// number: a record is missing or out of order.
    SequenceGap,
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MismatchKind::ContentHash => "content hash mismatch",
            MismatchKind::ChainHash => "chain hash mismatch",
            MismatchKind::Signature => "signature mismatch",
            MismatchKind::MissingSignature => "missing signature",
            MismatchKind::SequenceGap => "sequence gap",
        };
        f.write_str(s)
    }
}

/// A trusted point in the chain: the chain hash of a verified record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub sequence: u64,
    pub chain_hash: String,
}

/// Outcome of one verification pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum VerificationOutcome {
    /// Every record in the range checked out. `checkpoint` is `None` only
    /// when the range was empty.
    Intact { checkpoint: Option<Checkpoint> },

    /// The first point of divergence.
    Diverged {
        sequence: u64,
        kind: MismatchKind,
        detail: String,
    },
}

/// Full report of a verification pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub ledger_id: String,

    /// First sequence number requested.
    pub from_seq: u64,

    /// Upper bound fixed when the pass started.
    pub to_seq: u64,

    pub records_checked: u64,
    pub signatures_verified: u64,

    /// Records with no signature at all.
    pub signatures_absent: u64,

    /// Records with a signature that could not be checked because no
    /// verifying key was configured.
    pub signatures_unchecked: u64,

    pub outcome: VerificationOutcome,
}

impl VerificationReport {
    /// True only if the whole range verified.
    pub fn passed(&self) -> bool {
        matches!(self.outcome, VerificationOutcome::Intact { .. })
    }

    /// Sequence number and kind of the first divergence, if any.
    pub fn divergence_point(&self) -> Option<(u64, MismatchKind)> {
        match &self.outcome {
            VerificationOutcome::Diverged { sequence, kind, .. } => Some((*sequence, *kind)),
            VerificationOutcome::Intact { .. } => None,
        }
    }

    /// Convert a divergence into the matching error so that processes
    /// depending on ledger trust halt.
    pub fn into_result(self) -> WormResult<Option<Checkpoint>> {
        match self.outcome {
            VerificationOutcome::Intact { checkpoint } => Ok(checkpoint),
            VerificationOutcome::Diverged {
                sequence,
                kind: MismatchKind::Signature,
                ..
            } => Err(WormError::SignatureInvalid { sequence }),
            VerificationOutcome::Diverged {
                sequence,
                kind,
                detail,
            } => Err(WormError::IntegrityViolation {
                sequence,
                kind,
                detail,
            }),
        }
    }
}
