//! Error taxonomy for the wormlog ledger.
//!
//! Every fallible operation returns `WormResult<T>`. The variants are kept
//! distinct all the way to the caller: a collaborator has to tell "your event
//! was definitely not recorded" apart from "the ledger itself is compromised".

use thiserror::Error;

use crate::verify::MismatchKind;

/// The unified error type for the wormlog crates.
#[derive(Debug, Error)]
pub enum WormError {
    /// An event with this `event_id` is already in the ledger.
    ///
    /// Callers should treat this as "already recorded", not as a fatal error.
    #[error("duplicate event id '{event_id}': event is already recorded")]
    DuplicateEventId { event_id: String },

    /// The durability layer could not be reached or refused the write.
    ///
    /// No partial record is visible after this error.
    #[error("storage unavailable: {reason}")]
    StorageUnavailable { reason: String },

    /// The chain verifier found a divergence. Never auto-repaired.
    #[error("integrity violation at sequence {sequence} ({kind}): {detail}")]
    IntegrityViolation {
        sequence: u64,
        kind: MismatchKind,
        detail: String,
    },

    /// A record carries a signature that does not verify against its chain hash.
    #[error("signature invalid at sequence {sequence}")]
    SignatureInvalid { sequence: u64 },

    /// Two writers raced for the same sequence slot.
    ///
    /// Retried inside the store; only visible to callers of the low-level
    /// append attempt.
    #[error("sequence allocation conflict after {attempts} attempt(s)")]
    SequenceAllocationConflict { attempts: u32 },

    /// The submitted event is malformed (e.g. an empty action name).
    #[error("invalid event: {reason}")]
    InvalidEvent { reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// A signing key could not be loaded or used.
    #[error("signing failed: {reason}")]
    SigningFailed { reason: String },

    /// A snapshot could not be built, written, or read.
    #[error("export failed: {reason}")]
    ExportFailed { reason: String },

    /// A stored row no longer decodes into a record (e.g. its metadata is
    /// not JSON). Only possible if storage was written around the ledger.
    #[error("record {sequence} cannot be decoded: {reason}")]
    RecordUndecodable { sequence: u64, reason: String },

    /// An exported bundle no longer matches its export hash or signature.
    #[error("snapshot tampered: {reason}")]
    SnapshotTampered { reason: String },
}

impl WormError {
    /// True for failures that mean the ledger contents cannot be trusted.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            WormError::IntegrityViolation { .. }
                | WormError::SignatureInvalid { .. }
                | WormError::RecordUndecodable { .. }
                | WormError::SnapshotTampered { .. }
        )
    }

    /// True when the append definitely did not produce a new record.
    pub fn is_definitely_not_recorded(&self) -> bool {
        matches!(
            self,
            WormError::DuplicateEventId { .. }
                | WormError::InvalidEvent { .. }
                | WormError::StorageUnavailable { .. }
        )
    }
}

/// Convenience alias used throughout the wormlog crates.
pub type WormResult<T> = Result<T, WormError>;
