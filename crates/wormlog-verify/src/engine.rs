//! Chain verifier for wormlog ledgers.
//!
//! `ChainVerifier` walks a ledger in sequence order and, for every record:
//!
//! 1. **Position**: the record carries the expected sequence number. A
//!    missing or out-of-place record is a `SequenceGap`.
//! 2. **Content**: the stored fields re-hash to the stored `content_hash`.
//! 3. **Chain**: `content_hash` chained with the previous record's
//!    `chain_hash` (or genesis) reproduces the stored `chain_hash`.
//! 4. **Signature**: a present signature verifies against `chain_hash`.
//!
//! A stored row that no longer decodes fails the content check at its own
//! sequence number.
//!
//! The walk stops at the first mismatch. The upper bound is captured before
//! the walk starts, so appends that land during verification are ignored
//! rather than chased. Verification only reads.

use std::sync::Arc;

use tracing::{debug, error, info};

use wormlog_contracts::{
    error::{WormError, WormResult},
    record::AuditRecord,
    verify::{Checkpoint, MismatchKind, VerificationOutcome, VerificationReport},
};
use wormlog_core::{
    cursor::{RecordCursor, DEFAULT_PAGE_SIZE},
    traits::{LedgerStore, SignatureVerifier},
};
use wormlog_store::chain::{compute_chain_hash, compute_content_hash, ContentFields, GENESIS_HASH};

/// Verifies hash chains and signatures.
///
/// Without a signature verifier, signed records are counted as
/// `signatures_unchecked` in the report; they are never counted as verified.
pub struct ChainVerifier {
    signatures: Option<Arc<dyn SignatureVerifier>>,
    require_signatures: bool,
    page_size: u64,
}

impl ChainVerifier {
    /// A verifier that checks hashes only.
    pub fn new() -> Self {
        Self {
            signatures: None,
            require_signatures: false,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Also check record signatures with `verifier`.
    pub fn with_signature_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.signatures = Some(verifier);
        self
    }

    /// Treat an unsigned record as a divergence (`MissingSignature`).
    pub fn require_signatures(mut self, required: bool) -> Self {
        self.require_signatures = required;
        self
    }

    pub fn page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Verify the whole ledger.
    pub fn verify_all(&self, store: &dyn LedgerStore) -> WormResult<VerificationReport> {
        self.verify(store, None, None)
    }

    /// Verify `from_seq..=to_seq` (defaults: first record, current tail).
    ///
    /// When `from_seq > 1` the walk starts from the stored chain hash of the
    /// record just before it, which is trusted without re-checking. A range
    /// that starts past the end of the ledger is empty and intact.
    pub fn verify(
        &self,
        store: &dyn LedgerStore,
        from_seq: Option<u64>,
        to_seq: Option<u64>,
    ) -> WormResult<VerificationReport> {
        let from = from_seq.unwrap_or(1).max(1);
        let upper = Self::snapshot_upper(store)?;
        let to = to_seq.map_or(upper, |t| t.min(upper));

        if from > to {
            let nothing = std::iter::empty();
            return self.walk(store.ledger_id(), from, to, GENESIS_HASH.to_string(), nothing);
        }

        let previous = if from == 1 {
            GENESIS_HASH.to_string()
        } else {
            match Self::predecessor(store, from - 1)? {
                Ok(record) => record.chain_hash,
                Err((kind, detail)) => {
                    return Ok(self.diverged_before_walk(
                        store.ledger_id(),
                        from,
                        to,
                        from - 1,
                        kind,
                        detail,
                    ))
                }
            }
        };

        let cursor = RecordCursor::bounded(store, from, to, self.page_size);
        self.walk(store.ledger_id(), from, to, previous, cursor)
    }

    /// Resume verification after a previously verified `checkpoint`.
    ///
    /// The record at the checkpoint must still carry the checkpoint's chain
    /// hash; otherwise something at or before it has been rewritten.
    pub fn verify_from_checkpoint(
        &self,
        store: &dyn LedgerStore,
        checkpoint: &Checkpoint,
    ) -> WormResult<VerificationReport> {
        let from = checkpoint.sequence + 1;
        let upper = Self::snapshot_upper(store)?;

        let mismatch = match Self::predecessor(store, checkpoint.sequence)? {
            Ok(record) if record.chain_hash == checkpoint.chain_hash => None,
            Ok(_) => Some((
                MismatchKind::ChainHash,
                "stored chain hash no longer matches the checkpoint".to_string(),
            )),
            Err(mismatch) => Some(mismatch),
        };
        if let Some((kind, detail)) = mismatch {
            return Ok(self.diverged_before_walk(
                store.ledger_id(),
                from,
                upper,
                checkpoint.sequence,
                kind,
                detail,
            ));
        }

        let cursor = RecordCursor::bounded(store, from, upper, self.page_size);
        self.walk(
            store.ledger_id(),
            from,
            upper,
            checkpoint.chain_hash.clone(),
            cursor,
        )
    }

    /// Verify an arbitrary ordered record stream expected to cover exactly
    /// `from_seq..=to_seq`, chained from `previous_chain_hash`.
    ///
    /// Used for checking exported snapshots without access to the ledger.
    pub fn verify_records<I>(
        &self,
        ledger_id: &str,
        from_seq: u64,
        to_seq: u64,
        previous_chain_hash: &str,
        records: I,
    ) -> WormResult<VerificationReport>
    where
        I: IntoIterator<Item = WormResult<AuditRecord>>,
    {
        self.walk(
            ledger_id,
            from_seq,
            to_seq,
            previous_chain_hash.to_string(),
            records,
        )
    }

    // ── Internal helpers ──────────────────────────────────────────────────────

    /// The upper bound of a pass: the greatest of the tail's sequence
    /// number, the record count, and the store's high-water mark. A displaced
    /// or deleted tail record therefore cannot shrink the range.
    fn snapshot_upper(store: &dyn LedgerStore) -> WormResult<u64> {
        let tail = match store.tail() {
            Ok(tail) => tail.map_or(0, |r| r.sequence_number),
            Err(WormError::RecordUndecodable { sequence, .. }) => sequence,
            Err(e) => return Err(e),
        };
        Ok(tail.max(store.len()?).max(store.high_water_mark()?))
    }

    /// Fetch the trusted record a walk chains from. The inner `Err` is the
    /// mismatch to report at `sequence` when it is missing or unreadable.
    fn predecessor(
        store: &dyn LedgerStore,
        sequence: u64,
    ) -> WormResult<Result<AuditRecord, (MismatchKind, String)>> {
        match store.get(sequence) {
            Ok(Some(record)) => Ok(Ok(record)),
            Ok(None) => Ok(Err((
                MismatchKind::SequenceGap,
                format!("record {sequence} preceding the range is missing"),
            ))),
            Err(WormError::RecordUndecodable { reason, .. }) => Ok(Err((
                MismatchKind::ContentHash,
                format!("record {sequence} cannot be decoded: {reason}"),
            ))),
            Err(e) => Err(e),
        }
    }

    fn diverged_before_walk(
        &self,
        ledger_id: &str,
        from_seq: u64,
        to_seq: u64,
        sequence: u64,
        kind: MismatchKind,
        detail: String,
    ) -> VerificationReport {
        let report = VerificationReport {
            ledger_id: ledger_id.to_string(),
            from_seq,
            to_seq,
            records_checked: 0,
            signatures_verified: 0,
            signatures_absent: 0,
            signatures_unchecked: 0,
            outcome: VerificationOutcome::Intact { checkpoint: None },
        };
        diverge(report, sequence, kind, detail)
    }

    fn walk<I>(
        &self,
        ledger_id: &str,
        from_seq: u64,
        to_seq: u64,
        mut previous: String,
        records: I,
    ) -> WormResult<VerificationReport>
    where
        I: IntoIterator<Item = WormResult<AuditRecord>>,
    {
        info!(ledger_id = %ledger_id, from_seq, to_seq, "verifying ledger chain");

        let mut report = VerificationReport {
            ledger_id: ledger_id.to_string(),
            from_seq,
            to_seq,
            records_checked: 0,
            signatures_verified: 0,
            signatures_absent: 0,
            signatures_unchecked: 0,
            outcome: VerificationOutcome::Intact { checkpoint: None },
        };
        let mut expected = from_seq;

        for record in records {
            if expected > to_seq {
                break;
            }

            let record = match record {
                Ok(record) => record,
                Err(WormError::RecordUndecodable { sequence, .. }) if sequence > expected => {
                    let detail = format!("record {expected} is missing");
                    return Ok(diverge(report, expected, MismatchKind::SequenceGap, detail));
                }
                Err(WormError::RecordUndecodable { sequence, reason }) => {
                    let detail = format!("stored fields cannot be decoded: {reason}");
                    return Ok(diverge(report, sequence, MismatchKind::ContentHash, detail));
                }
                Err(e) => return Err(e),
            };

            if let Some((kind, detail)) = self.check(&record, expected, &previous, &mut report) {
                return Ok(diverge(report, expected, kind, detail));
            }

            debug!(ledger_id = %ledger_id, sequence = expected, "record verified");
            report.records_checked += 1;
            previous = record.chain_hash;
            expected += 1;
        }

        if expected <= to_seq {
            let detail = format!("record {expected} is missing");
            return Ok(diverge(report, expected, MismatchKind::SequenceGap, detail));
        }

        let checkpoint = (report.records_checked > 0).then(|| Checkpoint {
            sequence: expected - 1,
            chain_hash: previous,
        });
        info!(
            ledger_id = %ledger_id,
            records_checked = report.records_checked,
            signatures_verified = report.signatures_verified,
            signatures_absent = report.signatures_absent,
            signatures_unchecked = report.signatures_unchecked,
            "ledger chain intact"
        );
        report.outcome = VerificationOutcome::Intact { checkpoint };
        Ok(report)
    }

    /// Check one record. Returns the mismatch, if any, and updates the
    /// signature counters.
    fn check(
        &self,
        record: &AuditRecord,
        expected: u64,
        previous: &str,
        report: &mut VerificationReport,
    ) -> Option<(MismatchKind, String)> {
        if record.sequence_number != expected {
            return Some((
                MismatchKind::SequenceGap,
                format!(
                    "expected sequence {expected}, found {}",
                    record.sequence_number
                ),
            ));
        }

        let content_hash = compute_content_hash(&ContentFields::from(record));
        if content_hash != record.content_hash {
            return Some((
                MismatchKind::ContentHash,
                format!(
                    "stored content hash {} but fields hash to {content_hash}",
                    record.content_hash
                ),
            ));
        }

        let chain_hash = compute_chain_hash(&content_hash, previous);
        if chain_hash != record.chain_hash {
            return Some((
                MismatchKind::ChainHash,
                format!(
                    "stored chain hash {} but chain recomputes to {chain_hash}",
                    record.chain_hash
                ),
            ));
        }

        match (&record.signature, &self.signatures) {
            (Some(signature), Some(verifier)) => {
                if !verifier.verify(&record.chain_hash, signature) {
                    return Some((
                        MismatchKind::Signature,
                        "signature does not verify against the chain hash".to_string(),
                    ));
                }
                report.signatures_verified += 1;
            }
            (Some(_), None) => report.signatures_unchecked += 1,
            (None, _) => {
                if self.require_signatures {
                    return Some((
                        MismatchKind::MissingSignature,
                        "record is unsigned but signatures are required".to_string(),
                    ));
                }
                report.signatures_absent += 1;
            }
        }

        None
    }
}

/// Record the first divergence on `report`.
fn diverge(
    mut report: VerificationReport,
    sequence: u64,
    kind: MismatchKind,
    detail: String,
) -> VerificationReport {
    error!(
        ledger_id = %report.ledger_id,
        sequence,
        kind = %kind,
        detail = %detail,
        "ledger divergence detected"
    );
    report.outcome = VerificationOutcome::Diverged {
        sequence,
        kind,
        detail,
    };
    report
}

impl Default for ChainVerifier {
    fn default() -> Self {
        Self::new()
    }
}
