//! `AuditService`: the façade external collaborators call.
//!
//! It wires a `LedgerStore`, an optional signer, and a `ChainVerifier`
//! together from a `LedgerConfig`, and exposes the operations a governed
//! agent, an audit viewer, or a compliance export needs:
//!
//! 1. **Submit**: `record_event`, `record_correction`
//! 2. **Read**: `find_event`, `get_history`, `pending_actions`, `summary`
//! 3. **Verify**: `verify_integrity`, `verify_from_checkpoint`
//! 4. **Export**: `export_snapshot`, `verify_snapshot`
//!
//! Read-side filters never feed integrity claims. Verification and the
//! pre-export check always run over the full chain.

use std::sync::Arc;

use serde_json::json;
use tracing::{error, info};

use wormlog_contracts::{
    error::{WormError, WormResult},
    query::{AuditSummary, HistoryFilter},
    record::{status, AuditRecord, NewEvent},
    snapshot::SnapshotBundle,
    verify::{Checkpoint, VerificationReport},
};
use wormlog_core::{
    cursor::{RecordCursor, DEFAULT_PAGE_SIZE},
    traits::{ChainSigner, LedgerStore, SignatureVerifier},
};
use wormlog_store::{Ed25519Signer, Ed25519Verifier, InMemoryLedger, SqliteLedger};
use wormlog_verify::ChainVerifier;

use crate::{
    config::{Backend, LedgerConfig},
    export,
};

/// Metadata key linking a correction to the record it corrects.
pub const CORRECTS_KEY: &str = "corrects";

/// The audit event API over one ledger.
pub struct AuditService {
    store: Arc<dyn LedgerStore>,
    signer: Option<Arc<dyn ChainSigner>>,
    signature_verifier: Option<Arc<dyn SignatureVerifier>>,
    verifier: ChainVerifier,
    page_size: u64,
}

impl AuditService {
    /// Wrap an existing store with hash-only verification.
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            signer: None,
            signature_verifier: None,
            verifier: ChainVerifier::new(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Sign exported bundles with `signer`.
    ///
    /// Record signing is configured on the store itself.
    pub fn with_signer(mut self, signer: Arc<dyn ChainSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Check record and bundle signatures with `verifier`.
    pub fn with_signature_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = self.verifier.with_signature_verifier(Arc::clone(&verifier));
        self.signature_verifier = Some(verifier);
        self
    }

    pub fn require_signatures(mut self, required: bool) -> Self {
        self.verifier = self.verifier.require_signatures(required);
        self
    }

    pub fn page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self.verifier = self.verifier.page_size(self.page_size);
        self
    }

    /// Build the store, keys, and verifier described by `config`.
    ///
    /// With only a private key configured, the verifying key is derived from
    /// it.
    pub fn from_config(config: &LedgerConfig) -> WormResult<Self> {
        config.validate()?;

        let signer = config
            .signing
            .private_key_path
            .as_deref()
            .map(Ed25519Signer::from_file)
            .transpose()?
            .map(Arc::new);

        let public = match (&config.signing.public_key_path, &signer) {
            (Some(path), _) => Some(Ed25519Verifier::from_file(path)?),
            (None, Some(signer)) => Some(signer.verifier()),
            (None, None) => None,
        };

        let ledger_id = config.ledger.ledger_id.clone();
        let store: Arc<dyn LedgerStore> = match config.ledger.backend {
            Backend::Memory => {
                let mut ledger = InMemoryLedger::new(ledger_id);
                if let Some(signer) = &signer {
                    ledger = ledger.with_signer(Arc::clone(signer) as Arc<dyn ChainSigner>);
                }
                Arc::new(ledger)
            }
            Backend::Sqlite => {
                let path = config
                    .ledger
                    .path
                    .as_deref()
                    .ok_or_else(|| WormError::ConfigError {
                        reason: "ledger.path is required for the sqlite backend".to_string(),
                    })?;
                let mut ledger = SqliteLedger::open(path, ledger_id, config.sqlite_options())?;
                if let Some(signer) = &signer {
                    ledger = ledger.with_signer(Arc::clone(signer) as Arc<dyn ChainSigner>);
                }
                Arc::new(ledger)
            }
        };

        let mut service = Self::new(store)
            .page_size(config.export.page_size)
            .require_signatures(config.signing.require_signatures);
        if let Some(signer) = signer {
            service = service.with_signer(signer);
        }
        if let Some(public) = public {
            service = service.with_signature_verifier(Arc::new(public));
        }

        info!(
            ledger_id = %service.ledger_id(),
            backend = ?config.ledger.backend,
            signing = service.signer.is_some(),
            "audit service ready"
        );
        Ok(service)
    }

    pub fn ledger_id(&self) -> &str {
        self.store.ledger_id()
    }

    /// The underlying store.
    pub fn store(&self) -> &dyn LedgerStore {
        self.store.as_ref()
    }

    // ── Submit ───────────────────────────────────────────────────────────────

    /// Validate, persist, and return the new record.
    ///
    /// `DuplicateEventId` means the event is already recorded; use
    /// `find_event` to fetch it.
    pub fn record_event(&self, mut event: NewEvent) -> WormResult<AuditRecord> {
        if event.sop_reference.is_none() {
            event.sop_reference = Some(event.effective_sop_reference());
        }
        self.store.append(event)
    }

    /// Record `event` as a correction of `original_event_id`.
    ///
    /// The original stays untouched; the correction carries a `corrects`
    /// metadata entry naming it.
    pub fn record_correction(
        &self,
        original_event_id: &str,
        mut event: NewEvent,
    ) -> WormResult<AuditRecord> {
        let original = self.find_event(original_event_id)?.ok_or_else(|| {
            WormError::InvalidEvent {
                reason: format!("cannot correct unknown event '{original_event_id}'"),
            }
        })?;

        event.metadata.insert(
            CORRECTS_KEY.to_string(),
            json!({
                "event_id": original.event_id,
                "sequence_number": original.sequence_number,
            }),
        );

        let record = self.record_event(event)?;
        info!(
            ledger_id = %self.ledger_id(),
            sequence = record.sequence_number,
            corrects = original.sequence_number,
            "correction recorded"
        );
        Ok(record)
    }

    // ── Read ─────────────────────────────────────────────────────────────────

    pub fn find_event(&self, event_id: &str) -> WormResult<Option<AuditRecord>> {
        self.store.find_by_event_id(event_id)
    }

    /// Lazily iterate records matching `filter`, in sequence order.
    ///
    /// The upper bound is the tail at the time of the call.
    pub fn get_history(&self, filter: HistoryFilter) -> WormResult<History<'_>> {
        let tail = self.store.tail()?.map_or(0, |r| r.sequence_number);
        let from = filter.from_seq.unwrap_or(1);
        let to = filter.to_seq.map_or(tail, |t| t.min(tail));
        let cursor = RecordCursor::bounded(self.store.as_ref(), from, to, self.page_size);
        Ok(History { cursor, filter })
    }

    /// Records with status `PENDING`, oldest first.
    pub fn pending_actions(&self) -> WormResult<Vec<AuditRecord>> {
        self.get_history(HistoryFilter::default().status(status::PENDING))?
            .collect()
    }

    /// Counts over the whole ledger.
    pub fn summary(&self) -> WormResult<AuditSummary> {
        let mut summary = AuditSummary::default();
        for record in self.get_history(HistoryFilter::default())? {
            summary.observe(&record?);
        }
        Ok(summary)
    }

    // ── Verify ───────────────────────────────────────────────────────────────

    /// Verify `from_seq..=to_seq` (defaults: the whole ledger).
    pub fn verify_integrity(
        &self,
        from_seq: Option<u64>,
        to_seq: Option<u64>,
    ) -> WormResult<VerificationReport> {
        self.verifier.verify(self.store.as_ref(), from_seq, to_seq)
    }

    pub fn verify_from_checkpoint(&self, checkpoint: &Checkpoint) -> WormResult<VerificationReport> {
        self.verifier
            .verify_from_checkpoint(self.store.as_ref(), checkpoint)
    }

    // ── Export ───────────────────────────────────────────────────────────────

    /// Export `from_seq..=to_seq` as a bundle for an external auditor.
    ///
    /// The whole chain is verified first; any divergence aborts the export
    /// with the matching integrity error. Records appended after that pass
    /// are left out of the bundle.
    pub fn export_snapshot(
        &self,
        from_seq: Option<u64>,
        to_seq: Option<u64>,
    ) -> WormResult<SnapshotBundle> {
        let report = self.verify_integrity(None, None)?;
        let verified_to = report.to_seq;
        if let Err(e) = report.into_result() {
            error!(ledger_id = %self.ledger_id(), error = %e, "export halted: ledger failed verification");
            return Err(e);
        }
        export::build_snapshot(
            self.store.as_ref(),
            from_seq,
            Some(to_seq.map_or(verified_to, |t| t.min(verified_to))),
            self.page_size,
            self.signer.as_deref(),
        )
    }

    /// Check a bundle with this service's verifying key, if any.
    pub fn verify_snapshot(&self, bundle: &SnapshotBundle) -> WormResult<VerificationReport> {
        export::verify_snapshot(bundle, self.signature_verifier.clone())
    }
}

/// Lazy, filtered view over a ledger range. See `AuditService::get_history`.
pub struct History<'a> {
    cursor: RecordCursor<'a>,
    filter: HistoryFilter,
}

impl Iterator for History<'_> {
    type Item = WormResult<AuditRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.cursor.next()? {
                Ok(record) if !self.filter.matches(&record) => continue,
                other => return Some(other),
            }
        }
    }
}
