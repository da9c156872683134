//! In-memory implementation of `LedgerStore`.
//!
//! `InMemoryLedger` keeps all records in a `Vec` behind an `RwLock`. The
//! write lock is the single-writer discipline: the whole "read tail,
//! allocate, hash, push" sequence happens while it is held, so concurrent
//! appenders can never chain off the same tail. Readers share the read lock.
//!
//! Nothing survives the process. Use it for tests and ephemeral ledgers; use
//! `SqliteLedger` when durability matters.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tracing::{info, warn};

use wormlog_contracts::{
    error::{WormError, WormResult},
    record::{capture_timestamp, AuditRecord, NewEvent},
};
use wormlog_core::traits::{ChainSigner, LedgerStore};

use crate::chain::{self, GENESIS_HASH};

// ── Internal mutable state ────────────────────────────────────────────────────

/// The mutable interior of an `InMemoryLedger`.
#[derive(Default)]
pub(crate) struct InMemoryState {
    /// All records, in sequence order. `records[i].sequence_number == i + 1`
    /// unless someone has tampered with the state.
    pub(crate) records: Vec<AuditRecord>,

    /// `event_id` → sequence number, for idempotency checks and lookups.
    pub(crate) by_event_id: HashMap<String, u64>,

    /// Highest sequence number ever appended. Not touched by `__tamper`.
    pub(crate) high_water: u64,
}

// ── Public ledger ─────────────────────────────────────────────────────────────

/// An in-memory, append-only ledger backed by a SHA-256 hash chain.
pub struct InMemoryLedger {
    ledger_id: String,
    pub(crate) state: RwLock<InMemoryState>,
    signer: Option<Arc<dyn ChainSigner>>,
}

impl InMemoryLedger {
    /// Create an empty ledger. The first record will chain to `GENESIS_HASH`.
    pub fn new(ledger_id: impl Into<String>) -> Self {
        Self {
            ledger_id: ledger_id.into(),
            state: RwLock::new(InMemoryState::default()),
            signer: None,
        }
    }

    /// Sign every appended record's chain hash with `signer`.
    pub fn with_signer(mut self, signer: Arc<dyn ChainSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Mutate the stored records directly, bypassing every safeguard.
    ///
    /// **WARNING**: exists only so tests can simulate tampering. The event-id
    /// index is left untouched.
    #[doc(hidden)]
    pub fn __tamper(&self, f: impl FnOnce(&mut Vec<AuditRecord>)) {
        if let Ok(mut state) = self.state.write() {
            f(&mut state.records);
        }
    }

    fn read(&self) -> WormResult<RwLockReadGuard<'_, InMemoryState>> {
        self.state.read().map_err(|e| WormError::StorageUnavailable {
            reason: format!("ledger state lock poisoned: {e}"),
        })
    }

    fn write(&self) -> WormResult<RwLockWriteGuard<'_, InMemoryState>> {
        self.state.write().map_err(|e| WormError::StorageUnavailable {
            reason: format!("ledger state lock poisoned: {e}"),
        })
    }
}

// ── LedgerStore impl ──────────────────────────────────────────────────────────

impl LedgerStore for InMemoryLedger {
    fn ledger_id(&self) -> &str {
        &self.ledger_id
    }

    /// Append one event to the hash chain.
    ///
    /// The record is fully built (and signed) before it is pushed, so a
    /// signing failure leaves the ledger untouched.
    fn append(&self, event: NewEvent) -> WormResult<AuditRecord> {
        chain::validate_event(&event)?;
        let event_id = event
            .event_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut state = self.write()?;

        if state.by_event_id.contains_key(&event_id) {
            warn!(ledger_id = %self.ledger_id, event_id = %event_id, "duplicate event rejected");
            return Err(WormError::DuplicateEventId { event_id });
        }

        let sequence_number = state.records.len() as u64 + 1;
        let previous = state
            .records
            .last()
            .map_or(GENESIS_HASH, |r| r.chain_hash.as_str());

        let record = chain::seal_record(
            &event,
            &event_id,
            sequence_number,
            capture_timestamp(),
            previous,
            self.signer.as_deref(),
        )?;

        state.by_event_id.insert(event_id, sequence_number);
        state.records.push(record.clone());
        state.high_water = state.high_water.max(sequence_number);

        info!(
            ledger_id = %self.ledger_id,
            sequence = record.sequence_number,
            event_id = %record.event_id,
            action = %record.action_name,
            status = %record.status,
            "event appended"
        );

        Ok(record)
    }

    fn read_range(&self, from_seq: u64, to_seq: u64) -> WormResult<Vec<AuditRecord>> {
        let state = self.read()?;
        // Filter by stored sequence number rather than slicing by index so a
        // tampered vector is returned as stored, for the verifier to judge.
        Ok(state
            .records
            .iter()
            .filter(|r| r.sequence_number >= from_seq && r.sequence_number <= to_seq)
            .cloned()
            .collect())
    }

    fn tail(&self) -> WormResult<Option<AuditRecord>> {
        Ok(self.read()?.records.last().cloned())
    }

    fn get(&self, sequence: u64) -> WormResult<Option<AuditRecord>> {
        let state = self.read()?;
        Ok(state
            .records
            .iter()
            .find(|r| r.sequence_number == sequence)
            .cloned())
    }

    fn find_by_event_id(&self, event_id: &str) -> WormResult<Option<AuditRecord>> {
        let state = self.read()?;
        Ok(state
            .by_event_id
            .get(event_id)
            .and_then(|seq| state.records.iter().find(|r| r.sequence_number == *seq))
            .cloned())
    }

    fn len(&self) -> WormResult<u64> {
        Ok(self.read()?.records.len() as u64)
    }

    fn high_water_mark(&self) -> WormResult<u64> {
        Ok(self.read()?.high_water)
    }
}
