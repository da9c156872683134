//! Core trait definitions for the wormlog ledger.
//!
//! These three traits define the trust boundary:
//!
//! - `LedgerStore`: the durable, append-only record sequence
//! - `ChainSigner`: holds a private key and signs chain hashes
//! - `SignatureVerifier`: checks signatures with a public key
//!
//! The store owns the append path end to end. Callers never supply sequence
//! numbers or hashes; they hand over a `NewEvent` and get back the persisted
//! `AuditRecord`.

use wormlog_contracts::{
    error::WormResult,
    record::{AuditRecord, NewEvent},
};

use crate::cursor::{RecordCursor, DEFAULT_PAGE_SIZE};

/// The WORM store: an ordered, append-only ledger of `AuditRecord`s.
///
/// There is no update or delete. Implementations must make the
/// whole "read tail, allocate sequence, hash, persist" sequence atomic with
/// respect to other appenders.
pub trait LedgerStore: Send + Sync {
    /// Identifier of the ledger this store holds.
    fn ledger_id(&self) -> &str;

    /// Durably append `event` as the new tail and return the full record.
    ///
    /// Fails with `DuplicateEventId` if the event id is already present and
    /// with `StorageUnavailable` if the write could not be made durable. On
    /// failure the ledger is exactly as it was before the call.
    fn append(&self, event: NewEvent) -> WormResult<AuditRecord>;

    /// Records with `from_seq <= sequence_number <= to_seq`, in strictly
    /// increasing order. An empty or inverted range yields an empty vector.
    fn read_range(&self, from_seq: u64, to_seq: u64) -> WormResult<Vec<AuditRecord>>;

    /// The most recent record, or `None` for an empty ledger.
    fn tail(&self) -> WormResult<Option<AuditRecord>>;

    /// The record at `sequence`, if present.
    fn get(&self, sequence: u64) -> WormResult<Option<AuditRecord>>;

    /// Look a record up by its idempotency key.
    ///
    /// This is how a caller resolves an append whose outcome is unknown
    /// (e.g. after an external timeout).
    fn find_by_event_id(&self, event_id: &str) -> WormResult<Option<AuditRecord>>;

    /// Number of records in the ledger.
    fn len(&self) -> WormResult<u64> {
        Ok(self.tail()?.map_or(0, |r| r.sequence_number))
    }

    /// The highest sequence number the store has ever committed.
    ///
    /// Kept apart from the records themselves, so a record removed from
    /// the end of the ledger still leaves a trace. Stores without such a
    /// counter fall back to `len`.
    fn high_water_mark(&self) -> WormResult<u64> {
        self.len()
    }

    fn is_empty(&self) -> WormResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Lazily iterate the whole ledger, up to the tail as of this call.
    fn read_all(&self) -> WormResult<RecordCursor<'_>>
    where
        Self: Sized,
    {
        RecordCursor::snapshot(self, 1, DEFAULT_PAGE_SIZE)
    }
}

/// Produces signatures over chain hashes with a private key held outside the
/// ledger.
pub trait ChainSigner: Send + Sync {
    /// Sign `message` (a hex digest) and return the hex signature.
    fn sign(&self, message: &str) -> WormResult<String>;

    /// Hex encoding of the matching public key.
    fn public_key_hex(&self) -> String;
}

/// Checks signatures produced by a `ChainSigner`.
pub trait SignatureVerifier: Send + Sync {
    /// Return true only if `signature` is a well-formed, valid signature over
    /// `message`. Malformed input is simply `false`.
    fn verify(&self, message: &str, signature: &str) -> bool;
}
