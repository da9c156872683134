//! Lazy, restartable iteration over a ledger.
//!
//! `RecordCursor` pages through `LedgerStore::read_range` instead of
//! materializing the whole ledger. Its upper bound is fixed when the cursor
//! is created, so iterating a ledger that is still growing never chases a
//! moving tail.

use std::collections::VecDeque;

use tracing::debug;

use wormlog_contracts::{
    error::{WormError, WormResult},
    record::AuditRecord,
};

use crate::traits::LedgerStore;

/// Page size used by `LedgerStore::read_all`.
pub const DEFAULT_PAGE_SIZE: u64 = 256;

/// An iterator of `WormResult<AuditRecord>` in strictly increasing sequence
/// order. After the first error the cursor is exhausted.
///
/// A page that fails on an undecodable row still yields the rows before it,
/// then the `RecordUndecodable` error.
pub struct RecordCursor<'a> {
    store: &'a (dyn LedgerStore + 'a),
    next_seq: u64,
    upper: u64,
    page_size: u64,
    buffer: VecDeque<AuditRecord>,
    pending: Option<WormError>,
    exhausted: bool,
    failed: bool,
}

impl<'a> RecordCursor<'a> {
    /// Iterate from `from_seq` up to the tail as it is right now.
    pub fn snapshot(
        store: &'a (dyn LedgerStore + 'a),
        from_seq: u64,
        page_size: u64,
    ) -> WormResult<Self> {
        let upper = store.tail()?.map_or(0, |r| r.sequence_number);
        Ok(Self::bounded(store, from_seq, upper, page_size))
    }

    /// Iterate `from_seq..=to_seq` without consulting the tail.
    ///
    /// Records beyond the stored tail are simply not returned.
    pub fn bounded(
        store: &'a (dyn LedgerStore + 'a),
        from_seq: u64,
        to_seq: u64,
        page_size: u64,
    ) -> Self {
        let next_seq = from_seq.max(1);
        Self {
            store,
            next_seq,
            upper: to_seq,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            pending: None,
            exhausted: next_seq > to_seq,
            failed: false,
        }
    }

    /// The first sequence number not yet fetched from the store.
    ///
    /// Together with `upper_bound`, this is enough to restart iteration with
    /// `RecordCursor::bounded` after the cursor has been dropped.
    pub fn resume_point(&self) -> u64 {
        match self.buffer.front() {
            Some(r) => r.sequence_number,
            None if self.exhausted => self.upper.saturating_add(1),
            None => self.next_seq,
        }
    }

    /// The fixed upper bound of this cursor.
    pub fn upper_bound(&self) -> u64 {
        self.upper
    }

    fn fill(&mut self) -> WormResult<()> {
        while self.buffer.is_empty() && !self.exhausted {
            let page_end = self
                .next_seq
                .saturating_add(self.page_size - 1)
                .min(self.upper);
            debug!(
                ledger_id = %self.store.ledger_id(),
                from = self.next_seq,
                to = page_end,
                "reading ledger page"
            );
            let page = match self.store.read_range(self.next_seq, page_end) {
                Ok(page) => page,
                Err(WormError::RecordUndecodable { sequence, reason })
                    if sequence > self.next_seq =>
                {
                    let prefix = self.store.read_range(self.next_seq, sequence - 1)?;
                    self.buffer.extend(prefix);
                    self.pending = Some(WormError::RecordUndecodable { sequence, reason });
                    self.exhausted = true;
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            self.buffer.extend(page);
            if page_end == self.upper {
                self.exhausted = true;
            } else {
                self.next_seq = page_end + 1;
            }
        }
        Ok(())
    }
}

impl Iterator for RecordCursor<'_> {
    type Item = WormResult<AuditRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Err(e) = self.fill() {
            self.failed = true;
            return Some(Err(e));
        }
        if let Some(record) = self.buffer.pop_front() {
            return Some(Ok(record));
        }
        self.pending.take().map(|e| {
            self.failed = true;
            Err(e)
        })
    }
}
