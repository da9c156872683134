//! Transactional sequence allocation.
//!
//! Each ledger owns one counter row in `ledger_sequences`. A number is
//! reserved by bumping that row inside the caller's write transaction, so the
//! reservation commits or rolls back together with the record it numbers. A
//! failed append therefore never consumes a sequence number.

use rusqlite::{params, Connection, OptionalExtension, Transaction};

use wormlog_contracts::error::WormResult;

use crate::sqlite::classify;

pub(crate) const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS ledger_sequences (
        ledger_id     TEXT PRIMARY KEY,
        last_sequence INTEGER NOT NULL
    );
"#;

/// Reserve the next sequence number for `ledger_id` within `tx`.
///
/// The first reservation for a ledger returns 1.
pub fn reserve_next(tx: &Transaction<'_>, ledger_id: &str) -> WormResult<u64> {
    let next: i64 = tx
        .query_row(
            r#"
            INSERT INTO ledger_sequences (ledger_id, last_sequence) VALUES (?1, 1)
            ON CONFLICT(ledger_id) DO UPDATE SET last_sequence = last_sequence + 1
            RETURNING last_sequence
            "#,
            params![ledger_id],
            |row| row.get(0),
        )
        .map_err(classify)?;
    Ok(next as u64)
}

/// The last sequence number committed for `ledger_id`, or 0.
pub fn last_reserved(conn: &Connection, ledger_id: &str) -> WormResult<u64> {
    let last: Option<i64> = conn
        .query_row(
            "SELECT last_sequence FROM ledger_sequences WHERE ledger_id = ?1",
            params![ledger_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(classify)?;
    Ok(last.unwrap_or(0) as u64)
}
