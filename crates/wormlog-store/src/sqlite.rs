//! Durable WORM store backed by SQLite.
//!
//! One database file holds one ledger. `audit_records.sequence_number` is the
//! rowid, so the physical order of the table is the ledger order and range
//! reads need no sort.
//!
//! # Append protocol
//!
//! Every append runs in a single `BEGIN IMMEDIATE` transaction:
//!
//! 1. reject a duplicate `event_id`
//! 2. read the current tail (sequence and chain hash)
//! 3. reserve the next sequence number from `ledger_sequences`
//! 4. compute content hash, chain hash and optional signature
//! 5. insert and commit
//!
//! `IMMEDIATE` takes the database write lock up front, so two writers (in
//! this process or another) can never chain off the same tail. Lock
//! contention surfaces as `SequenceAllocationConflict` and is retried with a
//! linear backoff before giving up with `StorageUnavailable`.
//!
//! # Access control
//!
//! `BEFORE UPDATE` / `BEFORE DELETE` triggers abort any mutation of
//! `audit_records` at the storage boundary.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    thread,
    time::Duration,
};

use rusqlite::{
    ffi, params, types::Type, Connection, ErrorCode, OpenFlags, OptionalExtension, Row, Rows,
    Transaction, TransactionBehavior,
};
use tracing::{debug, info, warn};

use wormlog_contracts::{
    error::{WormError, WormResult},
    record::{capture_timestamp, AuditRecord, Metadata, NewEvent},
};
use wormlog_core::traits::{ChainSigner, LedgerStore};

use crate::{
    chain::{self, format_timestamp, GENESIS_HASH},
    sequence,
};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS audit_records (
        sequence_number   INTEGER PRIMARY KEY,
        timestamp         TEXT    NOT NULL,
        event_id          TEXT    NOT NULL UNIQUE,
        action_name       TEXT    NOT NULL,
        status            TEXT    NOT NULL,
        metadata_json     TEXT    NOT NULL,
        risk_tier         TEXT    NOT NULL,
        requires_approval INTEGER NOT NULL,
        human_decision    TEXT,
        sop_reference     TEXT    NOT NULL,
        content_hash      TEXT    NOT NULL,
        chain_hash        TEXT    NOT NULL,
        signature         TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_audit_records_status ON audit_records(status);
    CREATE INDEX IF NOT EXISTS idx_audit_records_action ON audit_records(action_name);

    CREATE TRIGGER IF NOT EXISTS audit_records_no_update
    BEFORE UPDATE ON audit_records
    BEGIN
        SELECT RAISE(ABORT, 'audit_records is append-only');
    END;

    CREATE TRIGGER IF NOT EXISTS audit_records_no_delete
    BEFORE DELETE ON audit_records
    BEGIN
        SELECT RAISE(ABORT, 'audit_records is append-only');
    END;
"#;

const SELECT_COLUMNS: &str = r#"
    SELECT sequence_number, timestamp, event_id, action_name, status,
           metadata_json, risk_tier, requires_approval, human_decision,
           sop_reference, content_hash, chain_hash, signature
    FROM audit_records
"#;

/// Tuning for the append path.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    /// Attempts before a persistent conflict becomes `StorageUnavailable`.
    pub max_retries: u32,
    /// Backoff unit; attempt `n` sleeps `n * retry_backoff`.
    pub retry_backoff: Duration,
    /// How long SQLite itself waits on a locked database per attempt.
    pub busy_timeout: Duration,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            max_retries: 7,
            retry_backoff: Duration::from_millis(100),
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

/// Map a SQLite error onto the ledger taxonomy.
///
/// Lock contention and primary-key collisions are allocation conflicts;
/// everything else means the store could not do its job.
pub(crate) fn classify(e: rusqlite::Error) -> WormError {
    if let rusqlite::Error::SqliteFailure(err, _) = &e {
        let conflict = matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            || err.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY;
        if conflict {
            return WormError::SequenceAllocationConflict { attempts: 1 };
        }
    }
    WormError::StorageUnavailable {
        reason: e.to_string(),
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<AuditRecord> {
    let ts: String = row.get(1)?;
    let timestamp = chrono::DateTime::parse_from_rfc3339(&ts)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?
        .with_timezone(&chrono::Utc);

    let metadata_json: String = row.get(5)?;
    let metadata: Metadata = serde_json::from_str(&metadata_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    Ok(AuditRecord {
        sequence_number: row.get::<_, i64>(0)? as u64,
        timestamp,
        event_id: row.get(2)?,
        action_name: row.get(3)?,
        status: row.get(4)?,
        metadata,
        risk_tier: row.get(6)?,
        requires_approval: row.get(7)?,
        human_decision: row.get(8)?,
        sop_reference: row.get(9)?,
        content_hash: row.get(10)?,
        chain_hash: row.get(11)?,
        signature: row.get(12)?,
    })
}

/// Decode one row, naming the sequence number of a row whose stored fields
/// no longer convert.
fn decode_row(row: &Row<'_>) -> WormResult<AuditRecord> {
    let sequence = row.get::<_, i64>(0).map_err(classify)? as u64;
    row_to_record(row).map_err(|e| WormError::RecordUndecodable {
        sequence,
        reason: e.to_string(),
    })
}

/// Drain `rows` in order; stops at the first row that fails to decode.
fn collect_records(mut rows: Rows<'_>) -> WormResult<Vec<AuditRecord>> {
    let mut records = Vec::new();
    while let Some(row) = rows.next().map_err(classify)? {
        records.push(decode_row(row)?);
    }
    Ok(records)
}

/// A SQLite-backed `LedgerStore`.
///
/// Holds a dedicated writer connection and a separate reader connection; in
/// WAL mode readers see a consistent snapshot and never wait on the writer.
pub struct SqliteLedger {
    ledger_id: String,
    path: PathBuf,
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    signer: Option<Arc<dyn ChainSigner>>,
    options: SqliteOptions,
}

impl SqliteLedger {
    /// Create or open the ledger database at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        ledger_id: impl Into<String>,
        options: SqliteOptions,
    ) -> WormResult<Self> {
        let ledger_id = ledger_id.into();
        let path = path.as_ref().to_path_buf();

        info!(
            ledger_id = %ledger_id,
            path = %path.display(),
            "opening sqlite ledger"
        );

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| WormError::StorageUnavailable {
                reason: format!("failed to create '{}': {e}", parent.display()),
            })?;
        }

        let open = |flags: OpenFlags| -> WormResult<Connection> {
            let conn = Connection::open_with_flags(&path, flags).map_err(classify)?;
            conn.busy_timeout(options.busy_timeout).map_err(classify)?;
            Ok(conn)
        };

        let writer = open(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        writer
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(classify)?;
        writer
            .pragma_update(None, "synchronous", "FULL")
            .map_err(classify)?;
        writer.execute_batch(SCHEMA).map_err(classify)?;
        writer.execute_batch(sequence::SCHEMA).map_err(classify)?;

        let reader = open(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX)?;

        Ok(Self {
            ledger_id,
            path,
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            signer: None,
            options,
        })
    }

    /// Sign every appended record's chain hash with `signer`.
    pub fn with_signer(mut self, signer: Arc<dyn ChainSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The last sequence number handed out by the allocator.
    pub fn last_reserved_sequence(&self) -> WormResult<u64> {
        let conn = self.lock_reader()?;
        sequence::last_reserved(&conn, &self.ledger_id)
    }

    /// Execute raw SQL against the ledger file, bypassing every safeguard.
    ///
    /// **WARNING**: exists only so tests can simulate an attacker with
    /// direct storage access. Never call from production code.
    #[doc(hidden)]
    pub fn __raw_execute(&self, sql: &str) -> WormResult<()> {
        let conn = self.lock_writer()?;
        conn.execute_batch(sql).map_err(classify)
    }

    fn lock_writer(&self) -> WormResult<MutexGuard<'_, Connection>> {
        self.writer.lock().map_err(|e| WormError::StorageUnavailable {
            reason: format!("writer connection lock poisoned: {e}"),
        })
    }

    fn lock_reader(&self) -> WormResult<MutexGuard<'_, Connection>> {
        self.reader.lock().map_err(|e| WormError::StorageUnavailable {
            reason: format!("reader connection lock poisoned: {e}"),
        })
    }

    fn latest(tx: &Transaction<'_>) -> WormResult<Option<(u64, String)>> {
        tx.query_row(
            "SELECT sequence_number, chain_hash FROM audit_records
             ORDER BY sequence_number DESC LIMIT 1",
            [],
            |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?)),
        )
        .optional()
        .map_err(classify)
    }

    /// One attempt at the append protocol. Dropping `tx` on any early
    /// return rolls everything back, including the sequence reservation.
    fn try_append(&self, event: &NewEvent, event_id: &str) -> WormResult<AuditRecord> {
        let mut conn = self.lock_writer()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(classify)?;

        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM audit_records WHERE event_id = ?1)",
                params![event_id],
                |row| row.get(0),
            )
            .map_err(classify)?;
        if exists {
            return Err(WormError::DuplicateEventId {
                event_id: event_id.to_string(),
            });
        }

        let tail = Self::latest(&tx)?;
        let tail_seq = tail.as_ref().map_or(0, |(seq, _)| *seq);
        let sequence_number = sequence::reserve_next(&tx, &self.ledger_id)?;
        if sequence_number != tail_seq + 1 {
            return Err(WormError::StorageUnavailable {
                reason: format!(
                    "sequence counter reserved {sequence_number} but ledger tail is {tail_seq}"
                ),
            });
        }

        let previous = tail.as_ref().map_or(GENESIS_HASH, |(_, hash)| hash.as_str());
        let record = chain::seal_record(
            event,
            event_id,
            sequence_number,
            capture_timestamp(),
            previous,
            self.signer.as_deref(),
        )?;

        let metadata_json = serde_json::to_string(&record.metadata).map_err(|e| {
            WormError::InvalidEvent {
                reason: format!("metadata is not serializable: {e}"),
            }
        })?;

        tx.execute(
            r#"
            INSERT INTO audit_records (
                sequence_number, timestamp, event_id, action_name, status,
                metadata_json, risk_tier, requires_approval, human_decision,
                sop_reference, content_hash, chain_hash, signature
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                record.sequence_number as i64,
                format_timestamp(&record.timestamp),
                record.event_id,
                record.action_name,
                record.status,
                metadata_json,
                record.risk_tier,
                record.requires_approval,
                record.human_decision,
                record.sop_reference,
                record.content_hash,
                record.chain_hash,
                record.signature,
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                WormError::DuplicateEventId {
                    event_id: event_id.to_string(),
                }
            } else {
                classify(e)
            }
        })?;

        tx.commit().map_err(classify)?;
        Ok(record)
    }

    fn query_one(&self, clause: &str, param: &dyn rusqlite::ToSql) -> WormResult<Option<AuditRecord>> {
        let conn = self.lock_reader()?;
        let sql = format!("{SELECT_COLUMNS} {clause}");
        let mut stmt = conn.prepare_cached(&sql).map_err(classify)?;
        let rows = stmt.query([param]).map_err(classify)?;
        Ok(collect_records(rows)?.into_iter().next())
    }
}

impl LedgerStore for SqliteLedger {
    fn ledger_id(&self) -> &str {
        &self.ledger_id
    }

    fn append(&self, event: NewEvent) -> WormResult<AuditRecord> {
        chain::validate_event(&event)?;
        let event_id = event
            .event_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let max = self.options.max_retries.max(1);
        for attempt in 1..=max {
            match self.try_append(&event, &event_id) {
                Ok(record) => {
                    info!(
                        ledger_id = %self.ledger_id,
                        sequence = record.sequence_number,
                        event_id = %record.event_id,
                        action = %record.action_name,
                        status = %record.status,
                        "event appended"
                    );
                    return Ok(record);
                }
                Err(WormError::SequenceAllocationConflict { .. }) if attempt < max => {
                    warn!(
                        ledger_id = %self.ledger_id,
                        event_id = %event_id,
                        attempt,
                        "sequence allocation conflict, retrying"
                    );
                    thread::sleep(self.options.retry_backoff * attempt);
                }
                Err(WormError::SequenceAllocationConflict { .. }) => break,
                Err(e @ WormError::DuplicateEventId { .. }) => {
                    warn!(ledger_id = %self.ledger_id, event_id = %event_id, "duplicate event rejected");
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(WormError::StorageUnavailable {
            reason: format!("sequence allocation conflict persisted after {max} attempts"),
        })
    }

    fn read_range(&self, from_seq: u64, to_seq: u64) -> WormResult<Vec<AuditRecord>> {
        if from_seq > to_seq {
            return Ok(Vec::new());
        }
        let conn = self.lock_reader()?;
        let sql = format!(
            "{SELECT_COLUMNS} WHERE sequence_number BETWEEN ?1 AND ?2 ORDER BY sequence_number ASC"
        );
        let mut stmt = conn.prepare_cached(&sql).map_err(classify)?;
        let to = i64::try_from(to_seq).unwrap_or(i64::MAX);
        let from = i64::try_from(from_seq).unwrap_or(i64::MAX);
        let records = collect_records(stmt.query(params![from, to]).map_err(classify)?)?;

        debug!(
            ledger_id = %self.ledger_id,
            from_seq,
            to_seq,
            count = records.len(),
            "range read"
        );
        Ok(records)
    }

    fn tail(&self) -> WormResult<Option<AuditRecord>> {
        let conn = self.lock_reader()?;
        let sql = format!("{SELECT_COLUMNS} ORDER BY sequence_number DESC LIMIT 1");
        let mut stmt = conn.prepare_cached(&sql).map_err(classify)?;
        let rows = stmt.query([]).map_err(classify)?;
        Ok(collect_records(rows)?.pop())
    }

    fn get(&self, sequence: u64) -> WormResult<Option<AuditRecord>> {
        let seq = i64::try_from(sequence).unwrap_or(i64::MAX);
        self.query_one("WHERE sequence_number = ?1", &seq)
    }

    fn find_by_event_id(&self, event_id: &str) -> WormResult<Option<AuditRecord>> {
        self.query_one("WHERE event_id = ?1", &event_id)
    }

    fn high_water_mark(&self) -> WormResult<u64> {
        self.last_reserved_sequence()
    }

    fn len(&self) -> WormResult<u64> {
        let conn = self.lock_reader()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM audit_records", [], |row| row.get(0))
            .map_err(classify)?;
        Ok(count as u64)
    }
}
