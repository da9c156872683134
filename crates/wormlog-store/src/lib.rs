//! # wormlog-store
//!
//! Append-only, SHA-256 hash-chained WORM store for governed audit events.
//!
//! ## Overview
//!
//! Every appended event becomes an `AuditRecord` carrying a content hash over
//! its canonical serialization and a chain hash linking it to its
//! predecessor. Altering, removing, or reordering any record changes the
//! chain from that point on, which `wormlog-verify` detects.
//!
//! - `chain`: canonical serialization and hash primitives
//! - `signing`: Ed25519 `ChainSigner` / `SignatureVerifier`
//! - `sequence`: transactional sequence allocation
//! - `sqlite`: the durable store
//! - `memory`: the in-process store
//!
//! ## Usage
//!
//! ```rust,ignore
//! use wormlog_store::{SqliteLedger, SqliteOptions};
//! use wormlog_core::traits::LedgerStore;
//!
//! let ledger = SqliteLedger::open("data/worm_audit.db", "governance", SqliteOptions::default())?;
//! let record = ledger.append(NewEvent::new("download_model", "SUCCESS", "HIGH"))?;
//! ```

pub mod chain;
pub mod memory;
pub mod sequence;
pub mod signing;
pub mod sqlite;

pub use chain::{compute_chain_hash, compute_content_hash, ContentFields, GENESIS_HASH};
pub use memory::InMemoryLedger;
pub use signing::{Ed25519Signer, Ed25519Verifier};
pub use sqlite::{SqliteLedger, SqliteOptions};

// ── Tests ─────────────────────────────────────────────────────────────────────
