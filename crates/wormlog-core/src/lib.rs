//! # wormlog-core
//!
//! The trait seams of the wormlog ledger.
//!
//! This crate provides:
//! - The three trust-boundary traits (`LedgerStore`, `ChainSigner`,
//!   `SignatureVerifier`)
//! - `RecordCursor`, the lazy, bounded reader every read-side consumer uses
//!
//! ## Usage
//!
//! ```rust,ignore
//! use wormlog_core::traits::LedgerStore;
//!
//! for record in store.read_all()? {
//!     let record = record?;
//!     println!("{} {}", record.sequence_number, record.action_name);
//! }
//! ```

pub mod cursor;
pub mod traits;

pub use cursor::{RecordCursor, DEFAULT_PAGE_SIZE};
pub use traits::{ChainSigner, LedgerStore, SignatureVerifier};

// ── Tests ─────────────────────────────────────────────────────────────────────
