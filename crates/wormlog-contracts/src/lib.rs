//! # wormlog-contracts
//!
//! Shared record types, report types, and the error taxonomy for the wormlog
//! append-only audit ledger.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate, only data definitions and small helpers.

pub mod error;
pub mod query;
pub mod record;
pub mod snapshot;
pub mod verify;
