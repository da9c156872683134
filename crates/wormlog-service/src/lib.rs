//! # wormlog-service
//!
//! The audit event API of the wormlog ledger.
//!
//! - `config`: `LedgerConfig`, loaded from TOML
//! - `service`: `AuditService`, the façade collaborators call
//! - `export`: snapshot bundles, snapshot verification, anchoring
//!
//! ## Usage
//!
//! ```rust,ignore
//! use wormlog_service::{AuditService, LedgerConfig};
//!
//! let config = LedgerConfig::from_file(Path::new("wormlog.toml"))?.apply_env();
//! let audit = AuditService::from_config(&config)?;
//!
//! audit.record_event(NewEvent::new("download_model", "SUCCESS", "HIGH"))?;
//! audit.verify_integrity(None, None)?.into_result()?;
//! ```

pub mod config;
pub mod export;
pub mod service;

pub use config::{Backend, LedgerConfig};
pub use service::{AuditService, History};

// ── Tests ─────────────────────────────────────────────────────────────────────
