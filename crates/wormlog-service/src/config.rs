//! Ledger configuration loaded from TOML.
//!
//! ```toml
//! [ledger]
//! ledger_id = "governance"
//! backend   = "sqlite"            # or "memory"
//! path      = "data/worm_audit.db"
//!
//! [append]
//! max_retries      = 7
//! retry_backoff_ms = 100
//! busy_timeout_ms  = 5000
//!
//! [signing]
//! private_key_path   = "keys/wormlog_signing.key"
//! public_key_path    = "keys/wormlog_signing.pub"
//! require_signatures = false
//!
//! [export]
//! page_size   = 256
//! anchor_path = "data/audit_anchor.log"
//! ```
//!
//! Every section and key is optional. `WORMLOG_LEDGER_PATH`, when set,
//! replaces `ledger.path` (see [`LedgerConfig::apply_env`]).

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use wormlog_contracts::error::{WormError, WormResult};
use wormlog_store::SqliteOptions;

/// Environment variable overriding `ledger.path`.
pub const LEDGER_PATH_ENV: &str = "WORMLOG_LEDGER_PATH";

/// Storage backend for the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSection {
    #[serde(default = "default_ledger_id")]
    pub ledger_id: String,

    #[serde(default)]
    pub backend: Backend,

    /// Database file. Required for the sqlite backend.
    #[serde(default = "default_ledger_path")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendSection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningSection {
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,

    #[serde(default)]
    pub public_key_path: Option<PathBuf>,

    /// Reject unsigned records during verification.
    #[serde(default)]
    pub require_signatures: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSection {
    #[serde(default = "default_page_size")]
    pub page_size: u64,

    /// Append-only file receiving the hash of every export.
    #[serde(default)]
    pub anchor_path: Option<PathBuf>,
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub ledger: LedgerSection,

    #[serde(default)]
    pub append: AppendSection,

    #[serde(default)]
    pub signing: SigningSection,

    #[serde(default)]
    pub export: ExportSection,
}

fn default_ledger_id() -> String {
    "governance".to_string()
}

fn default_ledger_path() -> Option<PathBuf> {
    Some(PathBuf::from("data/worm_audit.db"))
}

fn default_max_retries() -> u32 {
    7
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_page_size() -> u64 {
    256
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            ledger_id: default_ledger_id(),
            backend: Backend::default(),
            path: default_ledger_path(),
        }
    }
}

impl Default for AppendSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            anchor_path: None,
        }
    }
}

impl LedgerConfig {
    /// Parse `s` as TOML and validate the result.
    ///
    /// Returns `WormError::ConfigError` if the TOML is malformed, does not
    /// match `LedgerConfig`, or fails [`validate`](Self::validate).
    pub fn from_toml_str(s: &str) -> WormResult<Self> {
        let config: LedgerConfig = toml::from_str(s).map_err(|e| WormError::ConfigError {
            reason: format!("failed to parse ledger TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read the file at `path` and parse it as ledger configuration.
    pub fn from_file(path: &Path) -> WormResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| WormError::ConfigError {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// An in-memory ledger with default settings.
    pub fn in_memory(ledger_id: impl Into<String>) -> Self {
        Self {
            ledger: LedgerSection {
                ledger_id: ledger_id.into(),
                backend: Backend::Memory,
                path: None,
            },
            ..Self::default()
        }
    }

    /// A SQLite ledger at `path` with default settings.
    pub fn sqlite(ledger_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            ledger: LedgerSection {
                ledger_id: ledger_id.into(),
                backend: Backend::Sqlite,
                path: Some(path.into()),
            },
            ..Self::default()
        }
    }

    /// Apply `WORMLOG_LEDGER_PATH` from the process environment.
    pub fn apply_env(self) -> Self {
        self.with_path_override(std::env::var(LEDGER_PATH_ENV).ok())
    }

    fn with_path_override(mut self, path: Option<String>) -> Self {
        if let Some(path) = path.filter(|p| !p.trim().is_empty()) {
            self.ledger.path = Some(PathBuf::from(path));
        }
        self
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> WormResult<()> {
        let invalid = |reason: &str| {
            Err(WormError::ConfigError {
                reason: reason.to_string(),
            })
        };

        if self.ledger.ledger_id.trim().is_empty() {
            return invalid("ledger.ledger_id must not be empty");
        }
        if self.ledger.backend == Backend::Sqlite && self.ledger.path.is_none() {
            return invalid("ledger.path is required for the sqlite backend");
        }
        if self.append.max_retries == 0 {
            return invalid("append.max_retries must be at least 1");
        }
        if self.export.page_size == 0 {
            return invalid("export.page_size must be at least 1");
        }
        if self.signing.require_signatures && self.signing.public_key_path.is_none() {
            return invalid("signing.require_signatures needs signing.public_key_path");
        }
        Ok(())
    }

    /// Store options derived from `[append]`.
    pub fn sqlite_options(&self) -> SqliteOptions {
        SqliteOptions {
            max_retries: self.append.max_retries,
            retry_backoff: Duration::from_millis(self.append.retry_backoff_ms),
            busy_timeout: Duration::from_millis(self.append.busy_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = LedgerConfig::from_toml_str("").unwrap();
        assert_eq!(config, LedgerConfig::default());
        assert_eq!(config.ledger.ledger_id, "governance");
        assert_eq!(config.ledger.backend, Backend::Sqlite);
        assert_eq!(config.append.max_retries, 7);
        assert_eq!(config.export.page_size, 256);
        assert!(!config.signing.require_signatures);
    }

    #[test]
    fn test_full_document_parses() {
        let config = LedgerConfig::from_toml_str(
            r#"
            [ledger]
            ledger_id = "clinical"
            backend = "memory"

            [append]
            max_retries = 3
            retry_backoff_ms = 10
            busy_timeout_ms = 250

            [signing]
            private_key_path = "keys/wormlog_signing.key"
            public_key_path = "keys/wormlog_signing.pub"
            require_signatures = true

            [export]
            page_size = 64
            anchor_path = "data/audit_anchor.log"
            "#,
        )
        .unwrap();

        assert_eq!(config.ledger.ledger_id, "clinical");
        assert_eq!(config.ledger.backend, Backend::Memory);
        assert!(config.signing.require_signatures);
        assert_eq!(config.export.page_size, 64);
        assert_eq!(
            config.export.anchor_path.as_deref(),
            Some(Path::new("data/audit_anchor.log"))
        );

        let opts = config.sqlite_options();
        assert_eq!(opts.max_retries, 3);
        assert_eq!(opts.retry_backoff, Duration::from_millis(10));
        assert_eq!(opts.busy_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = LedgerConfig::from_toml_str("[ledger\nledger_id = ").unwrap_err();
        assert!(matches!(err, WormError::ConfigError { .. }));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let err = LedgerConfig::from_toml_str("[ledger]\nbackend = \"postgres\"").unwrap_err();
        assert!(matches!(err, WormError::ConfigError { .. }));
    }

    #[test]
    fn test_validation_rules() {
        for doc in [
            "[ledger]\nledger_id = \"  \"",
            "[append]\nmax_retries = 0",
            "[export]\npage_size = 0",
            "[signing]\nrequire_signatures = true",
        ] {
            let err = LedgerConfig::from_toml_str(doc).unwrap_err();
            assert!(matches!(err, WormError::ConfigError { .. }), "{doc}");
        }

        let mut config = LedgerConfig::default();
        config.ledger.path = None;
        assert!(config.validate().is_err());

        config.ledger.backend = Backend::Memory;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_path_override() {
        let config = LedgerConfig::default().with_path_override(Some("/tmp/other.db".into()));
        assert_eq!(config.ledger.path.as_deref(), Some(Path::new("/tmp/other.db")));

        let unchanged = LedgerConfig::default().with_path_override(Some("  ".into()));
        assert_eq!(unchanged.ledger.path, default_ledger_path());

        let unset = LedgerConfig::default().with_path_override(None);
        assert_eq!(unset, LedgerConfig::default());
    }

    #[test]
    fn test_constructors() {
        let memory = LedgerConfig::in_memory("gov");
        assert_eq!(memory.ledger.backend, Backend::Memory);
        assert!(memory.validate().is_ok());

        let sqlite = LedgerConfig::sqlite("gov", "/tmp/gov.db");
        assert_eq!(sqlite.ledger.path.as_deref(), Some(Path::new("/tmp/gov.db")));
        assert!(sqlite.validate().is_ok());
    }
}
