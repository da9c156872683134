//! wormlog: operator CLI for the append-only audit ledger.
//!
//! Every subcommand reads the ledger configuration from `--config` (TOML),
//! falling back to defaults, with `WORMLOG_LEDGER_PATH` overriding the
//! database path. Results are printed to stdout as JSON.
//!
//! Exit codes: 0 success, 1 error, 2 the ledger or a snapshot failed
//! verification.
//!
//! Usage:
//!   wormlog keygen --out-dir keys
//!   wormlog record --action download_model --status SUCCESS --risk-tier HIGH \
//!       --metadata '{"model":"mistral-7b"}'
//!   wormlog history --action download_model --since 2026-01-01T00:00:00Z
//!   wormlog verify
//!   wormlog export --out exports/audit.json --anchor

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wormlog_contracts::{
    error::{WormError, WormResult},
    query::HistoryFilter,
    record::{Metadata, NewEvent},
};
use wormlog_service::{
    export::{self, anchor_export_hash, is_anchored},
    AuditService, LedgerConfig,
};
use wormlog_store::signing::write_keypair;

const EXIT_OK: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_INTEGRITY: i32 = 2;

// ── CLI definition ────────────────────────────────────────────────────────────

/// wormlog: tamper-evident audit ledger.
#[derive(Parser)]
#[command(
    name = "wormlog",
    about = "Append-only, hash-chained audit ledger",
    long_about = "Records governed actions in a SHA-256 hash chain, verifies the chain,\n\
                  and exports signed snapshots for external auditors."
)]
struct Cli {
    /// Ledger configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate an Ed25519 signing keypair.
    Keygen {
        /// Directory receiving the key files.
        #[arg(long, default_value = "keys")]
        out_dir: PathBuf,
    },
    /// Append one event.
    Record(RecordArgs),
    /// Look an event up by id.
    Show {
        #[arg(long)]
        event_id: String,
    },
    /// List events, optionally filtered.
    History(HistoryArgs),
    /// Verify the hash chain (and signatures, when a key is configured).
    Verify {
        #[arg(long)]
        from: Option<u64>,
        #[arg(long)]
        to: Option<u64>,
    },
    /// Verify the ledger, then write a snapshot bundle.
    Export {
        /// Output file for the bundle.
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        from: Option<u64>,
        #[arg(long)]
        to: Option<u64>,
        /// Append the export hash to the configured anchor file.
        #[arg(long)]
        anchor: bool,
    },
    /// Verify a snapshot bundle file.
    VerifySnapshot {
        #[arg(long)]
        bundle: PathBuf,
    },
    /// Event counts by status.
    Summary,
    /// Events awaiting a human decision.
    Pending,
}

#[derive(Args)]
struct RecordArgs {
    #[arg(long)]
    action: String,
    #[arg(long)]
    status: String,
    #[arg(long)]
    risk_tier: String,
    /// Idempotency key; generated when omitted.
    #[arg(long)]
    event_id: Option<String>,
    /// JSON object of event metadata.
    #[arg(long)]
    metadata: Option<String>,
    #[arg(long)]
    requires_approval: bool,
    #[arg(long)]
    human_decision: Option<String>,
    #[arg(long)]
    sop_reference: Option<String>,
    /// Record this event as a correction of an earlier event id.
    #[arg(long)]
    corrects: Option<String>,
}

#[derive(Args)]
struct HistoryArgs {
    #[arg(long)]
    from: Option<u64>,
    #[arg(long)]
    to: Option<u64>,
    #[arg(long)]
    action: Option<String>,
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    risk_tier: Option<String>,
    #[arg(long)]
    requires_approval: Option<bool>,
    /// Only events captured at or after this RFC 3339 time.
    #[arg(long)]
    since: Option<DateTime<Utc>>,
    /// Only events captured before this RFC 3339 time.
    #[arg(long)]
    until: Option<DateTime<Utc>>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Structured logging to stderr. Set RUST_LOG=info for append/verify events.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("wormlog error: {}", e);
            let code = if e.is_integrity_failure() {
                EXIT_INTEGRITY
            } else {
                EXIT_ERROR
            };
            std::process::exit(code);
        }
    }
}

fn run(cli: Cli) -> WormResult<i32> {
    if let Command::Keygen { out_dir } = &cli.command {
        let (private_key, public_key) = write_keypair(out_dir)?;
        print_json(&serde_json::json!({
            "private_key_path": private_key,
            "public_key_path": public_key,
        }))?;
        return Ok(EXIT_OK);
    }

    let config = load_config(cli.config.as_deref())?;
    let audit = AuditService::from_config(&config)?;

    match cli.command {
        Command::Keygen { .. } => Ok(EXIT_OK),
        Command::Record(args) => {
            let corrects = args.corrects.clone();
            let event = new_event(args)?;
            let record = match corrects {
                Some(original) => audit.record_correction(&original, event)?,
                None => audit.record_event(event)?,
            };
            print_json(&record)?;
            Ok(EXIT_OK)
        }
        Command::Show { event_id } => match audit.find_event(&event_id)? {
            Some(record) => {
                print_json(&record)?;
                Ok(EXIT_OK)
            }
            None => {
                eprintln!("no event with id '{event_id}'");
                Ok(EXIT_ERROR)
            }
        },
        Command::History(args) => {
            let records = audit
                .get_history(history_filter(args))?
                .collect::<WormResult<Vec<_>>>()?;
            print_json(&records)?;
            Ok(EXIT_OK)
        }
        Command::Verify { from, to } => {
            let report = audit.verify_integrity(from, to)?;
            print_json(&report)?;
            Ok(if report.passed() {
                EXIT_OK
            } else {
                EXIT_INTEGRITY
            })
        }
        Command::Export {
            out,
            from,
            to,
            anchor,
        } => {
            let bundle = audit.export_snapshot(from, to)?;
            export::write_snapshot(&out, &bundle)?;
            if anchor {
                anchor_export_hash(anchor_path(&config)?, &bundle.export_hash)?;
            }
            info!(out = %out.display(), export_hash = %bundle.export_hash, "snapshot written");
            print_json(&serde_json::json!({
                "out": out,
                "from_seq": bundle.from_seq,
                "to_seq": bundle.to_seq,
                "record_count": bundle.record_count,
                "export_hash": bundle.export_hash,
                "signed": bundle.signature.is_some(),
                "anchored": anchor,
            }))?;
            Ok(EXIT_OK)
        }
        Command::VerifySnapshot { bundle } => {
            let bundle = export::read_snapshot(&bundle)?;
            let report = audit.verify_snapshot(&bundle)?;
            let anchored = match &config.export.anchor_path {
                Some(path) => Some(is_anchored(path, &bundle.export_hash)?),
                None => None,
            };
            print_json(&serde_json::json!({
                "export_hash": bundle.export_hash,
                "anchored": anchored,
                "report": report,
            }))?;
            Ok(if report.passed() && anchored != Some(false) {
                EXIT_OK
            } else {
                EXIT_INTEGRITY
            })
        }
        Command::Summary => {
            print_json(&audit.summary()?)?;
            Ok(EXIT_OK)
        }
        Command::Pending => {
            print_json(&audit.pending_actions()?)?;
            Ok(EXIT_OK)
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn load_config(path: Option<&Path>) -> WormResult<LedgerConfig> {
    let config = match path {
        Some(path) => LedgerConfig::from_file(path)?,
        None => LedgerConfig::default(),
    }
    .apply_env();
    config.validate()?;
    Ok(config)
}

fn anchor_path(config: &LedgerConfig) -> WormResult<&Path> {
    config
        .export
        .anchor_path
        .as_deref()
        .ok_or_else(|| WormError::ConfigError {
            reason: "--anchor needs export.anchor_path in the configuration".to_string(),
        })
}

fn new_event(args: RecordArgs) -> WormResult<NewEvent> {
    let mut event = NewEvent::new(args.action, args.status, args.risk_tier)
        .with_metadata(parse_metadata(args.metadata.as_deref())?);
    if let Some(id) = args.event_id {
        event = event.with_event_id(id);
    }
    if args.requires_approval {
        event = event.requiring_approval();
    }
    if let Some(decision) = args.human_decision {
        event = event.with_human_decision(decision);
    }
    if let Some(sop) = args.sop_reference {
        event = event.with_sop_reference(sop);
    }
    Ok(event)
}

fn parse_metadata(raw: Option<&str>) -> WormResult<Metadata> {
    let Some(raw) = raw else {
        return Ok(Metadata::new());
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(WormError::InvalidEvent {
            reason: "--metadata must be a JSON object".to_string(),
        }),
        Err(e) => Err(WormError::InvalidEvent {
            reason: format!("--metadata is not valid JSON: {e}"),
        }),
    }
}

fn history_filter(args: HistoryArgs) -> HistoryFilter {
    HistoryFilter {
        from_seq: args.from,
        to_seq: args.to,
        action_name: args.action,
        status: args.status,
        risk_tier: args.risk_tier,
        requires_approval: args.requires_approval,
        since: args.since,
        until: args.until,
    }
}

fn print_json<T: Serialize>(value: &T) -> WormResult<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(|e| WormError::ExportFailed {
        reason: format!("failed to render output: {e}"),
    })?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn parse_history(args: &[&str]) -> HistoryFilter {
        let cli = Cli::try_parse_from(["wormlog", "history"].iter().chain(args)).unwrap();
        match cli.command {
            Command::History(args) => history_filter(args),
            _ => panic!("expected the history subcommand"),
        }
    }

    #[test]
    fn history_time_range_flags() {
        let filter = parse_history(&[
            "--since",
            "2026-01-01T00:00:00Z",
            "--until",
            "2026-02-01T12:30:00+02:00",
            "--action",
            "download_model",
        ]);

        assert_eq!(
            filter.since,
            Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            filter.until,
            Some(Utc.with_ymd_and_hms(2026, 2, 1, 10, 30, 0).unwrap())
        );
        assert_eq!(filter.action_name.as_deref(), Some("download_model"));
    }

    #[test]
    fn history_rejects_malformed_time() {
        let result = Cli::try_parse_from(["wormlog", "history", "--since", "yesterday"]);
        assert!(result.is_err());
    }

    #[test]
    fn metadata_must_be_an_object() {
        assert!(parse_metadata(Some(r#"{"model":"mistral-7b"}"#)).is_ok());
        assert!(matches!(
            parse_metadata(Some("[1, 2]")),
            Err(WormError::InvalidEvent { .. })
        ));
        assert!(parse_metadata(None).unwrap().is_empty());
    }
}
