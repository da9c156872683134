//! Snapshot export, snapshot verification, and export-hash anchoring.
//!
//! A `SnapshotBundle` is self-contained: it carries the chain hash of the
//! record preceding the range, so an auditor holding only the bundle (and,
//! for signed bundles, a trusted public key) can re-walk the exported chain.
//!
//! The export hash is the SHA-256 of the canonical JSON of the bundle header
//! (ledger id, export time, range, record count, previous chain hash) and
//! the records array, using the same canonical form as record content
//! hashes. Signing the export hash therefore covers the header too.

use std::{fs::OpenOptions, io::Write, path::Path, sync::Arc};

use serde_json::json;
use tracing::{info, warn};

use wormlog_contracts::{
    error::{WormError, WormResult},
    record::capture_timestamp,
    snapshot::SnapshotBundle,
    verify::VerificationReport,
};
use wormlog_core::{
    cursor::RecordCursor,
    traits::{ChainSigner, LedgerStore, SignatureVerifier},
};
use wormlog_store::chain::{canonical_json, format_timestamp, sha256_hex, GENESIS_HASH};
use wormlog_verify::ChainVerifier;

/// Hash of `bundle`'s header and records.
///
/// Every field except `export_hash`, `signature` and `public_key` is
/// covered.
pub fn compute_export_hash(bundle: &SnapshotBundle) -> WormResult<String> {
    let records = serde_json::to_value(&bundle.records).map_err(|e| WormError::ExportFailed {
        reason: format!("failed to serialize records: {e}"),
    })?;
    let value = json!({
        "ledger_id": bundle.ledger_id,
        "exported_at": format_timestamp(&bundle.exported_at),
        "from_seq": bundle.from_seq,
        "to_seq": bundle.to_seq,
        "record_count": bundle.record_count,
        "previous_chain_hash": bundle.previous_chain_hash,
        "records": records,
    });
    Ok(sha256_hex(canonical_json(&value).as_bytes()))
}

/// Build a bundle of `from_seq..=to_seq` (defaults: whole ledger).
///
/// Does not verify the ledger; callers that hand the bundle to an auditor
/// should verify first (see `AuditService::export_snapshot`).
pub fn build_snapshot(
    store: &dyn LedgerStore,
    from_seq: Option<u64>,
    to_seq: Option<u64>,
    page_size: u64,
    signer: Option<&dyn ChainSigner>,
) -> WormResult<SnapshotBundle> {
    let tail = store.tail()?.map_or(0, |r| r.sequence_number);
    let from = from_seq.unwrap_or(1).max(1);
    let to = to_seq.map_or(tail, |t| t.min(tail));

    let previous_chain_hash = if from == 1 {
        GENESIS_HASH.to_string()
    } else {
        store
            .get(from - 1)?
            .map(|r| r.chain_hash)
            .ok_or_else(|| WormError::ExportFailed {
                reason: format!("record {} preceding the export range is missing", from - 1),
            })?
    };

    let records = RecordCursor::bounded(store, from, to, page_size)
        .collect::<WormResult<Vec<_>>>()?;

    let mut bundle = SnapshotBundle {
        ledger_id: store.ledger_id().to_string(),
        exported_at: capture_timestamp(),
        from_seq: from,
        to_seq: to,
        record_count: records.len() as u64,
        previous_chain_hash,
        records,
        export_hash: String::new(),
        signature: None,
        public_key: None,
    };
    bundle.export_hash = compute_export_hash(&bundle)?;
    bundle.signature = signer.map(|s| s.sign(&bundle.export_hash)).transpose()?;
    bundle.public_key = signer.map(|s| s.public_key_hex());

    info!(
        ledger_id = %bundle.ledger_id,
        from_seq = from,
        to_seq = to,
        records = bundle.record_count,
        export_hash = %bundle.export_hash,
        signed = bundle.signature.is_some(),
        "snapshot exported"
    );
    Ok(bundle)
}

/// Check a bundle end to end.
///
/// Bundle-level problems (export hash, record count, bundle signature) are
/// returned as `SnapshotTampered`. The record chain itself is re-walked and
/// reported exactly as ledger verification would report it.
///
/// When `verifier` is given the bundle must be signed by the matching key;
/// the `public_key` embedded in the bundle is informational and never
/// trusted on its own.
pub fn verify_snapshot(
    bundle: &SnapshotBundle,
    verifier: Option<Arc<dyn SignatureVerifier>>,
) -> WormResult<VerificationReport> {
    let tampered = |reason: String| {
        warn!(ledger_id = %bundle.ledger_id, reason = %reason, "snapshot rejected");
        Err(WormError::SnapshotTampered { reason })
    };

    let expected_count = (bundle.to_seq + 1).saturating_sub(bundle.from_seq);
    if bundle.record_count != bundle.records.len() as u64
        || bundle.record_count != expected_count
    {
        return tampered(format!(
            "bundle declares {} records for {}..={} but carries {}",
            bundle.record_count,
            bundle.from_seq,
            bundle.to_seq,
            bundle.records.len()
        ));
    }

    let export_hash = compute_export_hash(bundle)?;
    if export_hash != bundle.export_hash {
        return tampered(format!(
            "export hash {} does not match bundle contents ({export_hash})",
            bundle.export_hash
        ));
    }

    let mut chain = ChainVerifier::new();
    if let Some(verifier) = verifier {
        match &bundle.signature {
            Some(signature) if verifier.verify(&bundle.export_hash, signature) => {}
            Some(_) => return tampered("bundle signature does not verify".to_string()),
            None => return tampered("bundle is unsigned".to_string()),
        }
        chain = chain.with_signature_verifier(verifier);
    }

    chain.verify_records(
        &bundle.ledger_id,
        bundle.from_seq,
        bundle.to_seq,
        &bundle.previous_chain_hash,
        bundle.records.iter().cloned().map(Ok),
    )
}

/// Write `bundle` as pretty-printed JSON.
pub fn write_snapshot(path: &Path, bundle: &SnapshotBundle) -> WormResult<()> {
    let json = serde_json::to_string_pretty(bundle).map_err(|e| WormError::ExportFailed {
        reason: format!("failed to serialize snapshot: {e}"),
    })?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| WormError::ExportFailed {
            reason: format!("failed to create '{}': {e}", parent.display()),
        })?;
    }
    std::fs::write(path, json).map_err(|e| WormError::ExportFailed {
        reason: format!("failed to write snapshot '{}': {e}", path.display()),
    })
}

/// Read a bundle written by `write_snapshot`.
pub fn read_snapshot(path: &Path) -> WormResult<SnapshotBundle> {
    let contents = std::fs::read_to_string(path).map_err(|e| WormError::ExportFailed {
        reason: format!("failed to read snapshot '{}': {e}", path.display()),
    })?;
    serde_json::from_str(&contents).map_err(|e| WormError::ExportFailed {
        reason: format!("snapshot '{}' is not a valid bundle: {e}", path.display()),
    })
}

/// Append `export_hash` as one line to the anchor file at `path`.
pub fn anchor_export_hash(path: &Path, export_hash: &str) -> WormResult<()> {
    let io_err = |e: std::io::Error| WormError::ExportFailed {
        reason: format!("failed to anchor export hash in '{}': {e}", path.display()),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_err)?;
    writeln!(file, "{export_hash}").map_err(io_err)?;
    file.sync_all().map_err(io_err)?;

    info!(anchor = %path.display(), export_hash = %export_hash, "export hash anchored");
    Ok(())
}

/// True if `export_hash` appears as a line of the anchor file. A missing
/// file anchors nothing.
pub fn is_anchored(path: &Path, export_hash: &str) -> WormResult<bool> {
    if !path.exists() {
        return Ok(false);
    }
    let contents = std::fs::read_to_string(path).map_err(|e| WormError::ExportFailed {
        reason: format!("failed to read anchor file '{}': {e}", path.display()),
    })?;
    Ok(contents.lines().any(|line| line.trim() == export_hash))
}
