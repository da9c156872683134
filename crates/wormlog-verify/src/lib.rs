//! # wormlog-verify
//!
//! Integrity verification for wormlog ledgers.
//!
//! This crate provides [`engine::ChainVerifier`], which replays a ledger's
//! hash chain from genesis (or from a trusted checkpoint) and reports the
//! first record where the stored data and the recomputed chain disagree:
//!
//! 1. **Position**: sequence numbers are contiguous.
//! 2. **Hashes**: content and chain hashes recompute exactly.
//! 3. **Signatures**: present signatures verify against the chain hash.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use wormlog_verify::engine::ChainVerifier;
//!
//! let report = ChainVerifier::new()
//!     .with_signature_verifier(Arc::new(Ed25519Verifier::from_file(&pub_path)?))
//!     .verify_all(&ledger)?;
//!
//! if let Some((sequence, kind)) = report.divergence_point() {
//!     eprintln!("ledger diverges at {sequence}: {kind}");
//! }
//! ```

pub mod engine;

pub use engine::ChainVerifier;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::{
        path::{Path, PathBuf},
        sync::Arc,
    };

    use serde_json::json;

    use wormlog_contracts::{
        error::WormError,
        record::NewEvent,
        verify::{MismatchKind, VerificationOutcome},
    };
    use wormlog_core::traits::{ChainSigner, LedgerStore};
    use wormlog_store::{
        chain::{compute_content_hash, ContentFields},
        Ed25519Signer, InMemoryLedger, SqliteLedger, SqliteOptions,
    };

    use super::engine::ChainVerifier;

    fn event(id: &str) -> NewEvent {
        NewEvent::new("download_model", "SUCCESS", "HIGH")
            .with_event_id(id)
            .with_meta("model", json!("mistral-7b"))
    }

    fn ledger_with(n: u64) -> InMemoryLedger {
        let ledger = InMemoryLedger::new("gov");
        for i in 1..=n {
            ledger.append(event(&format!("e{i}"))).unwrap();
        }
        ledger
    }

    fn signer() -> Arc<Ed25519Signer> {
        Arc::new(Ed25519Signer::from_seed([7u8; 32]))
    }

    fn signed_ledger_with(n: u64) -> InMemoryLedger {
        let ledger = InMemoryLedger::new("gov").with_signer(signer());
        for i in 1..=n {
            ledger.append(event(&format!("e{i}"))).unwrap();
        }
        ledger
    }

    fn temp_db() -> PathBuf {
        std::env::temp_dir().join(format!("wormlog_verify_{}.db", uuid::Uuid::new_v4()))
    }

    fn cleanup(path: &Path) {
        for suffix in ["", "-wal", "-shm"] {
            let mut p = path.as_os_str().to_owned();
            p.push(suffix);
            std::fs::remove_file(PathBuf::from(p)).ok();
        }
    }

    // ── Intact ledgers ────────────────────────────────────────────────────────

    #[test]
    fn test_empty_ledger_is_intact() {
        let ledger = InMemoryLedger::new("gov");
        let report = ChainVerifier::new().verify_all(&ledger).unwrap();

        assert!(report.passed());
        assert_eq!(report.records_checked, 0);
        assert_eq!(
            report.outcome,
            VerificationOutcome::Intact { checkpoint: None }
        );
    }

    #[test]
    fn test_untampered_ledger_passes_with_checkpoint() {
        let ledger = ledger_with(5);
        let report = ChainVerifier::new().verify_all(&ledger).unwrap();

        assert!(report.passed());
        assert_eq!(report.records_checked, 5);
        assert_eq!(report.signatures_absent, 5);

        let tail = ledger.tail().unwrap().unwrap();
        match report.outcome {
            VerificationOutcome::Intact {
                checkpoint: Some(cp),
            } => {
                assert_eq!(cp.sequence, 5);
                assert_eq!(cp.chain_hash, tail.chain_hash);
            }
            other => panic!("expected intact with checkpoint, got {other:?}"),
        }
    }

    #[test]
    fn test_verification_does_not_modify_ledger() {
        let ledger = ledger_with(3);
        let before = ledger.read_range(1, 3).unwrap();

        ChainVerifier::new().verify_all(&ledger).unwrap();

        assert_eq!(ledger.read_range(1, 3).unwrap(), before);
    }

    // ── Tampering ─────────────────────────────────────────────────────────────

    #[test]
    fn test_content_tamper_detected_at_exact_record() {
        let ledger = ledger_with(5);
        ledger.__tamper(|records| records[2].status = "DENIED".to_string());

        let report = ChainVerifier::new().verify_all(&ledger).unwrap();

        assert!(!report.passed());
        assert_eq!(report.divergence_point(), Some((3, MismatchKind::ContentHash)));
        assert_eq!(report.records_checked, 2);
    }

    #[test]
    fn test_rehashed_content_breaks_chain() {
        let ledger = ledger_with(5);
        ledger.__tamper(|records| {
            let record = &mut records[2];
            record
                .metadata
                .insert("model".to_string(), json!("llama-70b"));
            record.content_hash = compute_content_hash(&ContentFields::from(&*record));
        });

        let report = ChainVerifier::new().verify_all(&ledger).unwrap();
        assert_eq!(report.divergence_point(), Some((3, MismatchKind::ChainHash)));
    }

    #[test]
    fn test_deleted_record_detected_as_gap() {
        let ledger = ledger_with(5);
        ledger.__tamper(|records| {
            records.remove(2);
        });

        let report = ChainVerifier::new().verify_all(&ledger).unwrap();
        assert_eq!(report.divergence_point(), Some((3, MismatchKind::SequenceGap)));
    }

    #[test]
    fn test_deleted_tail_record_detected() {
        let ledger = ledger_with(5);
        ledger.__tamper(|records| {
            records.pop();
        });

        let report = ChainVerifier::new().verify_all(&ledger).unwrap();
        assert_eq!(report.to_seq, 5);
        assert_eq!(report.divergence_point(), Some((5, MismatchKind::SequenceGap)));
    }

    #[test]
    fn test_reordered_records_detected() {
        let ledger = ledger_with(5);
        ledger.__tamper(|records| records.swap(1, 2));

        let report = ChainVerifier::new().verify_all(&ledger).unwrap();
        assert_eq!(report.divergence_point(), Some((2, MismatchKind::SequenceGap)));
    }

    #[test]
    fn test_displaced_tail_record_detected() {
        let ledger = ledger_with(5);
        ledger.__tamper(|records| records.swap(3, 4));

        let report = ChainVerifier::new().verify_all(&ledger).unwrap();
        assert_eq!(report.divergence_point(), Some((4, MismatchKind::SequenceGap)));
    }

    #[test]
    fn test_divergence_maps_to_integrity_error() {
        let ledger = ledger_with(3);
        ledger.__tamper(|records| records[0].risk_tier = "LOW".to_string());

        let err = ChainVerifier::new()
            .verify_all(&ledger)
            .unwrap()
            .into_result()
            .unwrap_err();

        assert!(err.is_integrity_failure());
        assert!(matches!(
            err,
            WormError::IntegrityViolation {
                sequence: 1,
                kind: MismatchKind::ContentHash,
                ..
            }
        ));
    }

    // ── Ranges ────────────────────────────────────────────────────────────────

    #[test]
    fn test_suffix_verification_trusts_preceding_record() {
        let ledger = ledger_with(6);
        ledger.__tamper(|records| records[0].status = "DENIED".to_string());

        let verifier = ChainVerifier::new();
        assert!(!verifier.verify_all(&ledger).unwrap().passed());

        let suffix = verifier.verify(&ledger, Some(3), None).unwrap();
        assert!(suffix.passed());
        assert_eq!(suffix.from_seq, 3);
        assert_eq!(suffix.to_seq, 6);
        assert_eq!(suffix.records_checked, 4);
    }

    #[test]
    fn test_bounded_range_stops_at_upper_bound() {
        let ledger = ledger_with(6);
        ledger.__tamper(|records| records[5].status = "DENIED".to_string());

        let report = ChainVerifier::new()
            .verify(&ledger, Some(2), Some(4))
            .unwrap();

        assert!(report.passed());
        assert_eq!(report.records_checked, 3);
    }

    #[test]
    fn test_range_past_tail_is_clamped() {
        let ledger = ledger_with(3);
        let report = ChainVerifier::new()
            .verify(&ledger, Some(1), Some(100))
            .unwrap();

        assert!(report.passed());
        assert_eq!(report.to_seq, 3);
        assert_eq!(report.records_checked, 3);
    }

    #[test]
    fn test_range_starting_past_tail_is_empty_and_intact() {
        let ledger = ledger_with(5);
        let report = ChainVerifier::new()
            .verify(&ledger, Some(10), None)
            .unwrap();

        assert!(report.passed());
        assert_eq!(report.records_checked, 0);
        assert_eq!(report.outcome, VerificationOutcome::Intact { checkpoint: None });

        let empty = InMemoryLedger::new("gov");
        let report = ChainVerifier::new().verify(&empty, Some(2), None).unwrap();
        assert!(report.passed());
    }

    #[test]
    fn test_small_pages_verify_whole_ledger() {
        let ledger = ledger_with(11);
        let report = ChainVerifier::new()
            .page_size(2)
            .verify_all(&ledger)
            .unwrap();

        assert!(report.passed());
        assert_eq!(report.records_checked, 11);
    }

    #[test]
    fn test_verify_records_over_detached_stream() {
        let ledger = ledger_with(5);
        let previous = ledger.get(2).unwrap().unwrap().chain_hash;
        let records = ledger.read_range(3, 5).unwrap();

        let verifier = ChainVerifier::new();
        let intact = verifier
            .verify_records("gov", 3, 5, &previous, records.clone().into_iter().map(Ok))
            .unwrap();
        assert!(intact.passed());

        let truncated = verifier
            .verify_records("gov", 3, 5, &previous, records[..2].to_vec().into_iter().map(Ok))
            .unwrap();
        assert_eq!(
            truncated.divergence_point(),
            Some((5, MismatchKind::SequenceGap))
        );
    }

    // ── Signatures ────────────────────────────────────────────────────────────

    #[test]
    fn test_signatures_verified_with_matching_key() {
        let ledger = signed_ledger_with(4);
        let report = ChainVerifier::new()
            .with_signature_verifier(Arc::new(signer().verifier()))
            .verify_all(&ledger)
            .unwrap();

        assert!(report.passed());
        assert_eq!(report.signatures_verified, 4);
        assert_eq!(report.signatures_absent, 0);
        assert_eq!(report.signatures_unchecked, 0);
    }

    #[test]
    fn test_signatures_without_key_are_unchecked() {
        let ledger = signed_ledger_with(4);
        let report = ChainVerifier::new().verify_all(&ledger).unwrap();

        assert!(report.passed());
        assert_eq!(report.signatures_verified, 0);
        assert_eq!(report.signatures_unchecked, 4);
    }

    #[test]
    fn test_wrong_key_fails_first_record() {
        let ledger = signed_ledger_with(3);
        let other = Ed25519Signer::from_seed([9u8; 32]);

        let report = ChainVerifier::new()
            .with_signature_verifier(Arc::new(other.verifier()))
            .verify_all(&ledger)
            .unwrap();

        assert_eq!(report.divergence_point(), Some((1, MismatchKind::Signature)));
        assert!(matches!(
            report.into_result(),
            Err(WormError::SignatureInvalid { sequence: 1 })
        ));
    }

    #[test]
    fn test_transplanted_signature_detected() {
        let ledger = signed_ledger_with(3);
        ledger.__tamper(|records| {
            let first = records[0].signature.clone();
            records[1].signature = first;
        });

        let report = ChainVerifier::new()
            .with_signature_verifier(Arc::new(signer().verifier()))
            .verify_all(&ledger)
            .unwrap();

        assert_eq!(report.divergence_point(), Some((2, MismatchKind::Signature)));
    }

    #[test]
    fn test_forged_signature_over_rewritten_chain_detected() {
        let ledger = signed_ledger_with(3);
        let forger = Ed25519Signer::from_seed([9u8; 32]);
        ledger.__tamper(|records| {
            let record = &mut records[2];
            record.signature = Some(forger.sign(&record.chain_hash).unwrap());
        });

        let report = ChainVerifier::new()
            .with_signature_verifier(Arc::new(signer().verifier()))
            .verify_all(&ledger)
            .unwrap();

        assert_eq!(report.divergence_point(), Some((3, MismatchKind::Signature)));
    }

    #[test]
    fn test_required_signature_missing() {
        let ledger = ledger_with(2);
        let report = ChainVerifier::new()
            .require_signatures(true)
            .verify_all(&ledger)
            .unwrap();

        assert_eq!(
            report.divergence_point(),
            Some((1, MismatchKind::MissingSignature))
        );
    }

    // ── Checkpoints ───────────────────────────────────────────────────────────

    #[test]
    fn test_verify_from_checkpoint_checks_only_new_records() {
        let ledger = ledger_with(4);
        let verifier = ChainVerifier::new();
        let checkpoint = verifier
            .verify_all(&ledger)
            .unwrap()
            .into_result()
            .unwrap()
            .unwrap();

        for i in 5..=7 {
            ledger.append(event(&format!("e{i}"))).unwrap();
        }

        let report = verifier.verify_from_checkpoint(&ledger, &checkpoint).unwrap();
        assert!(report.passed());
        assert_eq!(report.from_seq, 5);
        assert_eq!(report.records_checked, 3);
    }

    #[test]
    fn test_rewritten_checkpoint_record_detected() {
        let ledger = ledger_with(4);
        let verifier = ChainVerifier::new();
        let checkpoint = verifier
            .verify_all(&ledger)
            .unwrap()
            .into_result()
            .unwrap()
            .unwrap();

        ledger.__tamper(|records| records[3].chain_hash = "f".repeat(64));

        let report = verifier.verify_from_checkpoint(&ledger, &checkpoint).unwrap();
        assert_eq!(report.divergence_point(), Some((4, MismatchKind::ChainHash)));
    }

    // ── Concurrency ───────────────────────────────────────────────────────────

    #[test]
    fn test_verification_concurrent_with_appends() {
        let ledger = ledger_with(10);
        let verifier = ChainVerifier::new().page_size(3);

        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 11..=60 {
                    ledger.append(event(&format!("e{i}"))).unwrap();
                }
            });
            for _ in 0..20 {
                let report = verifier.verify_all(&ledger).unwrap();
                assert!(report.passed());
                assert_eq!(report.records_checked, report.to_seq);
            }
        });

        assert!(verifier.verify_all(&ledger).unwrap().passed());
    }

    // ── SQLite ────────────────────────────────────────────────────────────────

    #[test]
    fn test_sqlite_metadata_tamper_detected() {
        let path = temp_db();
        let ledger = SqliteLedger::open(&path, "gov", SqliteOptions::default()).unwrap();
        for i in 1..=3 {
            ledger.append(event(&format!("e{i}"))).unwrap();
        }
        assert!(ChainVerifier::new().verify_all(&ledger).unwrap().passed());

        ledger
            .__raw_execute(
                "DROP TRIGGER audit_records_no_update;
                 UPDATE audit_records SET metadata_json = '{\"model\":\"llama-70b\"}'
                 WHERE sequence_number = 2;",
            )
            .unwrap();

        let report = ChainVerifier::new().verify_all(&ledger).unwrap();
        assert_eq!(report.divergence_point(), Some((2, MismatchKind::ContentHash)));

        drop(ledger);
        cleanup(&path);
    }

    #[test]
    fn test_sqlite_deletion_detected() {
        let path = temp_db();
        let ledger = SqliteLedger::open(&path, "gov", SqliteOptions::default()).unwrap();
        for i in 1..=4 {
            ledger.append(event(&format!("e{i}"))).unwrap();
        }

        ledger
            .__raw_execute(
                "DROP TRIGGER audit_records_no_delete;
                 DELETE FROM audit_records WHERE sequence_number = 2;",
            )
            .unwrap();

        let report = ChainVerifier::new().verify_all(&ledger).unwrap();
        assert_eq!(report.divergence_point(), Some((2, MismatchKind::SequenceGap)));

        drop(ledger);
        cleanup(&path);
    }

    #[test]
    fn test_sqlite_swapped_contents_detected() {
        let path = temp_db();
        let ledger = SqliteLedger::open(&path, "gov", SqliteOptions::default()).unwrap();
        for i in 1..=4 {
            ledger.append(event(&format!("e{i}"))).unwrap();
        }

        // Move row 3's event into slot 2 and vice versa, hashes included.
        ledger
            .__raw_execute(
                "DROP TRIGGER audit_records_no_update;
                 UPDATE audit_records SET event_id = 'tmp' WHERE sequence_number = 2;
                 UPDATE audit_records SET event_id = 'e2' WHERE sequence_number = 3;
                 UPDATE audit_records SET event_id = 'e3' WHERE sequence_number = 2;",
            )
            .unwrap();

        let report = ChainVerifier::new().verify_all(&ledger).unwrap();
        assert_eq!(report.divergence_point(), Some((2, MismatchKind::ContentHash)));

        drop(ledger);
        cleanup(&path);
    }

    #[test]
    fn test_sqlite_undecodable_row_is_a_divergence() {
        let path = temp_db();
        let ledger = SqliteLedger::open(&path, "gov", SqliteOptions::default()).unwrap();
        for i in 1..=4 {
            ledger.append(event(&format!("e{i}"))).unwrap();
        }

        ledger
            .__raw_execute(
                "DROP TRIGGER audit_records_no_update;
                 UPDATE audit_records SET metadata_json = 'corrupted' WHERE sequence_number = 2;",
            )
            .unwrap();

        let verifier = ChainVerifier::new().page_size(3);
        let report = verifier.verify_all(&ledger).unwrap();
        assert_eq!(report.records_checked, 1);
        assert_eq!(report.divergence_point(), Some((2, MismatchKind::ContentHash)));
        assert!(report.into_result().unwrap_err().is_integrity_failure());

        let suffix = verifier.verify(&ledger, Some(3), None).unwrap();
        assert_eq!(suffix.divergence_point(), Some((2, MismatchKind::ContentHash)));

        drop(ledger);
        cleanup(&path);
    }

    #[test]
    fn test_sqlite_undecodable_tail_is_a_divergence() {
        let path = temp_db();
        let ledger = SqliteLedger::open(&path, "gov", SqliteOptions::default()).unwrap();
        for i in 1..=3 {
            ledger.append(event(&format!("e{i}"))).unwrap();
        }

        ledger
            .__raw_execute(
                "DROP TRIGGER audit_records_no_update;
                 UPDATE audit_records SET timestamp = 'yesterday' WHERE sequence_number = 3;",
            )
            .unwrap();

        let report = ChainVerifier::new().verify_all(&ledger).unwrap();
        assert_eq!(report.divergence_point(), Some((3, MismatchKind::ContentHash)));

        drop(ledger);
        cleanup(&path);
    }

    #[test]
    fn test_sqlite_deleted_tail_detected() {
        let path = temp_db();
        let ledger = SqliteLedger::open(&path, "gov", SqliteOptions::default()).unwrap();
        for i in 1..=3 {
            ledger.append(event(&format!("e{i}"))).unwrap();
        }

        ledger
            .__raw_execute(
                "DROP TRIGGER audit_records_no_delete;
                 DELETE FROM audit_records WHERE sequence_number = 3;",
            )
            .unwrap();

        let report = ChainVerifier::new().verify_all(&ledger).unwrap();
        assert_eq!(report.to_seq, 3);
        assert_eq!(report.divergence_point(), Some((3, MismatchKind::SequenceGap)));

        drop(ledger);
        cleanup(&path);
    }
}
