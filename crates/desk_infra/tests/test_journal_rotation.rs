use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use desk_core::{AuditLog, EventType, ManualClock};
use desk_infra::journal::{Journal, JournalConfig, JournalError};
use serde_json::json;

fn temp_journal_path(test_name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    path.push(format!(
        "desk_infra_{}_{}_{}",
        test_name,
        std::process::id(),
        nanos
    ));
    path.push("events.jsonl");
    path
}

fn audit_into(journal: &Arc<Journal>) -> AuditLog {
    AuditLog::new(Arc::new(ManualClock::new(1_700_000_000_000))).with_sink(journal.clone())
}

#[test]
fn test_events_replay_in_sequence() {
    let path = temp_journal_path("replay");
    let journal = Arc::new(Journal::open(&path).expect("open journal"));
    let audit = audit_into(&journal);

    audit.emit(
        EventType::OrderSubmitted,
        Some("m-1"),
        json!({"symbol": "BTCUSDT", "quantity": "0.010"}),
    );
    audit.emit(EventType::OrderCanceled, Some("m-1"), json!({}));
    journal.flush().expect("flush");

    let events = journal.replay().expect("replay");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].seq, 1);
    assert_eq!(events[0].event_type, EventType::OrderSubmitted);
    assert_eq!(events[0].order_id.as_deref(), Some("m-1"));
    assert_eq!(events[0].details["quantity"], "0.010");
    assert_eq!(events[1].event_type, EventType::OrderCanceled);
    assert_eq!(audit.sink_errors_total(), 0);
}

/// GIVEN a journal capped at a few hundred bytes with two rotations kept
/// WHEN many events are written
/// THEN the oldest files are dropped and replay returns a contiguous tail.
#[test]
fn test_rotation_keeps_bounded_tail() {
    let path = temp_journal_path("rotation");
    let config = JournalConfig {
        max_bytes: 400,
        max_files: 2,
        queue_capacity: 64,
    };
    let journal = Arc::new(Journal::open_with_config(&path, config).expect("open journal"));
    let audit = audit_into(&journal);

    for idx in 0..20 {
        audit.emit(
            EventType::TwapSliceSubmitted,
            Some(&format!("m-{idx}")),
            json!({"slice": idx}),
        );
    }
    journal.flush().expect("flush");

    assert!(journal.rotations_total() > 2);
    assert_eq!(journal.files().len(), 3);
    assert_eq!(journal.write_errors_total(), 0);

    let events = journal.replay().expect("replay");
    let seqs: Vec<u64> = events.iter().map(|event| event.seq).collect();
    assert_eq!(seqs.last().copied(), Some(20));
    assert!(seqs[0] > 1, "oldest rotation should have been dropped");
    assert!(seqs.windows(2).all(|pair| pair[1] == pair[0] + 1));
}

#[test]
fn test_reopen_appends_to_existing_file() {
    let path = temp_journal_path("reopen");
    {
        let journal = Arc::new(Journal::open(&path).expect("open journal"));
        audit_into(&journal).emit(EventType::OrderSubmitted, Some("m-1"), json!({}));
        journal.flush().expect("flush");
    }

    let journal = Arc::new(Journal::open(&path).expect("reopen journal"));
    audit_into(&journal).emit(EventType::OrderFilled, Some("m-1"), json!({}));
    journal.flush().expect("flush");

    let events = journal.replay().expect("replay");
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].event_type, EventType::OrderFilled);
}

#[test]
fn test_zero_capacity_rejected() {
    let path = temp_journal_path("config");
    let config = JournalConfig {
        queue_capacity: 0,
        ..JournalConfig::default()
    };

    assert!(matches!(
        Journal::open_with_config(&path, config),
        Err(JournalError::Config(_))
    ));
}
