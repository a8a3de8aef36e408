use super::*;
use crate::session::Phase;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn sample(tag: &str) -> FrameSample {
    FrameSample::new(format!("data:image/jpeg;base64,{}", tag), Phase::Active, None)
}

fn feedback(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_append_requires_open_record() {
    let recorder = ReplayRecorder::new();
    assert!(!recorder.append(sample("a")));

    assert!(recorder.open(1));
    assert!(recorder.append(sample("a")));
    assert!(recorder.append(sample("b")));
    assert_eq!(recorder.open_number(), Some(1));
    assert_eq!(recorder.open_frame_count(), 2);
}

#[test]
fn test_only_one_record_open() {
    let recorder = ReplayRecorder::new();
    assert!(recorder.open(1));
    assert!(!recorder.open(2));
    assert_eq!(recorder.open_number(), Some(1));
}

#[test]
fn test_seal_through_seals_once() {
    let recorder = ReplayRecorder::new();
    let scores = BTreeMap::from([(1, 0.9)]);

    recorder.open(1);
    recorder.append(sample("a"));
    let sealed = recorder.seal_through(1, &scores, &feedback(&["knees_in"]));
    assert_eq!(sealed.len(), 1);
    assert_eq!(sealed[0].number, 1);
    assert_eq!(sealed[0].score, Some(0.9));
    assert_eq!(sealed[0].feedback, vec!["knees_in".to_string()]);
    assert!(sealed[0].sealed && sealed[0].complete);

    // Same count again changes nothing
    assert!(recorder.seal_through(1, &scores, &[]).is_empty());
    assert_eq!(recorder.sealed_count(), 1);
    assert_eq!(recorder.open_number(), None);

    // Sealed numbers cannot be reopened
    assert!(!recorder.open(1));
    assert!(recorder.open(2));
    assert_eq!(recorder.record(1).unwrap().frames.len(), 1);
}

#[test]
fn test_count_jump_fills_skipped_numbers() {
    let recorder = ReplayRecorder::new();
    recorder.open(1);
    recorder.append(sample("a"));

    let scores = BTreeMap::from([(1, 0.8), (2, 0.6), (3, 0.7)]);
    let sealed = recorder.seal_through(3, &scores, &[]);

    let numbers: Vec<u32> = sealed.iter().map(|r| r.number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(sealed[0].frames.len(), 1);
    assert!(sealed[1].frames.is_empty());
    assert_eq!(sealed[2].score, Some(0.7));
}

#[test]
fn test_seal_open_marks_incomplete() {
    let recorder = ReplayRecorder::new();
    assert!(recorder.seal_open(None, &[], false).is_none());

    recorder.open(1);
    recorder.append(sample("a"));
    let sealed = recorder.seal_open(None, &[], false).unwrap();
    assert!(sealed.sealed);
    assert!(!sealed.complete);
    assert!(recorder.seal_open(None, &[], false).is_none());
}

#[test]
fn test_records_includes_open_snapshot() {
    let recorder = ReplayRecorder::new();
    recorder.open(1);
    recorder.append(sample("a"));
    recorder.seal_through(1, &BTreeMap::new(), &[]);
    recorder.open(2);
    recorder.append(sample("b"));
    recorder.append(sample("c"));

    let records = recorder.records();
    assert_eq!(records.len(), 2);
    assert!(records[0].sealed);
    assert!(!records[1].sealed);
    assert_eq!(recorder.frame_count(), 3);

    // Snapshot does not follow later appends
    recorder.append(sample("d"));
    assert_eq!(records[1].frames.len(), 2);
}

#[test]
fn test_cursor_wraps() {
    let recorder = ReplayRecorder::new();
    recorder.open(1);
    for tag in ["a", "b", "c"] {
        recorder.append(sample(tag));
    }
    let record = recorder.seal_open(Some(1.0), &[], true).unwrap();

    let mut cursor = PlaybackCursor::new(record);
    assert!(cursor.current().unwrap().image.ends_with('a'));
    assert!(cursor.advance().unwrap().image.ends_with('b'));
    assert!(cursor.advance().unwrap().image.ends_with('c'));
    assert!(cursor.advance().unwrap().image.ends_with('a'));
    assert_eq!(cursor.index(), 0);

    cursor.advance();
    cursor.reset();
    assert_eq!(cursor.index(), 0);
}

#[test]
fn test_cursor_on_empty_record() {
    let recorder = ReplayRecorder::new();
    let record = recorder.seal_through(1, &BTreeMap::new(), &[]).remove(0);

    let mut cursor = PlaybackCursor::new(record);
    assert!(cursor.current().is_none());
    assert!(cursor.advance().is_none());
}

#[tokio::test]
async fn test_player_loops_until_stopped() {
    let recorder = ReplayRecorder::new();
    recorder.open(1);
    recorder.append(sample("a"));
    recorder.append(sample("b"));
    let record = recorder.seal_open(None, &[], true).unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    let player = ReplayPlayer::start(Arc::clone(&record), 30, tx);

    let mut tags = Vec::new();
    for _ in 0..5 {
        let frame = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        tags.push(frame.image.chars().last().unwrap());
    }
    assert_eq!(tags, vec!['a', 'b', 'a', 'b', 'a']);

    player.stop().await;
}

#[tokio::test]
async fn test_export_writes_decodable_frames() {
    use crate::frame::{FrameData, FrameEncoder, FrameFormat};
    use std::time::SystemTime;

    let raw = FrameData::new(0, SystemTime::now(), vec![40; 8 * 8 * 3], 8, 8, FrameFormat::Rgb24);
    let encoded = FrameEncoder::new(8, 8, 60).encode(&raw).unwrap();

    let recorder = ReplayRecorder::new();
    recorder.open(2);
    recorder.append(FrameSample::new(encoded.to_data_url(), Phase::Active, None));
    recorder.append(sample("not base64 !!"));
    let record = recorder.seal_open(None, &[], true).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let written = export_record(&record, dir.path()).await.unwrap();
    assert_eq!(written.len(), 1);
    assert!(written[0].ends_with("rep002_0000.jpg"));
    assert_eq!(std::fs::read(&written[0]).unwrap(), encoded.jpeg.as_slice());
}
