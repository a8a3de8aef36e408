use super::*;
use crate::error::PlaybackError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;

/// Records what was played and the highest number of overlapping plays
#[derive(Default)]
struct RecordingPlayer {
    played: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail_on: Option<&'static str>,
}

#[async_trait]
impl CuePlayer for RecordingPlayer {
    async fn play(&self, cue: &AudioCue) -> Result<(), PlaybackError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_on == Some(cue.identifier.as_str()) {
            return Err(PlaybackError::Player {
                details: "boom".to_string(),
            });
        }
        self.played.lock().push(cue.identifier.clone());
        Ok(())
    }
}

fn announcer(player: Arc<RecordingPlayer>) -> FeedbackAnnouncer {
    FeedbackAnnouncer::spawn(CueMap::new("/cues", "mp3"), player)
}

#[test]
fn test_split_identifiers() {
    assert_eq!(split_identifiers("A | B"), vec!["A", "B"]);
    assert_eq!(split_identifiers("A | | A | C"), vec!["A", "C"]);
    assert!(split_identifiers("").is_empty());
    assert_eq!(split_identifiers("A|B"), vec!["A", "B"]);
    assert_eq!(split_identifiers(" knees_in |back_round| "), vec!["knees_in", "back_round"]);
}

#[test]
fn test_cue_map_resolves_asset_path() {
    let map = CueMap::new("/cues", "mp3");
    assert_eq!(map.resolve("knees_in"), PathBuf::from("/cues/knees_in.mp3"));
    assert_eq!(map.resolve("../etc"), PathBuf::from("/cues/.._etc.mp3"));
}

#[test]
fn test_command_player_parsing() {
    let player = CommandCuePlayer::from_command_line("mpv --no-video --really-quiet").unwrap();
    assert_eq!(player.program(), "mpv");
    assert_eq!(player.args(), ["--no-video", "--really-quiet"]);
    assert!(CommandCuePlayer::from_command_line("   ").is_none());
}

#[tokio::test]
async fn test_identical_text_enqueues_nothing() {
    let player = Arc::new(RecordingPlayer::default());
    let mut announcer = announcer(Arc::clone(&player));

    assert_eq!(announcer.on_feedback("A | B"), 2);
    assert_eq!(announcer.on_feedback("A | B"), 0);
    assert_eq!(announcer.on_feedback("A | B"), 0);

    announcer.drain(Duration::from_secs(2)).await;
    assert_eq!(*player.played.lock(), vec!["A", "B"]);
    assert_eq!(announcer.stats().updates, 1);
}

#[tokio::test]
async fn test_only_new_identifiers_are_enqueued() {
    let player = Arc::new(RecordingPlayer::default());
    let mut announcer = announcer(Arc::clone(&player));

    assert_eq!(announcer.on_feedback("A | B"), 2);
    assert_eq!(announcer.on_feedback("A | C"), 1);
    assert_eq!(announcer.on_feedback("C"), 0);
    // A disappeared and came back, so it is new again
    assert_eq!(announcer.on_feedback("C | A"), 1);

    announcer.drain(Duration::from_secs(2)).await;
    assert_eq!(*player.played.lock(), vec!["A", "B", "C", "A"]);
}

#[tokio::test]
async fn test_empty_feedback_clears_previous() {
    let player = Arc::new(RecordingPlayer::default());
    let mut announcer = announcer(Arc::clone(&player));

    assert_eq!(announcer.on_feedback("A"), 1);
    assert_eq!(announcer.on_feedback(""), 0);
    assert_eq!(announcer.on_feedback("A"), 1);

    announcer.drain(Duration::from_secs(2)).await;
    assert_eq!(player.played.lock().len(), 2);
}

#[tokio::test]
async fn test_plays_one_at_a_time_in_order() {
    let player = Arc::new(RecordingPlayer::default());
    let mut announcer = announcer(Arc::clone(&player));

    announcer.on_feedback("A | B | C");
    announcer.on_feedback("D | E");

    announcer.drain(Duration::from_secs(2)).await;
    assert_eq!(*player.played.lock(), vec!["A", "B", "C", "D", "E"]);
    assert_eq!(player.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(announcer.stats().played, 5);
}

#[tokio::test]
async fn test_failed_cue_is_skipped() {
    let player = Arc::new(RecordingPlayer {
        fail_on: Some("B"),
        ..Default::default()
    });
    let mut announcer = announcer(Arc::clone(&player));

    announcer.on_feedback("A | B | C");
    announcer.drain(Duration::from_secs(2)).await;

    assert_eq!(*player.played.lock(), vec!["A", "C"]);
    let stats = announcer.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.played, 2);
}

#[tokio::test]
async fn test_missing_asset_fails_playback() {
    let dir = tempfile::tempdir().unwrap();
    let map = CueMap::new(dir.path(), "mp3");
    let player = CommandCuePlayer::from_command_line("true").unwrap();

    let result = player.play(&map.cue("absent")).await;
    assert!(matches!(result, Err(PlaybackError::AssetMissing { .. })));
}

#[tokio::test]
async fn test_shutdown_stops_enqueueing() {
    let player = Arc::new(RecordingPlayer::default());
    let mut announcer = announcer(Arc::clone(&player));

    announcer.shutdown();
    assert_eq!(announcer.on_feedback("A"), 0);
}
