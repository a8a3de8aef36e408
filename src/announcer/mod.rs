//! Turns the live feedback text into a FIFO queue of audio cues.

mod player;

#[cfg(test)]
mod tests;

pub use player::{AudioCue, CommandCuePlayer, CueMap, CuePlayer, LogCuePlayer};

use crate::config::AnnouncerConfig;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Separator between identifiers in the feedback text
pub const FEEDBACK_SEPARATOR: char = '|';

/// Split feedback text into identifiers, dropping empties and repeats
pub fn split_identifiers(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(FEEDBACK_SEPARATOR)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect()
}

/// Command player when one is configured, otherwise cues are only logged
pub fn player_from_config(config: &AnnouncerConfig) -> Arc<dyn CuePlayer> {
    match config
        .player_command
        .as_deref()
        .and_then(CommandCuePlayer::from_command_line)
    {
        Some(command) => Arc::new(command),
        None => Arc::new(LogCuePlayer),
    }
}

#[derive(Debug, Default)]
struct AnnouncerStats {
    updates: AtomicU64,
    enqueued: AtomicU64,
    played: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnnouncerStatsSnapshot {
    pub updates: u64,
    pub enqueued: u64,
    pub played: u64,
    pub failed: u64,
}

/// Announces only identifiers that are new relative to the previous feedback.
///
/// Cues play one at a time in arrival order on a background task. The queue is
/// unbounded; every identifier the service introduces is eventually played.
pub struct FeedbackAnnouncer {
    previous: Option<String>,
    cue_map: CueMap,
    queue: Option<mpsc::UnboundedSender<AudioCue>>,
    stats: Arc<AnnouncerStats>,
    cancellation_token: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl FeedbackAnnouncer {
    pub fn spawn(cue_map: CueMap, player: Arc<dyn CuePlayer>) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(AnnouncerStats::default());
        let cancellation_token = CancellationToken::new();

        let worker = tokio::spawn(run_player(
            queue_rx,
            player,
            Arc::clone(&stats),
            cancellation_token.clone(),
        ));

        Self {
            previous: None,
            cue_map,
            queue: Some(queue_tx),
            stats,
            cancellation_token,
            worker: Some(worker),
        }
    }

    pub fn from_config(config: &AnnouncerConfig) -> Self {
        Self::spawn(CueMap::from_config(config), player_from_config(config))
    }

    /// Feed the latest feedback text. Returns how many cues were enqueued.
    pub fn on_feedback(&mut self, text: &str) -> usize {
        if self.previous.as_deref() == Some(text) {
            return 0;
        }
        self.stats.updates.fetch_add(1, Ordering::Relaxed);

        let before: HashSet<String> = self
            .previous
            .as_deref()
            .map(split_identifiers)
            .unwrap_or_default()
            .into_iter()
            .collect();
        self.previous = Some(text.to_string());

        let Some(queue) = self.queue.as_ref() else {
            return 0;
        };

        let mut enqueued = 0;
        for identifier in split_identifiers(text) {
            if before.contains(&identifier) {
                continue;
            }
            debug!("Queueing cue for {}", identifier);
            if queue.send(self.cue_map.cue(&identifier)).is_ok() {
                enqueued += 1;
            }
        }

        self.stats
            .enqueued
            .fetch_add(enqueued as u64, Ordering::Relaxed);
        enqueued
    }

    /// Forget the previous text so the next session starts fresh
    pub fn reset(&mut self) {
        self.previous = None;
    }

    pub fn stats(&self) -> AnnouncerStatsSnapshot {
        AnnouncerStatsSnapshot {
            updates: self.stats.updates.load(Ordering::Relaxed),
            enqueued: self.stats.enqueued.load(Ordering::Relaxed),
            played: self.stats.played.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }

    /// Let queued cues finish, up to `limit`, then stop the player
    pub async fn drain(&mut self, limit: Duration) {
        self.queue = None;
        if let Some(worker) = self.worker.take() {
            if timeout(limit, worker).await.is_err() {
                warn!("Cue queue not drained within {:?}; dropping the rest", limit);
                self.cancellation_token.cancel();
            }
        }
    }

    /// Stop immediately, discarding queued cues
    pub fn shutdown(&mut self) {
        self.queue = None;
        self.cancellation_token.cancel();
        self.worker = None;
    }
}

impl Drop for FeedbackAnnouncer {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

async fn run_player(
    mut queue: mpsc::UnboundedReceiver<AudioCue>,
    player: Arc<dyn CuePlayer>,
    stats: Arc<AnnouncerStats>,
    cancellation_token: CancellationToken,
) {
    loop {
        let cue = tokio::select! {
            cue = queue.recv() => match cue {
                Some(cue) => cue,
                None => break,
            },
            _ = cancellation_token.cancelled() => break,
        };

        let result = tokio::select! {
            result = player.play(&cue) => result,
            _ = cancellation_token.cancelled() => break,
        };

        match result {
            Ok(()) => {
                stats.played.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Skipping cue {}: {}", cue.identifier, e);
            }
        }
    }

    debug!("Cue player stopped");
}
