use super::recorder::{FrameSample, RepetitionRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cyclic read position over one sealed repetition
#[derive(Debug, Clone)]
pub struct PlaybackCursor {
    record: Arc<RepetitionRecord>,
    index: usize,
}

impl PlaybackCursor {
    pub fn new(record: Arc<RepetitionRecord>) -> Self {
        Self { record, index: 0 }
    }

    pub fn record(&self) -> &RepetitionRecord {
        &self.record
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> Option<&FrameSample> {
        self.record.frames.get(self.index)
    }

    /// Step to the next frame, wrapping to the first after the last
    pub fn advance(&mut self) -> Option<&FrameSample> {
        let len = self.record.frames.len();
        if len == 0 {
            return None;
        }
        self.index = (self.index + 1) % len;
        self.record.frames.get(self.index)
    }

    pub fn reset(&mut self) {
        self.index = 0;
    }
}

/// Drives a cursor on a fixed period until stopped
pub struct ReplayPlayer {
    cancellation_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ReplayPlayer {
    /// Emit the record's frames to `output` at `fps`, looping until stopped or
    /// the receiver is dropped
    pub fn start(
        record: Arc<RepetitionRecord>,
        fps: u32,
        output: mpsc::Sender<FrameSample>,
    ) -> Self {
        let cancellation_token = CancellationToken::new();
        let token = cancellation_token.clone();
        let period = Duration::from_secs_f64(1.0 / fps.max(1) as f64);

        let handle = tokio::spawn(async move {
            let number = record.number;
            let mut cursor = PlaybackCursor::new(record);
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let Some(mut next) = cursor.current().cloned() else {
                debug!("Repetition {} has no frames to replay", number);
                return;
            };

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    sent = output.send(next) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }

                match cursor.advance() {
                    Some(frame) => next = frame.clone(),
                    None => break,
                }
            }

            debug!("Replay of repetition {} stopped", number);
        });

        Self {
            cancellation_token,
            handle,
        }
    }

    pub async fn stop(self) {
        self.cancellation_token.cancel();
        let _ = self.handle.await;
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
