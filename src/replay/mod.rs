//! Per-repetition frame recording and looped playback.

mod export;
mod playback;
mod recorder;

#[cfg(test)]
mod tests;

pub use export::export_record;
pub use playback::{PlaybackCursor, ReplayPlayer};
pub use recorder::{FrameSample, RepetitionRecord, ReplayRecorder};
