use crate::session::Phase;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

/// One rendered frame returned by the service, kept for replay
#[derive(Debug, Clone, Serialize)]
pub struct FrameSample {
    /// Data URL exactly as received
    pub image: Arc<str>,
    pub phase: Phase,
    /// Pose label from the status payload, when the service sent one
    pub pose_state: Option<String>,
    pub received_at: SystemTime,
}

impl FrameSample {
    pub fn new(image: impl Into<Arc<str>>, phase: Phase, pose_state: Option<String>) -> Self {
        Self {
            image: image.into(),
            phase,
            pose_state,
            received_at: SystemTime::now(),
        }
    }
}

/// Frames, score and feedback of one repetition
#[derive(Debug, Clone, Serialize)]
pub struct RepetitionRecord {
    /// 1-based
    pub number: u32,
    pub frames: Vec<FrameSample>,
    pub score: Option<f64>,
    pub feedback: Vec<String>,
    pub sealed: bool,
    /// False when the record was closed by teardown before the count covered it
    pub complete: bool,
    pub opened_at: SystemTime,
    pub sealed_at: Option<SystemTime>,
}

impl RepetitionRecord {
    fn open(number: u32) -> Self {
        Self {
            number,
            frames: Vec::new(),
            score: None,
            feedback: Vec::new(),
            sealed: false,
            complete: false,
            opened_at: SystemTime::now(),
            sealed_at: None,
        }
    }

    fn seal(mut self, score: Option<f64>, feedback: &[String], complete: bool) -> Self {
        self.score = score;
        self.feedback = feedback.to_vec();
        self.sealed = true;
        self.complete = complete;
        self.sealed_at = Some(SystemTime::now());
        self
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

#[derive(Debug, Default)]
struct RecorderInner {
    sealed: Vec<Arc<RepetitionRecord>>,
    open: Option<RepetitionRecord>,
}

impl RecorderInner {
    fn next_number(&self) -> u32 {
        self.sealed.last().map(|r| r.number + 1).unwrap_or(1)
    }
}

/// Per-repetition frame store for one session.
///
/// At most one record is open. Sealed records are immutable and shared as `Arc`s.
#[derive(Debug, Clone, Default)]
pub struct ReplayRecorder {
    inner: Arc<RwLock<RecorderInner>>,
}

impl ReplayRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a record for repetition `number`.
    ///
    /// Refused when a record is already open or `number` was already sealed.
    pub fn open(&self, number: u32) -> bool {
        let mut inner = self.inner.write();

        if let Some(open) = inner.open.as_ref() {
            warn!(
                "Cannot open repetition {}: repetition {} is still open",
                number, open.number
            );
            return false;
        }
        if number < inner.next_number() {
            warn!("Cannot reopen sealed repetition {}", number);
            return false;
        }

        debug!("Opened repetition {}", number);
        inner.open = Some(RepetitionRecord::open(number));
        true
    }

    /// Append to the open record. Returns `false` when nothing is open.
    pub fn append(&self, sample: FrameSample) -> bool {
        match self.inner.write().open.as_mut() {
            Some(record) => {
                record.frames.push(sample);
                true
            }
            None => false,
        }
    }

    /// Seal the open record, if any
    pub fn seal_open(
        &self,
        score: Option<f64>,
        feedback: &[String],
        complete: bool,
    ) -> Option<Arc<RepetitionRecord>> {
        let mut inner = self.inner.write();
        let record = inner.open.take()?;
        let sealed = Arc::new(record.seal(score, feedback, complete));
        inner.sealed.push(Arc::clone(&sealed));
        Some(sealed)
    }

    /// Seal everything up to and including repetition `completed`.
    ///
    /// The open record is sealed if its number is covered. Numbers skipped by a
    /// count jump get empty sealed records so numbering stays contiguous.
    pub fn seal_through(
        &self,
        completed: u32,
        scores: &BTreeMap<u32, f64>,
        feedback: &[String],
    ) -> Vec<Arc<RepetitionRecord>> {
        let mut inner = self.inner.write();
        let mut newly_sealed = Vec::new();

        loop {
            let number = match inner.open.as_ref() {
                Some(open) => open.number,
                None => inner.next_number(),
            };
            if number > completed {
                break;
            }

            let record = inner
                .open
                .take()
                .unwrap_or_else(|| RepetitionRecord::open(number));
            let sealed = Arc::new(record.seal(scores.get(&number).copied(), feedback, true));
            inner.sealed.push(Arc::clone(&sealed));
            newly_sealed.push(sealed);
        }

        newly_sealed
    }

    /// Drop the open record without sealing it
    pub fn discard_open(&self) -> Option<u32> {
        let discarded = self.inner.write().open.take().map(|r| r.number);
        if let Some(number) = discarded {
            debug!("Discarded empty repetition {}", number);
        }
        discarded
    }

    /// Forget every record
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.sealed.clear();
        inner.open = None;
    }

    /// Number of the open record
    pub fn open_number(&self) -> Option<u32> {
        self.inner.read().open.as_ref().map(|r| r.number)
    }

    pub fn open_frame_count(&self) -> usize {
        self.inner
            .read()
            .open
            .as_ref()
            .map(|r| r.frames.len())
            .unwrap_or(0)
    }

    pub fn sealed(&self) -> Vec<Arc<RepetitionRecord>> {
        self.inner.read().sealed.clone()
    }

    pub fn sealed_count(&self) -> usize {
        self.inner.read().sealed.len()
    }

    pub fn record(&self, number: u32) -> Option<Arc<RepetitionRecord>> {
        self.inner
            .read()
            .sealed
            .iter()
            .find(|r| r.number == number)
            .cloned()
    }

    /// Sealed records followed by a snapshot of the open one
    pub fn records(&self) -> Vec<Arc<RepetitionRecord>> {
        let inner = self.inner.read();
        let mut records = inner.sealed.clone();
        if let Some(open) = inner.open.as_ref() {
            records.push(Arc::new(open.clone()));
        }
        records
    }

    /// Total frames kept across all records
    pub fn frame_count(&self) -> usize {
        let inner = self.inner.read();
        inner.sealed.iter().map(|r| r.frames.len()).sum::<usize>()
            + inner.open.as_ref().map(|r| r.frames.len()).unwrap_or(0)
    }
}
