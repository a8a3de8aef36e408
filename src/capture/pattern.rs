use super::source::{FrameSource, Sample, SourceMode};
use crate::error::CaptureError;
use crate::frame::{FrameData, FrameEncoder, FrameFormat};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, trace};

/// Synthetic source: a bar sweeping across a gradient.
///
/// Without a frame limit it behaves like a live camera; with one it behaves
/// like a recording that ends after `limit` frames.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    limit: Option<u64>,
    next_id: u64,
    encoder: FrameEncoder,
    closed: bool,
    close_count: Arc<AtomicUsize>,
}

impl TestPatternSource {
    pub fn new(encoder: FrameEncoder) -> Self {
        let (width, height) = encoder.output_size();
        Self {
            width,
            height,
            limit: None,
            next_id: 0,
            encoder,
            closed: false,
            close_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// End the stream after `frames` samples
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    /// Counter of how many times the underlying "device" was actually released
    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.close_count)
    }

    pub fn frames_produced(&self) -> u64 {
        self.next_id
    }

    fn render(&self, frame_id: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity((self.width * self.height * 3) as usize);
        let bar = (frame_id * 8 % self.width.max(1) as u64) as u32;

        for y in 0..self.height {
            for x in 0..self.width {
                if x.abs_diff(bar) < 4 {
                    data.extend_from_slice(&[255, 255, 255]);
                } else {
                    let r = (x * 255 / self.width.max(1)) as u8;
                    let g = (y * 255 / self.height.max(1)) as u8;
                    data.extend_from_slice(&[r, g, (frame_id % 256) as u8]);
                }
            }
        }

        data
    }
}

impl FrameSource for TestPatternSource {
    fn mode(&self) -> SourceMode {
        if self.limit.is_some() {
            SourceMode::File
        } else {
            SourceMode::Live
        }
    }

    fn sample(&mut self) -> Result<Sample, CaptureError> {
        if self.closed {
            return Err(CaptureError::Device {
                details: "test pattern source is closed".to_string(),
            });
        }

        if let Some(limit) = self.limit {
            if self.next_id >= limit {
                return Ok(Sample::EndOfStream);
            }
        }

        let frame_id = self.next_id;
        self.next_id += 1;

        let frame = FrameData::new(
            frame_id,
            SystemTime::now(),
            self.render(frame_id),
            self.width,
            self.height,
            FrameFormat::Rgb24,
        );
        trace!("Generated test pattern frame {}", frame_id);

        Ok(Sample::Frame(self.encoder.encode(&frame)?))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.close_count.fetch_add(1, Ordering::SeqCst);
        debug!("Test pattern source closed after {} frames", self.next_id);
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn describe(&self) -> String {
        format!("test pattern {}x{}", self.width, self.height)
    }
}
