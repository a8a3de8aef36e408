use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::frame::EncodedFrame;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

/// How the service should interpret the frames it receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    Live,
    File,
}

impl SourceMode {
    /// Output frame rate for this mode
    pub fn fps(&self, config: &CaptureConfig) -> u32 {
        match self {
            SourceMode::Live => config.live_fps,
            SourceMode::File => config.file_fps,
        }
    }
}

impl std::fmt::Display for SourceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceMode::Live => write!(f, "live"),
            SourceMode::File => write!(f, "file"),
        }
    }
}

/// What to open: a camera device or a recorded file/directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureTarget {
    Device(u32),
    Path(PathBuf),
}

/// Result of one sampling attempt
#[derive(Debug, Clone)]
pub enum Sample {
    Frame(EncodedFrame),
    /// Recorded media finished playing; never produced in live mode
    EndOfStream,
}

/// Owns a capture device or decoded file and hands out sampled frames.
///
/// `sample` is synchronous and best-effort: it captures whatever the source
/// currently shows, already scaled and JPEG encoded. `close` must tolerate
/// repeated calls.
pub trait FrameSource: Send {
    fn mode(&self) -> SourceMode;

    fn sample(&mut self) -> Result<Sample, CaptureError>;

    fn close(&mut self);

    fn is_closed(&self) -> bool;

    fn describe(&self) -> String;
}

/// Holds the one live `FrameSource` of a session and releases it exactly once
pub struct SourceGuard {
    source: Option<Box<dyn FrameSource>>,
    mode: SourceMode,
}

impl SourceGuard {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        let mode = source.mode();
        Self {
            source: Some(source),
            mode,
        }
    }

    pub fn mode(&self) -> SourceMode {
        self.mode
    }

    pub fn is_released(&self) -> bool {
        self.source.is_none()
    }

    pub fn describe(&self) -> String {
        self.source
            .as_ref()
            .map(|source| source.describe())
            .unwrap_or_else(|| "released".to_string())
    }

    /// Sample the source; a released guard reports end-of-stream
    pub fn sample(&mut self) -> Result<Sample, CaptureError> {
        match self.source.as_mut() {
            Some(source) => source.sample(),
            None => Ok(Sample::EndOfStream),
        }
    }

    /// Close and drop the source. Returns `true` only for the call that released it.
    pub fn release(&mut self) -> bool {
        match self.source.take() {
            Some(mut source) => {
                info!("Releasing capture source {}", source.describe());
                source.close();
                true
            }
            None => {
                debug!("Capture source already released");
                false
            }
        }
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Open the source for `mode`, failing before any network activity if it is unavailable
pub fn open_source(
    mode: SourceMode,
    target: &CaptureTarget,
    config: &CaptureConfig,
) -> Result<Box<dyn FrameSource>, CaptureError> {
    match (mode, target) {
        (SourceMode::File, CaptureTarget::Path(path)) if path.is_dir() => Ok(Box::new(
            super::ImageSequenceSource::open(path.clone(), config)?,
        )),
        #[cfg(all(feature = "camera", target_os = "linux"))]
        (SourceMode::File, CaptureTarget::Path(path)) => {
            Ok(Box::new(super::GstSource::open_file(path.clone(), config)?))
        }
        #[cfg(not(all(feature = "camera", target_os = "linux")))]
        (SourceMode::File, CaptureTarget::Path(path)) => {
            if !path.exists() {
                return Err(CaptureError::SourceNotFound {
                    path: path.display().to_string(),
                });
            }
            Ok(Box::new(super::ImageSequenceSource::open(
                path.clone(),
                config,
            )?))
        }
        (SourceMode::File, CaptureTarget::Device(index)) => Err(CaptureError::SourceNotFound {
            path: format!("file mode needs a path, got device {}", index),
        }),
        #[cfg(all(feature = "camera", target_os = "linux"))]
        (SourceMode::Live, CaptureTarget::Device(index)) => {
            Ok(Box::new(super::GstSource::open_device(*index, config)?))
        }
        #[cfg(not(all(feature = "camera", target_os = "linux")))]
        (SourceMode::Live, CaptureTarget::Device(index)) => Err(CaptureError::Device {
            details: format!(
                "camera {} requested but camera support is not compiled in",
                index
            ),
        }),
        (SourceMode::Live, CaptureTarget::Path(path)) => Err(CaptureError::Device {
            details: format!("live mode needs a camera device, got {}", path.display()),
        }),
    }
}
