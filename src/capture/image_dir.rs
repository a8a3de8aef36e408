use super::source::{FrameSource, Sample, SourceMode};
use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::frame::{FrameData, FrameEncoder, FrameFormat};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, trace};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// File-mode source that replays a directory of still images in name order
pub struct ImageSequenceSource {
    root: PathBuf,
    files: Vec<PathBuf>,
    position: usize,
    encoder: FrameEncoder,
    closed: bool,
}

impl ImageSequenceSource {
    /// Open a directory of stills, or a single still image
    pub fn open(root: PathBuf, config: &CaptureConfig) -> Result<Self, CaptureError> {
        let files = if root.is_file() {
            if !is_still_image(&root) {
                return Err(CaptureError::Decode {
                    details: format!(
                        "{} is not a .jpg/.jpeg/.png still image",
                        root.display()
                    ),
                });
            }
            vec![root.clone()]
        } else {
            list_images(&root)?
        };

        if files.is_empty() {
            return Err(CaptureError::SourceNotFound {
                path: format!("{} (no .jpg/.jpeg/.png files)", root.display()),
            });
        }

        info!(
            "Opened image sequence {} ({} frames)",
            root.display(),
            files.len()
        );

        Ok(Self {
            root,
            files,
            position: 0,
            encoder: FrameEncoder::from_config(config),
            closed: false,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.files.len()
    }

    pub fn remaining(&self) -> usize {
        self.files.len().saturating_sub(self.position)
    }
}

fn list_images(root: &Path) -> Result<Vec<PathBuf>, CaptureError> {
    let entries = std::fs::read_dir(root).map_err(|e| map_io_error(root, e))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_still_image(path))
        .collect();
    files.sort();

    Ok(files)
}

fn is_still_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn map_io_error(path: &Path, error: std::io::Error) -> CaptureError {
    match error.kind() {
        ErrorKind::NotFound => CaptureError::SourceNotFound {
            path: path.display().to_string(),
        },
        ErrorKind::PermissionDenied => CaptureError::PermissionDenied {
            device: path.display().to_string(),
        },
        _ => CaptureError::Device {
            details: format!("{}: {}", path.display(), error),
        },
    }
}

impl FrameSource for ImageSequenceSource {
    fn mode(&self) -> SourceMode {
        SourceMode::File
    }

    fn sample(&mut self) -> Result<Sample, CaptureError> {
        if self.closed || self.position >= self.files.len() {
            return Ok(Sample::EndOfStream);
        }

        let path = &self.files[self.position];
        let frame_id = self.position as u64;
        self.position += 1;

        let bytes = std::fs::read(path).map_err(|e| map_io_error(path, e))?;
        trace!("Read {} ({} bytes)", path.display(), bytes.len());

        let frame = FrameData::new(
            frame_id,
            SystemTime::now(),
            bytes,
            0,
            0,
            FrameFormat::Compressed,
        );

        Ok(Sample::Frame(self.encoder.encode(&frame)?))
    }

    fn close(&mut self) {
        if !self.closed {
            debug!("Closing image sequence {}", self.root.display());
            self.closed = true;
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn describe(&self) -> String {
        format!("image sequence {}", self.root.display())
    }
}
