use super::source::{FrameSource, Sample, SourceMode};
use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::frame::{EncodedFrame, FrameData, FrameEncoder, FrameFormat};
use gstreamer::prelude::*;
use gstreamer::{ClockTime, Pipeline};
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, trace, warn};

const PULL_TIMEOUT_MS: u64 = 50;

/// GStreamer-backed source for a V4L2 camera or any file `decodebin` can play
pub struct GstSource {
    mode: SourceMode,
    label: String,
    pipeline: Pipeline,
    appsink: AppSink,
    encoder: FrameEncoder,
    last_frame: Option<EncodedFrame>,
    next_id: u64,
    closed: bool,
}

impl GstSource {
    pub fn open_device(index: u32, config: &CaptureConfig) -> Result<Self, CaptureError> {
        let device = format!("/dev/video{}", index);
        check_readable(Path::new(&device))?;

        let desc = format!(
            "v4l2src device={} ! videoconvert ! videoscale ! \
             video/x-raw,format=RGB,width={},height={} ! \
             appsink name=sink sync=false max-buffers=1 drop=true",
            device, config.width, config.height
        );

        Self::launch(SourceMode::Live, device, &desc, config)
    }

    pub fn open_file(path: PathBuf, config: &CaptureConfig) -> Result<Self, CaptureError> {
        check_readable(&path)?;

        // sync=true plays the file at its own pace; sampling takes whatever is current
        let desc = format!(
            "filesrc location=\"{}\" ! decodebin ! videoconvert ! videoscale ! \
             video/x-raw,format=RGB,width={},height={} ! \
             appsink name=sink sync=true max-buffers=1 drop=true",
            path.display(),
            config.width,
            config.height
        );

        Self::launch(SourceMode::File, path.display().to_string(), &desc, config)
    }

    fn launch(
        mode: SourceMode,
        label: String,
        desc: &str,
        config: &CaptureConfig,
    ) -> Result<Self, CaptureError> {
        gstreamer::init().map_err(|e| CaptureError::Device {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;

        info!("Creating GStreamer pipeline: {}", desc);

        let pipeline = gstreamer::parse::launch(desc)
            .map_err(|e| CaptureError::Device {
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| CaptureError::Device {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| CaptureError::Device {
                details: "Pipeline has no appsink".to_string(),
            })?
            .downcast::<AppSink>()
            .map_err(|_| CaptureError::Device {
                details: "Sink element is not an AppSink".to_string(),
            })?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| CaptureError::Device {
                details: format!("Failed to start pipeline for {}: {}", label, e),
            })?;

        info!("GStreamer {} source {} started", mode, label);

        Ok(Self {
            mode,
            label,
            pipeline,
            appsink,
            encoder: FrameEncoder::from_config(config),
            last_frame: None,
            next_id: 0,
            closed: false,
        })
    }

    fn convert_sample(&mut self, sample: gstreamer::Sample) -> Result<EncodedFrame, CaptureError> {
        let buffer = sample.buffer().ok_or_else(|| CaptureError::Decode {
            details: "No buffer in sample".to_string(),
        })?;
        let caps = sample.caps().ok_or_else(|| CaptureError::Decode {
            details: "No caps in sample".to_string(),
        })?;
        let info = VideoInfo::from_caps(caps).map_err(|e| CaptureError::Decode {
            details: format!("Failed to get video info: {}", e),
        })?;
        let map = buffer.map_readable().map_err(|e| CaptureError::Decode {
            details: format!("Failed to map buffer: {}", e),
        })?;

        let width = info.width();
        let height = info.height();
        let stride = info.stride()[0] as usize;
        let row = width as usize * 3;

        // Rows may be padded; repack to tight RGB
        let mut data = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            let start = y * stride;
            let end = start + row;
            if end > map.len() {
                return Err(CaptureError::Decode {
                    details: format!("buffer too short for {}x{} RGB", width, height),
                });
            }
            data.extend_from_slice(&map[start..end]);
        }

        let frame_id = self.next_id;
        self.next_id += 1;
        let frame = FrameData::new(
            frame_id,
            SystemTime::now(),
            data,
            width,
            height,
            FrameFormat::Rgb24,
        );

        self.encoder.encode(&frame)
    }
}

fn check_readable(path: &Path) -> Result<(), CaptureError> {
    match std::fs::File::open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CaptureError::SourceNotFound {
            path: path.display().to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(CaptureError::PermissionDenied {
                device: path.display().to_string(),
            })
        }
        Err(e) => Err(CaptureError::Device {
            details: format!("{}: {}", path.display(), e),
        }),
    }
}

impl FrameSource for GstSource {
    fn mode(&self) -> SourceMode {
        self.mode
    }

    fn sample(&mut self) -> Result<Sample, CaptureError> {
        if self.closed {
            return Ok(Sample::EndOfStream);
        }

        match self
            .appsink
            .try_pull_sample(ClockTime::from_mseconds(PULL_TIMEOUT_MS))
        {
            Some(sample) => {
                let frame = self.convert_sample(sample)?;
                trace!("Sampled frame {} from {}", frame.id, self.label);
                self.last_frame = Some(frame.clone());
                Ok(Sample::Frame(frame))
            }
            None if self.mode == SourceMode::File && self.appsink.is_eos() => {
                debug!("{} reached end of stream", self.label);
                Ok(Sample::EndOfStream)
            }
            None => match &self.last_frame {
                Some(frame) => Ok(Sample::Frame(frame.clone())),
                None => Err(CaptureError::Device {
                    details: format!("no frame available yet from {}", self.label),
                }),
            },
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!("Failed to stop pipeline for {}: {}", self.label, e);
        }
        info!("GStreamer source {} closed", self.label);
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn describe(&self) -> String {
        format!("{} {}", self.mode, self.label)
    }
}

impl Drop for GstSource {
    fn drop(&mut self) {
        self.close();
    }
}
