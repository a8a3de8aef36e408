#[cfg(all(feature = "camera", target_os = "linux"))]
mod gst;
mod image_dir;
mod pattern;
mod source;
#[cfg(test)]
mod tests;

#[cfg(all(feature = "camera", target_os = "linux"))]
pub use gst::GstSource;
pub use image_dir::ImageSequenceSource;
pub use pattern::TestPatternSource;
pub use source::{open_source, CaptureTarget, FrameSource, Sample, SourceGuard, SourceMode};
