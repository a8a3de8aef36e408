use super::*;
use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::frame::FrameEncoder;
use std::sync::atomic::Ordering;

fn create_test_capture_config() -> CaptureConfig {
    CaptureConfig {
        device_index: 0,
        width: 32,
        height: 24,
        jpeg_quality: 70,
        live_fps: 10,
        file_fps: 30,
    }
}

fn write_png(path: &std::path::Path, shade: u8) {
    let image = image::RgbImage::from_pixel(16, 12, image::Rgb([shade, shade, shade]));
    image.save(path).unwrap();
}

#[test]
fn test_image_sequence_plays_in_name_order_then_ends() {
    let dir = tempfile::tempdir().unwrap();
    write_png(&dir.path().join("002.png"), 200);
    write_png(&dir.path().join("001.png"), 10);
    std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

    let mut source =
        ImageSequenceSource::open(dir.path().to_path_buf(), &create_test_capture_config()).unwrap();
    assert_eq!(source.frame_count(), 2);
    assert_eq!(source.mode(), SourceMode::File);

    let first = match source.sample().unwrap() {
        Sample::Frame(frame) => frame,
        Sample::EndOfStream => panic!("expected a frame"),
    };
    assert_eq!(first.id, 0);
    assert_eq!((first.width, first.height), (32, 24));

    assert!(matches!(source.sample().unwrap(), Sample::Frame(_)));
    assert!(matches!(source.sample().unwrap(), Sample::EndOfStream));
    // Stays ended
    assert!(matches!(source.sample().unwrap(), Sample::EndOfStream));
}

#[test]
fn test_missing_source_is_capture_error() {
    let config = create_test_capture_config();
    let result = open_source(
        SourceMode::File,
        &CaptureTarget::Path("/definitely/not/here".into()),
        &config,
    );
    assert!(matches!(result, Err(CaptureError::SourceNotFound { .. })));
}

#[test]
fn test_empty_directory_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let result = ImageSequenceSource::open(dir.path().to_path_buf(), &create_test_capture_config());
    assert!(matches!(result, Err(CaptureError::SourceNotFound { .. })));
}

#[test]
fn test_single_file_must_be_a_still_image() {
    let dir = tempfile::tempdir().unwrap();
    let clip = dir.path().join("workout.mp4");
    std::fs::write(&clip, b"\x00\x00\x00\x18ftypmp42").unwrap();
    let result = ImageSequenceSource::open(clip, &create_test_capture_config());
    assert!(matches!(result, Err(CaptureError::Decode { .. })));

    let still = dir.path().join("pose.png");
    write_png(&still, 80);
    let source = ImageSequenceSource::open(still, &create_test_capture_config()).unwrap();
    assert_eq!(source.frame_count(), 1);
}

#[test]
fn test_file_mode_rejects_device_target() {
    let config = create_test_capture_config();
    let result = open_source(SourceMode::File, &CaptureTarget::Device(0), &config);
    assert!(result.is_err());
}

#[test]
fn test_pattern_source_live_never_ends() {
    let mut source = TestPatternSource::new(FrameEncoder::new(16, 16, 60));
    assert_eq!(source.mode(), SourceMode::Live);
    for _ in 0..5 {
        assert!(matches!(source.sample().unwrap(), Sample::Frame(_)));
    }
    assert_eq!(source.frames_produced(), 5);
}

#[test]
fn test_pattern_source_with_limit_ends() {
    let mut source = TestPatternSource::new(FrameEncoder::new(16, 16, 60)).with_limit(2);
    assert_eq!(source.mode(), SourceMode::File);
    assert!(matches!(source.sample().unwrap(), Sample::Frame(_)));
    assert!(matches!(source.sample().unwrap(), Sample::Frame(_)));
    assert!(matches!(source.sample().unwrap(), Sample::EndOfStream));
}

#[test]
fn test_guard_releases_device_exactly_once() {
    let source = TestPatternSource::new(FrameEncoder::new(16, 16, 60));
    let closes = source.close_counter();
    let mut guard = SourceGuard::new(Box::new(source));

    assert!(guard.release());
    assert!(!guard.release());
    assert!(guard.is_released());
    assert!(matches!(guard.sample().unwrap(), Sample::EndOfStream));

    drop(guard);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_guard_drop_releases_device() {
    let source = TestPatternSource::new(FrameEncoder::new(16, 16, 60));
    let closes = source.close_counter();
    {
        let _guard = SourceGuard::new(Box::new(source));
    }
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_fps_per_mode() {
    let config = create_test_capture_config();
    assert_eq!(SourceMode::Live.fps(&config), 10);
    assert_eq!(SourceMode::File.fps(&config), 30);
}
