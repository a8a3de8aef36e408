use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::trace;

use crate::config::CaptureConfig;
use crate::error::CaptureError;

const JPEG_DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// Pixel layout of a captured frame before encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// Any compressed still the `image` crate can decode (JPEG, PNG)
    Compressed,
    /// Packed 8-bit RGB, row-major
    Rgb24,
}

impl FrameFormat {
    /// Get bytes per pixel for the format
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            FrameFormat::Compressed => 0,
            FrameFormat::Rgb24 => 3,
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, FrameFormat::Compressed)
    }
}

/// A frame as it came off the capture device
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Unique frame identifier within one source
    pub id: u64,
    /// Timestamp when frame was captured
    pub timestamp: SystemTime,
    /// Raw frame data (shared ownership for efficiency)
    pub data: Arc<Vec<u8>>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    pub format: FrameFormat,
}

impl FrameData {
    pub fn new(
        id: u64,
        timestamp: SystemTime,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Self {
        Self {
            id,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    /// Get the expected frame size for uncompressed formats
    pub fn expected_size(&self) -> Option<usize> {
        if self.format.is_compressed() {
            None
        } else {
            Some(self.width as usize * self.height as usize * self.format.bytes_per_pixel())
        }
    }

    /// Validate frame data size against expected size
    pub fn validate_size(&self) -> bool {
        match self.expected_size() {
            Some(expected) => self.data.len() == expected,
            None => true,
        }
    }
}

/// A downscaled JPEG still, ready to go on the wire
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub id: u64,
    pub captured_at: SystemTime,
    pub jpeg: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
}

impl EncodedFrame {
    /// `data:image/jpeg;base64,...` form used by the `frame` message
    pub fn to_data_url(&self) -> String {
        let mut url = String::with_capacity(JPEG_DATA_URL_PREFIX.len() + self.jpeg.len() * 4 / 3 + 4);
        url.push_str(JPEG_DATA_URL_PREFIX);
        STANDARD.encode_string(self.jpeg.as_slice(), &mut url);
        url
    }

    pub fn len(&self) -> usize {
        self.jpeg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }
}

/// Decode a base64 image, with or without a `data:<mime>;base64,` prefix
pub fn decode_image_payload(payload: &str) -> Result<Vec<u8>, CaptureError> {
    let encoded = match payload.split_once(";base64,") {
        Some((scheme, body)) if scheme.starts_with("data:") => body,
        _ => payload,
    };

    STANDARD.decode(encoded.trim()).map_err(|e| CaptureError::Decode {
        details: format!("invalid base64 image payload: {}", e),
    })
}

/// Scales captured frames to the fixed output size and encodes them as JPEG
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    width: u32,
    height: u32,
    quality: u8,
}

impl FrameEncoder {
    pub fn new(width: u32, height: u32, quality: u8) -> Self {
        Self {
            width,
            height,
            quality: quality.clamp(1, 100),
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.width, config.height, config.jpeg_quality)
    }

    pub fn output_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn encode(&self, frame: &FrameData) -> Result<EncodedFrame, CaptureError> {
        let image = match frame.format {
            FrameFormat::Compressed => {
                image::load_from_memory(&frame.data).map_err(|e| CaptureError::Decode {
                    details: format!("frame {}: {}", frame.id, e),
                })?
            }
            FrameFormat::Rgb24 => {
                let buffer = RgbImage::from_raw(frame.width, frame.height, frame.data.to_vec())
                    .ok_or_else(|| CaptureError::Decode {
                        details: format!(
                            "frame {}: {} bytes do not fill {}x{} RGB",
                            frame.id,
                            frame.data.len(),
                            frame.width,
                            frame.height
                        ),
                    })?;
                DynamicImage::ImageRgb8(buffer)
            }
        };

        let encoded = self.encode_image(&image)?;

        trace!(
            "Encoded frame {} ({}x{} -> {}x{}, {} bytes)",
            frame.id,
            frame.width,
            frame.height,
            self.width,
            self.height,
            encoded.len()
        );

        Ok(EncodedFrame {
            id: frame.id,
            captured_at: frame.timestamp,
            jpeg: Arc::new(encoded),
            width: self.width,
            height: self.height,
        })
    }

    fn encode_image(&self, image: &DynamicImage) -> Result<Vec<u8>, CaptureError> {
        let rgb = if image.width() == self.width && image.height() == self.height {
            image.to_rgb8()
        } else {
            image
                .resize_exact(self.width, self.height, FilterType::Triangle)
                .to_rgb8()
        };

        let mut buf = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, self.quality);
        encoder
            .encode_image(&rgb)
            .map_err(|e| CaptureError::Encode {
                details: e.to_string(),
            })?;

        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb_frame(width: u32, height: u32) -> FrameData {
        let data = (0..width * height * 3).map(|i| (i % 251) as u8).collect();
        FrameData::new(7, SystemTime::now(), data, width, height, FrameFormat::Rgb24)
    }

    #[test]
    fn test_frame_size_validation() {
        assert!(rgb_frame(4, 2).validate_size());

        let short = FrameData::new(1, SystemTime::now(), vec![0; 5], 4, 2, FrameFormat::Rgb24);
        assert!(!short.validate_size());

        let jpeg = FrameData::new(2, SystemTime::now(), vec![0; 5], 4, 2, FrameFormat::Compressed);
        assert!(jpeg.validate_size());
    }

    #[test]
    fn test_encoder_downscales_to_fixed_size() {
        let encoder = FrameEncoder::new(32, 24, 70);
        let encoded = encoder.encode(&rgb_frame(64, 48)).unwrap();

        assert_eq!(encoded.id, 7);
        assert_eq!((encoded.width, encoded.height), (32, 24));

        let decoded = image::load_from_memory(&encoded.jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn test_encoder_rejects_truncated_rgb() {
        let encoder = FrameEncoder::new(32, 24, 70);
        let broken = FrameData::new(3, SystemTime::now(), vec![0; 10], 64, 48, FrameFormat::Rgb24);
        assert!(matches!(
            encoder.encode(&broken),
            Err(CaptureError::Decode { .. })
        ));
    }

    #[test]
    fn test_data_url_shape() {
        let encoder = FrameEncoder::new(8, 8, 50);
        let encoded = encoder.encode(&rgb_frame(8, 8)).unwrap();
        let url = encoded.to_data_url();

        assert!(url.starts_with("data:image/jpeg;base64,"));
        assert_eq!(decode_image_payload(&url).unwrap(), *encoded.jpeg);
    }

    #[test]
    fn test_decode_bare_base64() {
        assert_eq!(decode_image_payload("AAEC").unwrap(), vec![0, 1, 2]);
        assert!(decode_image_payload("data:image/png;base64,@@").is_err());
    }
}
