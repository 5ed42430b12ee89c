use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, ImageReader, RgbaImage};
use std::io::Cursor;

/// Container format of an encoded camera frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// Lossless still used for page captures sent to text analysis.
    Png,
    /// Reduced-quality frame used for the detection socket.
    Jpeg,
}

impl FrameFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            FrameFormat::Png => "image/png",
            FrameFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            FrameFormat::Png => "png",
            FrameFormat::Jpeg => "jpg",
        }
    }
}

/// A camera frame serialised for transport, with capture metadata.
///
/// Socket framing is the bare base64 of `data` with no envelope; a
/// `data:<mime>;base64,` prefix is tolerated on the way in.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub format: FrameFormat,
    pub data: Vec<u8>,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl EncodedFrame {
    /// Encode a rendered frame as PNG.
    pub fn png(image: &RgbaImage, captured_at_ms: i64, seq: u64) -> Result<Self, FrameError> {
        let mut data = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut data), ImageFormat::Png)
            .map_err(|e| FrameError::Encode(e.to_string()))?;
        Ok(Self {
            format: FrameFormat::Png,
            data,
            captured_at_ms,
            seq,
        })
    }

    /// Encode a rendered frame as JPEG at `quality` (1..=100). Alpha is dropped.
    pub fn jpeg(
        image: &RgbaImage,
        quality: u8,
        captured_at_ms: i64,
        seq: u64,
    ) -> Result<Self, FrameError> {
        let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
        let mut data = Vec::new();
        JpegEncoder::new_with_quality(&mut data, quality.clamp(1, 100))
            .encode_image(&rgb)
            .map_err(|e| FrameError::Encode(e.to_string()))?;
        Ok(Self {
            format: FrameFormat::Jpeg,
            data,
            captured_at_ms,
            seq,
        })
    }

    /// Wrap already-encoded bytes (e.g. a file picked for manual upload).
    pub fn from_bytes(data: Vec<u8>, captured_at_ms: i64, seq: u64) -> Result<Self, FrameError> {
        let format = match image::guess_format(&data) {
            Ok(ImageFormat::Png) => FrameFormat::Png,
            Ok(ImageFormat::Jpeg) => FrameFormat::Jpeg,
            Ok(other) => return Err(FrameError::UnsupportedFormat(format!("{other:?}"))),
            Err(e) => return Err(FrameError::UnsupportedFormat(e.to_string())),
        };
        Ok(Self {
            format,
            data,
            captured_at_ms,
            seq,
        })
    }

    /// Decode the payload back into pixels.
    pub fn decode(&self) -> Result<RgbaImage, FrameError> {
        decode_image(&self.data)
    }

    /// Base64 text as sent on the detection socket.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }

    /// File name used for multipart uploads, e.g. `image.png`.
    pub fn file_name(&self) -> String {
        format!("image.{}", self.format.extension())
    }
}

/// Decode any PNG/JPEG payload into RGBA pixels.
pub fn decode_image(data: &[u8]) -> Result<RgbaImage, FrameError> {
    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| FrameError::Decode(e.to_string()))?
        .decode()
        .map_err(|e| FrameError::Decode(e.to_string()))?;
    Ok(img.to_rgba8())
}

/// Decode a socket payload: bare base64, or a data URL carrying base64.
pub fn decode_base64_payload(text: &str) -> Result<Vec<u8>, FrameError> {
    let text = text.trim();
    let body = match text.split_once(',') {
        Some((header, body)) if header.starts_with("data:") => body,
        _ => text,
    };
    if body.is_empty() {
        return Err(FrameError::Empty);
    }
    STANDARD
        .decode(body)
        .map_err(|e| FrameError::Base64(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame payload is empty")]
    Empty,
    #[error("invalid base64 frame payload: {0}")]
    Base64(String),
    #[error("failed to decode frame: {0}")]
    Decode(String),
    #[error("failed to encode frame: {0}")]
    Encode(String),
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn checker(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        })
    }

    #[test]
    fn png_keeps_dimensions_and_pixels() {
        let img = checker(32, 16);
        let frame = EncodedFrame::png(&img, 1_708_300_000_000, 3).unwrap();
        assert_eq!(frame.format, FrameFormat::Png);
        assert_eq!(frame.file_name(), "image.png");
        let decoded = frame.decode().unwrap();
        assert_eq!(decoded, img);
    }

    #[test]
    fn jpeg_payload_is_detected_from_bytes() {
        let frame = EncodedFrame::jpeg(&checker(40, 24), 50, 0, 0).unwrap();
        let sniffed = EncodedFrame::from_bytes(frame.data.clone(), 0, 1).unwrap();
        assert_eq!(sniffed.format, FrameFormat::Jpeg);
        assert_eq!(sniffed.format.mime_type(), "image/jpeg");
        assert_eq!(sniffed.decode().unwrap().dimensions(), (40, 24));
    }

    #[test]
    fn base64_payload_accepts_data_url_prefix() {
        let frame = EncodedFrame::jpeg(&checker(8, 8), 50, 0, 0).unwrap();
        let bare = frame.to_base64();
        let url = format!("data:image/jpeg;base64,{bare}");
        assert_eq!(decode_base64_payload(&bare).unwrap(), frame.data);
        assert_eq!(decode_base64_payload(&url).unwrap(), frame.data);
    }

    #[test]
    fn empty_and_garbage_payloads_fail() {
        assert!(matches!(decode_base64_payload("  "), Err(FrameError::Empty)));
        assert!(matches!(
            decode_base64_payload("not base64!!"),
            Err(FrameError::Base64(_))
        ));
        assert!(decode_image(b"plain text").is_err());
    }

    #[test]
    fn unknown_bytes_are_rejected_for_upload() {
        assert!(EncodedFrame::from_bytes(b"hello".to_vec(), 0, 0).is_err());
    }
}
