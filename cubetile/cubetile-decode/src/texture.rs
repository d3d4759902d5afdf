//! Tile image decoding.
//!
//! Tiles are served as JPEG, PNG or WebP. All of them are decoded to
//! straight RGBA8 pixel data suitable for GPU upload.

use image::ImageFormat;

use crate::error::{DecodeError, DecodeResult};

/// Tile image format indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileFormat {
    /// JPEG-compressed RGB data.
    Jpeg,
    /// PNG data, possibly with alpha.
    Png,
    /// WebP data (lossy or lossless).
    WebP,
}

impl TileFormat {
    /// Human-readable name used in error contexts.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::WebP => "webp",
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Png => ImageFormat::Png,
            Self::WebP => ImageFormat::WebP,
        }
    }
}

/// Decoded RGBA tile image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// RGBA pixel data (4 bytes per pixel), rows top to bottom.
    pub pixels: Vec<u8>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl DecodedImage {
    /// Create a decoded image from raw RGBA pixels.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::SizeMismatch`] if `pixels` is not
    /// `width * height * 4` bytes long.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> DecodeResult<Self> {
        let expected = (width as usize) * (height as usize) * 4;
        if pixels.len() != expected {
            return Err(DecodeError::SizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    /// Size of the pixel buffer in bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

/// Detect the tile format from the data signature.
pub fn detect_format(data: &[u8]) -> DecodeResult<TileFormat> {
    if data.len() < 4 {
        return Err(DecodeError::BufferTooSmall {
            expected: 4,
            actual: data.len(),
        });
    }

    // JPEG starts with 0xFFD8.
    if data[0] == 0xFF && data[1] == 0xD8 {
        return Ok(TileFormat::Jpeg);
    }

    if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Ok(TileFormat::Png);
    }

    // RIFF container with a WEBP form type at offset 8.
    if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return Ok(TileFormat::WebP);
    }

    Err(DecodeError::UnknownFormat)
}

/// Decode tile bytes in a known format to RGBA.
pub fn decode_with_format(data: &[u8], format: TileFormat) -> DecodeResult<DecodedImage> {
    let image = image::load_from_memory_with_format(data, format.image_format()).map_err(|e| {
        DecodeError::InvalidImage {
            context: format.name(),
            detail: e.to_string(),
        }
    })?;
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    DecodedImage::new(rgba.into_raw(), width, height)
}

/// Decode tile bytes to RGBA, sniffing the format from the signature.
pub fn decode_image(data: &[u8]) -> DecodeResult<DecodedImage> {
    decode_with_format(data, detect_format(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode_png(width: u32, height: u32, pixels: Vec<u8>) -> Vec<u8> {
        let image = image::RgbaImage::from_raw(width, height, pixels).unwrap();
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(image)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_detect_format_jpeg() {
        let jpeg_header = [0xFF, 0xD8, 0xFF, 0xE0];
        assert_eq!(detect_format(&jpeg_header).unwrap(), TileFormat::Jpeg);
    }

    #[test]
    fn test_detect_format_webp() {
        let mut header = Vec::new();
        header.extend_from_slice(b"RIFF");
        header.extend_from_slice(&[0x24, 0, 0, 0]);
        header.extend_from_slice(b"WEBPVP8 ");
        assert_eq!(detect_format(&header).unwrap(), TileFormat::WebP);
    }

    #[test]
    fn test_detect_format_riff_without_webp() {
        let mut header = Vec::new();
        header.extend_from_slice(b"RIFF");
        header.extend_from_slice(&[0x24, 0, 0, 0]);
        header.extend_from_slice(b"WAVE");
        assert_eq!(detect_format(&header), Err(DecodeError::UnknownFormat));
    }

    #[test]
    fn test_detect_format_too_small() {
        let result = detect_format(&[0xFF]);
        assert!(matches!(result, Err(DecodeError::BufferTooSmall { .. })));
    }

    #[test]
    fn test_decode_png_to_rgba() {
        let pixels = vec![
            255, 0, 0, 255, //
            0, 255, 0, 255, //
            0, 0, 255, 255, //
            255, 255, 255, 0,
        ];
        let data = encode_png(2, 2, pixels.clone());

        let decoded = decode_image(&data).unwrap();
        assert_eq!(decoded.width, 2);
        assert_eq!(decoded.height, 2);
        assert_eq!(decoded.pixels, pixels);
        assert_eq!(decoded.byte_len(), 16);
    }

    #[test]
    fn test_decode_truncated_jpeg_fails() {
        let data = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
        let result = decode_image(&data);
        assert!(matches!(
            result,
            Err(DecodeError::InvalidImage {
                context: "jpeg",
                ..
            })
        ));
    }

    #[test]
    fn test_decoded_image_rejects_bad_length() {
        assert!(DecodedImage::new(vec![0; 16], 2, 2).is_ok());
        assert_eq!(
            DecodedImage::new(vec![0; 15], 2, 2),
            Err(DecodeError::SizeMismatch {
                expected: 16,
                actual: 15
            })
        );
    }

    proptest! {
        #[test]
        fn detect_format_never_panics(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = detect_format(&data);
        }
    }
}
