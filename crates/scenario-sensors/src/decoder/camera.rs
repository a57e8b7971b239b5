//! Camera payload decoding (JPEG / PNG)

use image::{ImageFormat, Rgb, RgbImage};

use crate::errors::DecodeError;
use crate::models::ChannelKind;

/// Decoded camera frame as an RGB8 pixel grid
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pixels: RgbImage,
}

impl DecodedImage {
    pub fn from_rgb(pixels: RgbImage) -> Self {
        Self { pixels }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    /// Pixel at column `x`, row `y`; `None` outside the grid
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        self.pixels.get_pixel_checked(x, y).map(|Rgb(rgb)| *rgb)
    }
}

pub(crate) fn decode_camera(bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
    let fail = |reason: String| DecodeError::new(ChannelKind::Camera, bytes.len(), reason);

    if bytes.is_empty() {
        return Err(fail("empty payload".to_string()));
    }

    let format = image::guess_format(bytes)
        .map_err(|e| fail(format!("unrecognised image format: {e}")))?;
    if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png) {
        return Err(fail(format!("unsupported camera image format {format:?}")));
    }

    let img = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| fail(format!("failed to decode {format:?} image: {e}")))?;

    Ok(DecodedImage::from_rgb(img.to_rgb8()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode(img: &RgbImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), format)
            .expect("Failed to encode test image");
        bytes
    }

    #[test]
    fn test_decode_png_preserves_pixels() -> Result<(), Box<dyn std::error::Error>> {
        let mut img = RgbImage::new(3, 2);
        img.put_pixel(2, 1, Rgb([10, 200, 30]));

        let decoded = decode_camera(&encode(&img, ImageFormat::Png))?;
        assert_eq!((decoded.width(), decoded.height()), (3, 2));
        assert_eq!(decoded.pixel(2, 1), Some([10, 200, 30]));
        assert_eq!(decoded.pixel(0, 0), Some([0, 0, 0]));
        assert_eq!(decoded.pixel(3, 0), None);
        Ok(())
    }

    #[test]
    fn test_decode_jpeg_dimensions() -> Result<(), Box<dyn std::error::Error>> {
        let img = RgbImage::from_pixel(16, 8, Rgb([128, 128, 128]));
        let decoded = decode_camera(&encode(&img, ImageFormat::Jpeg))?;
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
        Ok(())
    }

    #[test]
    fn test_truncated_png_is_rejected() {
        let img = RgbImage::from_pixel(32, 32, Rgb([1, 2, 3]));
        let bytes = encode(&img, ImageFormat::Png);
        let truncated = &bytes[..bytes.len() / 2];

        let err = decode_camera(truncated).expect_err("truncated PNG must not decode");
        assert_eq!(err.kind, ChannelKind::Camera);
        assert_eq!(err.byte_length, truncated.len());
    }

    #[test]
    fn test_garbage_is_rejected() {
        let err = decode_camera(b"definitely not an image").expect_err("garbage must not decode");
        assert_eq!(err.byte_length, 23);
    }
}
