//! Frame type and pixel conversions: YUYV/GREY to RGB, box overlay, JPEG payloads.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use std::time::Instant;

pub const PASS_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
pub const REJECT_COLOR: Rgb<u8> = Rgb([220, 0, 0]);

/// A captured RGB frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at: Instant,
    pub sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            captured_at: Instant::now(),
            sequence,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("sequence", &self.sequence)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

/// Byte length of a packed frame with `channels` bytes per pixel, computed in `usize`.
pub fn packed_len(width: u32, height: u32, channels: usize) -> usize {
    width as usize * height as usize * channels
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = packed_len(width, height, 2);
    if yuyv.len() < expected || width % 2 != 0 {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(packed_len(width, height, 3));
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (u, v) = (chunk[1], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(chunk[0], u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(chunk[2], u, v));
    }
    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: yuyv.len(),
    })
}

/// Replicate an 8-bit grayscale buffer into three channels.
pub fn grey_to_rgb(gray: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = packed_len(width, height, 1);
    if gray.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: gray.len(),
        });
    }
    let rgb = gray[..expected].iter().flat_map(|&g| [g, g, g]).collect();
    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: gray.len(),
    })
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = (y as f32 - 16.0) * 1.164;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    [
        (c + 1.596 * e).round().clamp(0.0, 255.0) as u8,
        (c - 0.392 * d - 0.813 * e).round().clamp(0.0, 255.0) as u8,
        (c + 2.017 * d).round().clamp(0.0, 255.0) as u8,
    ]
}

/// Outline `[x1, y1, x2, y2]` on `image`, two pixels thick, clipped to the image.
pub fn draw_box(image: &mut RgbImage, corners: [i32; 4], color: Rgb<u8>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
        return;
    }
    let [x1, y1, x2, y2] = corners;
    let x1 = x1.clamp(0, w - 1);
    let x2 = x2.clamp(0, w - 1);
    let y1 = y1.clamp(0, h - 1);
    let y2 = y2.clamp(0, h - 1);

    for t in 0..2 {
        for x in x1..=x2 {
            for y in [y1 + t, y2 - t] {
                if (0..h).contains(&y) {
                    image.put_pixel(x as u32, y as u32, color);
                }
            }
        }
        for y in y1..=y2 {
            for x in [x1 + t, x2 - t] {
                if (0..w).contains(&x) {
                    image.put_pixel(x as u32, y as u32, color);
                }
            }
        }
    }
}

/// JPEG-encode `image` at `quality` (1-100) and wrap it in standard base64.
pub fn encode_jpeg_base64(image: &RgbImage, quality: u8) -> Result<String, FrameError> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100)).encode_image(image)?;
    Ok(BASE64.encode(jpeg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_packed_len_does_not_wrap_at_u32() {
        assert_eq!(packed_len(40_000, 40_000, 3), 4_800_000_000);
        assert_eq!(packed_len(640, 360, 2), 460_800);
    }

    #[test]
    fn test_yuyv_to_rgb_grey_levels() {
        // Neutral chroma: Y maps straight to grey.
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(*rgb.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*rgb.get_pixel(1, 0), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_yuyv_to_rgb_red_dominant() {
        let yuyv = vec![81, 90, 81, 240];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        let p = rgb.get_pixel(0, 0);
        assert!(p[0] > 200 && p[1] < 40 && p[2] < 40, "{p:?}");
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_rgb(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_grey_to_rgb() {
        let rgb = grey_to_rgb(&[7, 200], 2, 1).unwrap();
        assert_eq!(*rgb.get_pixel(0, 0), Rgb([7, 7, 7]));
        assert_eq!(*rgb.get_pixel(1, 0), Rgb([200, 200, 200]));
        assert!(grey_to_rgb(&[1], 2, 1).is_err());
    }

    #[test]
    fn test_draw_box_outline_only() {
        let mut img = RgbImage::new(20, 20);
        draw_box(&mut img, [2, 2, 15, 15], PASS_COLOR);
        assert_eq!(*img.get_pixel(2, 2), PASS_COLOR);
        assert_eq!(*img.get_pixel(15, 10), PASS_COLOR);
        assert_eq!(*img.get_pixel(8, 8), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_draw_box_clips_to_image() {
        let mut img = RgbImage::new(10, 10);
        draw_box(&mut img, [-5, -5, 50, 50], REJECT_COLOR);
        assert_eq!(*img.get_pixel(0, 0), REJECT_COLOR);
        assert_eq!(*img.get_pixel(9, 9), REJECT_COLOR);
    }

    #[test]
    fn test_encode_jpeg_base64_decodes() {
        let img = RgbImage::from_pixel(16, 8, Rgb([10, 120, 240]));
        let encoded = encode_jpeg_base64(&img, 70).unwrap();
        let bytes = BASE64.decode(encoded).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }
}
