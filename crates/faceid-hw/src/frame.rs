//! Frame type and pixel conversion: YUYV to RGB, cropping, dark detection.

use image::RgbImage;

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB8 pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl Frame {
    /// Build a frame from packed RGB8 data.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let expected = (width * height * 3) as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.data.chunks_exact(3).map(luma).sum();
        sum / (self.data.len() / 3) as f32
    }

    /// Cut out a `width × height` region at (`x`, `y`), clamped to the frame.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Frame {
        let x0 = x.min(self.width);
        let y0 = y.min(self.height);
        let w = width.min(self.width - x0);
        let h = height.min(self.height - y0);

        let src_stride = self.width as usize * 3;
        let row_bytes = w as usize * 3;
        let mut data = Vec::with_capacity(row_bytes * h as usize);
        for row in y0..y0 + h {
            let start = row as usize * src_stride + x0 as usize * 3;
            data.extend_from_slice(&self.data[start..start + row_bytes]);
        }

        Frame {
            data,
            width: w,
            height: h,
            timestamp: self.timestamp,
            sequence: self.sequence,
        }
    }

    /// View the frame as an `image` buffer. `None` for an empty crop.
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        RgbImage::from_raw(self.width, self.height, self.data.clone())
    }
}

fn luma(px: &[u8]) -> f32 {
    0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32
}

/// Convert packed YUYV (4:2:2) to RGB8 using BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}

/// Check if an RGB frame is dark.
///
/// Returns true if more than `threshold_pct` of pixels have luma below 32.
pub fn is_dark_frame(rgb: &[u8], threshold_pct: f32) -> bool {
    let pixels = rgb.len() / 3;
    if pixels == 0 {
        return true;
    }
    let dark_count = rgb.chunks_exact(3).filter(|px| luma(px) < 32.0).count();
    (dark_count as f32 / pixels as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> Frame {
        let mut data = Vec::new();
        for y in 0..h {
            for x in 0..w {
                data.extend_from_slice(&[x as u8, y as u8, 0]);
            }
        }
        Frame::from_rgb(data, w, h, 0).unwrap()
    }

    #[test]
    fn test_yuyv_white_and_black() {
        // 2x1 image: white then black, neutral chroma
        let yuyv = vec![235, 128, 16, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![255, 255, 255, 0, 0, 0]);
    }

    #[test]
    fn test_yuyv_output_length() {
        let yuyv: Vec<u8> = (0..16).collect();
        let rgb = yuyv_to_rgb(&yuyv, 4, 2).unwrap();
        assert_eq!(rgb.len(), 4 * 2 * 3);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128];
        assert!(yuyv_to_rgb(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_from_rgb_rejects_bad_length() {
        assert!(Frame::from_rgb(vec![0; 5], 1, 2, 0).is_err());
    }

    #[test]
    fn test_crop_region() {
        let frame = gradient(10, 8);
        let cropped = frame.crop(2, 3, 4, 2);
        assert_eq!((cropped.width, cropped.height), (4, 2));
        // First pixel comes from (2, 3)
        assert_eq!(&cropped.data[..3], &[2, 3, 0]);
        // Last pixel comes from (5, 4)
        assert_eq!(&cropped.data[cropped.data.len() - 3..], &[5, 4, 0]);
    }

    #[test]
    fn test_crop_clamped_to_bounds() {
        let frame = gradient(10, 8);
        let cropped = frame.crop(8, 6, 250, 250);
        assert_eq!((cropped.width, cropped.height), (2, 2));

        let outside = frame.crop(20, 20, 5, 5);
        assert_eq!((outside.width, outside.height), (0, 0));
        assert!(outside.to_rgb_image().is_none());
    }

    #[test]
    fn test_to_rgb_image() {
        let frame = gradient(3, 2);
        let img = frame.to_rgb_image().unwrap();
        assert_eq!(img.dimensions(), (3, 2));
        assert_eq!(img.get_pixel(2, 1).0, [2, 1, 0]);
    }

    #[test]
    fn test_dark_frame() {
        assert!(is_dark_frame(&[0u8; 300], 0.95));
        assert!(!is_dark_frame(&[128u8; 300], 0.95));
        assert!(is_dark_frame(&[], 0.95));
    }

    #[test]
    fn test_avg_brightness() {
        let frame = Frame::from_rgb(vec![100; 12], 2, 2, 0).unwrap();
        assert!((frame.avg_brightness() - 100.0).abs() < 0.01);
    }
}
