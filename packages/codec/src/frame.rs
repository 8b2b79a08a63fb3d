//! Video frame types and conversions.

use crate::{CodecError, PixelFormat, VideoFrameData};

/// A raw video frame with pixel data.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format of the frame data.
    pub pixel_format: PixelFormat,
    /// Raw pixel data.
    pub data: Vec<u8>,
    /// Presentation index assigned by the capture loop.
    pub frame_index: u64,
}

impl VideoFrame {
    /// Create a new video frame.
    #[must_use]
    pub fn new(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        data: Vec<u8>,
        frame_index: u64,
    ) -> Self {
        Self {
            width,
            height,
            pixel_format,
            data,
            frame_index,
        }
    }

    /// Create a frame from RGB data.
    #[must_use]
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>, frame_index: u64) -> Self {
        Self::new(width, height, PixelFormat::Rgb, data, frame_index)
    }

    /// Create a frame from BGR data.
    #[must_use]
    pub fn from_bgr(width: u32, height: u32, data: Vec<u8>, frame_index: u64) -> Self {
        Self::new(width, height, PixelFormat::Bgr, data, frame_index)
    }

    /// Create a frame from YUYV data.
    #[must_use]
    pub fn from_yuyv(width: u32, height: u32, data: Vec<u8>, frame_index: u64) -> Self {
        Self::new(width, height, PixelFormat::Yuyv, data, frame_index)
    }

    /// Expected data size for the current dimensions and pixel format.
    #[must_use]
    pub fn expected_data_size(&self) -> usize {
        expected_frame_size(self.width, self.height, self.pixel_format)
    }

    /// True when the frame carries no usable picture (empty or truncated buffer).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.len() < self.expected_data_size()
    }

    /// Convert this frame to I420 (YUV 4:2:0 planar).
    ///
    /// If the frame is already I420, returns a clone.
    pub fn to_i420(&self) -> Result<VideoFrame, CodecError> {
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(CodecError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        let data = match self.pixel_format {
            PixelFormat::I420 => {
                check_size(&self.data, self.expected_data_size(), "I420")?;
                self.data.clone()
            }
            PixelFormat::Rgb => packed_to_i420(&self.data, self.width, self.height, 0, 2, "RGB")?,
            PixelFormat::Bgr => packed_to_i420(&self.data, self.width, self.height, 2, 0, "BGR")?,
            PixelFormat::Yuyv => yuyv_to_i420(&self.data, self.width, self.height)?,
        };
        Ok(VideoFrame::new(
            self.width,
            self.height,
            PixelFormat::I420,
            data,
            self.frame_index,
        ))
    }

    /// Y, U and V planes of an I420 frame.
    pub fn planes(&self) -> Result<(&[u8], &[u8], &[u8]), CodecError> {
        if self.pixel_format != PixelFormat::I420 {
            return Err(CodecError::UnsupportedPixelFormat(format!(
                "{:?} has no planes",
                self.pixel_format
            )));
        }
        check_size(&self.data, self.expected_data_size(), "I420")?;
        let y_size = (self.width * self.height) as usize;
        let c_size = y_size / 4;
        let (y, rest) = self.data.split_at(y_size);
        let (u, rest) = rest.split_at(c_size);
        Ok((y, u, &rest[..c_size]))
    }
}

impl VideoFrameData for VideoFrame {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn frame_index(&self) -> u64 {
        self.frame_index
    }
}

/// Calculate expected frame size for given dimensions and format.
#[must_use]
pub fn expected_frame_size(width: u32, height: u32, format: PixelFormat) -> usize {
    let pixels = width as usize * height as usize;
    match format {
        PixelFormat::Rgb | PixelFormat::Bgr => pixels * 3,
        PixelFormat::Yuyv => pixels * 2,
        PixelFormat::I420 => pixels + pixels / 2, // Y + U + V (4:2:0)
    }
}

// ============================================================================
// Color conversion functions
// ============================================================================

fn check_size(data: &[u8], expected: usize, name: &str) -> Result<(), CodecError> {
    if data.len() != expected {
        return Err(CodecError::ConversionError(format!(
            "{} data size mismatch: expected {}, got {}",
            name,
            expected,
            data.len()
        )));
    }
    Ok(())
}

/// Convert a packed 24-bit RGB-family buffer to I420.
///
/// `r_off` and `b_off` give the channel positions of red and blue (green is always 1).
fn packed_to_i420(
    src: &[u8],
    width: u32,
    height: u32,
    r_off: usize,
    b_off: usize,
    name: &str,
) -> Result<Vec<u8>, CodecError> {
    let w = width as usize;
    let h = height as usize;
    check_size(src, w * h * 3, name)?;

    let y_size = w * h;
    let c_size = y_size / 4;
    let mut i420 = vec![0u8; y_size + 2 * c_size];

    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) * 3;
            let r = src[idx + r_off] as i32;
            let g = src[idx + 1] as i32;
            let b = src[idx + b_off] as i32;

            // BT.601 conversion
            let y_val = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
            i420[y * w + x] = y_val.clamp(0, 255) as u8;
        }
    }

    // Chroma planes (subsampled 2x2)
    let (_, chroma) = i420.split_at_mut(y_size);
    let (u_plane, v_plane) = chroma.split_at_mut(c_size);
    for y in (0..h).step_by(2) {
        for x in (0..w).step_by(2) {
            let mut r_sum = 0i32;
            let mut g_sum = 0i32;
            let mut b_sum = 0i32;

            for dy in 0..2 {
                for dx in 0..2 {
                    let idx = ((y + dy) * w + (x + dx)) * 3;
                    r_sum += src[idx + r_off] as i32;
                    g_sum += src[idx + 1] as i32;
                    b_sum += src[idx + b_off] as i32;
                }
            }

            let r = r_sum / 4;
            let g = g_sum / 4;
            let b = b_sum / 4;

            let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
            let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;

            let c_idx = (y / 2) * (w / 2) + (x / 2);
            u_plane[c_idx] = u.clamp(0, 255) as u8;
            v_plane[c_idx] = v.clamp(0, 255) as u8;
        }
    }

    Ok(i420)
}

/// Convert YUYV (4:2:2 packed) to I420, averaging chroma across row pairs.
fn yuyv_to_i420(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CodecError> {
    let w = width as usize;
    let h = height as usize;
    check_size(yuyv, w * h * 2, "YUYV")?;

    let y_size = w * h;
    let c_size = y_size / 4;
    let mut i420 = vec![0u8; y_size + 2 * c_size];

    for y in 0..h {
        for x in 0..w {
            i420[y * w + x] = yuyv[(y * w + x) * 2];
        }
    }

    let (_, chroma) = i420.split_at_mut(y_size);
    let (u_plane, v_plane) = chroma.split_at_mut(c_size);
    for y in (0..h).step_by(2) {
        for x in (0..w).step_by(2) {
            let top = (y * w + x) * 2;
            let bottom = ((y + 1) * w + x) * 2;
            let u = (yuyv[top + 1] as u16 + yuyv[bottom + 1] as u16 + 1) / 2;
            let v = (yuyv[top + 3] as u16 + yuyv[bottom + 3] as u16 + 1) / 2;
            let c_idx = (y / 2) * (w / 2) + (x / 2);
            u_plane[c_idx] = u as u8;
            v_plane[c_idx] = v as u8;
        }
    }

    Ok(i420)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_frame_size() {
        assert_eq!(expected_frame_size(640, 480, PixelFormat::Bgr), 640 * 480 * 3);
        assert_eq!(expected_frame_size(640, 480, PixelFormat::Yuyv), 640 * 480 * 2);
        assert_eq!(expected_frame_size(640, 480, PixelFormat::I420), 640 * 480 * 3 / 2);
    }

    #[test]
    fn test_bgr_to_i420() {
        // 2x2 pure red image in BGR order
        let bgr = vec![
            0, 0, 255, // red
            0, 0, 255, // red
            0, 0, 255, // red
            0, 0, 255, // red
        ];

        let frame = VideoFrame::from_bgr(2, 2, bgr, 7).to_i420().unwrap();
        assert_eq!(frame.pixel_format, PixelFormat::I420);
        assert_eq!(frame.frame_index, 7);
        assert_eq!(frame.data.len(), 4 + 1 + 1);

        // Y values should be around 82 for pure red (BT.601)
        assert!(frame.data[0] > 60 && frame.data[0] < 100);
        // V above neutral, U below neutral for red
        assert!(frame.data[5] > 200);
        assert!(frame.data[4] < 128);
    }

    #[test]
    fn test_rgb_and_bgr_agree() {
        let rgb = vec![10, 200, 30, 10, 200, 30, 10, 200, 30, 10, 200, 30];
        let bgr: Vec<u8> = rgb.chunks(3).flat_map(|p| [p[2], p[1], p[0]]).collect();
        let a = VideoFrame::from_rgb(2, 2, rgb, 0).to_i420().unwrap();
        let b = VideoFrame::from_bgr(2, 2, bgr, 0).to_i420().unwrap();
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn test_yuyv_to_i420() {
        // 2x2 YUYV: two rows of (Y0 U Y1 V)
        let yuyv = vec![16, 100, 17, 200, 18, 110, 19, 210];
        let frame = VideoFrame::from_yuyv(2, 2, yuyv, 0).to_i420().unwrap();
        assert_eq!(&frame.data[..4], &[16, 17, 18, 19]);
        assert_eq!(frame.data[4], 105); // U averaged
        assert_eq!(frame.data[5], 205); // V averaged
    }

    #[test]
    fn test_size_mismatch() {
        let frame = VideoFrame::from_bgr(4, 4, vec![0; 10], 0);
        assert!(frame.is_empty());
        assert!(matches!(
            frame.to_i420(),
            Err(CodecError::ConversionError(_))
        ));
    }

    #[test]
    fn test_planes() {
        let frame = VideoFrame::new(4, 2, PixelFormat::I420, (0..12).collect(), 0);
        let (y, u, v) = frame.planes().unwrap();
        assert_eq!(y.len(), 8);
        assert_eq!(u, &[8, 9]);
        assert_eq!(v, &[10, 11]);
    }
}
