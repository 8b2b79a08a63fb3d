//! Capture boundary.
//!
//! A [`FrameSource`] delivers raw frames at a fixed resolution. A source may
//! fail to produce a usable picture for a tick (dropped buffer, short read);
//! it then returns `Ok(None)` and the pipeline skips the tick instead of
//! forwarding an empty frame to the encoder.

use sei_stamp_codec::VideoFrame;

use crate::error::Result;

/// Producer of raw frames for the pipeline.
pub trait FrameSource: Send {
    /// Capture the next frame. `Ok(None)` means nothing usable this time.
    fn next_frame(&mut self) -> Result<Option<VideoFrame>>;

    /// Frame size in pixels.
    fn resolution(&self) -> (u32, u32);

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>> {
        (**self).next_frame()
    }

    fn resolution(&self) -> (u32, u32) {
        (**self).resolution()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Synthetic BGR source: a diagonal gradient that scrolls every frame.
#[derive(Debug, Clone)]
pub struct TestPatternSource {
    width: u32,
    height: u32,
    frame_index: u64,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_index: 0,
        }
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let shift = self.frame_index as usize;
        let mut bgr = vec![0u8; w * h * 3];
        for y in 0..h {
            let row = &mut bgr[y * w * 3..(y + 1) * w * 3];
            for (x, px) in row.chunks_exact_mut(3).enumerate() {
                px[0] = (x + shift * 4) as u8;
                px[1] = (y + shift * 2) as u8;
                px[2] = ((x + y) / 2 + shift) as u8;
            }
        }
        bgr
    }
}

impl FrameSource for TestPatternSource {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>> {
        let frame = VideoFrame::from_bgr(self.width, self.height, self.render(), self.frame_index);
        self.frame_index += 1;
        Ok(Some(frame))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn describe(&self) -> String {
        format!("test pattern {}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sei_stamp_codec::PixelFormat;

    #[test]
    fn test_pattern_frames() {
        let mut source = TestPatternSource::new(8, 4);
        let a = source.next_frame().unwrap().unwrap();
        let b = source.next_frame().unwrap().unwrap();

        assert_eq!(a.pixel_format, PixelFormat::Bgr);
        assert_eq!(a.data.len(), 8 * 4 * 3);
        assert!(!a.is_empty());
        assert_eq!((a.frame_index, b.frame_index), (0, 1));
        assert_ne!(a.data, b.data);
        assert_eq!(source.resolution(), (8, 4));
    }

    #[test]
    fn test_pattern_is_deterministic() {
        let mut a = TestPatternSource::new(6, 2);
        let mut b = TestPatternSource::new(6, 2);
        for _ in 0..3 {
            assert_eq!(
                a.next_frame().unwrap().unwrap().data,
                b.next_frame().unwrap().unwrap().data
            );
        }
    }

    #[test]
    fn test_boxed_source() {
        let mut source: Box<dyn FrameSource> = Box::new(TestPatternSource::new(4, 2));
        assert!(source.next_frame().unwrap().is_some());
        assert_eq!(source.describe(), "test pattern 4x2");
    }
}
