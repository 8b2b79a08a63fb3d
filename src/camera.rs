//! V4L2 camera source.
//!
//! Opens `/dev/videoN` through the v4l crate and negotiates YUYV first, since
//! it converts to I420 without a decode step, then MJPEG. YUYV buffers are
//! passed on untouched; MJPEG buffers are decoded to RGB with the `image`
//! crate. Buffers that are short or fail to decode are skipped, never
//! forwarded.

use std::io::Cursor;

use sei_stamp_codec::{expected_frame_size, PixelFormat, VideoFrame};
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::error::{Result, StampError};
use crate::source::FrameSource;

const BUFFER_COUNT: u32 = 4;

/// Check VIDIOC_ENUM_FRAMESIZES for `fourcc` at `width`x`height`.
///
/// Drivers that cannot enumerate are assumed to support the size; the
/// following `set_format` has the final word.
fn device_supports_resolution(device: &Device, fourcc: FourCC, width: u32, height: u32) -> bool {
    let framesizes = match device.enum_framesizes(fourcc) {
        Ok(sizes) if !sizes.is_empty() => sizes,
        _ => return true,
    };
    framesizes.into_iter().any(|fs| match fs.size {
        FrameSizeEnum::Discrete(d) => d.width == width && d.height == height,
        FrameSizeEnum::Stepwise(s) => {
            let w_ok = width >= s.min_width
                && width <= s.max_width
                && (s.step_width == 0 || (width - s.min_width) % s.step_width == 0);
            let h_ok = height >= s.min_height
                && height <= s.max_height
                && (s.step_height == 0 || (height - s.min_height) % s.step_height == 0);
            w_ok && h_ok
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureFormat {
    Yuyv,
    Mjpeg,
}

/// A V4L2 capture device delivering frames to the pipeline.
pub struct CameraSource {
    stream: Stream<'static>,
    path: String,
    width: u32,
    height: u32,
    format: CaptureFormat,
    frame_index: u64,
    skipped: u64,
}

// v4l streams hold raw mmap pointers but no thread-affine state.
unsafe impl Send for CameraSource {}

impl CameraSource {
    /// Open `/dev/video{index}`.
    pub fn open(index: u32, width: u32, height: u32, fps: u32) -> Result<Self> {
        Self::open_path(&format!("/dev/video{}", index), width, height, fps)
    }

    /// Open a device by path and start streaming.
    ///
    /// The device must accept exactly `width`x`height`; the stream
    /// resolution is fixed for the session.
    pub fn open_path(path: &str, width: u32, height: u32, fps: u32) -> Result<Self> {
        let unavailable = |e: std::io::Error| StampError::DeviceUnavailable(format!("{}: {}", path, e));

        let device = Device::with_path(path).map_err(unavailable)?;
        let (format, capture_format) = Self::negotiate(&device, width, height)?;
        if (format.width, format.height) != (width, height) {
            return Err(StampError::DeviceUnavailable(format!(
                "{}: requested {}x{}, device offers {}x{}",
                path, width, height, format.width, format.height
            )));
        }
        if let Err(e) = device.set_params(&Parameters::with_fps(fps)) {
            debug!("{}: could not set {} fps: {}", path, fps, e);
        }

        // The mmap stream borrows the device for its whole life.
        let device = Box::leak(Box::new(device));
        let stream = Stream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT).map_err(unavailable)?;

        info!(
            "camera {} opened: {}x{} {:?}",
            path, width, height, capture_format
        );
        Ok(Self {
            stream,
            path: path.to_string(),
            width,
            height,
            format: capture_format,
            frame_index: 0,
            skipped: 0,
        })
    }

    fn negotiate(device: &Device, width: u32, height: u32) -> Result<(v4l::Format, CaptureFormat)> {
        let yuyv = FourCC::new(b"YUYV");
        let mjpg = FourCC::new(b"MJPG");

        let mut format = device
            .format()
            .map_err(|e| StampError::DeviceUnavailable(e.to_string()))?;
        format.width = width;
        format.height = height;

        if device_supports_resolution(device, yuyv, width, height) {
            format.fourcc = yuyv;
            if let Ok(f) = device.set_format(&format) {
                if f.fourcc == yuyv {
                    return Ok((f, CaptureFormat::Yuyv));
                }
            }
        }

        // Cameras often scale MJPEG to sizes they do not enumerate.
        format.fourcc = mjpg;
        if let Ok(f) = device.set_format(&format) {
            if f.fourcc == mjpg {
                return Ok((f, CaptureFormat::Mjpeg));
            }
        }

        Err(StampError::DeviceUnavailable(format!(
            "no YUYV or MJPEG mode at {}x{}",
            width, height
        )))
    }

    /// Buffers dropped so far because they were short or undecodable.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn skip(&mut self, reason: &str) -> Option<VideoFrame> {
        self.skipped += 1;
        warn!("{}: skipping frame ({})", self.path, reason);
        None
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>> {
        let (width, height) = (self.width, self.height);
        let data = match self.stream.next() {
            Ok((data, _meta)) => data.to_vec(),
            Err(e) => return Err(StampError::DeviceUnavailable(format!("{}: {}", self.path, e))),
        };

        let frame = match self.format {
            CaptureFormat::Yuyv => {
                let expected = expected_frame_size(width, height, PixelFormat::Yuyv);
                if data.len() < expected {
                    return Ok(self.skip(&format!("{} of {} bytes", data.len(), expected)));
                }
                VideoFrame::from_yuyv(width, height, data[..expected].to_vec(), self.frame_index)
            }
            CaptureFormat::Mjpeg => match mjpeg_to_rgb(&data) {
                Ok((w, h, rgb)) if (w, h) == (width, height) => {
                    VideoFrame::from_rgb(width, height, rgb, self.frame_index)
                }
                Ok((w, h, _)) => return Ok(self.skip(&format!("decoded {}x{}", w, h))),
                Err(e) => return Ok(self.skip(&e.to_string())),
            },
        };

        self.frame_index += 1;
        Ok(Some(frame))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn describe(&self) -> String {
        format!("{} {}x{} {:?}", self.path, self.width, self.height, self.format)
    }
}

fn mjpeg_to_rgb(data: &[u8]) -> std::result::Result<(u32, u32, Vec<u8>), image::ImageError> {
    if data.is_empty() {
        return Err(image::ImageError::IoError(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "empty buffer",
        )));
    }
    let img = image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .decode()?
        .to_rgb8();
    Ok((img.width(), img.height(), img.into_raw()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mjpeg_decode() {
        let img = image::RgbImage::from_pixel(4, 2, image::Rgb([200, 10, 10]));
        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90)
            .encode_image(&img)
            .unwrap();

        let (w, h, rgb) = mjpeg_to_rgb(&jpeg).unwrap();
        assert_eq!((w, h), (4, 2));
        assert_eq!(rgb.len(), 4 * 2 * 3);
    }

    #[test]
    fn test_mjpeg_garbage_is_error() {
        assert!(mjpeg_to_rgb(&[]).is_err());
        assert!(mjpeg_to_rgb(&[0xFF, 0xD8, 0x00]).is_err());
    }

    #[test]
    fn test_missing_device() {
        assert!(matches!(
            CameraSource::open_path("/dev/does-not-exist", 640, 480, 30),
            Err(StampError::DeviceUnavailable(_))
        ));
    }
}
