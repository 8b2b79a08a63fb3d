//! Core types for the encoder boundary.

use crate::CodecError;

/// Pixel format for raw video frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// RGB with 8 bits per channel (24 bits per pixel).
    Rgb,
    /// BGR with 8 bits per channel (24 bits per pixel). OpenCV-style capture order.
    #[default]
    Bgr,
    /// YUYV (YUV 4:2:2 packed), as delivered by most V4L2 webcams.
    Yuyv,
    /// I420/YUV420P (YUV 4:2:0, planar Y + U + V). What encoders consume.
    I420,
}

/// Rate control mode for encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RateControlMode {
    /// Variable Bitrate - targets average bitrate.
    #[default]
    Vbr,
    /// Constant Bitrate - strict bitrate control.
    Cbr,
}

/// Configuration for creating a video encoder.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Framerate as (numerator, denominator).
    pub framerate: (u32, u32),
    /// Target bitrate in bits per second.
    pub bitrate: u32,
    /// Maximum bitrate in bits per second.
    pub max_bitrate: u32,
    /// Minimum bitrate in bits per second (0 = unconstrained).
    pub min_bitrate: u32,
    /// Rate control mode.
    pub rate_control: RateControlMode,
    /// GOP (Group of Pictures) length. 0 for infinite.
    pub gop_length: u32,
    /// Number of B-frames between I and P frames.
    pub b_frames: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            framerate: (30, 1),
            bitrate: 2_000_000,     // 2 Mbps
            max_bitrate: 2_000_000, // 2 Mbps
            min_bitrate: 0,
            rate_control: RateControlMode::Vbr,
            gop_length: 10,
            b_frames: 0,
        }
    }
}

impl EncoderConfig {
    /// Create a new encoder configuration with the given dimensions.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// Set the framerate.
    #[must_use]
    pub fn framerate(mut self, num: u32, den: u32) -> Self {
        self.framerate = (num, den);
        self
    }

    /// Set the target bitrate in bits per second.
    #[must_use]
    pub fn bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// Set the bitrate bounds in bits per second.
    #[must_use]
    pub fn bitrate_bounds(mut self, min: u32, max: u32) -> Self {
        self.min_bitrate = min;
        self.max_bitrate = max;
        self
    }

    /// Set the rate control mode.
    #[must_use]
    pub fn rate_control(mut self, mode: RateControlMode) -> Self {
        self.rate_control = mode;
        self
    }

    /// Set the GOP length (keyframe interval in frames).
    #[must_use]
    pub fn gop_length(mut self, gop: u32) -> Self {
        self.gop_length = gop;
        self
    }

    /// Set the number of B-frames.
    #[must_use]
    pub fn b_frames(mut self, b_frames: u32) -> Self {
        self.b_frames = b_frames;
        self
    }

    /// Frames per second as a float.
    #[must_use]
    pub fn fps(&self) -> f32 {
        let (num, den) = self.framerate;
        if den == 0 {
            0.0
        } else {
            num as f32 / den as f32
        }
    }

    /// Check the configuration before handing it to a backend.
    ///
    /// 4:2:0 subsampling needs even dimensions.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.width == 0 || self.height == 0 || self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(CodecError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        if self.framerate.0 == 0 || self.framerate.1 == 0 {
            return Err(CodecError::invalid_param(format!(
                "framerate {}/{}",
                self.framerate.0, self.framerate.1
            )));
        }
        if self.bitrate == 0 {
            return Err(CodecError::invalid_param("bitrate must be non-zero"));
        }
        if self.max_bitrate != 0 && self.max_bitrate < self.bitrate {
            return Err(CodecError::invalid_param(format!(
                "max bitrate {} below target {}",
                self.max_bitrate, self.bitrate
            )));
        }
        if self.min_bitrate > self.bitrate {
            return Err(CodecError::invalid_param(format!(
                "min bitrate {} above target {}",
                self.min_bitrate, self.bitrate
            )));
        }
        Ok(())
    }
}
