//! Encoder boundary for sei-stamp.
//!
//! This crate hides the H.264 encoder behind a small send/receive contract so
//! the access-unit assembler never depends on a specific codec library.
//!
//! - [`VideoEncoder`]: submit a frame (or `None` to flush), then drain
//!   packets until [`Receive::Again`] or [`Receive::Eof`]
//! - [`VideoFrame`]: raw frames plus BGR/RGB/YUYV to I420 conversion
//! - [`EncoderConfig`]: resolution, frame rate, bitrate bounds, GOP
//!
//! # Quick Start
//!
//! ```ignore
//! use sei_stamp_codec::{EncoderConfig, OpenH264Encoder, Receive, VideoEncoder, VideoFrame};
//!
//! let config = EncoderConfig::new(640, 480).framerate(30, 1).gop_length(10);
//! let mut encoder = OpenH264Encoder::new(config)?;
//!
//! let frame = VideoFrame::from_bgr(640, 480, bgr_data, 0);
//! encoder.submit(Some(&frame))?;
//! while let Receive::Packet(packet) = encoder.receive()? {
//!     // packet.data contains Annex B H.264 NAL units
//! }
//! ```
//!
//! # Feature Flags
//!
//! - `openh264` - Enable the OpenH264 software encoder (builds the C++ sources)

mod error;
mod frame;
mod traits;
mod types;

pub use error::CodecError;
pub use frame::{expected_frame_size, VideoFrame};
pub use traits::{EncodedPacket, Receive, VideoEncoder, VideoFrameData};
pub use types::{EncoderConfig, PixelFormat, RateControlMode};

// OpenH264 backend
#[cfg(feature = "openh264")]
mod openh264_encoder;

#[cfg(feature = "openh264")]
pub use openh264_encoder::OpenH264Encoder;
