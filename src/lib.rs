//! sei-stamp - frame-synchronous capture timestamps inside H.264.
//!
//! Every encoded frame is written as an access unit led by an SEI NAL unit
//! (`user_data_unregistered`) that carries the frame's capture time as decimal
//! microseconds. The stamp travels inside the elementary stream, so it
//! survives muxing, transport and storage.
//!
//! - [`timestamp`]: wall-anchored monotonic clock
//! - [`sei`]: SEI payload builder and parser
//! - [`nal`]: NAL framing, emulation prevention, Annex B splitting
//! - [`assembler`]: SEI-then-video access units, sequence-end termination
//! - [`adapter`]: encoder drain loop and flush
//! - [`pipeline`]: capture → encode → assemble sessions
//! - [`inspect`]: recover the timestamps from a finished stream
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::atomic::AtomicBool;
//! use sei_stamp::{MonotonicClock, Session, SessionConfig, TestPatternSource};
//! use sei_stamp_codec::OpenH264Encoder;
//!
//! let config = SessionConfig::new(640, 480).frame_count(Some(91));
//! let encoder = OpenH264Encoder::new(config.encoder_config())?;
//! let file = std::fs::File::create("out.h264")?;
//! let mut session = Session::new(config, encoder, MonotonicClock::new()?, file)?;
//! session.run(TestPatternSource::new(640, 480), &AtomicBool::new(false))?;
//! ```
//!
//! # Feature Flags
//!
//! - `camera` - V4L2 capture source (Linux)
//! - `openh264` - OpenH264 software encoder

pub mod adapter;
pub mod assembler;
pub mod error;
pub mod inspect;
pub mod nal;
pub mod pipeline;
pub mod sei;
pub mod source;
pub mod timestamp;

#[cfg(feature = "camera")]
pub mod camera;

pub use adapter::EncoderAdapter;
pub use assembler::{AccessUnitAssembler, AssemblerState};
pub use error::{Result, StampError};
pub use inspect::{inspect, AccessUnitRecord, StreamReport};
pub use nal::{NalUnit, StartCode, SEQUENCE_END_CODE};
pub use pipeline::{Session, SessionConfig, SessionStats};
pub use sei::{SeiPayload, TIMESTAMP_UUID};
pub use source::{FrameSource, TestPatternSource};
pub use timestamp::{MonotonicClock, Timestamp, TimestampSource, WallClock};

#[cfg(feature = "camera")]
pub use camera::CameraSource;

pub use sei_stamp_codec as codec;
