//! Core traits for the encoder boundary.

use crate::{CodecError, PixelFormat};

/// Trait for types that can provide video frame data.
///
/// This trait allows different frame types to be used with the encoder
/// without requiring a specific concrete type.
pub trait VideoFrameData: Send {
    /// Returns the frame width in pixels.
    fn width(&self) -> u32;

    /// Returns the frame height in pixels.
    fn height(&self) -> u32;

    /// Returns the pixel format of the frame.
    fn pixel_format(&self) -> PixelFormat;

    /// Returns the raw frame data as a byte slice.
    fn data(&self) -> &[u8];

    /// Returns the frame index (presentation order).
    fn frame_index(&self) -> u64;
}

/// Result of encoding a frame.
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    /// Encoded bitstream data: one or more H.264 NAL units, Annex B framed.
    pub data: Vec<u8>,
    /// Presentation index of the source frame.
    pub pts: u64,
    /// Whether this packet contains a keyframe.
    pub is_keyframe: bool,
    /// Output index (monotonically increasing in drain order).
    pub packet_index: u64,
}

impl EncodedPacket {
    /// Create a new encoded packet.
    #[must_use]
    pub fn new(data: Vec<u8>, pts: u64, is_keyframe: bool, packet_index: u64) -> Self {
        Self {
            data,
            pts,
            is_keyframe,
            packet_index,
        }
    }
}

/// Outcome of asking an encoder for its next packet.
#[derive(Debug)]
pub enum Receive {
    /// A compressed packet, in decode order.
    Packet(EncodedPacket),
    /// Nothing ready yet; submit more input before asking again.
    Again,
    /// The encoder has been flushed and will never produce another packet.
    Eof,
}

/// Trait for video encoders.
///
/// Encoders follow a send/receive contract: [`submit`](VideoEncoder::submit)
/// hands over one raw frame (or `None` to start flushing), then
/// [`receive`](VideoEncoder::receive) is called repeatedly until it returns
/// [`Receive::Again`] or [`Receive::Eof`]. An encoder may buffer frames
/// internally, so a submission can yield zero or several packets.
///
/// # Example
///
/// ```ignore
/// use sei_stamp_codec::{EncoderConfig, OpenH264Encoder, Receive, VideoEncoder};
///
/// let mut encoder = OpenH264Encoder::new(EncoderConfig::new(640, 480))?;
/// encoder.submit(Some(&frame))?;
/// while let Receive::Packet(packet) = encoder.receive()? {
///     // packet.data contains Annex B H.264 NAL units
/// }
/// ```
pub trait VideoEncoder: Send {
    /// Submit a raw frame, or `None` to signal end of input.
    fn submit(&mut self, frame: Option<&dyn VideoFrameData>) -> Result<(), CodecError>;

    /// Request the next compressed packet.
    fn receive(&mut self) -> Result<Receive, CodecError>;

    /// Returns the configured dimensions (width, height).
    fn dimensions(&self) -> (u32, u32);

    /// Short backend name for logging.
    fn name(&self) -> &'static str;
}

impl<E: VideoEncoder + ?Sized> VideoEncoder for Box<E> {
    fn submit(&mut self, frame: Option<&dyn VideoFrameData>) -> Result<(), CodecError> {
        (**self).submit(frame)
    }

    fn receive(&mut self) -> Result<Receive, CodecError> {
        (**self).receive()
    }

    fn dimensions(&self) -> (u32, u32) {
        (**self).dimensions()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
