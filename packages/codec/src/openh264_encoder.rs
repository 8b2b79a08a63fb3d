//! Software H.264 encoder backed by Cisco's OpenH264.
//!
//! OpenH264 is synchronous: every submitted frame yields one packet before
//! the next submission, and it never reorders (no B-frames). Rate-control
//! frame skipping is turned off; should the library skip a frame anyway, it
//! produces no packet and the caller pairs later packets by `pts`.

use openh264::encoder::{BitRate, Encoder, EncoderConfig as OhConfig, FrameType, RateControlMode};
use openh264::formats::YUVSource;
use openh264::OpenH264API;

use crate::{
    CodecError, EncodedPacket, EncoderConfig, PixelFormat, Receive, VideoEncoder, VideoFrame,
    VideoFrameData,
};

/// Borrowed view over an I420 buffer, handed to OpenH264 without copying.
struct I420View<'a> {
    width: usize,
    height: usize,
    y: &'a [u8],
    u: &'a [u8],
    v: &'a [u8],
}

impl YUVSource for I420View<'_> {
    fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn strides(&self) -> (usize, usize, usize) {
        (self.width, self.width / 2, self.width / 2)
    }

    fn y(&self) -> &[u8] {
        self.y
    }

    fn u(&self) -> &[u8] {
        self.u
    }

    fn v(&self) -> &[u8] {
        self.v
    }
}

/// OpenH264 encoder implementing the send/receive contract.
pub struct OpenH264Encoder {
    encoder: Encoder,
    config: EncoderConfig,
    pending: Option<EncodedPacket>,
    frames_submitted: u64,
    packets_out: u64,
    flushing: bool,
}

// Safety: the encoder is driven from a single thread at a time; OpenH264
// keeps no thread-affine state between calls.
unsafe impl Send for OpenH264Encoder {}

impl OpenH264Encoder {
    /// Create a new OpenH264 encoder.
    pub fn new(config: EncoderConfig) -> Result<Self, CodecError> {
        config.validate()?;
        if config.b_frames != 0 {
            return Err(CodecError::invalid_param("OpenH264 does not produce B-frames"));
        }

        let rc_mode = match config.rate_control {
            crate::RateControlMode::Vbr | crate::RateControlMode::Cbr => RateControlMode::Bitrate,
        };
        let oh_config = OhConfig::new()
            .rate_control_mode(rc_mode)
            .bitrate(BitRate::from_bps(config.bitrate))
            .max_frame_rate(config.fps())
            .enable_skip_frame(false);
        let encoder = Encoder::with_api_config(OpenH264API::from_source(), oh_config)
            .map_err(|e| CodecError::InitFailed(e.to_string()))?;

        tracing::info!(
            "OpenH264 encoder ready: {}x{} @ {:.2} fps, {} bps, GOP {}",
            config.width,
            config.height,
            config.fps(),
            config.bitrate,
            config.gop_length
        );

        Ok(Self {
            encoder,
            config,
            pending: None,
            frames_submitted: 0,
            packets_out: 0,
            flushing: false,
        })
    }

    fn encode_i420(&mut self, frame: &VideoFrame) -> Result<(), CodecError> {
        let (y, u, v) = frame.planes()?;
        let view = I420View {
            width: frame.width as usize,
            height: frame.height as usize,
            y,
            u,
            v,
        };

        let gop = self.config.gop_length as u64;
        if gop > 0 && self.frames_submitted % gop == 0 {
            self.encoder.force_intra_frame();
        }

        let bitstream = self
            .encoder
            .encode(&view)
            .map_err(|e| CodecError::backend(e.to_string()))?;
        let frame_type = bitstream.frame_type();
        let data = bitstream.to_vec();

        if matches!(frame_type, FrameType::Skip) || data.is_empty() {
            tracing::debug!("OpenH264 skipped frame {}", frame.frame_index);
            return Ok(());
        }

        let is_keyframe = matches!(frame_type, FrameType::IDR | FrameType::I);
        self.pending = Some(EncodedPacket::new(
            data,
            frame.frame_index,
            is_keyframe,
            self.packets_out,
        ));
        self.packets_out += 1;
        Ok(())
    }
}

impl VideoEncoder for OpenH264Encoder {
    fn submit(&mut self, frame: Option<&dyn VideoFrameData>) -> Result<(), CodecError> {
        let Some(frame) = frame else {
            self.flushing = true;
            return Ok(());
        };
        if self.flushing {
            return Err(CodecError::invalid_call("submit after flush"));
        }

        let (width, height) = (frame.width(), frame.height());
        if (width, height) != (self.config.width, self.config.height) {
            return Err(CodecError::InvalidDimensions { width, height });
        }

        let raw = VideoFrame::new(
            width,
            height,
            frame.pixel_format(),
            frame.data().to_vec(),
            frame.frame_index(),
        );
        let i420 = if raw.pixel_format == PixelFormat::I420 {
            raw
        } else {
            raw.to_i420()?
        };
        self.encode_i420(&i420)?;
        self.frames_submitted += 1;
        Ok(())
    }

    fn receive(&mut self) -> Result<Receive, CodecError> {
        if let Some(packet) = self.pending.take() {
            return Ok(Receive::Packet(packet));
        }
        if self.flushing {
            Ok(Receive::Eof)
        } else {
            Ok(Receive::Again)
        }
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn name(&self) -> &'static str {
        "openh264"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: u32 = 64;
    const H: u32 = 48;

    fn gradient(index: u64) -> VideoFrame {
        let mut data = Vec::with_capacity((W * H * 3) as usize);
        for y in 0..H {
            for x in 0..W {
                let shift = index as u32 * 4;
                data.extend_from_slice(&[
                    ((x + shift) * 4) as u8,
                    ((y + shift) * 5) as u8,
                    ((x + y) * 2) as u8,
                ]);
            }
        }
        VideoFrame::from_bgr(W, H, data, index)
    }

    fn nal_types(data: &[u8]) -> Vec<u8> {
        data.windows(4)
            .filter(|w| w[..3] == [0x00, 0x00, 0x01])
            .map(|w| w[3] & 0x1F)
            .collect()
    }

    #[test]
    fn test_one_packet_per_frame() {
        let config = EncoderConfig::new(W, H).framerate(30, 1).gop_length(10);
        let mut encoder = OpenH264Encoder::new(config).unwrap();

        for i in 0..12 {
            encoder.submit(Some(&gradient(i))).unwrap();
            let Receive::Packet(packet) = encoder.receive().unwrap() else {
                panic!("no packet for frame {}", i);
            };
            assert_eq!(packet.pts, i);
            assert_eq!(packet.packet_index, i);
            assert_eq!(&packet.data[..4], &[0x00, 0x00, 0x00, 0x01]);
            if i % 10 == 0 {
                assert!(packet.is_keyframe, "frame {} should start a GOP", i);
                assert!(nal_types(&packet.data).contains(&5));
            }
            if i == 0 {
                let types = nal_types(&packet.data);
                assert!(types.contains(&7) && types.contains(&8) && types.contains(&5));
            }
            assert!(matches!(encoder.receive().unwrap(), Receive::Again));
        }

        encoder.submit(None).unwrap();
        assert!(matches!(encoder.receive().unwrap(), Receive::Eof));
        assert!(encoder.submit(Some(&gradient(12))).is_err());
    }

    #[test]
    fn test_rejects_wrong_dimensions() {
        let mut encoder = OpenH264Encoder::new(EncoderConfig::new(W, H)).unwrap();
        let frame = VideoFrame::from_bgr(32, 32, vec![0; 32 * 32 * 3], 0);
        assert!(matches!(
            encoder.submit(Some(&frame)),
            Err(CodecError::InvalidDimensions { width: 32, height: 32 })
        ));
    }

    #[test]
    fn test_rejects_b_frames() {
        let config = EncoderConfig::new(W, H).b_frames(2);
        assert!(OpenH264Encoder::new(config).is_err());
    }
}
