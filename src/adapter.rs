//! Encoder adapter.
//!
//! Drives a [`VideoEncoder`] through its send/receive contract and hands every
//! drained packet to the [`AccessUnitAssembler`] together with the timestamp
//! sampled when its frame was submitted.
//!
//! Each submitted frame leaves a `(frame_index, timestamp)` entry behind, and
//! each drained packet claims the entry whose index matches its `pts`. Entries
//! older than that pts belong to frames the encoder skipped; they are dropped
//! with a warning so no later frame inherits a stale timestamp.

use std::collections::VecDeque;
use std::io::Write;

use sei_stamp_codec::{Receive, VideoEncoder, VideoFrameData};
use tracing::{debug, warn};

use crate::assembler::AccessUnitAssembler;
use crate::error::{Result, StampError};
use crate::timestamp::{Timestamp, TimestampSource};

/// Consecutive "no packet yet" answers tolerated while flushing.
const MAX_IDLE_FLUSH_POLLS: usize = 16;

/// Owns the encoder and the clock for one session.
pub struct EncoderAdapter<E, C> {
    encoder: E,
    clock: C,
    pending: VecDeque<(u64, Timestamp)>,
    frames_submitted: u64,
    packets_drained: u64,
    timestamps_discarded: u64,
    flush_requested: bool,
}

impl<E: VideoEncoder, C: TimestampSource> EncoderAdapter<E, C> {
    pub fn new(encoder: E, clock: C) -> Self {
        Self {
            encoder,
            clock,
            pending: VecDeque::new(),
            frames_submitted: 0,
            packets_drained: 0,
            timestamps_discarded: 0,
            flush_requested: false,
        }
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    pub fn packets_drained(&self) -> u64 {
        self.packets_drained
    }

    /// Timestamps of frames submitted but not yet drained.
    pub fn pending_timestamps(&self) -> usize {
        self.pending.len()
    }

    /// Timestamps dropped because their frame never produced a packet.
    pub fn timestamps_discarded(&self) -> u64 {
        self.timestamps_discarded
    }

    /// True once [`flush`](Self::flush) has been called.
    pub fn is_flushed(&self) -> bool {
        self.flush_requested
    }

    /// Timestamp a frame, submit it and write every packet that is ready.
    ///
    /// Returns the number of access units written.
    pub fn submit<W: Write>(
        &mut self,
        frame: &dyn VideoFrameData,
        assembler: &mut AccessUnitAssembler<W>,
    ) -> Result<usize> {
        if self.flush_requested {
            return Err(StampError::StreamClosed);
        }

        let ts = self.clock.now()?;
        self.encoder.submit(Some(frame))?;
        self.pending.push_back((frame.frame_index(), ts));
        self.frames_submitted += 1;

        let (written, eof) = self.drain(assembler)?;
        if eof {
            return Err(StampError::EncoderRejected(format!(
                "{} reported end of stream before flush",
                self.encoder.name()
            )));
        }
        Ok(written)
    }

    /// Signal end of input and drain the encoder until it reports end of
    /// stream.
    ///
    /// Moves the assembler into its flushing state; closing it is left to the
    /// caller. Returns the number of access units written while flushing.
    pub fn flush<W: Write>(&mut self, assembler: &mut AccessUnitAssembler<W>) -> Result<usize> {
        if self.flush_requested {
            return Err(StampError::StreamClosed);
        }
        self.flush_requested = true;
        assembler.begin_flush()?;

        let mut written = 0;
        let mut idle_polls = 0;
        loop {
            self.encoder.submit(None)?;
            let (n, eof) = self.drain(assembler)?;
            written += n;
            if eof {
                break;
            }
            if n == 0 {
                idle_polls += 1;
                if idle_polls >= MAX_IDLE_FLUSH_POLLS {
                    return Err(StampError::EncoderRejected(format!(
                        "{} never signalled end of stream",
                        self.encoder.name()
                    )));
                }
            } else {
                idle_polls = 0;
            }
        }

        if !self.pending.is_empty() {
            self.timestamps_discarded += self.pending.len() as u64;
            warn!(
                "{} frames submitted but {} packets drained: {} trailing capture timestamps were never paired",
                self.frames_submitted,
                self.packets_drained,
                self.pending.len()
            );
            self.pending.clear();
        }
        debug!("flush drained {} access units", written);
        Ok(written)
    }

    /// Receive until the encoder has nothing ready. The flag is true on end
    /// of stream.
    fn drain<W: Write>(&mut self, assembler: &mut AccessUnitAssembler<W>) -> Result<(usize, bool)> {
        let mut written = 0;
        loop {
            match self.encoder.receive()? {
                Receive::Packet(packet) => {
                    let ts = self.claim_timestamp(packet.pts)?;
                    assembler.write_access_unit(ts, &packet.data)?;
                    self.packets_drained += 1;
                    written += 1;
                }
                Receive::Again => return Ok((written, false)),
                Receive::Eof => return Ok((written, true)),
            }
        }
    }

    /// Take the timestamp of frame `pts`, dropping those of skipped frames
    /// submitted before it.
    fn claim_timestamp(&mut self, pts: u64) -> Result<Timestamp> {
        while let Some(&(index, ts)) = self.pending.front() {
            if index > pts {
                break;
            }
            self.pending.pop_front();
            if index == pts {
                return Ok(ts);
            }
            self.timestamps_discarded += 1;
            warn!("frame {} produced no packet, dropping its timestamp {}", index, ts);
        }
        Err(StampError::EncoderRejected(format!(
            "packet for frame {} has no pending capture timestamp",
            pts
        )))
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    //! Deterministic stand-ins for the encoder and the clock.

    use std::collections::VecDeque;

    use sei_stamp_codec::{CodecError, EncodedPacket, Receive, VideoEncoder, VideoFrameData};

    use crate::error::{Result, StampError};
    use crate::timestamp::{Timestamp, TimestampSource};

    /// Encoder whose buffering and failures are scripted.
    #[derive(Default)]
    pub struct ScriptedEncoder {
        /// Packets held back until this many later frames arrive.
        pub delay: usize,
        /// Frame indices that produce no packet.
        pub drop_frames: Vec<u64>,
        /// Frame index whose submission fails.
        pub reject_at: Option<u64>,
        /// Report end of stream once this many frames were submitted.
        pub eof_after: Option<u64>,
        /// Frame index that yields two packets.
        pub duplicate_at: Option<u64>,
        /// "Again" answers given while flushing before the backlog is released.
        pub again_on_flush: usize,
        pub held: VecDeque<EncodedPacket>,
        pub ready: VecDeque<EncodedPacket>,
        pub submitted: u64,
        pub packets: u64,
        pub flushing: bool,
    }

    impl ScriptedEncoder {
        pub fn new() -> Self {
            Self::default()
        }

        fn packet(&mut self, frame_index: u64) -> EncodedPacket {
            let data = if self.packets == 0 {
                vec![
                    0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0xC0, 0x1E, //
                    0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x3C, 0x80, //
                    0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x21, 0x80,
                ]
            } else {
                vec![0x41, 0x9A, 0x20, 0x10 | (frame_index % 0x70) as u8, 0x80]
            };
            let packet = EncodedPacket::new(data, frame_index, frame_index == 0, self.packets);
            self.packets += 1;
            packet
        }
    }

    impl VideoEncoder for ScriptedEncoder {
        fn submit(&mut self, frame: Option<&dyn VideoFrameData>) -> std::result::Result<(), CodecError> {
            let Some(frame) = frame else {
                self.flushing = true;
                return Ok(());
            };
            if self.flushing {
                return Err(CodecError::invalid_call("submit after flush"));
            }
            let index = self.submitted;
            if self.reject_at == Some(index) {
                return Err(CodecError::backend(format!("frame {} rejected", frame.frame_index())));
            }
            self.submitted += 1;
            if self.drop_frames.contains(&index) {
                return Ok(());
            }
            let pts = frame.frame_index();
            let packet = self.packet(pts);
            self.held.push_back(packet);
            if self.duplicate_at == Some(index) {
                let packet = self.packet(pts);
                self.held.push_back(packet);
            }
            while self.held.len() > self.delay {
                if let Some(p) = self.held.pop_front() {
                    self.ready.push_back(p);
                }
            }
            Ok(())
        }

        fn receive(&mut self) -> std::result::Result<Receive, CodecError> {
            if let Some(p) = self.ready.pop_front() {
                return Ok(Receive::Packet(p));
            }
            if !self.flushing {
                if self.eof_after.is_some_and(|n| self.submitted >= n) {
                    return Ok(Receive::Eof);
                }
                return Ok(Receive::Again);
            }
            if self.again_on_flush > 0 {
                self.again_on_flush -= 1;
                return Ok(Receive::Again);
            }
            match self.held.pop_front() {
                Some(p) => Ok(Receive::Packet(p)),
                None => Ok(Receive::Eof),
            }
        }

        fn dimensions(&self) -> (u32, u32) {
            (4, 2)
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    /// Clock advancing a fixed step per sample.
    pub struct SteppingClock {
        pub next: u64,
        pub step: u64,
        /// Fail on this sample (0-based).
        pub fail_at: Option<u64>,
        samples: u64,
    }

    impl SteppingClock {
        pub fn new(start: u64, step: u64) -> Self {
            Self {
                next: start,
                step,
                fail_at: None,
                samples: 0,
            }
        }
    }

    impl TimestampSource for SteppingClock {
        fn now(&mut self) -> Result<Timestamp> {
            if self.fail_at == Some(self.samples) {
                return Err(StampError::ClockUnavailable("scripted clock failure".into()));
            }
            self.samples += 1;
            let ts = Timestamp(self.next);
            self.next += self.step;
            Ok(ts)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::scripted::{ScriptedEncoder, SteppingClock};
    use super::*;
    use crate::inspect::inspect;
    use sei_stamp_codec::VideoFrame;

    fn frame(index: u64) -> VideoFrame {
        VideoFrame::from_bgr(4, 2, vec![0x40; 24], index)
    }

    fn opened() -> AccessUnitAssembler<Vec<u8>> {
        let mut asm = AccessUnitAssembler::new(Vec::new());
        asm.open().unwrap();
        asm
    }

    fn run(encoder: ScriptedEncoder, frames: u64) -> (EncoderAdapter<ScriptedEncoder, SteppingClock>, Vec<u8>) {
        let mut adapter = EncoderAdapter::new(encoder, SteppingClock::new(1_000, 100));
        let mut asm = opened();
        for i in 0..frames {
            adapter.submit(&frame(i), &mut asm).unwrap();
        }
        adapter.flush(&mut asm).unwrap();
        asm.close().unwrap();
        (adapter, asm.into_inner())
    }

    #[test]
    fn test_one_packet_per_frame() {
        let (adapter, out) = run(ScriptedEncoder::new(), 5);
        assert_eq!(adapter.frames_submitted(), 5);
        assert_eq!(adapter.packets_drained(), 5);

        let report = inspect(&out);
        assert!(report.terminated);
        let expected: Vec<Timestamp> = (0..5).map(|i| Timestamp(1_000 + i * 100)).collect();
        assert_eq!(report.timestamps(), expected);
        // SPS + PPS + IDR in the first unit, one slice after
        assert_eq!(report.access_units[0].video_nal_types, vec![7, 8, 5]);
        assert!(report.access_units[1..].iter().all(|au| au.video_nals() == 1));
    }

    #[test]
    fn test_lookahead_keeps_pairing() {
        let encoder = ScriptedEncoder {
            delay: 2,
            ..Default::default()
        };
        let mut adapter = EncoderAdapter::new(encoder, SteppingClock::new(0, 10));
        let mut asm = opened();

        let written: Vec<usize> = (0..5)
            .map(|i| adapter.submit(&frame(i), &mut asm).unwrap())
            .collect();
        assert_eq!(written, vec![0, 0, 1, 1, 1]);
        assert_eq!(adapter.pending_timestamps(), 2);
        assert_eq!(adapter.flush(&mut asm).unwrap(), 2);
        assert_eq!(adapter.pending_timestamps(), 0);
        asm.close().unwrap();

        let report = inspect(&asm.into_inner());
        assert_eq!(
            report.timestamps(),
            vec![Timestamp(0), Timestamp(10), Timestamp(20), Timestamp(30), Timestamp(40)]
        );
    }

    #[test]
    fn test_flush_retries_until_eof() {
        let encoder = ScriptedEncoder {
            delay: 1,
            again_on_flush: 3,
            ..Default::default()
        };
        let (adapter, out) = run(encoder, 3);
        assert_eq!(adapter.packets_drained(), 3);
        assert_eq!(inspect(&out).access_units.len(), 3);
    }

    #[test]
    fn test_flush_gives_up_on_silent_encoder() {
        let encoder = ScriptedEncoder {
            delay: 1,
            again_on_flush: 1_000,
            ..Default::default()
        };
        let mut adapter = EncoderAdapter::new(encoder, SteppingClock::new(0, 1));
        let mut asm = opened();
        adapter.submit(&frame(0), &mut asm).unwrap();
        assert!(matches!(
            adapter.flush(&mut asm),
            Err(StampError::EncoderRejected(_))
        ));
    }

    #[test]
    fn test_skipped_frame_keeps_later_stamps_aligned() {
        let encoder = ScriptedEncoder {
            drop_frames: vec![1],
            ..Default::default()
        };
        let (adapter, out) = run(encoder, 4);
        assert_eq!(adapter.frames_submitted(), 4);
        assert_eq!(adapter.packets_drained(), 3);
        assert_eq!(adapter.timestamps_discarded(), 1);
        assert_eq!(adapter.pending_timestamps(), 0);

        let report = inspect(&out);
        assert!(report.terminated);
        assert_eq!(
            report.timestamps(),
            vec![Timestamp(1_000), Timestamp(1_200), Timestamp(1_300)]
        );
    }

    #[test]
    fn test_skipped_frames_with_lookahead() {
        let encoder = ScriptedEncoder {
            delay: 2,
            drop_frames: vec![0, 3, 5],
            ..Default::default()
        };
        let (adapter, out) = run(encoder, 6);
        assert_eq!(adapter.packets_drained(), 3);
        assert_eq!(adapter.timestamps_discarded(), 3);
        assert_eq!(
            inspect(&out).timestamps(),
            vec![Timestamp(1_100), Timestamp(1_200), Timestamp(1_400)]
        );
    }

    #[test]
    fn test_extra_packet_is_fatal() {
        let encoder = ScriptedEncoder {
            duplicate_at: Some(1),
            ..Default::default()
        };
        let mut adapter = EncoderAdapter::new(encoder, SteppingClock::new(0, 1));
        let mut asm = opened();
        adapter.submit(&frame(0), &mut asm).unwrap();
        assert!(matches!(
            adapter.submit(&frame(1), &mut asm),
            Err(StampError::EncoderRejected(_))
        ));
    }

    #[test]
    fn test_rejected_frame() {
        let encoder = ScriptedEncoder {
            reject_at: Some(1),
            ..Default::default()
        };
        let mut adapter = EncoderAdapter::new(encoder, SteppingClock::new(0, 1));
        let mut asm = opened();
        adapter.submit(&frame(0), &mut asm).unwrap();
        assert!(matches!(
            adapter.submit(&frame(1), &mut asm),
            Err(StampError::EncoderRejected(_))
        ));
        assert_eq!(adapter.frames_submitted(), 1);
        assert_eq!(adapter.pending_timestamps(), 0);
    }

    #[test]
    fn test_eof_before_flush_is_fatal() {
        let encoder = ScriptedEncoder {
            delay: 5,
            eof_after: Some(2),
            ..Default::default()
        };
        let mut adapter = EncoderAdapter::new(encoder, SteppingClock::new(0, 1));
        let mut asm = opened();
        adapter.submit(&frame(0), &mut asm).unwrap();
        assert!(matches!(
            adapter.submit(&frame(1), &mut asm),
            Err(StampError::EncoderRejected(_))
        ));
    }

    #[test]
    fn test_clock_failure_stops_before_encoder() {
        let mut clock = SteppingClock::new(0, 1);
        clock.fail_at = Some(0);
        let mut adapter = EncoderAdapter::new(ScriptedEncoder::new(), clock);
        let mut asm = opened();
        assert!(matches!(
            adapter.submit(&frame(0), &mut asm),
            Err(StampError::ClockUnavailable(_))
        ));
        assert_eq!(adapter.frames_submitted(), 0);
        assert!(asm.get_ref().is_empty());
    }

    #[test]
    fn test_submit_after_flush() {
        let mut adapter = EncoderAdapter::new(ScriptedEncoder::new(), SteppingClock::new(0, 1));
        let mut asm = opened();
        adapter.flush(&mut asm).unwrap();
        assert!(matches!(
            adapter.submit(&frame(0), &mut asm),
            Err(StampError::StreamClosed)
        ));
        assert!(matches!(adapter.flush(&mut asm), Err(StampError::StreamClosed)));
    }
}
