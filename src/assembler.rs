//! Access-unit assembly.
//!
//! Every encoded packet is written as one access unit: a timestamp SEI NAL
//! unit followed by the packet's own NAL units. The assembler owns the output
//! sink for the whole session and is the only writer to it.
//!
//! ```text
//! Idle --open--> StreamOpen --write--> PerFrame --begin_flush--> Flushing --close--> Closed
//!                                       ^    |                      |
//!                                       +----+                      +--write (drained packets)
//! ```

use std::io::Write;

use tracing::{debug, info};

use crate::error::{Result, StampError};
use crate::nal::{
    split_annex_b, starts_with_start_code, NalUnit, StartCode, SEQUENCE_END_CODE,
};
use crate::sei::SeiPayload;
use crate::timestamp::Timestamp;

/// Lifecycle of an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    /// Created, nothing written.
    Idle,
    /// Opened; the next NAL unit gets the 4-byte start code.
    StreamOpen,
    /// At least one access unit written.
    PerFrame,
    /// End of input; only packets drained from the encoder are accepted.
    Flushing,
    /// Sequence-end code written. Terminal.
    Closed,
}

/// Writes SEI + video access units to an Annex B sink.
pub struct AccessUnitAssembler<W: Write> {
    sink: W,
    state: AssemblerState,
    first_nal_pending: bool,
    access_units: u64,
    bytes_written: u64,
    // Reused per access unit so each unit reaches the sink in one write.
    scratch: Vec<u8>,
}

impl<W: Write> AccessUnitAssembler<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            state: AssemblerState::Idle,
            first_nal_pending: true,
            access_units: 0,
            bytes_written: 0,
            scratch: Vec::with_capacity(64 * 1024),
        }
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// Access units written so far.
    pub fn access_units(&self) -> u64 {
        self.access_units
    }

    /// Bytes handed to the sink so far, end code included.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    /// Open the stream. Emits nothing.
    pub fn open(&mut self) -> Result<()> {
        match self.state {
            AssemblerState::Idle => {
                self.state = AssemblerState::StreamOpen;
                self.first_nal_pending = true;
                info!("stream opened");
                Ok(())
            }
            AssemblerState::Closed => Err(StampError::StreamClosed),
            _ => Ok(()),
        }
    }

    /// Write one access unit: the SEI carrying `timestamp`, then every NAL
    /// unit in `packet`.
    ///
    /// `packet` is either Annex B (one or more start-code-prefixed NAL units)
    /// or a single bare NAL unit. NAL bytes are copied verbatim; the encoder
    /// already applied emulation prevention.
    pub fn write_access_unit(&mut self, timestamp: Timestamp, packet: &[u8]) -> Result<()> {
        match self.state {
            AssemblerState::Idle => return Err(StampError::NotOpened),
            AssemblerState::Closed => return Err(StampError::StreamClosed),
            AssemblerState::StreamOpen | AssemblerState::PerFrame | AssemblerState::Flushing => {}
        }

        // Everything that can fail is checked before the first byte goes out.
        let sei = SeiPayload::timestamp(timestamp)?.to_nal_unit();
        let video = packet_nal_units(packet)?;

        self.scratch.clear();
        let start_code = self.next_start_code();
        self.scratch.extend_from_slice(start_code.bytes());
        self.scratch.extend_from_slice(&sei.data);
        for nal in &video {
            self.scratch.extend_from_slice(StartCode::Short.bytes());
            self.scratch.extend_from_slice(nal);
        }

        self.sink.write_all(&self.scratch)?;
        self.bytes_written += self.scratch.len() as u64;
        self.access_units += 1;
        if self.state == AssemblerState::StreamOpen {
            self.state = AssemblerState::PerFrame;
        }

        debug!(
            "AU {}: ts={} video_nals={} bytes={}",
            self.access_units,
            timestamp,
            video.len(),
            self.scratch.len()
        );
        Ok(())
    }

    /// Enter the flushing state. Access units may still be written.
    pub fn begin_flush(&mut self) -> Result<()> {
        match self.state {
            AssemblerState::Idle => Err(StampError::NotOpened),
            AssemblerState::Closed => Err(StampError::StreamClosed),
            AssemblerState::StreamOpen | AssemblerState::PerFrame | AssemblerState::Flushing => {
                self.state = AssemblerState::Flushing;
                Ok(())
            }
        }
    }

    /// Write the sequence-end code, flush the sink and close.
    ///
    /// Valid from any state but `Closed`, so an aborted session still ends
    /// on a NAL boundary. A stream with no access units gets the 4-byte
    /// start code in front of the end code, like any first NAL unit.
    pub fn close(&mut self) -> Result<()> {
        if self.state == AssemblerState::Closed {
            return Err(StampError::StreamClosed);
        }
        self.state = AssemblerState::Closed;

        self.scratch.clear();
        if self.next_start_code() == StartCode::Long {
            self.scratch.push(0x00);
        }
        self.scratch.extend_from_slice(&SEQUENCE_END_CODE);
        self.sink.write_all(&self.scratch)?;
        self.bytes_written += self.scratch.len() as u64;
        self.sink.flush()?;
        info!(
            "stream closed: {} access units, {} bytes",
            self.access_units, self.bytes_written
        );
        Ok(())
    }

    fn next_start_code(&mut self) -> StartCode {
        if std::mem::take(&mut self.first_nal_pending) {
            StartCode::Long
        } else {
            StartCode::Short
        }
    }
}

/// NAL units carried by an encoder packet, without start codes.
fn packet_nal_units(packet: &[u8]) -> Result<Vec<&[u8]>> {
    let units: Vec<&[u8]> = if starts_with_start_code(packet) {
        split_annex_b(packet).into_iter().map(|unit| unit.data).collect()
    } else if NalUnit::from_escaped(packet).is_some() {
        vec![packet]
    } else {
        Vec::new()
    };

    if units.is_empty() {
        return Err(StampError::EncoderRejected(
            "encoder produced an empty packet".into(),
        ));
    }
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::inspect;
    use crate::nal::{nal_unit_type, parse_annex_b};

    fn slice(idx: u8) -> Vec<u8> {
        // non-IDR slice header, payload with a zero run the encoder already escaped
        vec![0x41, 0x9A, 0x10 + idx, 0x00, 0x00, 0x03, 0x01, 0x80]
    }

    fn five_unit_stream() -> Vec<u8> {
        let mut asm = AccessUnitAssembler::new(Vec::new());
        asm.open().unwrap();
        for i in 0..5u8 {
            asm.write_access_unit(Timestamp(1_000_000 + i as u64 * 33_333), &slice(i))
                .unwrap();
        }
        asm.begin_flush().unwrap();
        asm.close().unwrap();
        asm.into_inner()
    }

    #[test]
    fn test_five_units_order() {
        let out = five_unit_stream();
        let nals = parse_annex_b(&out[..out.len() - SEQUENCE_END_CODE.len()]);
        assert_eq!(nals.len(), 10);
        for (i, nal) in nals.iter().enumerate() {
            if i % 2 == 0 {
                assert_eq!(nal.nal_type, nal_unit_type::SEI);
            } else {
                assert_eq!(nal.data, slice((i / 2) as u8));
            }
        }
    }

    #[test]
    fn test_start_codes() {
        let out = five_unit_stream();
        assert_eq!(&out[..4], &[0x00, 0x00, 0x00, 0x01]);
        let units = split_annex_b(&out);
        assert_eq!(units[0].start_code_len, 4);
        assert!(units[1..].iter().all(|u| u.start_code_len == 3));
    }

    #[test]
    fn test_termination() {
        let out = five_unit_stream();
        assert_eq!(&out[out.len() - 4..], &SEQUENCE_END_CODE);
        assert!(inspect(&out).terminated);
    }

    #[test]
    fn test_timestamps_non_decreasing() {
        let report = inspect(&five_unit_stream());
        let ts = report.timestamps();
        assert_eq!(ts.len(), 5);
        assert!(ts.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(ts[0], Timestamp(1_000_000));
    }

    #[test]
    fn test_write_before_open() {
        let mut asm = AccessUnitAssembler::new(Vec::new());
        assert!(matches!(
            asm.write_access_unit(Timestamp(1), &slice(0)),
            Err(StampError::NotOpened)
        ));
        assert!(matches!(asm.begin_flush(), Err(StampError::NotOpened)));
        assert!(asm.get_ref().is_empty());
    }

    #[test]
    fn test_write_after_close() {
        let mut asm = AccessUnitAssembler::new(Vec::new());
        asm.open().unwrap();
        asm.write_access_unit(Timestamp(1), &slice(0)).unwrap();
        asm.close().unwrap();
        let len = asm.get_ref().len();

        assert!(matches!(
            asm.write_access_unit(Timestamp(2), &slice(1)),
            Err(StampError::StreamClosed)
        ));
        assert!(matches!(asm.close(), Err(StampError::StreamClosed)));
        assert!(matches!(asm.open(), Err(StampError::StreamClosed)));
        assert_eq!(asm.get_ref().len(), len);
        assert_eq!(asm.state(), AssemblerState::Closed);
    }

    #[test]
    fn test_state_transitions() {
        let mut asm = AccessUnitAssembler::new(Vec::new());
        assert_eq!(asm.state(), AssemblerState::Idle);
        asm.open().unwrap();
        assert_eq!(asm.state(), AssemblerState::StreamOpen);
        assert!(asm.get_ref().is_empty());
        asm.write_access_unit(Timestamp(5), &slice(0)).unwrap();
        assert_eq!(asm.state(), AssemblerState::PerFrame);
        asm.begin_flush().unwrap();
        assert_eq!(asm.state(), AssemblerState::Flushing);
        // drained packets are still accepted while flushing
        asm.write_access_unit(Timestamp(6), &slice(1)).unwrap();
        asm.close().unwrap();
        assert_eq!(asm.state(), AssemblerState::Closed);
        assert_eq!(asm.access_units(), 2);
        assert_eq!(asm.bytes_written(), asm.get_ref().len() as u64);
    }

    #[test]
    fn test_annex_b_packet_is_reframed() {
        // SPS + PPS + IDR with mixed start codes, as encoders emit them
        let packet = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E, //
            0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x38, 0x80, //
            0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x00, 0x00, 0x03, 0x01, 0x80,
        ];
        let mut asm = AccessUnitAssembler::new(Vec::new());
        asm.open().unwrap();
        asm.write_access_unit(Timestamp(7), &packet).unwrap();
        asm.close().unwrap();
        let out = asm.into_inner();

        let units = split_annex_b(&out);
        let types: Vec<u8> = units.iter().map(|u| u.data[0] & 0x1F).collect();
        assert_eq!(types, vec![6, 7, 8, 5, 0xB7 & 0x1F]);
        assert_eq!(units[0].start_code_len, 4);
        assert!(units[1..].iter().all(|u| u.start_code_len == 3));
        // payload copied verbatim, escape byte untouched
        assert_eq!(units[3].data, &[0x65, 0x88, 0x84, 0x00, 0x00, 0x03, 0x01, 0x80]);
    }

    #[test]
    fn test_empty_packet_rejected_without_output() {
        let mut asm = AccessUnitAssembler::new(Vec::new());
        asm.open().unwrap();
        assert!(matches!(
            asm.write_access_unit(Timestamp(1), &[]),
            Err(StampError::EncoderRejected(_))
        ));
        assert!(matches!(
            asm.write_access_unit(Timestamp(1), &[0x00, 0x00, 0x01]),
            Err(StampError::EncoderRejected(_))
        ));
        assert!(asm.get_ref().is_empty());
        assert_eq!(asm.state(), AssemblerState::StreamOpen);
    }

    #[test]
    fn test_close_without_frames() {
        let mut asm = AccessUnitAssembler::new(Vec::new());
        asm.open().unwrap();
        asm.close().unwrap();
        assert_eq!(asm.bytes_written(), 5);
        let out = asm.into_inner();
        assert_eq!(out, vec![0x00, 0x00, 0x00, 0x01, 0xB7]);
        assert_eq!(&out[out.len() - 4..], &SEQUENCE_END_CODE);
        assert!(inspect(&out).terminated);
    }
}
