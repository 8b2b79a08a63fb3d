//! SEI (Supplemental Enhancement Information) messages.
//!
//! Only `user_data_unregistered` (payload type 5) is built: a 16-byte UUID
//! followed by opaque user bytes. The SEI RBSP layout is
//!
//! ```text
//! payload_type   0xFF* + last byte   (type 5 -> 05)
//! payload_size   0xFF* + last byte   (16 + user data length)
//! uuid           16 bytes
//! user data      payload_size - 16 bytes
//! trailing bits  0x80
//! ```

use crate::error::{Result, StampError};
use crate::nal::{nal_unit_type, NalUnit};
use crate::timestamp::Timestamp;

/// `user_data_unregistered` payload type.
pub const USER_DATA_UNREGISTERED: u32 = 5;

/// UUID identifying the capture-timestamp message class.
pub const TIMESTAMP_UUID: [u8; 16] = [
    0x54, 0x80, 0x83, 0x97, 0xf0, 0x23, 0x47, 0x4b, 0xb7, 0xf7, 0x4f, 0x32, 0xb5, 0x4e, 0x06, 0xac,
];

/// Upper bound on user data carried in one message.
pub const MAX_USER_DATA_LEN: usize = 1024;

const UUID_LEN: usize = 16;
const RBSP_TRAILING_BITS: u8 = 0x80;

/// Append `value` using the SEI 0xFF escape: one 0xFF per full 255, then the remainder.
pub fn write_ff_coded(mut value: usize, out: &mut Vec<u8>) {
    while value >= 255 {
        out.push(0xFF);
        value -= 255;
    }
    out.push(value as u8);
}

/// SEI escape encoding of `value` as a standalone buffer.
pub fn ff_coded(value: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(value / 255 + 1);
    write_ff_coded(value, &mut out);
    out
}

/// Read an 0xFF-escaped value; returns the value and bytes consumed.
fn read_ff_coded(data: &[u8]) -> Option<(usize, usize)> {
    let mut value = 0usize;
    for (i, &byte) in data.iter().enumerate() {
        value += byte as usize;
        if byte != 0xFF {
            return Some((value, i + 1));
        }
    }
    None
}

/// An unregistered user-data SEI message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeiPayload {
    uuid: [u8; UUID_LEN],
    user_data: Vec<u8>,
}

impl SeiPayload {
    /// Build a `user_data_unregistered` message.
    pub fn user_data_unregistered(uuid: [u8; UUID_LEN], user_data: &[u8]) -> Result<Self> {
        if user_data.len() > MAX_USER_DATA_LEN {
            return Err(StampError::PayloadTooLarge {
                len: user_data.len(),
                max: MAX_USER_DATA_LEN,
            });
        }
        Ok(Self {
            uuid,
            user_data: user_data.to_vec(),
        })
    }

    /// Build the capture-timestamp message: [`TIMESTAMP_UUID`] + decimal ASCII.
    pub fn timestamp(ts: Timestamp) -> Result<Self> {
        Self::user_data_unregistered(TIMESTAMP_UUID, &ts.to_ascii())
    }

    pub fn payload_type(&self) -> u32 {
        USER_DATA_UNREGISTERED
    }

    pub fn uuid(&self) -> &[u8; UUID_LEN] {
        &self.uuid
    }

    pub fn user_data(&self) -> &[u8] {
        &self.user_data
    }

    /// payload_size as written in the message header (UUID + user data).
    pub fn payload_size(&self) -> usize {
        UUID_LEN + self.user_data.len()
    }

    /// Serialize the SEI RBSP, trailing bits included.
    pub fn to_rbsp(&self) -> Vec<u8> {
        let size = self.payload_size();
        let mut rbsp = Vec::with_capacity(size + size / 255 + 4);
        write_ff_coded(self.payload_type() as usize, &mut rbsp);
        write_ff_coded(size, &mut rbsp);
        rbsp.extend_from_slice(&self.uuid);
        rbsp.extend_from_slice(&self.user_data);
        rbsp.push(RBSP_TRAILING_BITS);
        rbsp
    }

    /// Wrap into an SEI NAL unit (nal_ref_idc = 0).
    pub fn to_nal_unit(&self) -> NalUnit {
        NalUnit::wrap(nal_unit_type::SEI, 0, &self.to_rbsp())
    }
}

/// One message parsed out of an SEI RBSP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeiMessage {
    pub payload_type: usize,
    pub payload: Vec<u8>,
}

impl SeiMessage {
    /// Split a `user_data_unregistered` payload into UUID and user data.
    pub fn as_user_data_unregistered(&self) -> Option<([u8; UUID_LEN], &[u8])> {
        if self.payload_type != USER_DATA_UNREGISTERED as usize || self.payload.len() < UUID_LEN {
            return None;
        }
        let mut uuid = [0u8; UUID_LEN];
        uuid.copy_from_slice(&self.payload[..UUID_LEN]);
        Some((uuid, &self.payload[UUID_LEN..]))
    }

    /// The capture timestamp, if this is one of ours.
    pub fn timestamp(&self) -> Option<Timestamp> {
        let (uuid, data) = self.as_user_data_unregistered()?;
        if uuid != TIMESTAMP_UUID {
            return None;
        }
        Timestamp::parse_ascii(data)
    }
}

/// Parse all messages in an SEI RBSP (emulation prevention already removed).
///
/// Returns `None` if a header or payload runs past the end of the buffer.
pub fn parse_sei_rbsp(rbsp: &[u8]) -> Option<Vec<SeiMessage>> {
    let mut messages = Vec::new();
    let mut pos = 0usize;
    // more_rbsp_data(): stop at the trailing-bits byte
    while pos < rbsp.len() && !(pos + 1 == rbsp.len() && rbsp[pos] == RBSP_TRAILING_BITS) {
        let (payload_type, used) = read_ff_coded(&rbsp[pos..])?;
        pos += used;
        let (size, used) = read_ff_coded(&rbsp[pos..])?;
        pos += used;
        let end = pos.checked_add(size)?;
        if end > rbsp.len() {
            return None;
        }
        messages.push(SeiMessage {
            payload_type,
            payload: rbsp[pos..end].to_vec(),
        });
        pos = end;
    }
    Some(messages)
}
