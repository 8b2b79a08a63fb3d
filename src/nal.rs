//! H.264 NAL unit framing for the Annex B byte-stream format.
//!
//! ```text
//! start code   header               escaped payload
//! 00 00 00 01  F|NRI|type (1 byte)  RBSP with 0x03 inserted after every 00 00
//! 00 00 01                          that precedes 00, 01, 02 or 03
//! ```
//!
//! The first NAL unit of a stream carries the 4-byte start code; every later
//! unit carries the 3-byte form.

/// H.264 NAL unit type constants.
pub mod nal_unit_type {
    /// Non-IDR slice (P/B frame)
    pub const NON_IDR_SLICE: u8 = 1;
    /// IDR slice (keyframe)
    pub const IDR_SLICE: u8 = 5;
    /// Supplemental enhancement information
    pub const SEI: u8 = 6;
    /// Sequence parameter set
    pub const SPS: u8 = 7;
    /// Picture parameter set
    pub const PPS: u8 = 8;
    /// Access unit delimiter
    pub const AUD: u8 = 9;
}

/// Sequence-end code terminating every completed stream.
pub const SEQUENCE_END_CODE: [u8; 4] = [0x00, 0x00, 0x01, 0xB7];

/// Annex B start code prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartCode {
    /// `00 00 00 01`, used for the first NAL unit of the stream.
    Long,
    /// `00 00 01`, used for every subsequent NAL unit.
    Short,
}

impl StartCode {
    pub fn bytes(&self) -> &'static [u8] {
        match self {
            StartCode::Long => &[0x00, 0x00, 0x00, 0x01],
            StartCode::Short => &[0x00, 0x00, 0x01],
        }
    }
}

/// Build a NAL header byte: forbidden_zero_bit = 0, 2-bit nal_ref_idc, 5-bit type.
pub fn nal_header(nal_type: u8, ref_idc: u8) -> u8 {
    ((ref_idc & 0x03) << 5) | (nal_type & 0x1F)
}

/// Insert emulation-prevention bytes into `rbsp`, appending the result to `out`.
pub fn add_emulation_prevention_into(rbsp: &[u8], out: &mut Vec<u8>) {
    let mut zeros = 0usize;
    for &byte in rbsp {
        if zeros >= 2 && byte <= 0x03 {
            out.push(0x03);
            zeros = 0;
        }
        out.push(byte);
        if byte == 0x00 {
            zeros += 1;
        } else {
            zeros = 0;
        }
    }
}

/// Insert emulation-prevention bytes (RBSP → EBSP).
pub fn add_emulation_prevention(rbsp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rbsp.len() + rbsp.len() / 64 + 2);
    add_emulation_prevention_into(rbsp, &mut out);
    out
}

/// Remove emulation-prevention bytes (EBSP → RBSP).
///
/// Drops every `0x03` that follows a `00 00` pair and precedes a byte in
/// `00..=03`. Any other `0x03` is payload and is kept.
pub fn remove_emulation_prevention(ebsp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ebsp.len());
    let mut zeros = 0usize;
    let mut i = 0;
    while i < ebsp.len() {
        let byte = ebsp[i];
        if zeros >= 2 && byte == 0x03 && ebsp.get(i + 1).is_some_and(|&next| next <= 0x03) {
            zeros = 0;
            i += 1;
            continue;
        }
        out.push(byte);
        if byte == 0x00 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        i += 1;
    }
    out
}

/// True if `data` contains a raw `00 00 00`, `00 00 01` or `00 00 02` triple.
pub fn contains_start_code_emulation(data: &[u8]) -> bool {
    data.windows(3)
        .any(|w| w[0] == 0x00 && w[1] == 0x00 && w[2] <= 0x02)
}

/// A single H.264 NAL unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit {
    /// The NAL unit bytes: header plus escaped payload, no start code.
    pub data: Vec<u8>,
    /// NAL unit type (from first byte & 0x1F).
    pub nal_type: u8,
}

impl NalUnit {
    /// Wrap an RBSP payload into a NAL unit, applying emulation prevention.
    pub fn wrap(nal_type: u8, ref_idc: u8, rbsp: &[u8]) -> Self {
        let mut data = Vec::with_capacity(rbsp.len() + rbsp.len() / 64 + 3);
        data.push(nal_header(nal_type, ref_idc));
        add_emulation_prevention_into(rbsp, &mut data);
        Self {
            data,
            nal_type: nal_type & 0x1F,
        }
    }

    /// Take an already-escaped NAL unit (header included) verbatim.
    ///
    /// Returns `None` for empty input.
    pub fn from_escaped(data: &[u8]) -> Option<Self> {
        let header = *data.first()?;
        Some(Self {
            data: data.to_vec(),
            nal_type: header & 0x1F,
        })
    }

    /// The header byte.
    pub fn header(&self) -> u8 {
        self.data[0]
    }

    /// nal_ref_idc (0..=3).
    pub fn ref_idc(&self) -> u8 {
        (self.header() >> 5) & 0x03
    }

    /// Escaped payload after the header.
    pub fn payload(&self) -> &[u8] {
        &self.data[1..]
    }

    /// Payload with emulation prevention removed.
    pub fn rbsp(&self) -> Vec<u8> {
        remove_emulation_prevention(self.payload())
    }

    /// Returns true if this NAL unit is an IDR (keyframe) slice.
    pub fn is_idr(&self) -> bool {
        self.nal_type == nal_unit_type::IDR_SLICE
    }

    /// Returns true if this NAL unit is an SEI.
    pub fn is_sei(&self) -> bool {
        self.nal_type == nal_unit_type::SEI
    }

    /// Returns true if this NAL unit is a video slice (IDR or non-IDR).
    pub fn is_slice(&self) -> bool {
        self.nal_type == nal_unit_type::IDR_SLICE || self.nal_type == nal_unit_type::NON_IDR_SLICE
    }

    /// Convert NAL unit to Annex B format with the given start code.
    pub fn to_annex_b(&self, start_code: StartCode) -> Vec<u8> {
        let prefix = start_code.bytes();
        let mut result = Vec::with_capacity(prefix.len() + self.data.len());
        result.extend_from_slice(prefix);
        result.extend_from_slice(&self.data);
        result
    }
}

/// One NAL unit located inside an Annex B buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnexBUnit<'a> {
    /// Offset of the start code in the buffer.
    pub offset: usize,
    /// 3 or 4.
    pub start_code_len: usize,
    /// NAL bytes (header + escaped payload), no start code.
    pub data: &'a [u8],
}

/// Locate every NAL unit in an Annex B buffer.
///
/// Splits on `00 00 01`; a zero byte directly before it (and after the
/// previous unit's payload start) makes it a 4-byte start code. Bytes
/// before the first start code and empty units are ignored.
pub fn split_annex_b(data: &[u8]) -> Vec<AnnexBUnit<'_>> {
    // (start code offset, start code length, payload start)
    let mut starts: Vec<(usize, usize, usize)> = Vec::new();
    let mut floor = 0;
    let mut i = 0;
    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let (offset, len) = if i > floor && data[i - 1] == 0 {
                (i - 1, 4)
            } else {
                (i, 3)
            };
            starts.push((offset, len, i + 3));
            i += 3;
            floor = i;
        } else {
            i += 1;
        }
    }

    let mut units = Vec::with_capacity(starts.len());
    for (idx, &(offset, start_code_len, begin)) in starts.iter().enumerate() {
        let end = starts
            .get(idx + 1)
            .map(|&(next_offset, _, _)| next_offset)
            .unwrap_or(data.len());
        if begin >= end {
            continue;
        }
        units.push(AnnexBUnit {
            offset,
            start_code_len,
            data: &data[begin..end],
        });
    }
    units
}

/// Parse raw Annex B H.264 data into NAL units.
pub fn parse_annex_b(data: &[u8]) -> Vec<NalUnit> {
    split_annex_b(data)
        .into_iter()
        .filter_map(|unit| NalUnit::from_escaped(unit.data))
        .collect()
}

/// True if `data` begins with a 3- or 4-byte start code.
pub fn starts_with_start_code(data: &[u8]) -> bool {
    data.starts_with(StartCode::Short.bytes()) || data.starts_with(StartCode::Long.bytes())
}
