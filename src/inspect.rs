//! Stream inspection.
//!
//! Splits a stamped Annex B stream back into access units and recovers the
//! capture timestamp carried by each one. This only looks at NAL headers and
//! SEI payloads; slice data is never decoded.

use crate::nal::{nal_unit_type, remove_emulation_prevention, split_annex_b, SEQUENCE_END_CODE};
use crate::sei::parse_sei_rbsp;
use crate::timestamp::Timestamp;

/// One access unit found in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnitRecord {
    /// Byte offset of the unit's first start code.
    pub offset: usize,
    /// Timestamp from the leading SEI, if it carried one of ours.
    pub timestamp: Option<Timestamp>,
    /// NAL unit types following the SEI (parameter sets, slices).
    pub video_nal_types: Vec<u8>,
}

impl AccessUnitRecord {
    pub fn video_nals(&self) -> usize {
        self.video_nal_types.len()
    }

    pub fn is_keyframe(&self) -> bool {
        self.video_nal_types.contains(&nal_unit_type::IDR_SLICE)
    }
}

/// Summary of an inspected stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamReport {
    pub access_units: Vec<AccessUnitRecord>,
    /// Total NAL units, end code excluded.
    pub nal_units: usize,
    /// Start code length of the first NAL unit (0 if none).
    pub first_start_code_len: usize,
    /// The stream ends with the sequence-end code and nothing after it.
    pub terminated: bool,
}

impl StreamReport {
    /// Timestamps of every access unit that carried one, in stream order.
    pub fn timestamps(&self) -> Vec<Timestamp> {
        self.access_units
            .iter()
            .filter_map(|au| au.timestamp)
            .collect()
    }

    /// True if the recovered timestamps never go backwards.
    pub fn is_monotonic(&self) -> bool {
        self.timestamps().windows(2).all(|w| w[0] <= w[1])
    }

    /// Access units without a readable timestamp.
    pub fn unstamped(&self) -> usize {
        self.access_units
            .iter()
            .filter(|au| au.timestamp.is_none())
            .count()
    }
}

/// Inspect a complete or partial stamped stream.
///
/// Each SEI NAL unit opens a new access unit; NAL units before the first SEI
/// are grouped into an unstamped leading unit.
pub fn inspect(data: &[u8]) -> StreamReport {
    let terminated = data.ends_with(&SEQUENCE_END_CODE);
    let body = if terminated {
        &data[..data.len() - SEQUENCE_END_CODE.len()]
    } else {
        data
    };

    let mut report = StreamReport {
        terminated,
        ..Default::default()
    };

    for unit in split_annex_b(body) {
        if report.nal_units == 0 {
            report.first_start_code_len = unit.start_code_len;
        }
        report.nal_units += 1;

        let nal_type = unit.data[0] & 0x1F;
        if nal_type == nal_unit_type::SEI {
            let rbsp = remove_emulation_prevention(&unit.data[1..]);
            let timestamp = parse_sei_rbsp(&rbsp)
                .and_then(|messages| messages.iter().find_map(|m| m.timestamp()));
            report.access_units.push(AccessUnitRecord {
                offset: unit.offset,
                timestamp,
                video_nal_types: Vec::new(),
            });
            continue;
        }

        match report.access_units.last_mut() {
            Some(au) => au.video_nal_types.push(nal_type),
            None => report.access_units.push(AccessUnitRecord {
                offset: unit.offset,
                timestamp: None,
                video_nal_types: vec![nal_type],
            }),
        }
    }

    tracing::debug!(
        "inspected {} bytes: {} NAL units, {} access units, terminated={}",
        data.len(),
        report.nal_units,
        report.access_units.len(),
        report.terminated
    );
    report
}
