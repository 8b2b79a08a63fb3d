//! Capture timestamps.
//!
//! A [`MonotonicClock`] anchors a monotonic [`Instant`] to the wall clock once,
//! at construction, and reports every later sample as anchor + elapsed. The
//! result reads like wall-clock microseconds but never jumps backwards when
//! the system time is adjusted mid-session.

use std::fmt;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::error::{Result, StampError};

/// Microseconds since an unspecified epoch (the Unix epoch for [`MonotonicClock`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Raw microsecond count.
    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Decimal ASCII rendering embedded in the SEI payload (no padding, no leading zeros).
    pub fn to_ascii(&self) -> Vec<u8> {
        self.0.to_string().into_bytes()
    }

    /// Parse the decimal ASCII form back into a timestamp.
    pub fn parse_ascii(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() || bytes.len() > 20 || !bytes.iter().all(u8::is_ascii_digit) {
            return None;
        }
        std::str::from_utf8(bytes).ok()?.parse().ok().map(Timestamp)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Round a duration to whole microseconds, half up.
fn round_micros(d: Duration) -> u64 {
    let micros = d.as_secs() * 1_000_000 + u64::from(d.subsec_micros());
    if d.subsec_nanos() % 1000 >= 500 {
        micros + 1
    } else {
        micros
    }
}

/// Source of per-frame capture timestamps.
pub trait TimestampSource {
    /// Sample the current time. Never returns a value below the previous sample.
    fn now(&mut self) -> Result<Timestamp>;
}

/// Wall-anchored monotonic clock.
#[derive(Debug)]
pub struct MonotonicClock {
    anchor_wall_us: u64,
    anchor: Instant,
    last: Option<Timestamp>,
}

impl MonotonicClock {
    /// Anchor a new clock to the current system time.
    pub fn new() -> Result<Self> {
        let anchor = Instant::now();
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| StampError::ClockUnavailable(e.to_string()))?;
        Ok(Self {
            anchor_wall_us: round_micros(wall),
            anchor,
            last: None,
        })
    }

    /// The previous sample, if any.
    pub fn last(&self) -> Option<Timestamp> {
        self.last
    }
}

impl TimestampSource for MonotonicClock {
    fn now(&mut self) -> Result<Timestamp> {
        let elapsed = round_micros(self.anchor.elapsed());
        let micros = self
            .anchor_wall_us
            .checked_add(elapsed)
            .ok_or_else(|| StampError::ClockUnavailable("timestamp overflow".into()))?;
        let mut ts = Timestamp(micros);

        if let Some(prev) = self.last {
            // Instant is monotonic; the clamp guards rounding at the microsecond edge.
            if ts < prev {
                ts = prev;
            }
            tracing::debug!("timestamp {} (+{} us)", ts, ts.0 - prev.0);
        }
        self.last = Some(ts);
        Ok(ts)
    }
}

/// Best-effort wall clock, used when a [`MonotonicClock`] cannot be anchored.
///
/// Samples that would go backwards (system time stepped back) are clamped to
/// the previous value so the reported sequence stays non-decreasing.
#[derive(Debug, Default)]
pub struct WallClock {
    last: Option<Timestamp>,
}

impl WallClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimestampSource for WallClock {
    fn now(&mut self) -> Result<Timestamp> {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| StampError::ClockUnavailable(e.to_string()))?;
        let ts = Timestamp(round_micros(wall)).max(self.last.unwrap_or(Timestamp(0)));
        self.last = Some(ts);
        Ok(ts)
    }
}

impl<T: TimestampSource + ?Sized> TimestampSource for Box<T> {
    fn now(&mut self) -> Result<Timestamp> {
        (**self).now()
    }
}
