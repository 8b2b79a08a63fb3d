//! Capture → encode → assemble pipeline.
//!
//! One [`Session`] owns the encoder adapter and the assembler (and through it
//! the output sink). Frames come from a [`FrameSource`], either on the
//! calling thread or on a capture thread feeding a bounded queue. Encoding
//! and assembly always stay on the calling thread so the output has a single
//! writer.
//!
//! Any error aborts the session: nothing more is submitted, packets the
//! encoder already holds are drained unless the encoder or the sink itself
//! failed, the sequence-end code is still written and the error is returned.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use sei_stamp_codec::{EncoderConfig, VideoEncoder, VideoFrame};
use tracing::{error, info, warn};

use crate::adapter::EncoderAdapter;
use crate::assembler::{AccessUnitAssembler, AssemblerState};
use crate::error::{Result, StampError};
use crate::source::FrameSource;
use crate::timestamp::TimestampSource;

/// Stream parameters, fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    /// Target bitrate in bits per second.
    pub bitrate: u32,
    /// Upper bitrate bound in bits per second.
    pub max_bitrate: u32,
    /// Keyframe interval in frames.
    pub gop_size: u32,
    /// Frames to submit; `None` runs until stopped.
    pub frame_count: Option<u64>,
    /// Capture on a separate thread.
    pub threaded: bool,
    /// Raw frames buffered between the capture thread and the encoder.
    pub queue_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            frame_rate: 30,
            bitrate: 2_000_000,
            max_bitrate: 2_000_000,
            gop_size: 10,
            frame_count: Some(91),
            threaded: false,
            queue_depth: 4,
        }
    }
}

impl SessionConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = fps;
        self
    }

    /// Target bitrate; also raises the upper bound if it was lower.
    #[must_use]
    pub fn bitrate(mut self, bps: u32) -> Self {
        self.bitrate = bps;
        self.max_bitrate = self.max_bitrate.max(bps);
        self
    }

    #[must_use]
    pub fn max_bitrate(mut self, bps: u32) -> Self {
        self.max_bitrate = bps;
        self
    }

    #[must_use]
    pub fn gop_size(mut self, frames: u32) -> Self {
        self.gop_size = frames;
        self
    }

    #[must_use]
    pub fn frame_count(mut self, frames: Option<u64>) -> Self {
        self.frame_count = frames;
        self
    }

    #[must_use]
    pub fn threaded(mut self, threaded: bool) -> Self {
        self.threaded = threaded;
        self
    }

    #[must_use]
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    /// Encoder parameters derived from this session.
    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig::new(self.width, self.height)
            .framerate(self.frame_rate, 1)
            .bitrate(self.bitrate)
            .bitrate_bounds(0, self.max_bitrate)
            .gop_length(self.gop_size)
            .b_frames(0)
    }
}

/// Counters reported when a session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_submitted: u64,
    pub frames_skipped: u64,
    pub access_units: u64,
    pub bytes_written: u64,
}

/// One stamped output stream.
pub struct Session<E, C, W: Write> {
    config: SessionConfig,
    adapter: EncoderAdapter<E, C>,
    assembler: AccessUnitAssembler<W>,
    frames_submitted: u64,
}

impl<E, C, W> Session<E, C, W>
where
    E: VideoEncoder,
    C: TimestampSource,
    W: Write,
{
    pub fn new(config: SessionConfig, encoder: E, clock: C, sink: W) -> Result<Self> {
        let dims = encoder.dimensions();
        if dims != (config.width, config.height) {
            return Err(StampError::EncoderRejected(format!(
                "encoder configured for {}x{}, session is {}x{}",
                dims.0, dims.1, config.width, config.height
            )));
        }
        Ok(Self {
            config,
            adapter: EncoderAdapter::new(encoder, clock),
            assembler: AccessUnitAssembler::new(sink),
            frames_submitted: 0,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn into_sink(self) -> W {
        self.assembler.into_inner()
    }

    /// Capture until the frame count is reached or `stop` is set, then flush
    /// and close the stream.
    pub fn run<S: FrameSource>(&mut self, source: S, stop: &AtomicBool) -> Result<SessionStats> {
        info!(
            "session: {} -> {} {}x{} @ {} fps, {} bps (max {}), GOP {}, frames {}",
            source.describe(),
            self.adapter.encoder().name(),
            self.config.width,
            self.config.height,
            self.config.frame_rate,
            self.config.bitrate,
            self.config.max_bitrate,
            self.config.gop_size,
            self.config
                .frame_count
                .map_or_else(|| "unbounded".to_string(), |n| n.to_string()),
        );

        let mut skipped = 0;
        let result = self
            .assembler
            .open()
            .and_then(|()| self.check_source(&source))
            .and_then(|()| {
                let captured = if self.config.threaded {
                    self.capture_threaded(source, stop)
                } else {
                    self.capture_sequential(source, stop)
                };
                skipped = captured.skipped;
                captured.result
            })
            .and_then(|()| self.adapter.flush(&mut self.assembler).map(|_| ()))
            .and_then(|()| self.assembler.close());

        if let Err(e) = result {
            error!("aborting session: {}", e);
            let drainable = !matches!(e, StampError::EncoderRejected(_) | StampError::Io(_))
                && !self.adapter.is_flushed()
                && self.assembler.state() != AssemblerState::Closed;
            if drainable {
                match self.adapter.flush(&mut self.assembler) {
                    Ok(n) => info!("drained {} access units after abort", n),
                    Err(flush_err) => warn!("could not drain encoder: {}", flush_err),
                }
            }
            if self.assembler.state() != AssemblerState::Closed {
                if let Err(close_err) = self.assembler.close() {
                    warn!("could not terminate stream: {}", close_err);
                }
            }
            return Err(e);
        }

        let stats = SessionStats {
            frames_submitted: self.frames_submitted,
            frames_skipped: skipped,
            access_units: self.assembler.access_units(),
            bytes_written: self.assembler.bytes_written(),
        };
        info!(
            "session complete: {} frames, {} skipped, {} access units, {} bytes",
            stats.frames_submitted, stats.frames_skipped, stats.access_units, stats.bytes_written
        );
        Ok(stats)
    }

    fn check_source<S: FrameSource>(&self, source: &S) -> Result<()> {
        let (w, h) = source.resolution();
        if (w, h) != (self.config.width, self.config.height) {
            return Err(StampError::DeviceUnavailable(format!(
                "source delivers {}x{}, session is {}x{}",
                w, h, self.config.width, self.config.height
            )));
        }
        Ok(())
    }

    fn submit_frame(&mut self, mut frame: VideoFrame) -> Result<()> {
        frame.frame_index = self.frames_submitted;
        self.adapter.submit(&frame, &mut self.assembler)?;
        self.frames_submitted += 1;
        Ok(())
    }

    fn capture_sequential<S: FrameSource>(&mut self, mut source: S, stop: &AtomicBool) -> Captured {
        let config = self.config.clone();
        let mut failure = None;
        let skipped = capture_frames(&mut source, &config, stop, |item| {
            match item.and_then(|frame| self.submit_frame(frame)) {
                Ok(()) => true,
                Err(e) => {
                    failure = Some(e);
                    false
                }
            }
        });
        Captured {
            skipped,
            result: failure.map_or(Ok(()), Err),
        }
    }

    fn capture_threaded<S: FrameSource>(&mut self, mut source: S, stop: &AtomicBool) -> Captured {
        let config = self.config.clone();
        let (tx, rx) = mpsc::sync_channel::<Result<VideoFrame>>(config.queue_depth.max(1));

        std::thread::scope(|scope| {
            let capture = scope.spawn(move || {
                capture_frames(&mut source, &config, stop, |item| tx.send(item).is_ok())
            });

            let mut result = Ok(());
            for item in rx.iter() {
                if let Err(e) = item.and_then(|frame| self.submit_frame(frame)) {
                    result = Err(e);
                    break;
                }
            }
            // Unblocks a capture thread waiting on a full queue.
            drop(rx);

            match capture.join() {
                Ok(skipped) => Captured { skipped, result },
                Err(_) => Captured {
                    skipped: 0,
                    result: result.and(Err(StampError::DeviceUnavailable(
                        "capture thread panicked".into(),
                    ))),
                },
            }
        })
    }
}

struct Captured {
    skipped: u64,
    result: Result<()>,
}

/// Pull frames from `source` and hand usable ones to `deliver` until the
/// frame count is reached, `stop` is set, the source fails or `deliver`
/// returns false. A source error is delivered once and ends capture.
///
/// Returns the number of skipped ticks.
fn capture_frames<S, F>(source: &mut S, config: &SessionConfig, stop: &AtomicBool, mut deliver: F) -> u64
where
    S: FrameSource + ?Sized,
    F: FnMut(Result<VideoFrame>) -> bool,
{
    let mut delivered = 0u64;
    let mut skipped = 0u64;
    while !stop.load(Ordering::Relaxed) && config.frame_count.map_or(true, |n| delivered < n) {
        match source.next_frame() {
            Ok(Some(frame)) if usable(&frame, config) => {
                delivered += 1;
                if !deliver(Ok(frame)) {
                    break;
                }
            }
            Ok(Some(_)) => skipped += 1,
            Ok(None) => {
                skipped += 1;
                warn!("capture returned no frame, skipping");
            }
            Err(e) => {
                deliver(Err(e));
                break;
            }
        }
    }
    if stop.load(Ordering::Relaxed) {
        info!("capture stopped after {} frames", delivered);
    }
    skipped
}

/// Empty or mis-sized frames never reach the encoder.
fn usable(frame: &VideoFrame, config: &SessionConfig) -> bool {
    if (frame.width, frame.height) != (config.width, config.height) {
        warn!(
            "skipping {}x{} frame in a {}x{} session",
            frame.width, frame.height, config.width, config.height
        );
        return false;
    }
    if frame.is_empty() {
        warn!(
            "skipping empty frame ({} of {} bytes)",
            frame.data.len(),
            frame.expected_data_size()
        );
        return false;
    }
    true
}
