//! # Playback Path
//!
//! Renders inbound audio frames in arrival order with no gaps and no
//! overlaps, and supports abrupt flush on barge-in.
//!
//! ## Scheduling Algorithm:
//! 1. Each decoded frame gets a `PlaybackHandle`
//! 2. `start_at = max(timeline_cursor, clock.now())`
//! 3. The handle is registered in the live set and handed to the output
//! 4. The cursor advances by exactly the frame's duration
//! 5. Natural completion (clock past `start_at + duration`) releases the
//!    handle; interruption stops every live handle and resets the cursor
//!
//! ## Trait seams:
//! The host runtime's audio clock and output device are modeled as explicit
//! `OutputClock` and `AudioOutput` traits so the scheduler is portable and
//! testable without a real audio device.

use crate::audio::codec::{self, AudioFrame};
use crate::error::VoiceResult;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Monotonic clock for the output timeline, in seconds since session start.
pub trait OutputClock {
    fn now(&self) -> f64;
}

/// Wall-clock implementation over `Instant`.
pub struct WallClock {
    origin: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputClock for WallClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Destination for scheduled audio.
///
/// ## Contract:
/// - `begin` is called exactly once per handle, before its start time
/// - `stop` may be called at most once per live handle (forced stop)
/// - `release` is called once at teardown and must not panic
pub trait AudioOutput {
    fn begin(&mut self, handle: &PlaybackHandle, frame: &AudioFrame);
    fn stop(&mut self, handle_id: u64);
    fn release(&mut self);
}

/// One scheduled, currently-playing or pending audio buffer.
///
/// Owned by the playback path from creation until its natural end or a
/// forced stop.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackHandle {
    /// Identifier unique within the session
    pub id: u64,

    /// Scheduled start time on the output timeline, seconds
    pub start_at: f64,

    /// Buffer duration, seconds
    pub duration: f64,
}

impl PlaybackHandle {
    /// Time at which this handle's buffer ends.
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

/// Gapless sequential playback scheduler.
///
/// ## Invariants:
/// - A handle's `start_at` is never earlier than the cursor at scheduling time
/// - The cursor only advances by the duration of the most recently scheduled
///   buffer, and never decreases while frames arrive in order
/// - The live set is empty immediately after an interruption or a flush
pub struct PlaybackScheduler<C: OutputClock, O: AudioOutput> {
    clock: C,
    output: O,

    /// Earliest time the next inbound buffer may begin playing
    cursor: f64,

    /// Live handles keyed by id, in scheduling order
    live: BTreeMap<u64, PlaybackHandle>,

    next_id: u64,
    interruptions: u64,
}

impl<C: OutputClock, O: AudioOutput> PlaybackScheduler<C, O> {
    pub fn new(clock: C, output: O) -> Self {
        Self {
            clock,
            output,
            cursor: 0.0,
            live: BTreeMap::new(),
            next_id: 0,
            interruptions: 0,
        }
    }

    /// Current timeline cursor value, seconds.
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Number of live (pending or playing) handles.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Total interruptions handled so far.
    pub fn interruption_count(&self) -> u64 {
        self.interruptions
    }

    /// Schedule one inbound frame for gapless playback.
    ///
    /// If the output clock has already passed the cursor (playback fell
    /// behind), the frame schedules at "now", which may leave an audible gap
    /// but never an overlap.
    pub fn schedule(&mut self, frame: AudioFrame) -> u64 {
        let now = self.clock.now();
        let start_at = self.cursor.max(now);
        let duration = frame.duration_secs();

        let handle = PlaybackHandle {
            id: self.next_id,
            start_at,
            duration,
        };
        self.next_id += 1;

        self.output.begin(&handle, &frame);
        self.cursor = start_at + duration;
        debug!(
            "Scheduled frame {} at {:.3}s ({:.3}s long), cursor now {:.3}s",
            handle.id, start_at, duration, self.cursor
        );
        self.live.insert(handle.id, handle);

        self.next_id - 1
    }

    /// Release handles whose buffers have finished playing.
    ///
    /// Models the host runtime's end-of-playback callback: any handle whose
    /// end time is at or before the clock is removed from the live set.
    pub fn reap_ended(&mut self) -> usize {
        let now = self.clock.now();
        let ended: Vec<u64> = self
            .live
            .values()
            .filter(|h| h.end_at() <= now)
            .map(|h| h.id)
            .collect();

        for id in &ended {
            self.live.remove(id);
        }
        ended.len()
    }

    /// Handle a barge-in signal from the remote side.
    ///
    /// Stops every live handle, clears the set and resets the cursor to
    /// zero, so the next inbound frame starts at "now".
    pub fn interrupt(&mut self) {
        let pending = self.live.len();
        self.flush();
        self.interruptions += 1;
        info!("Interruption: flushed {} pending playback handle(s)", pending);
    }

    /// Stop and release every live handle and reset the cursor.
    ///
    /// Shared by interruption handling and session teardown. Best-effort:
    /// the output's `stop` must not fail, and the scheduler state is cleared
    /// unconditionally.
    pub fn flush(&mut self) {
        for id in self.live.keys().copied().collect::<Vec<_>>() {
            self.output.stop(id);
        }
        self.live.clear();
        self.cursor = 0.0;
    }

    /// Release the output device. Called once during teardown.
    pub fn release_output(&mut self) {
        self.output.release();
    }
}

/// File-backed audio output that renders scheduled frames into a mono WAV
/// file on release.
///
/// Stand-in for a speaker device: frames are written at their scheduled
/// offsets (silence fills any gap), and a forced stop truncates the stopped
/// handle's remaining samples.
pub struct WavFileOutput {
    path: PathBuf,
    sample_rate: u32,
    timeline: Vec<f32>,
    regions: BTreeMap<u64, (usize, usize)>,
    released: bool,
}

impl WavFileOutput {
    pub fn new(path: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            path: path.into(),
            sample_rate,
            timeline: Vec::new(),
            regions: BTreeMap::new(),
            released: false,
        }
    }

    /// Rendered length in samples (test hook).
    #[cfg(test)]
    fn rendered_len(&self) -> usize {
        self.timeline.len()
    }
}

impl AudioOutput for WavFileOutput {
    fn begin(&mut self, handle: &PlaybackHandle, frame: &AudioFrame) {
        let offset = (handle.start_at * self.sample_rate as f64) as usize;
        let samples = frame.channel(0);

        if self.timeline.len() < offset {
            self.timeline.resize(offset, 0.0);
        }
        let end = offset + samples.len();
        if self.timeline.len() < end {
            self.timeline.resize(end, 0.0);
        }
        self.timeline[offset..end].copy_from_slice(samples);
        self.regions.insert(handle.id, (offset, end));
    }

    fn stop(&mut self, handle_id: u64) {
        // Forced stop: blank the stopped handle's region so flushed audio
        // does not appear in the rendered file
        if let Some((start, end)) = self.regions.remove(&handle_id) {
            let end = end.min(self.timeline.len());
            for sample in &mut self.timeline[start..end] {
                *sample = 0.0;
            }
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, self.sample_rate, 16);
        let pcm_bytes = codec::f32_to_pcm16(&self.timeline);
        let samples: Vec<i16> = pcm_bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();

        let result: VoiceResult<()> = (|| {
            let mut file = File::create(&self.path)?;
            wav::write(header, &wav::BitDepth::Sixteen(samples), &mut file)
                .map_err(crate::error::VoiceError::from)?;
            Ok(())
        })();

        match result {
            Ok(()) => info!(
                "Rendered {} samples of playback to {}",
                self.timeline.len(),
                self.path.display()
            ),
            // Teardown is best-effort; a failed render never escalates
            Err(e) => warn!("Failed to write playback file: {}", e),
        }
    }
}
