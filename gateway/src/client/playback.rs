//! Gapless playback scheduling.
//!
//! Each chunk starts where the previous one ends on the output clock, not when
//! it arrived, so irregular network pacing does not produce gaps. Stopping
//! cancels every scheduled source at once and rewinds the cursor to "now".

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, warn};

use crate::core::pcm::{decode_pcm16, duration_secs};

/// Identifier of one scheduled source on an [`AudioOutput`].
pub type SourceId = u64;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("Failed to decode audio chunk: {0}")]
    Decode(String),

    #[error("Failed to schedule audio chunk: {0}")]
    Schedule(String),

    #[error("Audio output is not running")]
    NotRunning,
}

/// A decoded mono buffer ready to play.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        duration_secs(self.samples.len(), self.sample_rate)
    }
}

/// An audio device with a monotonically increasing clock.
///
/// Implementations play each scheduled buffer starting at the given clock
/// time. `stop` silences a source immediately, whether or not it started.
pub trait AudioOutput: Send {
    /// Current playback clock, in seconds.
    fn current_time(&self) -> f64;

    fn is_running(&self) -> bool;

    fn schedule(
        &mut self,
        id: SourceId,
        buffer: PlaybackBuffer,
        start_at: f64,
    ) -> Result<(), PlaybackError>;

    fn stop(&mut self, id: SourceId);
}

/// Start and end of a scheduled chunk on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub id: SourceId,
    pub start: f64,
    pub end: f64,
}

pub struct PlaybackScheduler<O: AudioOutput> {
    output: O,
    sample_rate: u32,
    next_start_time: f64,
    active: BTreeMap<SourceId, ScheduledChunk>,
    next_id: SourceId,
}

impl<O: AudioOutput> PlaybackScheduler<O> {
    pub fn new(output: O, sample_rate: u32) -> Self {
        let next_start_time = output.current_time();
        Self {
            output,
            sample_rate,
            next_start_time,
            active: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Schedule one PCM16 LE chunk after everything already queued.
    ///
    /// Returns `None` when the chunk was not scheduled: the output is not
    /// running, or the chunk failed to decode or schedule (logged, dropped).
    pub fn enqueue(&mut self, pcm: &[u8]) -> Option<ScheduledChunk> {
        if !self.output.is_running() {
            debug!("Audio output not running, dropping chunk");
            return None;
        }

        let samples = match decode_pcm16(pcm) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("{}", PlaybackError::Decode(e.to_string()));
                return None;
            }
        };
        if samples.is_empty() {
            return None;
        }

        let now = self.output.current_time();
        self.prune_finished(now);

        let buffer = PlaybackBuffer {
            samples,
            sample_rate: self.sample_rate,
        };
        let start = self.next_start_time.max(now);
        let end = start + buffer.duration();
        let id = self.next_id;

        if let Err(e) = self.output.schedule(id, buffer, start) {
            warn!("Dropping audio chunk: {}", e);
            return None;
        }

        self.next_id += 1;
        self.next_start_time = end;
        let chunk = ScheduledChunk { id, start, end };
        self.active.insert(id, chunk);
        Some(chunk)
    }

    /// Silence everything scheduled and restart the cursor at "now".
    pub fn stop_all(&mut self) {
        let stopped = self.active.len();
        for id in std::mem::take(&mut self.active).into_keys() {
            self.output.stop(id);
        }
        self.next_start_time = self.output.current_time();

        if stopped > 0 {
            debug!(stopped, "Stopped all scheduled playback");
        }
    }

    /// The output reports that a source finished on its own.
    pub fn on_source_ended(&mut self, id: SourceId) {
        self.active.remove(&id);
    }

    /// Sources scheduled and not yet finished.
    pub fn active_len(&self) -> usize {
        self.count_unfinished()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    fn prune_finished(&mut self, now: f64) {
        self.active.retain(|_, chunk| chunk.end > now);
    }

    fn count_unfinished(&self) -> usize {
        let now = self.output.current_time();
        self.active.values().filter(|chunk| chunk.end > now).count()
    }
}
