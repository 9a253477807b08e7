//! Silence time ranges in an audio buffer.
//!
//! Ranges are sorted and overlapping or touching ranges merged before any
//! fade is applied, so each muted region gets exactly one fade-in and one
//! fade-out.

use super::wav::AudioBuffer;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Default fade length around a muted range
pub const DEFAULT_FADE_DURATION_SECS: f64 = 0.01;

/// A time range to silence, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MuteRange {
    pub start_time: f64,
    pub end_time: f64,
}

impl MuteRange {
    pub fn new(start_time: f64, end_time: f64) -> Self {
        Self {
            start_time,
            end_time,
        }
    }

    fn is_valid(&self) -> bool {
        self.start_time.is_finite() && self.end_time.is_finite() && self.end_time > self.start_time
    }
}

/// Sort ranges by start and merge overlapping or adjacent ones.
///
/// Empty, inverted and non-finite ranges are dropped.
pub fn merge_ranges(ranges: &[MuteRange]) -> Vec<MuteRange> {
    let mut sorted: Vec<MuteRange> = ranges
        .iter()
        .filter(|r| {
            let valid = r.is_valid();
            if !valid {
                warn!("Ignoring invalid mute range {:.3}..{:.3}", r.start_time, r.end_time);
            }
            valid
        })
        .copied()
        .collect();
    sorted.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

    let mut merged: Vec<MuteRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(last) if range.start_time <= last.end_time => {
                last.end_time = last.end_time.max(range.end_time);
            }
            _ => merged.push(range),
        }
    }
    merged
}

#[derive(Debug, Clone)]
pub struct AudioMuter {
    fade_duration_secs: f64,
}

impl Default for AudioMuter {
    fn default() -> Self {
        Self::new(DEFAULT_FADE_DURATION_SECS)
    }
}

impl AudioMuter {
    pub fn new(fade_duration_secs: f64) -> Self {
        Self {
            fade_duration_secs: fade_duration_secs.max(0.0),
        }
    }

    pub fn fade_duration_secs(&self) -> f64 {
        self.fade_duration_secs
    }

    /// Return a copy of `buffer` with `ranges` silenced
    pub fn mute(&self, buffer: &AudioBuffer, ranges: &[MuteRange]) -> AudioBuffer {
        let mut muted = buffer.clone();
        self.mute_in_place(&mut muted, ranges);
        muted
    }

    /// Silence `ranges` in place, returning the number of frames touched.
    ///
    /// A span longer than two fades gets a linear fade to zero, hard zero in
    /// the middle and a linear fade back; shorter spans are zeroed outright.
    pub fn mute_in_place(&self, buffer: &mut AudioBuffer, ranges: &[MuteRange]) -> usize {
        let merged = merge_ranges(ranges);
        if merged.is_empty() {
            return 0;
        }

        let channels = buffer.channels.max(1) as usize;
        let frames = buffer.frames();
        let rate = buffer.sample_rate as f64;
        let fade = (self.fade_duration_secs * rate) as usize;
        let mut touched = 0;

        for range in &merged {
            let start = ((range.start_time * rate) as usize).min(frames);
            let end = ((range.end_time * rate) as usize).min(frames);
            if end <= start {
                continue;
            }

            let span = end - start;
            let frame_gain = |frame: usize| -> f32 {
                if fade == 0 || span <= 2 * fade {
                    return 0.0;
                }
                let offset = frame - start;
                if offset < fade {
                    linspace_at(1.0, 0.0, fade, offset)
                } else if offset >= span - fade {
                    linspace_at(0.0, 1.0, fade, offset - (span - fade))
                } else {
                    0.0
                }
            };

            for frame in start..end {
                let gain = frame_gain(frame);
                for sample in &mut buffer.samples[frame * channels..(frame + 1) * channels] {
                    *sample *= gain;
                }
            }

            touched += span;
            debug!(
                "Muted {:.3}s to {:.3}s ({} frames)",
                range.start_time, range.end_time, span
            );
        }

        info!(
            "Muted {} ranges ({} merged) covering {:.2}s",
            ranges.len(),
            merged.len(),
            touched as f64 / rate.max(1.0)
        );

        touched
    }
}

/// Value `index` of `count` evenly spaced points from `from` to `to` inclusive
fn linspace_at(from: f32, to: f32, count: usize, index: usize) -> f32 {
    if count <= 1 {
        return from;
    }
    from + (to - from) * index as f32 / (count - 1) as f32
}
