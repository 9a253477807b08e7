//! WAV audio buffers.
//!
//! Samples are held interleaved and normalized to [-1.0, 1.0] whatever the
//! file's sample format, and written back in the format they were read in.

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),
    #[error("Sample count {samples} is not a multiple of {channels} channels")]
    MisalignedChannels { samples: usize, channels: u16 },
}

/// Decoded audio with the format it was read in
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Interleaved samples, normalized to [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub sample_format: SampleFormat,
}

impl AudioBuffer {
    /// 16-bit integer PCM buffer
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        }
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(samples, 1, sample_rate)
    }

    /// Read a WAV file
    pub fn load(path: &Path) -> Result<Self, AudioError> {
        let mut reader = WavReader::open(path)?;
        let spec = reader.spec();

        let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>()?,
            (SampleFormat::Int, bits @ (8 | 16 | 24 | 32)) => {
                let scale = int_scale(bits);
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
            (format, bits) => {
                return Err(AudioError::UnsupportedFormat(format!(
                    "{:?} {}-bit",
                    format, bits
                )));
            }
        };

        let buffer = Self {
            samples,
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
            sample_format: spec.sample_format,
        };
        buffer.check_channels()?;

        debug!(
            "Loaded {:?}: {} Hz, {} channels, {:.2}s",
            path,
            buffer.sample_rate,
            buffer.channels,
            buffer.duration_secs()
        );

        Ok(buffer)
    }

    /// Write the buffer in its own sample format
    pub fn save(&self, path: &Path) -> Result<(), AudioError> {
        self.write(path, self.sample_format, self.bits_per_sample)
    }

    /// Write the buffer as 16-bit integer PCM, whatever its own format
    pub fn save_pcm16(&self, path: &Path) -> Result<(), AudioError> {
        self.write(path, SampleFormat::Int, 16)
    }

    fn write(&self, path: &Path, format: SampleFormat, bits: u16) -> Result<(), AudioError> {
        self.check_channels()?;

        let spec = WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: bits,
            sample_format: format,
        };
        let mut writer = WavWriter::create(path, spec)?;

        match format {
            SampleFormat::Float => {
                for &sample in &self.samples {
                    writer.write_sample(sample)?;
                }
            }
            SampleFormat::Int => {
                let scale = int_scale(bits);
                for &sample in &self.samples {
                    let value = (sample * scale).round().clamp(-scale, scale - 1.0);
                    writer.write_sample(value as i32)?;
                }
            }
        }

        writer.finalize()?;
        Ok(())
    }

    fn check_channels(&self) -> Result<(), AudioError> {
        if self.channels == 0 || self.samples.len() % self.channels as usize != 0 {
            return Err(AudioError::MisalignedChannels {
                samples: self.samples.len(),
                channels: self.channels,
            });
        }
        Ok(())
    }

    /// Number of samples per channel
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

fn int_scale(bits: u16) -> f32 {
    (1i64 << (bits - 1)) as f32
}
