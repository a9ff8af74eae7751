//! Audio artifacts and WAV I/O.
//!
//! Every synthesized chunk, and the final narration, is an [`Artifact`]:
//! mono `f32` samples in `[-1.0, 1.0]` plus the sample rate they were
//! produced at.  On disk artifacts are 16-bit PCM WAV files.

use std::path::Path;

use anyhow::{bail, Context, Result};

/// Sample rate assumed until a synthesis call or a cached artifact says otherwise.
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Full scale of 16-bit PCM.  Used both ways so that decoding a part file
/// and encoding it again gives back the same integers.
const PCM16_SCALE: f32 = 32_768.0;

/// A synthesized audio buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Artifact {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    // ── WAV writer ────────────────────────────────────────────────────────────

    /// Write the samples to a 16-bit PCM WAV file.
    pub fn write_wav(&self, output_path: &Path) -> Result<()> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(output_path, spec)
            .with_context(|| format!("Cannot create WAV: {}", output_path.display()))?;
        for &s in &self.samples {
            // f32 [-1.0, 1.0] → i16 [-32768, 32767]
            let s16 = (s * PCM16_SCALE).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            writer.write_sample(s16).context("WAV write error")?;
        }
        writer.finalize().context("WAV finalise error")?;
        Ok(())
    }

    // ── WAV reader ────────────────────────────────────────────────────────────

    /// Read a mono WAV file written by [`write_wav`](Self::write_wav) or by a
    /// synthesis worker.  Integer PCM of any width and 32-bit float are accepted.
    pub fn read_wav(path: &Path) -> Result<Self> {
        let mut reader = hound::WavReader::open(path)
            .with_context(|| format!("Cannot open WAV: {}", path.display()))?;
        let spec = reader.spec();
        if spec.channels != 1 {
            bail!(
                "Expected mono audio in {}, found {} channels",
                path.display(),
                spec.channels
            );
        }

        let samples = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()
                .with_context(|| format!("Corrupt WAV data: {}", path.display()))?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .with_context(|| format!("Corrupt WAV data: {}", path.display()))?
            }
        };

        Ok(Self { samples, sample_rate: spec.sample_rate })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
