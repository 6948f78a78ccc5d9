//! Mono WAV file reading and writing.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const LOG_TARGET: &str = "wave";

/// Mono audio held in memory.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Wave {
    pub samples: Vec<f32>,
    pub sample_rate_hz: u32,
}

impl Wave {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate_hz == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate_hz)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum WaveError {
    #[error("wav i/o failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("sample rate must be > 0")]
    ZeroSampleRate,

    #[error("unsupported wav encoding: {0}")]
    Unsupported(String),
}

pub(crate) fn pcm16_spec(sample_rate_hz: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate: sample_rate_hz,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

pub(crate) fn f32_to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

/// Reads a WAV file, keeping only the first channel of multi-channel input.
pub fn read_wave(path: impl AsRef<Path>) -> Result<Wave, WaveError> {
    let path = path.as_ref();
    let io_err = |source| WaveError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = hound::WavReader::open(path).map_err(io_err)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(io_err)?,
        (hound::SampleFormat::Int, bits @ 8..=32) => {
            let scale = (1_i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(io_err)?
        }
        (format, bits) => {
            return Err(WaveError::Unsupported(format!("{format:?} {bits}-bit")));
        }
    };

    let samples = interleaved.into_iter().step_by(channels).collect();

    Ok(Wave {
        samples,
        sample_rate_hz: spec.sample_rate,
    })
}

/// Writes 16-bit PCM mono. Samples outside [-1, 1] are clamped.
pub fn write_wave(path: impl AsRef<Path>, wave: &Wave) -> Result<(), WaveError> {
    if wave.sample_rate_hz == 0 {
        return Err(WaveError::ZeroSampleRate);
    }

    let path = path.as_ref();
    let io_err = |source| WaveError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut writer =
        hound::WavWriter::create(path, pcm16_spec(wave.sample_rate_hz)).map_err(io_err)?;
    for &sample in &wave.samples {
        writer.write_sample(f32_to_i16(sample)).map_err(io_err)?;
    }
    writer.finalize().map_err(io_err)?;

    tracing::debug!(
        target: LOG_TARGET,
        path = %path.display(),
        samples = wave.samples.len(),
        sample_rate_hz = wave.sample_rate_hz,
        "wrote wav"
    );
    Ok(())
}
