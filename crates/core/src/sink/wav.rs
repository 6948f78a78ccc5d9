use crate::sink::{AudioSink, Continuation};
use crate::wave::{f32_to_i16, pcm16_spec, WaveError};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

const LOG_TARGET: &str = "sink::wav";

/// Streams chunks into a 16-bit PCM mono WAV file as they arrive.
///
/// A write failure stops synthesis; the error is kept and returned by
/// [`WavFileSink::finish`].
pub struct WavFileSink {
    path: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    samples_written: u64,
    failure: Option<hound::Error>,
}

impl WavFileSink {
    pub fn create(path: impl AsRef<Path>, sample_rate_hz: u32) -> Result<Self, WaveError> {
        if sample_rate_hz == 0 {
            return Err(WaveError::ZeroSampleRate);
        }
        let path = path.as_ref().to_path_buf();
        let writer = hound::WavWriter::create(&path, pcm16_spec(sample_rate_hz)).map_err(
            |source| WaveError::Io {
                path: path.clone(),
                source,
            },
        )?;

        Ok(Self {
            path,
            writer: Some(writer),
            samples_written: 0,
            failure: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Finalizes the header and returns the number of samples in the file.
    pub fn finish(mut self) -> Result<u64, WaveError> {
        if let Some(source) = self.failure.take() {
            return Err(WaveError::Io {
                path: self.path.clone(),
                source,
            });
        }
        if let Some(writer) = self.writer.take() {
            writer.finalize().map_err(|source| WaveError::Io {
                path: self.path.clone(),
                source,
            })?;
        }
        Ok(self.samples_written)
    }

    fn write_chunk(&mut self, samples: &[f32]) -> Result<(), hound::Error> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        for &sample in samples {
            writer.write_sample(f32_to_i16(sample))?;
        }
        self.samples_written += samples.len() as u64;
        Ok(())
    }
}

impl AudioSink for WavFileSink {
    fn deliver(&mut self, samples: &[f32]) -> Continuation {
        if self.failure.is_some() {
            return Continuation::Stop;
        }

        match self.write_chunk(samples) {
            Ok(()) => Continuation::Continue,
            Err(error) => {
                tracing::error!(
                    target: LOG_TARGET,
                    path = %self.path.display(),
                    error = %error,
                    "wav write failed; stopping synthesis"
                );
                self.failure = Some(error);
                Continuation::Stop
            }
        }
    }
}
