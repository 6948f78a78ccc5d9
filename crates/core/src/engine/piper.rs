use crate::config::SegmentOptions;
use crate::engine::{text, validate_request, EngineError, SynthesisEngine, TtsRequest};
use crate::fsutil;
use crate::session::{GeneratedAudio, SessionReport, SynthesisSession};
use crate::sink::{AudioSink, Progress};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const PIPER_SAMPLE_RATE: u32 = 22050;
const WAV_HEADER_BYTES: usize = 44;
const LOG_TARGET: &str = "engine::piper";

/// The parts of a Piper voice's `<model>.onnx.json` we care about.
#[derive(Debug, Default, Deserialize)]
struct VoiceConfig {
    #[serde(default)]
    audio: Option<VoiceAudio>,
    #[serde(default)]
    num_speakers: u32,
}

#[derive(Debug, Deserialize)]
struct VoiceAudio {
    sample_rate: u32,
}

/// Runs the `piper` executable once per batch and streams its output.
#[derive(Clone, Debug)]
pub struct PiperEngine {
    piper_binary: PathBuf,
    model_path: PathBuf,
    sample_rate_hz: u32,
    num_speakers: u32,
    segments: SegmentOptions,
}

impl PiperEngine {
    /// Fails when the model file does not exist. Sample rate and speaker count
    /// are taken from the voice config next to the model when there is one.
    pub fn new(piper_binary: PathBuf, model_path: PathBuf) -> Result<Self, EngineError> {
        fsutil::ensure_file_exists(&model_path)?;
        let voice = load_voice_config(&model_path)?;

        let sample_rate_hz = voice
            .audio
            .map(|a| a.sample_rate)
            .filter(|&sr| sr > 0)
            .unwrap_or(PIPER_SAMPLE_RATE);
        let num_speakers = if voice.num_speakers > 1 {
            voice.num_speakers
        } else {
            0
        };

        tracing::debug!(
            target: LOG_TARGET,
            model = %model_path.display(),
            sample_rate_hz,
            num_speakers,
            "piper voice loaded"
        );

        Ok(Self {
            piper_binary,
            model_path,
            sample_rate_hz,
            num_speakers,
            segments: SegmentOptions::default(),
        })
    }

    /// Overrides the speaker count from the voice config when nonzero.
    #[must_use]
    pub fn with_num_speakers(mut self, num_speakers: u32) -> Self {
        if num_speakers > 0 {
            self.num_speakers = num_speakers;
        }
        self
    }

    #[must_use]
    pub fn with_segments(mut self, segments: SegmentOptions) -> Self {
        self.segments = segments;
        self
    }

    async fn synthesize_batch(
        &self,
        text: &str,
        speaker_id: u32,
        speed: f32,
    ) -> Result<Vec<f32>, EngineError> {
        let mut command = Command::new(&self.piper_binary);
        command
            .arg("--model")
            .arg(&self.model_path)
            .arg("--output_raw")
            .arg("--length_scale")
            .arg(format!("{:.3}", 1.0 / speed));
        if self.num_speakers > 0 {
            command.arg("--speaker").arg(speaker_id.to_string());
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                let path = self.piper_binary.display();
                EngineError::Other(format!("failed to spawn piper at {path}: {e}"))
            })?;

        {
            let stdin = child
                .stdin
                .as_mut()
                .ok_or_else(|| EngineError::Other("failed to open piper stdin".into()))?;
            stdin
                .write_all(text.as_bytes())
                .await
                .map_err(|e| EngineError::Other(format!("piper stdin write failed: {e}")))?;
        }
        child.stdin.take();

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| EngineError::Other(format!("piper process failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let status = output.status;
            return Err(EngineError::Other(format!(
                "piper exited with {status}: {stderr}"
            )));
        }

        let samples = pcm_s16le_to_f32(&output.stdout);
        if samples.is_empty() {
            return Err(EngineError::Other("piper produced no audio output".into()));
        }
        Ok(samples)
    }
}

impl SynthesisEngine for PiperEngine {
    fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    fn num_speakers(&self) -> u32 {
        self.num_speakers
    }

    fn generate<'a>(
        &'a self,
        request: TtsRequest,
        sink: Option<&'a mut dyn AudioSink>,
    ) -> BoxFuture<'a, Result<(GeneratedAudio, SessionReport), EngineError>> {
        async move {
            validate_request(&request, self.num_speakers)?;

            let batches = text::batches(&request.text, self.segments.max_num_sentences);
            let total = batches.len();
            let gap = self.segments.silence_samples(self.sample_rate_hz);

            let mut session = SynthesisSession::new(sink, self.sample_rate_hz);
            for (index, batch) in batches.iter().enumerate() {
                let mut chunk = self
                    .synthesize_batch(batch, request.speaker_id, request.speed)
                    .await?;
                tracing::debug!(
                    target: LOG_TARGET,
                    batch = index + 1,
                    total,
                    samples = chunk.len(),
                    "batch synthesized"
                );
                if index + 1 < total {
                    chunk.resize(chunk.len().saturating_add(gap), 0.0);
                }

                session.report_progress(Progress::new(index + 1, total));
                if session.deliver(&chunk).is_stop() {
                    break;
                }
            }

            Ok(session.finish())
        }
        .boxed()
    }
}

fn voice_config_path(model_path: &Path) -> PathBuf {
    let mut p = model_path.as_os_str().to_owned();
    p.push(".json");
    PathBuf::from(p)
}

fn load_voice_config(model_path: &Path) -> Result<VoiceConfig, EngineError> {
    let path = voice_config_path(model_path);
    if !fsutil::file_exists(&path) {
        return Ok(VoiceConfig::default());
    }
    let bytes = fsutil::read_file(&path)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        EngineError::Other(format!("invalid piper voice config {}: {e}", path.display()))
    })
}

/// Converts Piper's raw output (16-bit little-endian PCM, optionally behind a
/// WAV header) to samples in [-1, 1).
pub(crate) fn pcm_s16le_to_f32(raw: &[u8]) -> Vec<f32> {
    let pcm_bytes = if raw.len() > WAV_HEADER_BYTES && &raw[..4] == b"RIFF" {
        &raw[WAV_HEADER_BYTES..]
    } else {
        raw
    };

    pcm_bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}
