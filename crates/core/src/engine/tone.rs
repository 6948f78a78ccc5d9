use crate::config::SegmentOptions;
use crate::engine::{text, validate_request, EngineError, SynthesisEngine, TtsRequest};
use crate::session::{GeneratedAudio, SessionReport, SynthesisSession};
use crate::sink::{AudioSink, Progress};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::f32::consts::PI;

pub(crate) const TONE_SAMPLE_RATE: u32 = 22_050;
const SPEAKER_PITCH_HZ: [f32; 8] = [220.0, 246.9, 261.6, 293.7, 329.6, 349.2, 392.0, 440.0];
const MS_PER_CHAR: u64 = 60;
const MIN_BATCH_MS: u64 = 500;
const FADE_MS: u64 = 10;
const AMPLITUDE: f32 = 0.5;
const LOG_TARGET: &str = "engine::tone";

/// Deterministic stand-in voice: each batch becomes a sine tone whose length
/// follows the batch's character count and whose pitch depends on the speaker.
#[derive(Clone, Debug)]
pub struct ToneEngine {
    segments: SegmentOptions,
}

impl ToneEngine {
    pub fn new(segments: SegmentOptions) -> Self {
        Self { segments }
    }

    fn render(&self, batch: &str, speaker_id: u32, speed: f32) -> Vec<f32> {
        let sr = TONE_SAMPLE_RATE as f32;
        let chars = batch.chars().count() as u64;
        let base_ms = chars.saturating_mul(MS_PER_CHAR).max(MIN_BATCH_MS);
        let duration_ms = base_ms as f32 / speed;
        let len = (duration_ms * sr / 1000.0).round().max(1.0) as usize;

        let freq = SPEAKER_PITCH_HZ[speaker_id as usize % SPEAKER_PITCH_HZ.len()];
        let fade = ((FADE_MS as f32 * sr / 1000.0) as usize).min(len / 2).max(1);

        (0..len)
            .map(|i| {
                let t = i as f32 / sr;
                let edge = i.min(len - 1 - i);
                let envelope = (edge as f32 / fade as f32).min(1.0);
                AMPLITUDE * envelope * (2.0 * PI * freq * t).sin()
            })
            .collect()
    }
}

impl Default for ToneEngine {
    fn default() -> Self {
        Self::new(SegmentOptions::default())
    }
}

impl SynthesisEngine for ToneEngine {
    fn sample_rate_hz(&self) -> u32 {
        TONE_SAMPLE_RATE
    }

    fn num_speakers(&self) -> u32 {
        SPEAKER_PITCH_HZ.len() as u32
    }

    fn generate<'a>(
        &'a self,
        request: TtsRequest,
        sink: Option<&'a mut dyn AudioSink>,
    ) -> BoxFuture<'a, Result<(GeneratedAudio, SessionReport), EngineError>> {
        async move {
            validate_request(&request, self.num_speakers())?;

            let batches = text::batches(&request.text, self.segments.max_num_sentences);
            let total = batches.len();
            let gap = self.segments.silence_samples(TONE_SAMPLE_RATE);
            tracing::debug!(
                target: LOG_TARGET,
                batches = total,
                speaker_id = request.speaker_id,
                speed = request.speed,
                "generating"
            );

            let mut session = SynthesisSession::new(sink, TONE_SAMPLE_RATE);
            for (index, batch) in batches.iter().enumerate() {
                let mut chunk = self.render(batch, request.speaker_id, request.speed);
                if index + 1 < total {
                    chunk.resize(chunk.len().saturating_add(gap), 0.0);
                }

                session.report_progress(Progress::new(index + 1, total));
                if session.deliver(&chunk).is_stop() {
                    break;
                }
                tokio::task::yield_now().await;
            }

            Ok(session.finish())
        }
        .boxed()
    }
}
