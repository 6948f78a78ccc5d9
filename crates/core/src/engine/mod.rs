mod piper;
pub mod text;
mod tone;

use crate::config::{speed_in_range, EngineConfig, EngineKind};
use crate::fsutil::FsError;
use crate::session::{GeneratedAudio, SessionReport};
use crate::sink::AudioSink;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub use piper::PiperEngine;
pub use tone::ToneEngine;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TtsRequest {
    pub text: String,
    pub speaker_id: u32,
    pub speed: f32,
}

impl TtsRequest {
    pub fn new<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            speaker_id: crate::config::DEFAULT_SPEAKER_ID,
            speed: crate::config::DEFAULT_SPEED,
        }
    }

    pub fn with_speaker(mut self, speaker_id: u32) -> Self {
        self.speaker_id = speaker_id;
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }
}

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("nothing to synthesize: text is empty")]
    EmptyText,

    #[error("speed must be between 0.1 and 10, got {0}")]
    InvalidSpeed(f32),

    #[error("speaker id {speaker_id} out of range (model has {num_speakers} speakers)")]
    InvalidSpeaker { speaker_id: u32, num_speakers: u32 },

    #[error(transparent)]
    MissingFile(#[from] FsError),

    #[error("{0}")]
    Other(String),
}

/// Producer of audio for a [`TtsRequest`].
///
/// With a sink, audio is delivered batch by batch and generation stops as soon
/// as the sink answers `Stop`; the audio produced up to that point is returned
/// either way.
pub trait SynthesisEngine: Send + Sync {
    fn sample_rate_hz(&self) -> u32;

    /// Number of selectable speakers; 0 when the voice is fixed.
    fn num_speakers(&self) -> u32;

    fn generate<'a>(
        &'a self,
        request: TtsRequest,
        sink: Option<&'a mut dyn AudioSink>,
    ) -> BoxFuture<'a, Result<(GeneratedAudio, SessionReport), EngineError>>;
}

pub(crate) fn validate_request(request: &TtsRequest, num_speakers: u32) -> Result<(), EngineError> {
    if request.text.trim().is_empty() {
        return Err(EngineError::EmptyText);
    }
    if !speed_in_range(request.speed) {
        return Err(EngineError::InvalidSpeed(request.speed));
    }
    if num_speakers > 0 && request.speaker_id >= num_speakers {
        return Err(EngineError::InvalidSpeaker {
            speaker_id: request.speaker_id,
            num_speakers,
        });
    }
    Ok(())
}

/// Builds the engine selected by `config`.
pub fn build_engine(config: &EngineConfig) -> Result<Box<dyn SynthesisEngine>, EngineError> {
    config
        .validate()
        .map_err(|e| EngineError::Other(e.to_string()))?;

    match config.kind {
        EngineKind::Tone => Ok(Box::new(ToneEngine::new(config.segments))),
        EngineKind::Piper => {
            let model = config
                .model_path
                .clone()
                .ok_or_else(|| EngineError::Other("piper engine needs a model path".to_owned()))?;
            let engine = PiperEngine::new(config.piper_binary.clone(), model)?
                .with_num_speakers(config.num_speakers)
                .with_segments(config.segments);
            Ok(Box::new(engine))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_validation() {
        assert!(validate_request(&TtsRequest::new("hi"), 0).is_ok());
        assert!(matches!(
            validate_request(&TtsRequest::new("   "), 0),
            Err(EngineError::EmptyText)
        ));
        assert!(matches!(
            validate_request(&TtsRequest::new("hi").with_speed(-1.0), 0),
            Err(EngineError::InvalidSpeed(_))
        ));
        assert!(matches!(
            validate_request(&TtsRequest::new("hi").with_speed(1e-9), 0),
            Err(EngineError::InvalidSpeed(_))
        ));
        assert!(matches!(
            validate_request(&TtsRequest::new("hi").with_speaker(3), 3),
            Err(EngineError::InvalidSpeaker {
                speaker_id: 3,
                num_speakers: 3
            })
        ));
        assert!(validate_request(&TtsRequest::new("hi").with_speaker(99), 0).is_ok());
    }

    #[test]
    fn build_engine_picks_tone_by_default() {
        let engine = build_engine(&EngineConfig::default()).expect("tone engine");
        assert_eq!(engine.sample_rate_hz(), tone::TONE_SAMPLE_RATE);
        assert!(engine.num_speakers() > 0);
    }

    #[test]
    fn build_engine_rejects_piper_without_model_file() {
        let cfg = EngineConfig {
            kind: EngineKind::Piper,
            model_path: Some("/no/such/voice.onnx".into()),
            ..Default::default()
        };
        assert!(matches!(
            build_engine(&cfg),
            Err(EngineError::MissingFile(FsError::Missing { .. }))
        ));
    }
}
