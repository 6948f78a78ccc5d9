use crate::fsutil;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

pub const DEFAULT_MAX_NUM_SENTENCES: usize = 1;
pub const DEFAULT_SILENCE_SCALE: f32 = 0.2;
pub const DEFAULT_SPEED: f32 = 1.0;
pub const MIN_SPEED: f32 = 0.1;
pub const MAX_SPEED: f32 = 10.0;
pub const MAX_SILENCE_SCALE: f32 = 10.0;
pub const DEFAULT_SPEAKER_ID: u32 = 0;
pub const DEFAULT_PIPER_BINARY: &str = "piper";
pub const ENV_PIPER_BINARY: &str = "TTS_STREAM_PIPER_BINARY";
pub const ENV_MODEL: &str = "TTS_STREAM_MODEL";
pub const ENV_OUTPUT_DEVICE: &str = "TTS_STREAM_OUTPUT_DEVICE";

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Tone,
    Piper,
}

impl FromStr for EngineKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tone" => Ok(Self::Tone),
            "piper" => Ok(Self::Piper),
            other => Err(ConfigError::UnknownEngine(other.to_owned())),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tone => "tone",
            Self::Piper => "piper",
        })
    }
}

/// How request text is cut into chunks.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SegmentOptions {
    /// Sentences synthesized together into one chunk.
    pub max_num_sentences: usize,
    /// Seconds of silence appended after every chunk except the last.
    pub silence_scale: f32,
}

impl SegmentOptions {
    pub fn new(max_num_sentences: usize, silence_scale: f32) -> Result<Self, ConfigError> {
        let options = Self {
            max_num_sentences,
            silence_scale,
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_num_sentences == 0 {
            return Err(ConfigError::ZeroMaxSentences);
        }
        if !(0.0..=MAX_SILENCE_SCALE).contains(&self.silence_scale) {
            return Err(ConfigError::InvalidSilenceScale);
        }
        Ok(())
    }

    /// Capped at [`MAX_SILENCE_SCALE`] seconds even when the fields were set
    /// without going through [`SegmentOptions::validate`].
    pub fn silence_samples(&self, sample_rate_hz: u32) -> usize {
        let seconds = self.silence_scale.clamp(0.0, MAX_SILENCE_SCALE);
        (seconds * sample_rate_hz as f32).round() as usize
    }
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            max_num_sentences: DEFAULT_MAX_NUM_SENTENCES,
            silence_scale: DEFAULT_SILENCE_SCALE,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub kind: EngineKind,
    pub piper_binary: PathBuf,
    pub model_path: Option<PathBuf>,
    /// Selectable speakers of the model; 0 when the model has a single voice.
    pub num_speakers: u32,
    pub segments: SegmentOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::default(),
            piper_binary: PathBuf::from(DEFAULT_PIPER_BINARY),
            model_path: None,
            num_speakers: 0,
            segments: SegmentOptions::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.segments.validate()?;
        if self.kind == EngineKind::Piper && self.model_path.is_none() {
            return Err(ConfigError::MissingModel);
        }
        Ok(())
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let bytes = fsutil::read_file(path).map_err(|e| ConfigError::ConfigFile {
            path: path.display().to_string(),
            details: e.to_string(),
        })?;
        Self::from_json_slice(&bytes).map_err(|e| match e {
            ConfigError::ConfigFile { details, .. } => ConfigError::ConfigFile {
                path: path.display().to_string(),
                details,
            },
            other => other,
        })
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_slice(bytes).map_err(|e| ConfigError::ConfigFile {
            path: "<memory>".to_owned(),
            details: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Caps the amount of audio a session may produce.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioBudget {
    pub max_ms: u64,
}

impl AudioBudget {
    pub fn new(max_ms: u64) -> Result<Self, ConfigError> {
        if max_ms == 0 {
            return Err(ConfigError::ZeroBudget);
        }
        Ok(Self { max_ms })
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }

    pub fn samples_for_sample_rate(&self, sample_rate_hz: u32) -> u64 {
        let sr = u64::from(sample_rate_hz);
        (self.max_ms.saturating_mul(sr)).saturating_div(1000)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    pub speaker_id: u32,
    pub speed: f32,
    pub max_audio: Option<AudioBudget>,
    /// Wall-clock time after which the session is told to stop.
    pub deadline: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            speaker_id: DEFAULT_SPEAKER_ID,
            speed: DEFAULT_SPEED,
            max_audio: None,
            deadline: None,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !speed_in_range(self.speed) {
            return Err(ConfigError::InvalidSpeed);
        }
        if self.deadline == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroBudget);
        }
        Ok(())
    }
}

pub(crate) fn speed_in_range(speed: f32) -> bool {
    (MIN_SPEED..=MAX_SPEED).contains(&speed)
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_num_sentences must be > 0")]
    ZeroMaxSentences,
    #[error("silence_scale must be between 0 and 10 seconds")]
    InvalidSilenceScale,
    #[error("speed must be between 0.1 and 10")]
    InvalidSpeed,
    #[error("budget must be > 0 ms")]
    ZeroBudget,
    #[error("the piper engine needs a model path")]
    MissingModel,
    #[error("unknown engine '{0}' (expected 'tone' or 'piper')")]
    UnknownEngine(String),
    #[error("config file {path}: {details}")]
    ConfigFile { path: String, details: String },
}

pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: std::collections::BTreeMap<String, String>,
}

impl MapEnv {
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_owned(), value.to_owned());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn resolve_string_with_default(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
    default: &str,
) -> String {
    match cli_value {
        Some(v) => v,
        None => env.var(env_key).unwrap_or_else(|| default.to_owned()),
    }
}

pub fn resolve_optional_string(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Option<String> {
    match cli_value {
        Some(v) => Some(v),
        None => env.var(env_key).filter(|v| !v.trim().is_empty()),
    }
}

pub fn resolve_optional_path(
    cli_value: Option<PathBuf>,
    env_key: &str,
    env: &impl Env,
) -> Option<PathBuf> {
    match cli_value {
        Some(p) => Some(p),
        None => resolve_optional_string(None, env_key, env).map(PathBuf::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_kind_parses_case_insensitively() {
        assert_eq!("Piper".parse::<EngineKind>(), Ok(EngineKind::Piper));
        assert_eq!(" tone ".parse::<EngineKind>(), Ok(EngineKind::Tone));
        assert_eq!(
            "espeak".parse::<EngineKind>(),
            Err(ConfigError::UnknownEngine("espeak".to_owned()))
        );
    }

    #[test]
    fn segment_options_reject_bad_values() {
        assert_eq!(SegmentOptions::new(0, 0.2), Err(ConfigError::ZeroMaxSentences));
        assert_eq!(
            SegmentOptions::new(1, -0.1),
            Err(ConfigError::InvalidSilenceScale)
        );
        assert_eq!(
            SegmentOptions::new(1, f32::NAN),
            Err(ConfigError::InvalidSilenceScale)
        );
        assert_eq!(
            SegmentOptions::new(1, 1e30),
            Err(ConfigError::InvalidSilenceScale)
        );
        assert!(SegmentOptions::new(2, 0.0).is_ok());
        assert!(SegmentOptions::new(2, MAX_SILENCE_SCALE).is_ok());
    }

    #[test]
    fn silence_samples_scale_with_rate() {
        let opts = SegmentOptions::new(1, 0.2).expect("valid");
        assert_eq!(opts.silence_samples(22_050), 4_410);
        assert_eq!(opts.silence_samples(16_000), 3_200);

        let unchecked = SegmentOptions {
            max_num_sentences: 1,
            silence_scale: 1e30,
        };
        assert_eq!(unchecked.silence_samples(22_050), 220_500);
    }

    #[test]
    fn audio_budget_samples_simple() {
        let b = AudioBudget::new(1500).expect("nonzero");
        assert_eq!(b.samples_for_sample_rate(48_000), 72_000);
        assert_eq!(b.samples_for_sample_rate(22_050), 33_075);
        assert_eq!(AudioBudget::new(0), Err(ConfigError::ZeroBudget));
    }

    #[test]
    fn session_config_rejects_out_of_range_speed() {
        let mut cfg = SessionConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.speed = 0.0;
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidSpeed));
        cfg.speed = 1e-9;
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidSpeed));
        cfg.speed = MIN_SPEED;
        assert!(cfg.validate().is_ok());
        cfg.speed = f32::INFINITY;
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidSpeed));
    }

    #[test]
    fn piper_config_requires_model() {
        let cfg = EngineConfig {
            kind: EngineKind::Piper,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::MissingModel));
    }

    #[test]
    fn json_config_fills_missing_fields_with_defaults() {
        let cfg = EngineConfig::from_json_slice(
            br#"{ "kind": "piper", "model_path": "/models/en.onnx", "segments": { "max_num_sentences": 3 } }"#,
        )
        .expect("valid json");
        assert_eq!(cfg.kind, EngineKind::Piper);
        assert_eq!(cfg.model_path, Some(PathBuf::from("/models/en.onnx")));
        assert_eq!(cfg.piper_binary, PathBuf::from(DEFAULT_PIPER_BINARY));
        assert_eq!(cfg.segments.max_num_sentences, 3);
        assert_eq!(cfg.segments.silence_scale, DEFAULT_SILENCE_SCALE);
    }

    #[test]
    fn json_config_errors_name_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("engine.json");
        std::fs::write(&path, "{ not json").expect("write");
        match EngineConfig::from_json_file(&path) {
            Err(ConfigError::ConfigFile { path: p, .. }) => {
                assert_eq!(p, path.display().to_string())
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn cli_value_takes_precedence_over_env() {
        let env = MapEnv::default().with_var(ENV_PIPER_BINARY, "/env/piper");
        let v = resolve_string_with_default(
            Some("/cli/piper".to_owned()),
            ENV_PIPER_BINARY,
            &env,
            DEFAULT_PIPER_BINARY,
        );
        assert_eq!(v, "/cli/piper");
    }

    #[test]
    fn env_used_when_cli_missing() {
        let env = MapEnv::default().with_var(ENV_MODEL, "/env/model.onnx");
        assert_eq!(
            resolve_optional_path(None, ENV_MODEL, &env),
            Some(PathBuf::from("/env/model.onnx"))
        );
    }

    #[test]
    fn default_used_when_both_missing() {
        let env = MapEnv::default();
        let v = resolve_string_with_default(None, ENV_PIPER_BINARY, &env, DEFAULT_PIPER_BINARY);
        assert_eq!(v, DEFAULT_PIPER_BINARY);
        assert_eq!(resolve_optional_string(None, ENV_OUTPUT_DEVICE, &env), None);
    }

    #[test]
    fn blank_env_value_is_ignored() {
        let env = MapEnv::default().with_var(ENV_OUTPUT_DEVICE, "  ");
        assert_eq!(resolve_optional_string(None, ENV_OUTPUT_DEVICE, &env), None);
    }
}
