#![deny(warnings)]

use anyhow::Context;
use clap::Parser;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tts_stream_core::config::{
    resolve_optional_path, resolve_string_with_default, AudioBudget, EngineConfig, EngineKind,
    Env, SessionConfig, StdEnv, DEFAULT_SPEAKER_ID, DEFAULT_SPEED, ENV_MODEL, ENV_OUTPUT_DEVICE,
    ENV_PIPER_BINARY,
};
use tts_stream_core::engine::{build_engine, TtsRequest};
use tts_stream_core::session::SessionReport;
use tts_stream_core::sink::{AudioSink, DeadlineSink, FanOut, LimitSink, WavFileSink};

#[cfg(feature = "playback")]
use tts_stream_core::sink::PlaybackSink;

#[derive(Parser, Debug)]
#[command(name = "tts-stream")]
#[command(about = "Stream synthesized speech chunk by chunk to a file or an audio device")]
struct Args {
    /// Text to speak; read from stdin when omitted.
    #[arg(long)]
    text: Option<String>,

    /// `tone` or `piper`; defaults to the config file's engine, then `tone`.
    #[arg(long)]
    engine: Option<String>,

    #[arg(long)]
    piper_binary: Option<String>,

    #[arg(long)]
    model: Option<PathBuf>,

    /// JSON engine config; command-line flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_SPEAKER_ID)]
    speaker_id: u32,

    #[arg(long, default_value_t = DEFAULT_SPEED)]
    speed: f32,

    #[arg(long)]
    max_num_sentences: Option<usize>,

    #[arg(long)]
    silence_scale: Option<f32>,

    /// Write the streamed audio to this WAV file.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Play the audio while it is being synthesized.
    #[arg(long, default_value_t = false)]
    play: bool,

    #[arg(long, env = ENV_OUTPUT_DEVICE)]
    output_device: Option<String>,

    /// Stop once this much audio has been produced.
    #[arg(long)]
    max_audio_ms: Option<u64>,

    /// Stop once this much wall-clock time has passed.
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Print the session report as JSON on stdout.
    #[arg(long, default_value_t = false)]
    report_json: bool,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let env = StdEnv;
    let engine_cfg = build_engine_config(&args, &env)?;
    let session_cfg = build_session_config(&args)?;

    tracing::info!(
        engine = %engine_cfg.kind,
        max_num_sentences = engine_cfg.segments.max_num_sentences,
        speaker_id = session_cfg.speaker_id,
        speed = session_cfg.speed,
        "config loaded"
    );

    let text = match args.text.clone() {
        Some(t) => t,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read text from stdin")?;
            buf
        }
    };

    let report = run(&args, engine_cfg, session_cfg, text).await?;

    if args.report_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

async fn run(
    args: &Args,
    engine_cfg: EngineConfig,
    session_cfg: SessionConfig,
    text: String,
) -> anyhow::Result<SessionReport> {
    let engine = build_engine(&engine_cfg).context("failed to set up engine")?;
    let sample_rate_hz = engine.sample_rate_hz();

    let mut wav = match &args.output {
        Some(path) => Some(
            WavFileSink::create(path, sample_rate_hz)
                .with_context(|| format!("cannot create {}", path.display()))?,
        ),
        None => None,
    };

    #[cfg(feature = "playback")]
    let mut playback = args
        .play
        .then(|| PlaybackSink::new(sample_rate_hz, args.output_device.as_deref()));
    #[cfg(not(feature = "playback"))]
    if args.play {
        anyhow::bail!("--play needs a build with the `playback` feature");
    }

    if wav.is_none() && !args.play {
        tracing::warn!("no --output given and playback is off; audio will be discarded");
    }

    let request = TtsRequest::new(text)
        .with_speaker(session_cfg.speaker_id)
        .with_speed(session_cfg.speed);

    let (audio, report) = {
        let mut outputs = FanOut::new();
        if let Some(w) = wav.as_mut() {
            outputs.push(move |samples: &[f32]| w.deliver(samples));
        }
        #[cfg(feature = "playback")]
        if let Some(p) = playback.as_mut() {
            outputs.push(move |samples: &[f32]| p.deliver(samples));
        }

        let max_samples = session_cfg
            .max_audio
            .map(|b| b.samples_for_sample_rate(sample_rate_hz))
            .unwrap_or(u64::MAX);
        let deadline = session_cfg.deadline.unwrap_or(Duration::MAX);
        let mut sink = LimitSink::new(DeadlineSink::new(outputs, deadline), max_samples);

        engine
            .generate(request, Some(&mut sink as &mut dyn AudioSink))
            .await
            .context("synthesis failed")?
    };

    if let Some(w) = wav.take() {
        let path = w.path().to_path_buf();
        let written = w
            .finish()
            .with_context(|| format!("cannot finalize {}", path.display()))?;
        tracing::info!(path = %path.display(), samples = written, "wav written");
    }

    #[cfg(feature = "playback")]
    if let Some(p) = playback.as_ref() {
        p.wait_until_drained();
    }

    tracing::info!(
        outcome = ?report.outcome,
        chunks = report.chunks_delivered,
        audio_ms = audio.duration().as_millis() as u64,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "synthesis finished"
    );
    Ok(report)
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid --log-level: {level}"))?,
        )
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn build_engine_config(args: &Args, env: &impl Env) -> anyhow::Result<EngineConfig> {
    let mut cfg = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };

    if let Some(engine) = &args.engine {
        cfg.kind = engine.parse::<EngineKind>()?;
    }

    let current_binary = cfg.piper_binary.to_string_lossy().into_owned();
    cfg.piper_binary = PathBuf::from(resolve_string_with_default(
        args.piper_binary.clone(),
        ENV_PIPER_BINARY,
        env,
        &current_binary,
    ));
    if let Some(model) = resolve_optional_path(args.model.clone(), ENV_MODEL, env) {
        cfg.model_path = Some(model);
    }

    if let Some(n) = args.max_num_sentences {
        cfg.segments.max_num_sentences = n;
    }
    if let Some(scale) = args.silence_scale {
        cfg.segments.silence_scale = scale;
    }

    cfg.validate()?;
    Ok(cfg)
}

fn build_session_config(args: &Args) -> anyhow::Result<SessionConfig> {
    let cfg = SessionConfig {
        speaker_id: args.speaker_id,
        speed: args.speed,
        max_audio: args.max_audio_ms.map(AudioBudget::new).transpose()?,
        deadline: args.deadline_ms.map(Duration::from_millis),
    };
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tts_stream_core::config::{MapEnv, SegmentOptions, DEFAULT_PIPER_BINARY};

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("tts-stream").chain(argv.iter().copied()))
            .expect("valid args")
    }

    #[test]
    fn defaults_build_tone_engine_config() {
        let args = parse(&["--text", "hello"]);
        let cfg = build_engine_config(&args, &MapEnv::default()).expect("config");
        assert_eq!(cfg.kind, EngineKind::Tone);
        assert_eq!(cfg.piper_binary, PathBuf::from(DEFAULT_PIPER_BINARY));
        assert_eq!(cfg.segments, SegmentOptions::default());
    }

    #[test]
    fn engine_kind_from_config_file_survives_without_flag() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"kind":"piper","model_path":"/m/en.onnx"}"#).expect("write");
        let path_arg = path.to_string_lossy().into_owned();

        let args = parse(&["--config", &path_arg]);
        let cfg = build_engine_config(&args, &MapEnv::default()).expect("config");
        assert_eq!(cfg.kind, EngineKind::Piper);
        assert_eq!(cfg.model_path, Some(PathBuf::from("/m/en.onnx")));

        let args = parse(&["--config", &path_arg, "--engine", "tone"]);
        let cfg = build_engine_config(&args, &MapEnv::default()).expect("config");
        assert_eq!(cfg.kind, EngineKind::Tone);
    }

    #[test]
    fn piper_model_comes_from_env() {
        let args = parse(&["--engine", "piper"]);
        let env = MapEnv::default()
            .with_var(ENV_MODEL, "/voices/en.onnx")
            .with_var(ENV_PIPER_BINARY, "/opt/piper/piper");
        let cfg = build_engine_config(&args, &env).expect("config");
        assert_eq!(cfg.kind, EngineKind::Piper);
        assert_eq!(cfg.model_path, Some(PathBuf::from("/voices/en.onnx")));
        assert_eq!(cfg.piper_binary, PathBuf::from("/opt/piper/piper"));
    }

    #[test]
    fn piper_without_model_is_an_error() {
        let args = parse(&["--engine", "piper"]);
        assert!(build_engine_config(&args, &MapEnv::default()).is_err());
    }

    #[test]
    fn session_limits_are_validated() {
        let args = parse(&["--max-audio-ms", "2000", "--deadline-ms", "500"]);
        let cfg = build_session_config(&args).expect("session");
        assert_eq!(cfg.max_audio.map(|b| b.max_ms), Some(2000));
        assert_eq!(cfg.deadline, Some(Duration::from_millis(500)));

        let args = parse(&["--max-audio-ms", "0"]);
        assert!(build_session_config(&args).is_err());

        let args = parse(&["--speed", "0"]);
        assert!(build_session_config(&args).is_err());
    }
}
