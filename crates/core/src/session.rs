//! Producer-side driver for one synthesis request.
//!
//! Engines never call an [`AudioSink`] directly; they go through a
//! [`SynthesisSession`], which owns the `Running -> Stopped` transition:
//! once the sink has answered [`Continuation::Stop`] it is never called again,
//! and a panicking sink is resolved to `Stop` instead of unwinding into the
//! engine.

use crate::sink::{panic_message, AudioSink, Continuation, Progress};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

const LOG_TARGET: &str = "session";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Stopped,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The producer ran out of audio.
    Completed,
    /// The sink answered `Stop`.
    StoppedByConsumer,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    pub chunks_delivered: u64,
    pub samples_delivered: u64,
    pub consumer_panicked: bool,
    pub elapsed: Duration,
}

/// Audio produced for one request.
///
/// Contains every chunk the producer generated, including the one whose
/// delivery answered `Stop`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct GeneratedAudio {
    pub samples: Vec<f32>,
    pub sample_rate_hz: u32,
}

impl GeneratedAudio {
    pub fn duration(&self) -> Duration {
        if self.sample_rate_hz == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate_hz))
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl From<GeneratedAudio> for crate::wave::Wave {
    fn from(audio: GeneratedAudio) -> Self {
        Self {
            samples: audio.samples,
            sample_rate_hz: audio.sample_rate_hz,
        }
    }
}

pub struct SynthesisSession<'a> {
    sink: Option<&'a mut dyn AudioSink>,
    state: SessionState,
    stopped_by_consumer: bool,
    consumer_panicked: bool,
    chunks_delivered: u64,
    samples_delivered: u64,
    audio: GeneratedAudio,
    started_at: Instant,
}

impl<'a> SynthesisSession<'a> {
    /// Without a sink every chunk is only collected.
    pub fn new(sink: Option<&'a mut dyn AudioSink>, sample_rate_hz: u32) -> Self {
        Self {
            sink,
            state: SessionState::Running,
            stopped_by_consumer: false,
            consumer_panicked: false,
            chunks_delivered: 0,
            samples_delivered: 0,
            audio: GeneratedAudio {
                samples: Vec::new(),
                sample_rate_hz,
            },
            started_at: Instant::now(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    /// Collects `samples` and hands them to the sink.
    ///
    /// Once stopped, nothing is collected or delivered and `Stop` is returned.
    pub fn deliver(&mut self, samples: &[f32]) -> Continuation {
        if self.state == SessionState::Stopped {
            return Continuation::Stop;
        }

        self.audio.samples.extend_from_slice(samples);

        let Some(sink) = self.sink.as_deref_mut() else {
            return Continuation::Continue;
        };

        let signal = match catch_unwind(AssertUnwindSafe(|| sink.deliver(samples))) {
            Ok(signal) => signal,
            Err(payload) => {
                self.consumer_panicked = true;
                tracing::error!(
                    target: LOG_TARGET,
                    panic = %panic_message(payload.as_ref()),
                    chunk = self.chunks_delivered,
                    "sink panicked; resolving to stop"
                );
                Continuation::Stop
            }
        };

        self.chunks_delivered += 1;
        self.samples_delivered += samples.len() as u64;

        if signal.is_stop() {
            tracing::debug!(
                target: LOG_TARGET,
                chunks = self.chunks_delivered,
                samples = self.samples_delivered,
                "sink requested stop"
            );
            self.state = SessionState::Stopped;
            self.stopped_by_consumer = true;
        }
        signal
    }

    pub fn report_progress(&mut self, progress: Progress) {
        if self.state == SessionState::Stopped {
            return;
        }
        let Some(sink) = self.sink.as_deref_mut() else {
            return;
        };
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| sink.on_progress(progress))) {
            self.consumer_panicked = true;
            self.state = SessionState::Stopped;
            self.stopped_by_consumer = true;
            tracing::error!(
                target: LOG_TARGET,
                panic = %panic_message(payload.as_ref()),
                "sink panicked in progress hook; stopping"
            );
        }
    }

    /// Ends the session and hands back everything produced.
    pub fn finish(mut self) -> (GeneratedAudio, SessionReport) {
        self.state = SessionState::Stopped;
        let report = SessionReport {
            outcome: if self.stopped_by_consumer {
                SessionOutcome::StoppedByConsumer
            } else {
                SessionOutcome::Completed
            },
            chunks_delivered: self.chunks_delivered,
            samples_delivered: self.samples_delivered,
            consumer_panicked: self.consumer_panicked,
            elapsed: self.started_at.elapsed(),
        };
        tracing::debug!(
            target: LOG_TARGET,
            outcome = ?report.outcome,
            chunks = report.chunks_delivered,
            samples = report.samples_delivered,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "session finished"
        );
        (self.audio, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::BufferSink;

    #[test]
    fn natural_completion_delivers_every_chunk() {
        let mut buffer = BufferSink::new();
        let mut session = SynthesisSession::new(Some(&mut buffer), 16_000);

        assert!(session.deliver(&[0.1, -0.2, 0.05]).is_continue());
        assert!(session.deliver(&[0.3, 0.0]).is_continue());
        assert!(session.deliver(&[]).is_continue());
        assert!(session.is_running());

        let (audio, report) = session.finish();
        assert_eq!(report.outcome, SessionOutcome::Completed);
        assert_eq!(report.chunks_delivered, 3);
        assert_eq!(report.samples_delivered, 5);
        assert_eq!(audio.samples, vec![0.1, -0.2, 0.05, 0.3, 0.0]);
        assert_eq!(buffer.chunk_count(), 3);
    }

    #[test]
    fn stop_is_one_shot() {
        let mut calls = 0;
        let mut sink = |_samples: &[f32]| {
            calls += 1;
            Continuation::Stop
        };
        let mut session = SynthesisSession::new(Some(&mut sink), 16_000);

        assert!(session.deliver(&[0.5, 0.5]).is_stop());
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.deliver(&[0.5]).is_stop());
        session.report_progress(Progress::new(2, 2));

        let (audio, report) = session.finish();
        assert_eq!(report.outcome, SessionOutcome::StoppedByConsumer);
        assert_eq!(report.chunks_delivered, 1);
        assert_eq!(audio.samples, vec![0.5, 0.5]);
        assert_eq!(calls, 1);
    }

    #[test]
    fn panicking_sink_resolves_to_stop() {
        let mut sink = |samples: &[f32]| -> Continuation {
            if samples.len() > 1 {
                panic!("cannot handle long chunks");
            }
            Continuation::Continue
        };
        let mut session = SynthesisSession::new(Some(&mut sink), 16_000);

        assert!(session.deliver(&[0.1]).is_continue());
        assert!(session.deliver(&[0.1, 0.2]).is_stop());
        assert!(session.deliver(&[0.1]).is_stop());

        let (_, report) = session.finish();
        assert!(report.consumer_panicked);
        assert_eq!(report.outcome, SessionOutcome::StoppedByConsumer);
        assert_eq!(report.chunks_delivered, 2);
    }

    #[test]
    fn without_sink_everything_is_collected() {
        let mut session = SynthesisSession::new(None, 8_000);
        assert!(session.deliver(&[0.25; 4]).is_continue());
        let (audio, report) = session.finish();
        assert_eq!(audio.samples.len(), 4);
        assert_eq!(audio.duration().as_micros(), 500);
        assert_eq!(report.chunks_delivered, 0);
        assert_eq!(report.outcome, SessionOutcome::Completed);
    }

    #[test]
    fn progress_reaches_sink_while_running() {
        struct Recorder(Vec<Progress>);
        impl AudioSink for Recorder {
            fn deliver(&mut self, _samples: &[f32]) -> Continuation {
                Continuation::Continue
            }
            fn on_progress(&mut self, progress: Progress) {
                self.0.push(progress);
            }
        }

        let mut recorder = Recorder(Vec::new());
        let mut session = SynthesisSession::new(Some(&mut recorder), 8_000);
        session.report_progress(Progress::new(1, 2));
        session.report_progress(Progress::new(2, 2));
        drop(session.finish());

        assert_eq!(recorder.0, vec![Progress::new(1, 2), Progress::new(2, 2)]);
    }
}
