use crate::sink::{AudioSink, Continuation, Progress};
use std::time::{Duration, Instant};

const LOG_TARGET: &str = "sink::policy";

/// Stops synthesis once a deadline has passed.
///
/// Chunks arriving after the deadline are not forwarded.
pub struct DeadlineSink<S> {
    inner: S,
    /// `None` when the budget is too large to represent; never expires.
    deadline: Option<Instant>,
}

impl<S: AudioSink> DeadlineSink<S> {
    pub fn new(inner: S, budget: Duration) -> Self {
        Self {
            inner,
            deadline: Instant::now().checked_add(budget),
        }
    }

    pub fn until(inner: S, deadline: Instant) -> Self {
        Self {
            inner,
            deadline: Some(deadline),
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AudioSink> AudioSink for DeadlineSink<S> {
    fn deliver(&mut self, samples: &[f32]) -> Continuation {
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::info!(target: LOG_TARGET, "deadline reached; stopping synthesis");
            return Continuation::Stop;
        }
        self.inner.deliver(samples)
    }

    fn on_progress(&mut self, progress: Progress) {
        self.inner.on_progress(progress);
    }
}

/// Stops synthesis once `max_samples` samples have been forwarded.
///
/// The chunk that crosses the limit is still forwarded whole.
pub struct LimitSink<S> {
    inner: S,
    max_samples: u64,
    forwarded: u64,
}

impl<S: AudioSink> LimitSink<S> {
    pub fn new(inner: S, max_samples: u64) -> Self {
        Self {
            inner,
            max_samples,
            forwarded: 0,
        }
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AudioSink> AudioSink for LimitSink<S> {
    fn deliver(&mut self, samples: &[f32]) -> Continuation {
        if self.forwarded >= self.max_samples {
            return Continuation::Stop;
        }

        let signal = self.inner.deliver(samples);
        self.forwarded += samples.len() as u64;
        if self.forwarded >= self.max_samples {
            tracing::info!(
                target: LOG_TARGET,
                max_samples = self.max_samples,
                "sample limit reached; stopping synthesis"
            );
            return Continuation::Stop;
        }
        signal
    }

    fn on_progress(&mut self, progress: Progress) {
        self.inner.on_progress(progress);
    }
}

/// Delivers every chunk to each of several sinks.
///
/// All sinks see every chunk; the answer is `Stop` if any of them says stop.
#[derive(Default)]
pub struct FanOut<'a> {
    sinks: Vec<Box<dyn AudioSink + 'a>>,
}

impl<'a> FanOut<'a> {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with(mut self, sink: impl AudioSink + 'a) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn push(&mut self, sink: impl AudioSink + 'a) {
        self.sinks.push(Box::new(sink));
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AudioSink for FanOut<'_> {
    fn deliver(&mut self, samples: &[f32]) -> Continuation {
        self.sinks
            .iter_mut()
            .fold(Continuation::Continue, |acc, sink| {
                acc.and(sink.deliver(samples))
            })
    }

    fn on_progress(&mut self, progress: Progress) {
        for sink in &mut self.sinks {
            sink.on_progress(progress);
        }
    }
}
