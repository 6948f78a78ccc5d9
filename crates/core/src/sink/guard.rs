use crate::sink::{AudioSink, Continuation, Progress};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

const LOG_TARGET: &str = "sink::guard";

/// What a failing consumer tells the producer.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorPolicy {
    #[default]
    Stop,
    /// Log the failure and keep synthesizing.
    Continue,
}

impl ErrorPolicy {
    pub const fn resolve(self) -> Continuation {
        match self {
            Self::Stop => Continuation::Stop,
            Self::Continue => Continuation::Continue,
        }
    }
}

/// Wraps a fallible consumer so every call resolves to a definite signal.
pub struct TrySink<F> {
    callback: F,
    policy: ErrorPolicy,
    failures: u64,
}

impl<F> TrySink<F> {
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            policy: ErrorPolicy::default(),
            failures: 0,
        }
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }
}

impl<F, E> AudioSink for TrySink<F>
where
    F: FnMut(&[f32]) -> Result<Continuation, E> + Send,
    E: fmt::Display,
{
    fn deliver(&mut self, samples: &[f32]) -> Continuation {
        match (self.callback)(samples) {
            Ok(signal) => signal,
            Err(error) => {
                self.failures += 1;
                let signal = self.policy.resolve();
                tracing::warn!(
                    target: LOG_TARGET,
                    error = %error,
                    failures = self.failures,
                    ?signal,
                    "consumer failed while handling chunk"
                );
                signal
            }
        }
    }
}

/// Turns a panic inside `inner` into [`Continuation::Stop`].
///
/// After the first panic the inner sink is no longer called.
pub struct GuardedSink<S> {
    inner: S,
    panicked: bool,
}

impl<S: AudioSink> GuardedSink<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            panicked: false,
        }
    }

    pub fn has_panicked(&self) -> bool {
        self.panicked
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AudioSink> AudioSink for GuardedSink<S> {
    fn deliver(&mut self, samples: &[f32]) -> Continuation {
        if self.panicked {
            return Continuation::Stop;
        }
        let inner = &mut self.inner;
        match catch_unwind(AssertUnwindSafe(|| inner.deliver(samples))) {
            Ok(signal) => signal,
            Err(payload) => {
                self.panicked = true;
                tracing::error!(
                    target: LOG_TARGET,
                    panic = %panic_message(payload.as_ref()),
                    "consumer panicked; stopping synthesis"
                );
                Continuation::Stop
            }
        }
    }

    fn on_progress(&mut self, progress: Progress) {
        if self.panicked {
            return;
        }
        let inner = &mut self.inner;
        if catch_unwind(AssertUnwindSafe(|| inner.on_progress(progress))).is_err() {
            self.panicked = true;
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_owned()
    }
}
