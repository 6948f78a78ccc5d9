//! The streaming audio sink contract.
//!
//! A synthesis engine hands every chunk of generated audio to an [`AudioSink`] and
//! looks at the returned [`Continuation`] to decide whether to keep going. The
//! chunk is only borrowed for the duration of the call; sinks that need the
//! samples afterwards copy them.

mod buffer;
mod channel;
mod guard;
#[cfg(feature = "playback")]
mod playback;
mod policy;
mod wav;

use serde::{Deserialize, Serialize};

pub use buffer::BufferSink;
pub use channel::{channel_sink, ChannelSink, ChunkReceiver};
pub(crate) use guard::panic_message;
pub use guard::{ErrorPolicy, GuardedSink, TrySink};
#[cfg(feature = "playback")]
pub use playback::{PlaybackError, PlaybackSink};
pub use policy::{DeadlineSink, FanOut, LimitSink};
pub use wav::WavFileSink;

/// Answer of a sink to a delivered chunk.
///
/// The integer form used by callback-style engine APIs is nonzero for
/// [`Continuation::Continue`] and zero for [`Continuation::Stop`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Continuation {
    Continue,
    Stop,
}

impl Continuation {
    pub const fn from_raw(value: i32) -> Self {
        if value == 0 {
            Self::Stop
        } else {
            Self::Continue
        }
    }

    pub const fn as_raw(self) -> i32 {
        match self {
            Self::Continue => 1,
            Self::Stop => 0,
        }
    }

    pub const fn is_continue(self) -> bool {
        matches!(self, Self::Continue)
    }

    pub const fn is_stop(self) -> bool {
        matches!(self, Self::Stop)
    }

    /// `Stop` if either side says stop.
    pub const fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::Continue, Self::Continue) => Self::Continue,
            _ => Self::Stop,
        }
    }
}

impl From<bool> for Continuation {
    fn from(keep_going: bool) -> Self {
        if keep_going {
            Self::Continue
        } else {
            Self::Stop
        }
    }
}

impl From<Continuation> for i32 {
    fn from(value: Continuation) -> Self {
        value.as_raw()
    }
}

/// How far the producer has got through the current request, in batches.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn new(completed: usize, total: usize) -> Self {
        Self { completed, total }
    }

    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        (self.completed as f32 / self.total as f32).clamp(0.0, 1.0)
    }
}

/// Consumer side of a synthesis session.
///
/// Calls are strictly sequential for one session. Implementations must return
/// promptly; anything slow belongs behind a bounded hand-off such as
/// [`ChannelSink`].
pub trait AudioSink: Send {
    fn deliver(&mut self, samples: &[f32]) -> Continuation;

    /// Called before the chunk of each batch is delivered.
    fn on_progress(&mut self, _progress: Progress) {}
}

impl<F> AudioSink for F
where
    F: FnMut(&[f32]) -> Continuation + Send,
{
    fn deliver(&mut self, samples: &[f32]) -> Continuation {
        self(samples)
    }
}

/// Adapts an integer-returning callback (nonzero = continue) to [`AudioSink`].
pub struct RawCallback<F> {
    callback: F,
}

impl<F> RawCallback<F>
where
    F: FnMut(&[f32]) -> i32 + Send,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> AudioSink for RawCallback<F>
where
    F: FnMut(&[f32]) -> i32 + Send,
{
    fn deliver(&mut self, samples: &[f32]) -> Continuation {
        Continuation::from_raw((self.callback)(samples))
    }
}
