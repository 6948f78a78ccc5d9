use crate::sink::{AudioSink, Continuation};
use rodio::buffer::SamplesBuffer;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{OutputStream, OutputStreamBuilder, Sink, StreamError};
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const LOG_TARGET: &str = "sink::playback";
const DEFAULT_MAX_QUEUED_CHUNKS: usize = 8;
const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(5);
const QUEUE_POLL: Duration = Duration::from_millis(5);

#[derive(thiserror::Error, Debug)]
pub enum PlaybackError {
    #[error("audio output unavailable: {details}")]
    AudioOutputUnavailable { details: String },

    #[error("playback thread failed: {0}")]
    Thread(String),
}

struct RateLimitedWarn {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimitedWarn {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    fn should_log(&self) -> bool {
        let mut guard = match self.last.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        let now = Instant::now();
        match *guard {
            Some(prev) if now.duration_since(prev) < self.interval => false,
            _ => {
                *guard = Some(now);
                true
            }
        }
    }
}

/// Rodio objects of an opened output; the stream itself lives on its own thread.
struct OpenOutput {
    sink: Sink,
    shutdown: Option<mpsc::Sender<()>>,
    stream_thread: Option<JoinHandle<()>>,
}

impl OpenOutput {
    fn start(output_device: Option<&str>) -> Result<Self, PlaybackError> {
        let wanted = output_device.map(str::to_owned);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<Sink, PlaybackError>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let stream_thread = std::thread::Builder::new()
            .name("tts-playback".to_owned())
            .spawn(move || {
                let mut stream = match open_output_stream(wanted.as_deref()) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                stream.log_on_drop(false);
                let sink = Sink::connect_new(stream.mixer());
                if ready_tx.send(Ok(sink)).is_err() {
                    return;
                }
                // Keep the stream alive until the output is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| PlaybackError::Thread(e.to_string()))?;

        let sink = ready_rx
            .recv()
            .map_err(|_| PlaybackError::Thread("playback thread exited early".to_owned()))??;

        Ok(Self {
            sink,
            shutdown: Some(shutdown_tx),
            stream_thread: Some(stream_thread),
        })
    }
}

impl Drop for OpenOutput {
    fn drop(&mut self) {
        self.sink.stop();
        drop(self.shutdown.take());
        if let Some(handle) = self.stream_thread.take() {
            let _ = handle.join();
        }
    }
}

enum OutputState {
    Closed,
    Open(OpenOutput),
    Unavailable,
}

/// Plays chunks on an audio output device as they arrive.
///
/// The output is opened on the first non-empty chunk and kept for the life of
/// the sink; if it cannot be opened every later chunk is answered with
/// [`Continuation::Stop`]. `deliver` only appends to the playback queue. When
/// more than `max_queued_chunks` chunks are waiting, it waits for the queue to
/// drain and gives up with `Stop` after `queue_timeout`.
pub struct PlaybackSink {
    output_device: Option<String>,
    output: OutputState,
    sample_rate_hz: u32,
    max_queued_chunks: usize,
    queue_timeout: Duration,
    volume: f32,
    non_finite_warn: RateLimitedWarn,
}

impl PlaybackSink {
    /// Plays on the named output device, or the default one when
    /// `output_device` is `None` or cannot be opened.
    pub fn new(sample_rate_hz: u32, output_device: Option<&str>) -> Self {
        Self {
            output_device: output_device.map(str::to_owned),
            output: OutputState::Closed,
            sample_rate_hz,
            max_queued_chunks: DEFAULT_MAX_QUEUED_CHUNKS,
            queue_timeout: DEFAULT_QUEUE_TIMEOUT,
            volume: 1.0,
            non_finite_warn: RateLimitedWarn::new(Duration::from_secs(5)),
        }
    }

    pub fn with_max_queued_chunks(mut self, max: usize) -> Self {
        self.max_queued_chunks = max.max(1);
        self
    }

    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
        if let OutputState::Open(out) = &self.output {
            out.sink.set_volume(volume);
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.output, OutputState::Open(_))
    }

    /// Blocks until everything queued so far has been played.
    pub fn wait_until_drained(&self) {
        if let OutputState::Open(out) = &self.output {
            out.sink.sleep_until_end();
        }
    }

    fn output(&mut self) -> Option<&Sink> {
        if let OutputState::Closed = self.output {
            self.output = match OpenOutput::start(self.output_device.as_deref()) {
                Ok(out) => {
                    out.sink.set_volume(self.volume);
                    tracing::debug!(
                        target: LOG_TARGET,
                        sample_rate_hz = self.sample_rate_hz,
                        output_device = %self.output_device.as_deref().unwrap_or("<default>"),
                        "playback ready"
                    );
                    OutputState::Open(out)
                }
                Err(e) => {
                    tracing::error!(
                        target: LOG_TARGET,
                        error = %e,
                        "audio output unavailable; stopping synthesis"
                    );
                    OutputState::Unavailable
                }
            };
        }

        match &self.output {
            OutputState::Open(out) => Some(&out.sink),
            OutputState::Closed | OutputState::Unavailable => None,
        }
    }
}

impl AudioSink for PlaybackSink {
    fn deliver(&mut self, samples: &[f32]) -> Continuation {
        if samples.is_empty() {
            return Continuation::Continue;
        }

        let max_queued = self.max_queued_chunks;
        let timeout = self.queue_timeout;
        let sample_rate_hz = self.sample_rate_hz;
        let Some(sink) = self.output() else {
            return Continuation::Stop;
        };

        if !wait_for_queue_space(|| sink.len(), max_queued, timeout) {
            tracing::warn!(
                target: LOG_TARGET,
                queued = sink.len(),
                timeout_ms = timeout.as_millis() as u64,
                "playback queue did not drain in time; stopping synthesis"
            );
            return Continuation::Stop;
        }

        let mut data = samples.to_vec();
        let replaced = zero_non_finite(&mut data);
        sink.append(SamplesBuffer::new(1, sample_rate_hz, data));

        if replaced > 0 && self.non_finite_warn.should_log() {
            tracing::warn!(
                target: LOG_TARGET,
                replaced,
                "replaced non-finite samples with silence (rate-limited)"
            );
        }
        Continuation::Continue
    }
}

/// Polls `queued` until it drops below `max_queued`; false once `timeout` passed.
fn wait_for_queue_space(queued: impl Fn() -> usize, max_queued: usize, timeout: Duration) -> bool {
    let deadline = Instant::now().checked_add(timeout);
    while queued() >= max_queued {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return false;
        }
        std::thread::sleep(QUEUE_POLL);
    }
    true
}

/// Replaces NaN and infinite samples with silence, returning how many there were.
fn zero_non_finite(samples: &mut [f32]) -> usize {
    let mut replaced = 0;
    for s in samples.iter_mut().filter(|s| !s.is_finite()) {
        *s = 0.0;
        replaced += 1;
    }
    replaced
}

#[derive(Debug)]
enum NamedDeviceStreamError {
    DeviceNotFound {
        wanted: String,
        available: Vec<String>,
    },
    OpenFailed {
        wanted: String,
        error: StreamError,
        available: Vec<String>,
    },
}

fn open_output_stream(wanted: Option<&str>) -> Result<OutputStream, PlaybackError> {
    let Some(wanted) = wanted else {
        return OutputStreamBuilder::open_default_stream().map_err(|e| {
            PlaybackError::AudioOutputUnavailable {
                details: format_stream_error_details(e, None, "open default output stream"),
            }
        });
    };

    let context = match open_named_output_stream(wanted) {
        Ok(stream) => return Ok(stream),
        Err(NamedDeviceStreamError::DeviceNotFound { wanted, available }) => {
            tracing::warn!(
                target: LOG_TARGET,
                wanted_device = %wanted,
                available_devices = %format_device_list(&available),
                "configured output device not found; falling back to default output device"
            );
            "default-device fallback after named device not found"
        }
        Err(NamedDeviceStreamError::OpenFailed {
            wanted,
            error,
            available,
        }) => {
            tracing::warn!(
                target: LOG_TARGET,
                wanted_device = %wanted,
                error = %error,
                available_devices = %format_device_list(&available),
                "failed to open configured output device; falling back to default output device"
            );
            "default-device fallback after named device open failed"
        }
    };

    OutputStreamBuilder::open_default_stream().map_err(|e| PlaybackError::AudioOutputUnavailable {
        details: format_stream_error_details(e, Some(wanted), context),
    })
}

fn normalize_device_name(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}

fn open_named_output_stream(wanted: &str) -> Result<OutputStream, NamedDeviceStreamError> {
    let wanted_norm = normalize_device_name(wanted);

    let host = rodio::cpal::default_host();
    let mut available: Vec<String> = Vec::new();
    let mut selected = None;

    if let Ok(devices) = host.output_devices() {
        for d in devices {
            let name = d.name().unwrap_or_else(|_| "<unnamed>".to_owned());
            if selected.is_none() && normalize_device_name(&name) == wanted_norm {
                selected = Some(d);
            }
            available.push(name);
        }
    }

    let Some(device) = selected else {
        return Err(NamedDeviceStreamError::DeviceNotFound {
            wanted: wanted.to_owned(),
            available,
        });
    };

    OutputStreamBuilder::from_device(device)
        .and_then(|b| b.open_stream_or_fallback())
        .map_err(|error| NamedDeviceStreamError::OpenFailed {
            wanted: wanted.to_owned(),
            error,
            available,
        })
}

fn format_device_list(devices: &[String]) -> String {
    if devices.is_empty() {
        return "<unknown>".to_owned();
    }
    devices.join(", ")
}

fn format_stream_error_details(err: StreamError, wanted: Option<&str>, context: &str) -> String {
    let mut s = format!("{context}: {err}");
    if let Some(w) = wanted {
        s.push_str(&format!(" (configured_device={w})"));
    }
    #[cfg(feature = "playback-device-enum")]
    {
        if let Ok(devices) = enumerate_output_device_names() {
            if devices.is_empty() {
                s.push_str("; available_output_devices=<none>");
            } else {
                s.push_str("; available_output_devices=");
                s.push_str(&devices.join(", "));
            }
        }
    }
    s
}

#[cfg(feature = "playback-device-enum")]
fn enumerate_output_device_names() -> Result<Vec<String>, PlaybackError> {
    let host = rodio::cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| PlaybackError::AudioOutputUnavailable {
            details: format!("failed to list output devices: {e}"),
        })?;

    Ok(devices
        .map(|d| d.name().unwrap_or_else(|_| "<unnamed>".to_owned()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn device_lookup_ignores_case_and_padding() {
        assert_eq!(normalize_device_name("  Speakers  "), "speakers");
        assert_eq!(normalize_device_name("HeAdPhOnEs"), "headphones");
    }

    #[test]
    fn unknown_device_list_reads_as_unknown() {
        assert_eq!(format_device_list(&[]), "<unknown>");
        assert_eq!(
            format_device_list(&["Speakers".to_owned(), "USB DAC".to_owned()]),
            "Speakers, USB DAC"
        );
    }

    #[test]
    fn non_finite_warning_is_rate_limited() {
        let limiter = RateLimitedWarn::new(Duration::from_secs(5));
        assert!(limiter.should_log());
        assert!(!limiter.should_log());
    }

    #[test]
    fn non_finite_samples_become_silence() {
        let mut chunk = [0.25, f32::NAN, -0.5, f32::INFINITY, f32::NEG_INFINITY];
        assert_eq!(zero_non_finite(&mut chunk), 3);
        assert_eq!(chunk, [0.25, 0.0, -0.5, 0.0, 0.0]);
        assert_eq!(zero_non_finite(&mut chunk), 0);
    }

    #[test]
    fn full_queue_gives_up_after_timeout() {
        let started = Instant::now();
        assert!(!wait_for_queue_space(|| 8, 8, Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn queue_space_is_found_once_playback_drains() {
        let queued = Cell::new(10usize);
        let drained = wait_for_queue_space(
            || {
                let n = queued.get();
                queued.set(n.saturating_sub(1));
                n
            },
            8,
            Duration::from_secs(5),
        );
        assert!(drained);
        assert_eq!(queued.get(), 6);
    }

    #[test]
    fn empty_chunk_continues_without_opening_output() {
        let mut sink = PlaybackSink::new(22_050, Some("no such device"));
        assert_eq!(sink.deliver(&[]), Continuation::Continue);
        assert!(!sink.is_open());
    }

    #[test]
    fn unavailable_output_stops_synthesis() {
        let mut sink = PlaybackSink::new(22_050, None);
        sink.output = OutputState::Unavailable;
        assert_eq!(sink.deliver(&[0.1, 0.2]), Continuation::Stop);
        assert_eq!(sink.deliver(&[0.1]), Continuation::Stop);
        assert!(!sink.is_open());
    }
}
