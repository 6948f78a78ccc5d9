use crate::sink::{AudioSink, Continuation};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};

const LOG_TARGET: &str = "sink::channel";
const FULL_QUEUE_POLL: Duration = Duration::from_millis(2);

/// Creates a bounded hand-off from the synthesis loop to another task.
///
/// The consumer must run on a different thread than the producer (a
/// multi-threaded runtime or a dedicated thread); a full queue is waited on for
/// at most `send_timeout` before the sink asks the producer to stop.
pub fn channel_sink(capacity: usize, send_timeout: Duration) -> (ChannelSink, ChunkReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let stop_requested = Arc::new(AtomicBool::new(false));
    (
        ChannelSink {
            tx,
            send_timeout,
            stop_requested: Arc::clone(&stop_requested),
            dropped_chunks: 0,
        },
        ChunkReceiver { rx, stop_requested },
    )
}

pub struct ChannelSink {
    tx: mpsc::Sender<Vec<f32>>,
    send_timeout: Duration,
    stop_requested: Arc<AtomicBool>,
    dropped_chunks: u64,
}

impl ChannelSink {
    /// Chunks that could not be queued before the producer was told to stop.
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks
    }
}

impl AudioSink for ChannelSink {
    fn deliver(&mut self, samples: &[f32]) -> Continuation {
        if self.stop_requested.load(Ordering::Acquire) {
            return Continuation::Stop;
        }

        let deadline = Instant::now() + self.send_timeout;
        let mut chunk = samples.to_vec();
        loop {
            match self.tx.try_send(chunk) {
                Ok(()) => return Continuation::Continue,
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(target: LOG_TARGET, "receiver dropped; stopping synthesis");
                    return Continuation::Stop;
                }
                Err(TrySendError::Full(back)) => {
                    if Instant::now() >= deadline {
                        self.dropped_chunks += 1;
                        tracing::warn!(
                            target: LOG_TARGET,
                            timeout_ms = self.send_timeout.as_millis() as u64,
                            samples = back.len(),
                            "consumer did not drain the queue in time; stopping synthesis"
                        );
                        return Continuation::Stop;
                    }
                    if self.stop_requested.load(Ordering::Acquire) {
                        return Continuation::Stop;
                    }
                    chunk = back;
                    std::thread::sleep(FULL_QUEUE_POLL);
                }
            }
        }
    }
}

/// Receiving end of [`channel_sink`].
pub struct ChunkReceiver {
    rx: mpsc::Receiver<Vec<f32>>,
    stop_requested: Arc<AtomicBool>,
}

impl ChunkReceiver {
    /// `None` once the producer side is gone and the queue is empty.
    pub async fn recv(&mut self) -> Option<Vec<f32>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Vec<f32>> {
        self.rx.try_recv().ok()
    }

    /// The next delivery returns [`Continuation::Stop`].
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwards_chunks_in_order() {
        let (mut sink, mut rx) = channel_sink(4, Duration::from_millis(10));
        assert!(sink.deliver(&[0.1, -0.2]).is_continue());
        assert!(sink.deliver(&[]).is_continue());

        assert_eq!(rx.try_recv(), Some(vec![0.1, -0.2]));
        assert_eq!(rx.try_recv(), Some(vec![]));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn dropped_receiver_stops_producer() {
        let (mut sink, rx) = channel_sink(1, Duration::from_millis(10));
        drop(rx);
        assert!(sink.deliver(&[0.5]).is_stop());
    }

    #[test]
    fn full_queue_resolves_to_stop_after_timeout() {
        let (mut sink, _rx) = channel_sink(1, Duration::from_millis(20));
        assert!(sink.deliver(&[0.5]).is_continue());

        let started = Instant::now();
        assert!(sink.deliver(&[0.5]).is_stop());
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(sink.dropped_chunks(), 1);
    }

    #[test]
    fn consumer_can_request_stop() {
        let (mut sink, rx) = channel_sink(4, Duration::from_millis(10));
        assert!(sink.deliver(&[0.5]).is_continue());
        rx.request_stop();
        assert!(sink.deliver(&[0.5]).is_stop());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn async_consumer_drains_while_producer_runs() {
        let (mut sink, mut rx) = channel_sink(2, Duration::from_secs(2));
        let consumer = tokio::spawn(async move {
            let mut total = 0;
            while let Some(chunk) = rx.recv().await {
                total += chunk.len();
            }
            total
        });

        let producer = tokio::task::spawn_blocking(move || {
            for _ in 0..16 {
                assert!(sink.deliver(&[0.0; 10]).is_continue());
            }
        });
        producer.await.expect("producer");

        assert_eq!(consumer.await.expect("consumer"), 160);
    }
}
