use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::detect::DetectionBatch;
use crate::error::{Error, Result};

/// Batches buffered between a detector and its consumer before the
/// detector blocks.
pub const STREAM_CAPACITY: usize = 64;

/// One open connection to a detection source.
///
/// Lifecycle: `init` once, `subscribe` once, `destroy` once. `destroy` must
/// return within a bounded time even when the underlying source is wedged.
pub trait DetectorSession: Send {
    fn init(&mut self) -> Result<()>;

    /// Start delivering batches. The stream ends when the source goes away or
    /// the session is destroyed.
    fn subscribe(&mut self) -> Result<DetectionStream>;

    fn destroy(&mut self) -> Result<()>;
}

/// Outcome of waiting on a [`DetectionStream`].
#[derive(Debug)]
pub enum StreamPoll {
    Batch(DetectionBatch),
    /// Nothing arrived before the timeout.
    Idle,
    /// The source is gone; no more batches will arrive.
    Ended,
}

/// Lazy, finite, ordered sequence of detection batches.
///
/// Dropping the stream releases the subscription: the producing side sees a
/// closed channel and stops.
#[derive(Debug)]
pub struct DetectionStream {
    rx: Receiver<DetectionBatch>,
}

impl DetectionStream {
    /// Bounded producer/consumer pair.
    pub fn channel() -> (SyncSender<DetectionBatch>, Self) {
        let (tx, rx) = mpsc::sync_channel(STREAM_CAPACITY);
        (tx, Self { rx })
    }

    /// Wait up to `timeout` for the next batch.
    pub fn next_timeout(&self, timeout: Duration) -> StreamPoll {
        match self.rx.recv_timeout(timeout) {
            Ok(batch) => StreamPoll::Batch(batch),
            Err(RecvTimeoutError::Timeout) => StreamPoll::Idle,
            Err(RecvTimeoutError::Disconnected) => StreamPoll::Ended,
        }
    }

    /// Non-blocking variant of [`next_timeout`](Self::next_timeout).
    pub fn try_next(&self) -> StreamPoll {
        match self.rx.try_recv() {
            Ok(batch) => StreamPoll::Batch(batch),
            Err(TryRecvError::Empty) => StreamPoll::Idle,
            Err(TryRecvError::Disconnected) => StreamPoll::Ended,
        }
    }
}

impl Iterator for DetectionStream {
    type Item = DetectionBatch;

    fn next(&mut self) -> Option<DetectionBatch> {
        self.rx.recv().ok()
    }
}

/// Background producer thread shared by the concrete detector sessions.
pub(crate) struct ProducerThread {
    device: String,
    stop: Arc<AtomicBool>,
    done: Receiver<()>,
    join: Option<JoinHandle<()>>,
}

impl ProducerThread {
    /// Spawn `body` with a stop flag. `body` should return promptly once the
    /// flag is raised or its sender reports a closed stream.
    pub(crate) fn spawn<F>(device: &str, body: F) -> Result<Self>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done) = mpsc::channel();
        let stop_thread = stop.clone();
        let join = std::thread::Builder::new()
            .name(format!("detector:{device}"))
            .spawn(move || {
                body(stop_thread);
                let _ = done_tx.send(());
            })?;
        Ok(Self {
            device: device.to_string(),
            stop,
            done,
            join: Some(join),
        })
    }

    /// Raise the stop flag and wait at most `timeout` for the thread to exit.
    ///
    /// On timeout the thread is abandoned and an error is returned.
    pub(crate) fn stop(&mut self, timeout: Duration) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => join
                .join()
                .map_err(|_| Error::device(&self.device, "detector thread panicked")),
            Err(RecvTimeoutError::Timeout) => Err(Error::device(
                &self.device,
                format!("detector thread did not stop within {timeout:?}; abandoned"),
            )),
        }
    }
}
