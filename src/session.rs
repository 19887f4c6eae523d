//! Device session: one attached camera paired with its own debounce reactor.
//!
//! The reactor is owned by a dedicated worker thread, so batches for one
//! device are handled strictly in arrival order and no start/stop for that
//! device can overlap. Teardown order is fixed:
//!
//! 1. worker stops and runs `reactor.shutdown()` (audio stops)
//! 2. detector session is destroyed
//! 3. device connection is closed
//!
//! Each step is bounded by the teardown timeout; a failed or abandoned step is
//! logged and recorded, and the remaining steps still run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::audio::Actuator;
use crate::detect::{DetectionStream, DetectorSession, StreamPoll};
use crate::device::{DeviceConnection, DeviceId};
use crate::error::{Error, Result};
use crate::reactor::DebounceReactor;

/// Longest the worker sleeps without re-checking its stop flag.
const WORKER_TICK: Duration = Duration::from_millis(50);

/// Errors collected while tearing sessions down.
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub errors: Vec<Error>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_device_errors(&self) -> bool {
        self.errors.iter().any(Error::is_device_error)
    }

    pub fn merge(&mut self, other: TeardownReport) {
        self.errors.extend(other.errors);
    }

    fn record(&mut self, step: &str, err: Error) {
        log::error!("teardown step '{}' failed: {}", step, err);
        self.errors.push(err);
    }
}

/// Called from the worker when the detection stream ends on its own.
pub type EndedCallback = Box<dyn FnOnce(&DeviceId) + Send>;

pub struct DeviceSession {
    id: DeviceId,
    connection: Box<dyn DeviceConnection>,
    detector: Box<dyn DetectorSession>,
    teardown_timeout: Duration,
    stop: Arc<AtomicBool>,
    done: Receiver<()>,
    worker: Option<JoinHandle<()>>,
}

impl DeviceSession {
    /// Open, initialize and subscribe to the device's detector, then start
    /// feeding `reactor` from it.
    ///
    /// On failure everything acquired so far is released (detector destroyed,
    /// connection closed) before the error is returned.
    pub fn attach<A>(
        mut connection: Box<dyn DeviceConnection>,
        reactor: DebounceReactor<A>,
        teardown_timeout: Duration,
        on_ended: EndedCallback,
    ) -> Result<Self>
    where
        A: Actuator + 'static,
    {
        let id = connection.id().clone();

        let mut detector = match connection.open_detector() {
            Ok(detector) => detector,
            Err(e) => {
                close_quietly(&mut *connection);
                return Err(e);
            }
        };

        let stream = match detector.init().and_then(|()| detector.subscribe()) {
            Ok(stream) => stream,
            Err(e) => {
                if let Err(destroy_err) = detector.destroy() {
                    log::warn!("{}: destroy after failed init: {}", id, destroy_err);
                }
                close_quietly(&mut *connection);
                return Err(e);
            }
        };

        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done) = mpsc::channel();
        let worker_stop = stop.clone();
        let worker_id = id.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("session:{id}"))
            .spawn(move || {
                run_worker(&worker_id, reactor, stream, &worker_stop, on_ended);
                let _ = done_tx.send(());
            });
        let worker = match spawned {
            Ok(worker) => worker,
            Err(e) => {
                if let Err(destroy_err) = detector.destroy() {
                    log::warn!("{}: destroy after failed spawn: {}", id, destroy_err);
                }
                close_quietly(&mut *connection);
                return Err(e.into());
            }
        };

        log::info!("{}: session started", id);
        Ok(Self {
            id,
            connection,
            detector,
            teardown_timeout,
            stop,
            done,
            worker: Some(worker),
        })
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Stop audio, destroy the detector and close the connection, in that
    /// order.
    pub fn teardown(mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        log::info!("{}: tearing down session", self.id);

        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            match self.done.recv_timeout(self.teardown_timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if worker.join().is_err() {
                        report.record(
                            "reactor shutdown",
                            Error::device(self.id.as_str(), "session worker panicked"),
                        );
                    }
                }
                Err(RecvTimeoutError::Timeout) => report.record(
                    "reactor shutdown",
                    Error::device(
                        self.id.as_str(),
                        format!(
                            "session worker did not stop within {:?}; abandoned",
                            self.teardown_timeout
                        ),
                    ),
                ),
            }
        }

        if let Err(e) = self.detector.destroy() {
            report.record("detector destroy", e);
        }
        if let Err(e) = self.connection.close_connection() {
            report.record("close connection", e);
        }

        if report.is_clean() {
            log::info!("{}: session closed", self.id);
        }
        report
    }
}

fn close_quietly(connection: &mut dyn DeviceConnection) {
    if let Err(e) = connection.close_connection() {
        log::warn!("{}: close after failed attach: {}", connection.id(), e);
    }
}

fn run_worker<A: Actuator>(
    id: &DeviceId,
    mut reactor: DebounceReactor<A>,
    stream: DetectionStream,
    stop: &AtomicBool,
    on_ended: EndedCallback,
) {
    let mut ended = false;
    while !stop.load(Ordering::SeqCst) {
        let wait = match reactor.next_deadline() {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(WORKER_TICK),
            None => WORKER_TICK,
        };
        match stream.next_timeout(wait) {
            StreamPoll::Batch(batch) => {
                // failures are logged by the reactor
                let _ = reactor.on_detection_batch(&batch, Instant::now());
            }
            StreamPoll::Idle => {
                reactor.poll_timer(Instant::now());
            }
            StreamPoll::Ended => {
                ended = true;
                break;
            }
        }
    }

    reactor.shutdown();
    drop(stream);

    if ended && !stop.load(Ordering::SeqCst) {
        log::info!("{}: detection stream ended", id);
        on_ended(id);
    }
}
