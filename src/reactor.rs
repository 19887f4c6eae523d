//! Debounce reactor.
//!
//! Turns the per-frame "is the target label present?" signal into start/stop
//! commands for an [`Actuator`]:
//!
//! | state        | present                  | absent                 |
//! |--------------|--------------------------|------------------------|
//! | Idle         | pick asset, start        | -                      |
//! | Playing      | -                        | arm stop timer         |
//! | PendingStop  | cancel timer             | - (timer keeps running)|
//!
//! When the stop timer fires the handle is stopped and the reactor is Idle
//! again. Time is passed in explicitly; the owner is expected to call
//! [`DebounceReactor::poll_timer`] at [`DebounceReactor::next_deadline`].
//!
//! An audio handle exists iff the state is Playing or PendingStop, and a stop
//! timer exists iff the state is PendingStop. Both hold by construction of
//! [`Phase`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::{Actuator, AssetSource};
use crate::detect::DetectionBatch;
use crate::error::{Error, Result};

pub const DEFAULT_TARGET_LABEL: &str = "head";
pub const DEFAULT_GRACE: Duration = Duration::from_millis(2000);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactorConfig {
    /// Detection label that counts as presence.
    pub target_label: String,
    /// Sustained absence required before playback stops.
    pub grace: Duration,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            target_label: DEFAULT_TARGET_LABEL.to_string(),
            grace: DEFAULT_GRACE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    PlayingWithPendingStop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TimerStatus {
    Armed,
    Cancelled,
    Fired,
}

/// One-shot pending-stop timer.
///
/// `cancel` and `fire` are both idempotent and mutually exclusive: once
/// cancelled the timer never fires, once fired it cannot be cancelled.
#[derive(Debug)]
pub struct StopTimer {
    deadline: Instant,
    status: TimerStatus,
}

impl StopTimer {
    pub fn arm(now: Instant, delay: Duration) -> Self {
        Self {
            deadline: now + delay,
            status: TimerStatus::Armed,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.status == TimerStatus::Armed
    }

    /// Returns true if this call disarmed the timer.
    pub fn cancel(&mut self) -> bool {
        if self.is_armed() {
            self.status = TimerStatus::Cancelled;
            true
        } else {
            false
        }
    }

    /// Returns true exactly once: the first call at or after the deadline on
    /// an armed timer.
    pub fn fire(&mut self, now: Instant) -> bool {
        if self.is_armed() && now >= self.deadline {
            self.status = TimerStatus::Fired;
            true
        } else {
            false
        }
    }
}

enum Phase<H> {
    Idle,
    Playing {
        handle: H,
        item: PathBuf,
    },
    PendingStop {
        handle: H,
        item: PathBuf,
        timer: StopTimer,
    },
}

pub struct DebounceReactor<A: Actuator> {
    device: String,
    config: ReactorConfig,
    actuator: A,
    assets: Arc<dyn AssetSource>,
    phase: Phase<A::Handle>,
    /// Set after a failed start; further starts are refused until reset.
    faulted: bool,
    /// Suppresses repeated empty-catalog warnings while the catalog stays empty.
    catalog_empty_reported: bool,
}

impl<A: Actuator> DebounceReactor<A> {
    pub fn new(
        device: impl Into<String>,
        config: ReactorConfig,
        actuator: A,
        assets: Arc<dyn AssetSource>,
    ) -> Self {
        Self {
            device: device.into(),
            config,
            actuator,
            assets,
            phase: Phase::Idle,
            faulted: false,
            catalog_empty_reported: false,
        }
    }

    pub fn state(&self) -> PlaybackState {
        match self.phase {
            Phase::Idle => PlaybackState::Idle,
            Phase::Playing { .. } => PlaybackState::Playing,
            Phase::PendingStop { .. } => PlaybackState::PlayingWithPendingStop,
        }
    }

    /// True after a failed start; see [`reset_fault`](Self::reset_fault).
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// Allow starts again after an actuation failure.
    pub fn reset_fault(&mut self) {
        self.faulted = false;
    }

    /// Deadline of the armed stop timer, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.phase {
            Phase::PendingStop { timer, .. } if timer.is_armed() => Some(timer.deadline()),
            _ => None,
        }
    }

    /// Feed one detection batch observed at `now`.
    ///
    /// A stop timer that is already due fires before the batch is applied, so
    /// a late batch never revives playback that should have ended.
    ///
    /// Failures to start are logged here and returned; the reactor stays Idle.
    pub fn on_detection_batch(&mut self, batch: &DetectionBatch, now: Instant) -> Result<()> {
        self.poll_timer(now);
        if batch.contains_label(&self.config.target_label) {
            self.on_present()
        } else {
            self.on_absent(now);
            Ok(())
        }
    }

    fn on_present(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => self.start_playback(),
            playing @ Phase::Playing { .. } => {
                self.phase = playing;
                Ok(())
            }
            Phase::PendingStop {
                handle,
                item,
                mut timer,
            } => {
                timer.cancel();
                log::debug!("{}: target back in view, stop cancelled", self.device);
                self.phase = Phase::Playing { handle, item };
                Ok(())
            }
        }
    }

    fn on_absent(&mut self, now: Instant) {
        self.phase = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Playing { handle, item } => {
                log::debug!(
                    "{}: target lost, stopping in {:?} unless it returns",
                    self.device,
                    self.config.grace
                );
                Phase::PendingStop {
                    handle,
                    item,
                    timer: StopTimer::arm(now, self.config.grace),
                }
            }
            other => other,
        };
    }

    fn start_playback(&mut self) -> Result<()> {
        if self.faulted {
            log::debug!(
                "{}: target present but actuator is faulted; not starting",
                self.device
            );
            return Ok(());
        }
        let item = match self.assets.pick_one() {
            Ok(item) => {
                self.catalog_empty_reported = false;
                item
            }
            Err(e) => {
                if !self.catalog_empty_reported {
                    log::warn!("{}: cannot start playback: {}", self.device, e);
                    self.catalog_empty_reported = true;
                }
                return Err(e);
            }
        };
        match self.actuator.start(&item) {
            Ok(handle) => {
                log::info!("{}: playing {}", self.device, item.display());
                self.phase = Phase::Playing { handle, item };
                Ok(())
            }
            Err(e) => {
                log::error!(
                    "{}: {}; playback disabled until the session restarts",
                    self.device,
                    e
                );
                self.faulted = true;
                Err(match e {
                    e @ Error::ActuationFailed(_) => e,
                    other => Error::ActuationFailed(other.to_string()),
                })
            }
        }
    }

    /// Fire the stop timer if it is due. Returns true if playback stopped.
    pub fn poll_timer(&mut self, now: Instant) -> bool {
        let due = match &mut self.phase {
            Phase::PendingStop { timer, .. } => timer.fire(now),
            _ => false,
        };
        if !due {
            return false;
        }
        if let Phase::PendingStop { handle, item, .. } =
            std::mem::replace(&mut self.phase, Phase::Idle)
        {
            log::info!("{}: stopping {}", self.device, item.display());
            self.actuator.stop(handle);
        }
        true
    }

    /// Cancel any pending stop and stop playback. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => {}
            Phase::Playing { handle, item } => {
                log::info!("{}: shutdown, stopping {}", self.device, item.display());
                self.actuator.stop(handle);
            }
            Phase::PendingStop {
                handle,
                item,
                mut timer,
            } => {
                timer.cancel();
                log::info!("{}: shutdown, stopping {}", self.device, item.display());
                self.actuator.stop(handle);
            }
        }
    }
}

impl<A: Actuator> Drop for DebounceReactor<A> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
