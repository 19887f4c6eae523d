//! Polling attach/detach source.
//!
//! The watcher is responsible for:
//! - Scanning the configured device paths at a fixed interval
//! - Emitting `Attached` when a path appears and `Detached` when it vanishes
//! - Attaching a still-present path again once its session is released
//!   through [`RescanRequests`]
//!
//! Paths are compared as configured; no udev or USB enumeration happens here.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::local::{is_present, LocalDevice};
use super::{DeviceEvent, DeviceId};
use crate::detect::SyntheticConfig;
use crate::error::{Error, Result};

const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Devices whose session ended while the watcher still counts them as
/// attached. The watcher forgets each one on its next scan, so a path that is
/// still present gets a fresh `Attached`.
#[derive(Clone, Debug, Default)]
pub struct RescanRequests {
    released: Arc<Mutex<BTreeSet<DeviceId>>>,
}

impl RescanRequests {
    pub fn request(&self, id: &DeviceId) {
        let mut released = self.released.lock().unwrap_or_else(|e| e.into_inner());
        released.insert(id.clone());
    }

    fn take(&self) -> BTreeSet<DeviceId> {
        let mut released = self.released.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *released)
    }
}

#[derive(Clone, Debug)]
pub struct PathWatcher {
    paths: Vec<String>,
    poll_interval: Duration,
    teardown_timeout: Duration,
    synthetic: SyntheticConfig,
    rescan: RescanRequests,
}

impl PathWatcher {
    pub fn new(
        paths: Vec<String>,
        poll_interval: Duration,
        teardown_timeout: Duration,
    ) -> Result<Self> {
        if paths.is_empty() {
            return Err(Error::Config("no device paths configured".to_string()));
        }
        if poll_interval.is_zero() {
            return Err(Error::Config("device poll interval must be > 0".to_string()));
        }
        Ok(Self {
            paths,
            poll_interval,
            teardown_timeout,
            synthetic: SyntheticConfig::default(),
            rescan: RescanRequests::default(),
        })
    }

    /// Label emitted by synthetic (`stub://`) devices.
    pub fn with_synthetic_label(mut self, label: &str) -> Self {
        self.synthetic.label = label.to_string();
        self
    }

    /// Share release notices with the session manager.
    pub fn with_rescan_requests(mut self, rescan: RescanRequests) -> Self {
        self.rescan = rescan;
        self
    }

    /// Configured paths that are present right now.
    pub fn present_paths(&self) -> Vec<String> {
        self.paths
            .iter()
            .filter(|path| is_present(path))
            .cloned()
            .collect()
    }

    fn connect(&self, path: &str) -> LocalDevice {
        LocalDevice::new(path, self.teardown_timeout).with_synthetic(self.synthetic.clone())
    }

    /// Compare the previous scan with the current one and emit the changes.
    ///
    /// Returns false once the receiving side is gone.
    fn emit_changes<T>(&self, attached: &mut BTreeSet<String>, tx: &Sender<T>) -> bool
    where
        T: From<DeviceEvent>,
    {
        for id in self.rescan.take() {
            if attached.remove(id.as_str()) {
                log::debug!("{}: session released, rescanning", id);
            }
        }
        for path in &self.paths {
            let present = is_present(path);
            let known = attached.contains(path);
            let event = if present && !known {
                log::info!("device attached: {}", path);
                attached.insert(path.clone());
                DeviceEvent::Attached(Box::new(self.connect(path)))
            } else if !present && known {
                log::info!("device detached: {}", path);
                attached.remove(path);
                DeviceEvent::Detached(DeviceId::new(path.as_str()))
            } else {
                continue;
            };
            if tx.send(T::from(event)).is_err() {
                return false;
            }
        }
        true
    }

    /// Start polling on a background thread.
    ///
    /// The first scan runs before this returns, so devices present at startup
    /// are attached immediately.
    pub fn spawn<T>(self, tx: Sender<T>) -> Result<WatcherHandle>
    where
        T: From<DeviceEvent> + Send + 'static,
    {
        let mut attached = BTreeSet::new();
        if !self.emit_changes(&mut attached, &tx) {
            return Err(Error::Config("device event receiver closed".to_string()));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();
        let join = std::thread::Builder::new()
            .name("device-watcher".to_string())
            .spawn(move || {
                'poll: loop {
                    let mut waited = Duration::ZERO;
                    while waited < self.poll_interval {
                        if stop_thread.load(Ordering::SeqCst) {
                            break 'poll;
                        }
                        let step = STOP_CHECK_INTERVAL.min(self.poll_interval - waited);
                        std::thread::sleep(step);
                        waited += step;
                    }
                    if !self.emit_changes(&mut attached, &tx) {
                        break;
                    }
                }
                log::debug!("device watcher stopped");
            })?;

        Ok(WatcherHandle {
            stop,
            join: Some(join),
        })
    }
}

#[derive(Debug)]
pub struct WatcherHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    pub fn stop(mut self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| Error::device("watcher", "device watcher thread panicked"))?;
        }
        Ok(())
    }
}
