//! Device session manager.
//!
//! Bridges hot-plug events to session lifecycles. All lifecycle changes are
//! funnelled through one channel of [`ManagerEvent`]s and applied on the
//! manager's thread, so attach, detach and interrupt never race each other.
//!
//! Every session gets a generation number. A stream-ended notice only tears
//! down the session it was issued for; a late notice for an older session of
//! the same device is dropped.

use std::collections::BTreeMap;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::{Actuator, AssetSource};
use crate::device::{DeviceConnection, DeviceEvent, DeviceId, RescanRequests};
use crate::reactor::{DebounceReactor, ReactorConfig};
use crate::session::{DeviceSession, TeardownReport};

pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum ManagerEvent {
    Device(DeviceEvent),
    /// The detection stream of session `generation` ended on its own.
    StreamEnded { id: DeviceId, generation: u64 },
    /// Operator interrupt: tear everything down and return.
    Interrupt,
}

impl From<DeviceEvent> for ManagerEvent {
    fn from(event: DeviceEvent) -> Self {
        Self::Device(event)
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub reactor: ReactorConfig,
    pub teardown_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reactor: ReactorConfig::default(),
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
        }
    }
}

struct LiveSession {
    generation: u64,
    session: DeviceSession,
}

pub struct SessionManager<A, F>
where
    A: Actuator + 'static,
    F: FnMut(&DeviceId) -> A,
{
    config: SessionConfig,
    assets: Arc<dyn AssetSource>,
    make_actuator: F,
    events: Sender<ManagerEvent>,
    rescan: RescanRequests,
    next_generation: u64,
    sessions: BTreeMap<DeviceId, LiveSession>,
}

impl<A, F> SessionManager<A, F>
where
    A: Actuator + 'static,
    F: FnMut(&DeviceId) -> A,
{
    /// `events` must feed the receiver later passed to [`run`](Self::run);
    /// sessions use it to report streams that ended on their own.
    pub fn new(
        config: SessionConfig,
        assets: Arc<dyn AssetSource>,
        make_actuator: F,
        events: Sender<ManagerEvent>,
    ) -> Self {
        Self {
            config,
            assets,
            make_actuator,
            events,
            rescan: RescanRequests::default(),
            next_generation: 0,
            sessions: BTreeMap::new(),
        }
    }

    /// Report released devices to the watcher feeding this manager, so a
    /// device whose session ended while its path stayed present is retried.
    pub fn with_rescan_requests(mut self, rescan: RescanRequests) -> Self {
        self.rescan = rescan;
        self
    }

    pub fn live_devices(&self) -> Vec<DeviceId> {
        self.sessions.keys().cloned().collect()
    }

    /// Process events until an interrupt arrives (or every sender is gone),
    /// then tear all sessions down.
    ///
    /// The returned report covers the final teardown only; failures while
    /// detaching individual devices earlier are logged as they happen.
    pub fn run(&mut self, rx: Receiver<ManagerEvent>) -> TeardownReport {
        while let Ok(event) = rx.recv() {
            match event {
                ManagerEvent::Device(DeviceEvent::Attached(connection)) => self.attach(connection),
                ManagerEvent::Device(DeviceEvent::Detached(id)) => {
                    let _ = self.detach(&id);
                }
                ManagerEvent::StreamEnded { id, generation } => {
                    self.stream_ended(&id, generation)
                }
                ManagerEvent::Interrupt => {
                    log::info!(
                        "interrupt received, stopping {} session(s)",
                        self.sessions.len()
                    );
                    break;
                }
            }
        }
        self.shutdown_all()
    }

    /// Start a session for a newly attached device.
    ///
    /// Failures are logged and leave other sessions untouched.
    pub fn attach(&mut self, mut connection: Box<dyn DeviceConnection>) {
        let id = connection.id().clone();
        if self.sessions.contains_key(&id) {
            log::warn!("{}: already attached, ignoring duplicate attach", id);
            if let Err(e) = connection.close_connection() {
                log::warn!("{}: closing duplicate connection: {}", id, e);
            }
            return;
        }

        let reactor = DebounceReactor::new(
            id.as_str(),
            self.config.reactor.clone(),
            (self.make_actuator)(&id),
            self.assets.clone(),
        );
        let generation = self.next_generation;
        self.next_generation += 1;
        let events = self.events.clone();
        let on_ended = Box::new(move |id: &DeviceId| {
            let _ = events.send(ManagerEvent::StreamEnded {
                id: id.clone(),
                generation,
            });
        });

        match DeviceSession::attach(connection, reactor, self.config.teardown_timeout, on_ended) {
            Ok(session) => {
                self.sessions.insert(id, LiveSession { generation, session });
            }
            Err(e) => log::error!("{}: attach failed: {}", id, e),
        }
    }

    fn stream_ended(&mut self, id: &DeviceId, generation: u64) {
        match self.sessions.get(id) {
            Some(live) if live.generation == generation => {
                let _ = self.detach(id);
                self.rescan.request(id);
            }
            _ => log::debug!("{}: stale stream end for session {} ignored", id, generation),
        }
    }

    /// Tear down one device's session. Unknown ids are ignored.
    pub fn detach(&mut self, id: &DeviceId) -> Option<TeardownReport> {
        match self.sessions.remove(id) {
            Some(live) => Some(live.session.teardown()),
            None => {
                log::debug!("{}: detach for unknown device ignored", id);
                None
            }
        }
    }

    /// Tear down every live session, one after another.
    pub fn shutdown_all(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        for (_, live) in std::mem::take(&mut self.sessions) {
            report.merge(live.session.teardown());
        }
        report
    }
}

impl<A, F> Drop for SessionManager<A, F>
where
    A: Actuator + 'static,
    F: FnMut(&DeviceId) -> A,
{
    fn drop(&mut self) {
        if !self.sessions.is_empty() {
            let _ = self.shutdown_all();
        }
    }
}
