//! Device session lifecycle tests.
//!
//! Drives the session manager with scripted devices and checks the ordering
//! of actuator, detector and connection calls.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use presence_player::{
    Actuator, AssetSource, Detection, DetectionBatch, DetectionStream, DetectorSession,
    DeviceConnection, DeviceEvent, DeviceId, Error, ManagerEvent, PathWatcher, ReactorConfig,
    RescanRequests, Result, SessionConfig, SessionManager, TeardownReport,
};

type CallLog = Arc<Mutex<Vec<String>>>;

fn entries(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn position(log: &CallLog, entry: &str) -> usize {
    entries(log)
        .iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("missing log entry {entry}: {:?}", entries(log)))
}

fn count(log: &CallLog, entry: &str) -> usize {
    entries(log).iter().filter(|e| *e == entry).count()
}

fn wait_for(log: &CallLog, entry: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if entries(log).iter().any(|e| e == entry) {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("timed out waiting for {entry}: {:?}", entries(log));
}

#[derive(Clone, Default)]
struct Feed(Arc<Mutex<Option<SyncSender<DetectionBatch>>>>);

impl Feed {
    fn send(&self, present: bool) {
        let batch = if present {
            DetectionBatch::new(vec![Detection::labeled("head")])
        } else {
            DetectionBatch::empty()
        };
        let guard = self.0.lock().unwrap();
        guard.as_ref().expect("subscribed").send(batch).unwrap();
    }

    /// Simulate the camera going away mid-stream.
    fn end(&self) {
        self.0.lock().unwrap().take();
    }
}

struct ScriptedDetector {
    name: String,
    log: CallLog,
    feed: Feed,
    fail_init: bool,
    fail_destroy: bool,
}

impl DetectorSession for ScriptedDetector {
    fn init(&mut self) -> Result<()> {
        if self.fail_init {
            self.log.lock().unwrap().push(format!("init-failed:{}", self.name));
            return Err(Error::device(&self.name, "camera busy"));
        }
        self.log.lock().unwrap().push(format!("init:{}", self.name));
        Ok(())
    }

    fn subscribe(&mut self) -> Result<DetectionStream> {
        let (tx, stream) = DetectionStream::channel();
        *self.feed.0.lock().unwrap() = Some(tx);
        self.log.lock().unwrap().push(format!("subscribe:{}", self.name));
        Ok(stream)
    }

    fn destroy(&mut self) -> Result<()> {
        self.feed.end();
        self.log.lock().unwrap().push(format!("destroy:{}", self.name));
        if self.fail_destroy {
            return Err(Error::device(&self.name, "destroy timed out"));
        }
        Ok(())
    }
}

struct ScriptedDevice {
    id: DeviceId,
    name: String,
    log: CallLog,
    detector: Option<ScriptedDetector>,
    fail_close: bool,
}

impl DeviceConnection for ScriptedDevice {
    fn id(&self) -> &DeviceId {
        &self.id
    }

    fn open_detector(&mut self) -> Result<Box<dyn DetectorSession>> {
        let detector = self
            .detector
            .take()
            .ok_or_else(|| Error::device(&self.name, "detector already opened"))?;
        Ok(Box::new(detector))
    }

    fn close_connection(&mut self) -> Result<()> {
        self.log.lock().unwrap().push(format!("close:{}", self.name));
        if self.fail_close {
            return Err(Error::device(&self.name, "usb transfer failed"));
        }
        Ok(())
    }
}

struct DeviceBuilder {
    id: String,
    name: String,
    fail_init: bool,
    fail_destroy: bool,
    fail_close: bool,
}

impl DeviceBuilder {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            fail_init: false,
            fail_destroy: false,
            fail_close: false,
        }
    }

    fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    fn build(self, log: &CallLog) -> (ManagerEvent, Feed) {
        let feed = Feed::default();
        let device = ScriptedDevice {
            id: DeviceId::new(self.id),
            name: self.name.clone(),
            log: log.clone(),
            detector: Some(ScriptedDetector {
                name: self.name,
                log: log.clone(),
                feed: feed.clone(),
                fail_init: self.fail_init,
                fail_destroy: self.fail_destroy,
            }),
            fail_close: self.fail_close,
        };
        (
            ManagerEvent::Device(DeviceEvent::Attached(Box::new(device))),
            feed,
        )
    }
}

struct LoggingActuator {
    name: String,
    log: CallLog,
}

impl Actuator for LoggingActuator {
    type Handle = String;

    fn start(&mut self, item: &Path) -> Result<String> {
        self.log.lock().unwrap().push(format!("start:{}", self.name));
        Ok(item.display().to_string())
    }

    fn stop(&mut self, _handle: String) {
        self.log.lock().unwrap().push(format!("stop:{}", self.name));
    }
}

struct OneClip;

impl AssetSource for OneClip {
    fn pick_one(&self) -> Result<PathBuf> {
        Ok(PathBuf::from("clips/hello.mp3"))
    }
}

fn session_config(grace: Duration) -> SessionConfig {
    SessionConfig {
        reactor: ReactorConfig {
            target_label: "head".to_string(),
            grace,
        },
        teardown_timeout: Duration::from_secs(2),
    }
}

/// Actuator factory that also records every session start as `session:<id>`.
fn logging_actuators(log: &CallLog) -> impl FnMut(&DeviceId) -> LoggingActuator {
    let log = log.clone();
    move |id: &DeviceId| {
        log.lock().unwrap().push(format!("session:{id}"));
        LoggingActuator {
            name: id.to_string(),
            log: log.clone(),
        }
    }
}

fn spawn_manager(
    log: &CallLog,
    grace: Duration,
) -> (Sender<ManagerEvent>, JoinHandle<TeardownReport>) {
    let (tx, rx) = mpsc::channel();
    let events = tx.clone();
    let log = log.clone();
    let handle = std::thread::spawn(move || {
        let mut manager = SessionManager::new(
            session_config(grace),
            Arc::new(OneClip),
            logging_actuators(&log),
            events,
        );
        manager.run(rx)
    });
    (tx, handle)
}

fn connection(event: ManagerEvent) -> Box<dyn DeviceConnection> {
    match event {
        ManagerEvent::Device(DeviceEvent::Attached(conn)) => conn,
        other => panic!("expected an attach, got {other:?}"),
    }
}

const LONG_GRACE: Duration = Duration::from_secs(30);

#[test]
fn interrupt_stops_audio_before_destroying_detector_and_closing() {
    let log = CallLog::default();
    let (tx, manager) = spawn_manager(&log, LONG_GRACE);
    let (attach, feed) = DeviceBuilder::new("a").build(&log);
    tx.send(attach).unwrap();
    wait_for(&log, "subscribe:a");

    feed.send(true);
    wait_for(&log, "start:a");

    tx.send(ManagerEvent::Interrupt).unwrap();
    let report = manager.join().unwrap();

    assert!(report.is_clean());
    assert!(position(&log, "stop:a") < position(&log, "destroy:a"));
    assert!(position(&log, "destroy:a") < position(&log, "close:a"));
    assert_eq!(count(&log, "start:a"), 1);
    assert_eq!(count(&log, "stop:a"), 1);
}

#[test]
fn interrupt_while_idle_issues_no_actuator_calls() {
    let log = CallLog::default();
    let (tx, manager) = spawn_manager(&log, LONG_GRACE);
    let (attach, feed) = DeviceBuilder::new("a").build(&log);
    tx.send(attach).unwrap();
    wait_for(&log, "subscribe:a");
    feed.send(false);

    tx.send(ManagerEvent::Interrupt).unwrap();
    assert!(manager.join().unwrap().is_clean());
    assert_eq!(count(&log, "start:a"), 0);
    assert_eq!(count(&log, "stop:a"), 0);
    assert_eq!(count(&log, "close:a"), 1);
}

#[test]
fn devices_have_independent_playback() {
    let log = CallLog::default();
    let (tx, manager) = spawn_manager(&log, LONG_GRACE);
    let (attach_a, feed_a) = DeviceBuilder::new("a").build(&log);
    let (attach_b, feed_b) = DeviceBuilder::new("b").build(&log);
    tx.send(attach_a).unwrap();
    tx.send(attach_b).unwrap();
    wait_for(&log, "subscribe:a");
    wait_for(&log, "subscribe:b");

    feed_a.send(true);
    feed_b.send(false);
    wait_for(&log, "start:a");
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(count(&log, "start:b"), 0);

    tx.send(ManagerEvent::Interrupt).unwrap();
    assert!(manager.join().unwrap().is_clean());
    assert_eq!(count(&log, "stop:a"), 1);
    assert_eq!(count(&log, "stop:b"), 0);
    assert_eq!(count(&log, "close:b"), 1);
}

#[test]
fn detach_tears_down_only_that_device() {
    let log = CallLog::default();
    let (tx, manager) = spawn_manager(&log, LONG_GRACE);
    let (attach_a, feed_a) = DeviceBuilder::new("a").build(&log);
    let (attach_b, feed_b) = DeviceBuilder::new("b").build(&log);
    tx.send(attach_a).unwrap();
    tx.send(attach_b).unwrap();
    wait_for(&log, "subscribe:a");
    wait_for(&log, "subscribe:b");
    feed_a.send(true);
    feed_b.send(true);
    wait_for(&log, "start:a");
    wait_for(&log, "start:b");

    tx.send(ManagerEvent::Device(DeviceEvent::Detached(DeviceId::new("a"))))
        .unwrap();
    wait_for(&log, "close:a");
    assert!(position(&log, "stop:a") < position(&log, "destroy:a"));
    assert_eq!(count(&log, "stop:b"), 0);
    assert_eq!(count(&log, "destroy:b"), 0);

    // b keeps running: a repeated detection is still absorbed without restart
    feed_b.send(true);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(count(&log, "start:b"), 1);

    tx.send(ManagerEvent::Interrupt).unwrap();
    assert!(manager.join().unwrap().is_clean());
    assert_eq!(count(&log, "stop:b"), 1);
    assert_eq!(count(&log, "close:a"), 1);
}

#[test]
fn stream_end_is_treated_as_detach() {
    let log = CallLog::default();
    let (tx, manager) = spawn_manager(&log, LONG_GRACE);
    let (attach, feed) = DeviceBuilder::new("a").build(&log);
    tx.send(attach).unwrap();
    wait_for(&log, "subscribe:a");
    feed.send(true);
    wait_for(&log, "start:a");

    feed.end();
    wait_for(&log, "close:a");
    assert!(position(&log, "stop:a") < position(&log, "destroy:a"));
    assert!(position(&log, "destroy:a") < position(&log, "close:a"));

    tx.send(ManagerEvent::Interrupt).unwrap();
    assert!(manager.join().unwrap().is_clean());
    assert_eq!(count(&log, "close:a"), 1);
}

#[test]
fn failed_init_releases_device_without_a_session() {
    let log = CallLog::default();
    let (tx, manager) = spawn_manager(&log, LONG_GRACE);
    let mut builder = DeviceBuilder::new("a");
    builder.fail_init = true;
    let (attach, _feed) = builder.build(&log);
    tx.send(attach).unwrap();
    wait_for(&log, "close:a");
    assert!(position(&log, "init-failed:a") < position(&log, "close:a"));

    tx.send(ManagerEvent::Interrupt).unwrap();
    assert!(manager.join().unwrap().is_clean());
    assert_eq!(count(&log, "close:a"), 1);
    assert_eq!(count(&log, "subscribe:a"), 0);
}

#[test]
fn teardown_errors_are_reported_and_other_devices_still_close() {
    let log = CallLog::default();
    let (tx, manager) = spawn_manager(&log, LONG_GRACE);
    let mut broken = DeviceBuilder::new("a");
    broken.fail_destroy = true;
    broken.fail_close = true;
    let (attach_a, feed_a) = broken.build(&log);
    let (attach_b, _feed_b) = DeviceBuilder::new("b").build(&log);
    tx.send(attach_a).unwrap();
    tx.send(attach_b).unwrap();
    wait_for(&log, "subscribe:a");
    wait_for(&log, "subscribe:b");
    feed_a.send(true);
    wait_for(&log, "start:a");

    tx.send(ManagerEvent::Interrupt).unwrap();
    let report = manager.join().unwrap();

    assert!(report.has_device_errors());
    assert_eq!(report.errors.len(), 2);
    // the failed destroy does not skip closing the same device
    assert!(position(&log, "destroy:a") < position(&log, "close:a"));
    assert_eq!(count(&log, "stop:a"), 1);
    assert_eq!(count(&log, "close:b"), 1);
}

#[test]
fn duplicate_attach_is_ignored() {
    let log = CallLog::default();
    let (tx, manager) = spawn_manager(&log, LONG_GRACE);
    let (first, feed) = DeviceBuilder::new("a").build(&log);
    let (second, _unused) = DeviceBuilder::new("a").named("a-dup").build(&log);
    tx.send(first).unwrap();
    tx.send(second).unwrap();
    wait_for(&log, "close:a-dup");
    assert_eq!(count(&log, "init:a-dup"), 0);

    feed.send(true);
    wait_for(&log, "start:a");

    tx.send(ManagerEvent::Interrupt).unwrap();
    assert!(manager.join().unwrap().is_clean());
    assert_eq!(count(&log, "close:a"), 1);
}

#[test]
fn sustained_absence_stops_after_grace() {
    let log = CallLog::default();
    let grace = Duration::from_millis(150);
    let (tx, manager) = spawn_manager(&log, grace);
    let (attach, feed) = DeviceBuilder::new("a").build(&log);
    tx.send(attach).unwrap();
    wait_for(&log, "subscribe:a");

    feed.send(true);
    wait_for(&log, "start:a");
    let lost_at = Instant::now();
    feed.send(false);
    feed.send(false);
    wait_for(&log, "stop:a");
    assert!(lost_at.elapsed() >= grace);

    tx.send(ManagerEvent::Interrupt).unwrap();
    assert!(manager.join().unwrap().is_clean());
    assert_eq!(count(&log, "stop:a"), 1);
}

#[test]
fn transient_gap_does_not_stop_playback() {
    let log = CallLog::default();
    let (tx, manager) = spawn_manager(&log, Duration::from_secs(2));
    let (attach, feed) = DeviceBuilder::new("a").build(&log);
    tx.send(attach).unwrap();
    wait_for(&log, "subscribe:a");

    feed.send(true);
    feed.send(false);
    feed.send(true);
    wait_for(&log, "start:a");
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(count(&log, "stop:a"), 0);

    tx.send(ManagerEvent::Interrupt).unwrap();
    assert!(manager.join().unwrap().is_clean());
    assert_eq!(count(&log, "start:a"), 1);
    assert_eq!(count(&log, "stop:a"), 1);
}

#[test]
fn live_devices_track_attach_and_detach() {
    let log = CallLog::default();
    let (tx, _rx) = mpsc::channel();
    let mut manager = SessionManager::new(
        session_config(LONG_GRACE),
        Arc::new(OneClip),
        logging_actuators(&log),
        tx,
    );
    let (attach_a, _feed_a) = DeviceBuilder::new("a").build(&log);
    let (attach_b, _feed_b) = DeviceBuilder::new("b").build(&log);
    manager.attach(connection(attach_a));
    manager.attach(connection(attach_b));
    assert_eq!(
        manager.live_devices(),
        vec![DeviceId::new("a"), DeviceId::new("b")]
    );

    let report = manager.detach(&DeviceId::new("a")).expect("a was live");
    assert!(report.is_clean());
    assert_eq!(manager.live_devices(), vec![DeviceId::new("b")]);
    assert!(manager.detach(&DeviceId::new("a")).is_none());

    assert!(manager.shutdown_all().is_clean());
    assert!(manager.live_devices().is_empty());
}

#[test]
fn stream_end_from_an_older_session_is_ignored() {
    let log = CallLog::default();
    let (tx, manager) = spawn_manager(&log, LONG_GRACE);
    let (attach, feed) = DeviceBuilder::new("a").build(&log);
    tx.send(attach).unwrap();
    wait_for(&log, "subscribe:a");

    tx.send(ManagerEvent::StreamEnded {
        id: DeviceId::new("a"),
        generation: u64::MAX,
    })
    .unwrap();
    // the duplicate is handled after the notice, so its close marks that point
    let (duplicate, _unused) = DeviceBuilder::new("a").named("a-dup").build(&log);
    tx.send(duplicate).unwrap();
    wait_for(&log, "close:a-dup");
    assert_eq!(count(&log, "destroy:a"), 0);

    feed.send(true);
    wait_for(&log, "start:a");

    tx.send(ManagerEvent::Interrupt).unwrap();
    assert!(manager.join().unwrap().is_clean());
    assert_eq!(count(&log, "close:a"), 1);
}

#[test]
fn watcher_reattaches_present_device_after_its_stream_ends() {
    let dir = tempfile::tempdir().unwrap();
    let node = dir.path().join("ttyACM0");
    // one empty batch, then end of stream
    std::fs::write(&node, b"[]\n").unwrap();
    let path = node.display().to_string();
    let session_entry = format!("session:{path}");

    let log = CallLog::default();
    let rescan = RescanRequests::default();
    let (tx, rx) = mpsc::channel();
    let mut manager = SessionManager::new(
        session_config(LONG_GRACE),
        Arc::new(OneClip),
        logging_actuators(&log),
        tx.clone(),
    )
    .with_rescan_requests(rescan.clone());
    let watcher = PathWatcher::new(
        vec![path],
        Duration::from_millis(20),
        Duration::from_secs(2),
    )
    .unwrap()
    .with_rescan_requests(rescan);
    let watcher_handle = watcher.spawn(tx.clone()).unwrap();
    let runner = std::thread::spawn(move || manager.run(rx));

    let deadline = Instant::now() + Duration::from_secs(5);
    while count(&log, &session_entry) < 3 {
        assert!(
            Instant::now() < deadline,
            "device was not re-attached: {:?}",
            entries(&log)
        );
        std::thread::sleep(Duration::from_millis(10));
    }

    tx.send(ManagerEvent::Interrupt).unwrap();
    assert!(runner.join().unwrap().is_clean());
    watcher_handle.stop().unwrap();
}
