//! Line-oriented detector source.
//!
//! Cameras with on-board inference expose their results as newline-delimited
//! JSON on a local device node (USB CDC / serial). Each line is one batch.
//!
//! The line detector MUST NOT:
//! - End the stream on a malformed line (it is logged and skipped)
//! - Outlive `destroy` by more than the configured teardown timeout

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::mpsc::SyncSender;
use std::time::Duration;

use super::session::{DetectionStream, DetectorSession, ProducerThread};
use super::DetectionBatch;
use crate::error::{Error, Result};

/// Sleep between reads while the node has nothing buffered.
const IDLE_POLL: Duration = Duration::from_millis(20);

pub struct LineDetector {
    path: PathBuf,
    teardown_timeout: Duration,
    reader: Option<BufReader<File>>,
    producer: Option<ProducerThread>,
}

impl LineDetector {
    pub fn new(path: impl Into<PathBuf>, teardown_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            teardown_timeout,
            reader: None,
            producer: None,
        }
    }

    fn device_name(&self) -> String {
        self.path.display().to_string()
    }
}

/// Open the node so reads return `WouldBlock` instead of parking the thread;
/// the producer can then notice its stop flag while the camera is quiet.
fn open_node(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(libc::O_NONBLOCK);
    }
    options.open(path)
}

/// Parse one raw line and pass it on. Returns false once the consumer is gone.
fn forward(name: &str, line_no: u64, raw: &[u8], tx: &SyncSender<DetectionBatch>) -> bool {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return true;
    }
    match DetectionBatch::parse_line(trimmed) {
        Ok(batch) => tx.send(batch).is_ok(),
        Err(e) => {
            log::warn!("LineDetector: {} line {} skipped: {}", name, line_no, e);
            true
        }
    }
}

impl DetectorSession for LineDetector {
    fn init(&mut self) -> Result<()> {
        let file = open_node(&self.path)
            .map_err(|e| Error::device(self.device_name(), format!("open failed: {e}")))?;
        self.reader = Some(BufReader::new(file));
        log::info!("LineDetector: opened {}", self.path.display());
        Ok(())
    }

    fn subscribe(&mut self) -> Result<DetectionStream> {
        let device = self.device_name();
        let mut reader = self
            .reader
            .take()
            .ok_or_else(|| Error::device(&device, "subscribe before init"))?;
        let (tx, stream) = DetectionStream::channel();
        let name = device.clone();
        let producer = ProducerThread::spawn(&device, move |stop| {
            // bytes of a line that has not seen its newline yet
            let mut pending = Vec::new();
            let mut line_no = 0u64;
            while !stop.load(Ordering::SeqCst) {
                match reader.read_until(b'\n', &mut pending) {
                    Ok(0) => {
                        if !pending.is_empty() {
                            line_no += 1;
                            forward(&name, line_no, &pending, &tx);
                        }
                        log::info!("LineDetector: {} reached end of stream", name);
                        break;
                    }
                    Ok(_) => {
                        if pending.last() != Some(&b'\n') {
                            continue;
                        }
                        line_no += 1;
                        if !forward(&name, line_no, &pending, &tx) {
                            break;
                        }
                        pending.clear();
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        std::thread::sleep(IDLE_POLL);
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => {
                        log::warn!("LineDetector: {} read failed: {}", name, e);
                        break;
                    }
                }
            }
        })?;
        self.producer = Some(producer);
        Ok(stream)
    }

    fn destroy(&mut self) -> Result<()> {
        self.reader = None;
        match self.producer.as_mut() {
            Some(producer) => producer.stop(self.teardown_timeout),
            None => Ok(()),
        }
    }
}
