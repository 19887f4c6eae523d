//! Synthetic detector for `stub://` devices.
//!
//! Simulates a person walking in and out of view:
//! - `present_frames` frames with the target label (with an occasional
//!   dropped frame, as real per-frame detectors produce)
//! - `absent_frames` empty frames
//! - repeat

use std::sync::atomic::Ordering;
use std::time::Duration;

use super::session::{DetectionStream, DetectorSession, ProducerThread};
use super::{Detection, DetectionBatch};
use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub device: String,
    pub label: String,
    pub fps: u32,
    pub present_frames: u64,
    pub absent_frames: u64,
    /// Every n-th present frame is reported empty. 0 disables dropouts.
    pub dropout_every: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            device: "stub://camera0".to_string(),
            label: "head".to_string(),
            fps: 10,
            present_frames: 50,
            absent_frames: 50,
            dropout_every: 7,
        }
    }
}

impl SyntheticConfig {
    /// Batch emitted for the frame with this index.
    pub fn batch_for_frame(&self, frame: u64) -> DetectionBatch {
        let period = self.present_frames + self.absent_frames;
        if period == 0 {
            return DetectionBatch::empty();
        }
        let phase = frame % period;
        let dropped = self.dropout_every != 0 && phase > 0 && phase % self.dropout_every == 0;
        if phase < self.present_frames && !dropped {
            let mut detection = Detection::labeled(self.label.clone());
            detection.confidence = 0.9;
            detection.w = 0.2;
            detection.h = 0.3;
            DetectionBatch::new(vec![detection])
        } else {
            DetectionBatch::empty()
        }
    }
}

pub struct SyntheticDetector {
    config: SyntheticConfig,
    teardown_timeout: Duration,
    initialized: bool,
    producer: Option<ProducerThread>,
}

impl SyntheticDetector {
    pub fn new(config: SyntheticConfig, teardown_timeout: Duration) -> Self {
        Self {
            config,
            teardown_timeout,
            initialized: false,
            producer: None,
        }
    }
}

impl DetectorSession for SyntheticDetector {
    /// Synthetic detectors are always available.
    fn init(&mut self) -> Result<()> {
        if self.config.fps == 0 {
            return Err(Error::device(&self.config.device, "fps must be > 0"));
        }
        self.initialized = true;
        log::info!(
            "SyntheticDetector: initialized {} (synthetic)",
            self.config.device
        );
        Ok(())
    }

    fn subscribe(&mut self) -> Result<DetectionStream> {
        if !self.initialized {
            return Err(Error::device(&self.config.device, "subscribe before init"));
        }
        let (tx, stream) = DetectionStream::channel();
        let config = self.config.clone();
        let frame_interval = Duration::from_secs(1) / config.fps;
        let producer = ProducerThread::spawn(&self.config.device, move |stop| {
            let mut frame = 0u64;
            while !stop.load(Ordering::SeqCst) {
                if tx.send(config.batch_for_frame(frame)).is_err() {
                    break;
                }
                frame += 1;
                std::thread::sleep(frame_interval);
            }
        })?;
        self.producer = Some(producer);
        Ok(stream)
    }

    fn destroy(&mut self) -> Result<()> {
        self.initialized = false;
        match self.producer.as_mut() {
            Some(producer) => producer.stop(self.teardown_timeout),
            None => Ok(()),
        }
    }
}
