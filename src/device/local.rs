use std::path::Path;
use std::time::Duration;

use super::{DeviceConnection, DeviceId};
use crate::detect::{DetectorSession, LineDetector, SyntheticConfig, SyntheticDetector};
use crate::error::{Error, Result};

pub const STUB_SCHEME: &str = "stub://";

/// A camera reachable through a local path.
///
/// `stub://` paths yield a synthetic detector; anything else is treated as a
/// device node emitting line-delimited detection batches.
pub struct LocalDevice {
    id: DeviceId,
    teardown_timeout: Duration,
    synthetic: Option<SyntheticConfig>,
    detector_opened: bool,
    closed: bool,
}

impl LocalDevice {
    pub fn new(path: &str, teardown_timeout: Duration) -> Self {
        let synthetic = path.starts_with(STUB_SCHEME).then(|| SyntheticConfig {
            device: path.to_string(),
            ..SyntheticConfig::default()
        });
        Self {
            id: DeviceId::new(path),
            teardown_timeout,
            synthetic,
            detector_opened: false,
            closed: false,
        }
    }

    /// Override the synthetic script (only meaningful for `stub://` paths).
    pub fn with_synthetic(mut self, config: SyntheticConfig) -> Self {
        if self.synthetic.is_some() {
            self.synthetic = Some(SyntheticConfig {
                device: self.id.as_str().to_string(),
                ..config
            });
        }
        self
    }

    pub fn is_synthetic(&self) -> bool {
        self.synthetic.is_some()
    }
}

/// Whether a configured device path is currently present.
pub fn is_present(path: &str) -> bool {
    path.starts_with(STUB_SCHEME) || Path::new(path).exists()
}

impl DeviceConnection for LocalDevice {
    fn id(&self) -> &DeviceId {
        &self.id
    }

    fn open_detector(&mut self) -> Result<Box<dyn DetectorSession>> {
        if self.closed {
            return Err(Error::device(self.id.as_str(), "connection already closed"));
        }
        if self.detector_opened {
            return Err(Error::device(self.id.as_str(), "detector already opened"));
        }
        self.detector_opened = true;
        let detector: Box<dyn DetectorSession> = match &self.synthetic {
            Some(config) => Box::new(SyntheticDetector::new(
                config.clone(),
                self.teardown_timeout,
            )),
            None => Box::new(LineDetector::new(self.id.as_str(), self.teardown_timeout)),
        };
        Ok(detector)
    }

    fn close_connection(&mut self) -> Result<()> {
        if self.closed {
            log::debug!("device {} already closed", self.id);
            return Ok(());
        }
        self.closed = true;
        log::info!("device {} connection closed", self.id);
        Ok(())
    }
}
