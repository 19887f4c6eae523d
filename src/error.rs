//! Error taxonomy shared by the reactor, the actuator and device sessions.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The asset catalog had no eligible items at selection time.
    #[error("no audio assets available in {}", .dir.display())]
    NoAssetsAvailable { dir: PathBuf },

    /// The audio actuator could not start (or stop) playback.
    #[error("actuation failed: {0}")]
    ActuationFailed(String),

    /// Detector init/destroy or connection close failed.
    #[error("device {device}: {message}")]
    Device { device: String, message: String },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn device(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Device {
            device: device.into(),
            message: message.into(),
        }
    }

    /// True for failures that count against a clean shutdown.
    pub fn is_device_error(&self) -> bool {
        matches!(self, Self::Device { .. })
    }
}
