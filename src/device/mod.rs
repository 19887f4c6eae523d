//! Hot-pluggable camera devices.
//!
//! A device connection hands out one detector session and is closed after
//! that session is destroyed. Attach/detach notifications come from a
//! [`PathWatcher`].

pub mod local;
pub mod watcher;

pub use local::LocalDevice;
pub use watcher::{PathWatcher, RescanRequests, WatcherHandle};

use std::fmt;

use crate::detect::DetectorSession;
use crate::error::Result;

/// Stable identifier of an attached device (its path or `stub://` name).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One attached hardware resource.
pub trait DeviceConnection: Send {
    fn id(&self) -> &DeviceId;

    /// Acquire the detector session for this device. Not yet initialized.
    fn open_detector(&mut self) -> Result<Box<dyn DetectorSession>>;

    /// Release the device. Called after the detector session is destroyed.
    fn close_connection(&mut self) -> Result<()>;
}

pub enum DeviceEvent {
    Attached(Box<dyn DeviceConnection>),
    Detached(DeviceId),
}

impl fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attached(conn) => f.debug_tuple("Attached").field(conn.id()).finish(),
            Self::Detached(id) => f.debug_tuple("Detached").field(id).finish(),
        }
    }
}
