//! Presence Player
//!
//! Plays a random audio clip while a camera sees someone, and stops once they
//! have been gone for a grace window.
//!
//! # Architecture
//!
//! The daemon keeps three guarantees:
//!
//! 1. **No Flicker**: a dropped detection frame never stops playback; only a
//!    sustained absence longer than the grace window does.
//! 2. **No Restart**: repeated detections never interrupt or restart the clip
//!    that is already playing.
//! 3. **No Orphaned Audio**: every attached device is torn down (audio stopped,
//!    detector destroyed, connection closed) before the process exits.
//!
//! # Module Structure
//!
//! - `detect`: Detection batches and detector sessions (line-delimited JSON, synthetic)
//! - `device`: Device connections and the hot-plug watcher
//! - `audio`: Playback actuator and asset catalog
//! - `reactor`: Debounce state machine
//! - `session` / `manager`: Per-device session lifecycle
//! - `config`: Daemon configuration

pub mod audio;
pub mod config;
pub mod detect;
pub mod device;
pub mod error;
pub mod manager;
pub mod reactor;
pub mod session;

pub use audio::{
    Actuator, AssetCatalog, AssetSource, PlaybackHandle, PlayerCommand, ProcessPlayer,
};
pub use detect::{Detection, DetectionBatch, DetectionStream, DetectorSession, StreamPoll};
pub use device::{
    DeviceConnection, DeviceEvent, DeviceId, LocalDevice, PathWatcher, RescanRequests,
};
pub use error::{Error, Result};
pub use manager::{ManagerEvent, SessionConfig, SessionManager};
pub use reactor::{DebounceReactor, PlaybackState, ReactorConfig, StopTimer};
pub use session::{DeviceSession, TeardownReport};
