//! Detection data model and detector sessions.
//!
//! The vision algorithm itself lives on the camera. This module only
//! consumes its output:
//! - `LineDetector`: newline-delimited JSON batches from a local device node
//! - `SyntheticDetector`: scripted batches for `stub://` devices

pub mod line;
mod result;
pub mod session;
pub mod synthetic;

pub use line::LineDetector;
pub use result::{Detection, DetectionBatch};
pub use session::{DetectionStream, DetectorSession, StreamPoll};
pub use synthetic::{SyntheticConfig, SyntheticDetector};
