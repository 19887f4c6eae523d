//! Audio side of the reactor: the playback actuator and the asset catalog.

pub mod actuator;
pub mod assets;

pub use actuator::{Actuator, PlaybackHandle, PlayerCommand, ProcessPlayer, KNOWN_PLAYERS};
pub use assets::{AssetCatalog, AssetSource};
