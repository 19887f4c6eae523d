use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::manager::SessionConfig;
use crate::reactor::ReactorConfig;

const DEFAULT_AUDIO_DIR: &str = "audio";
const DEFAULT_AUDIO_EXTENSION: &str = "mp3";
const DEFAULT_TARGET_LABEL: &str = crate::reactor::DEFAULT_TARGET_LABEL;
const DEFAULT_GRACE_MS: u64 = 2000;
const DEFAULT_DEVICE: &str = "stub://camera0";
const DEFAULT_POLL_MS: u64 = 500;
const DEFAULT_TEARDOWN_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Deserialize, Default)]
struct PresencedConfigFile {
    audio: Option<AudioConfigFile>,
    target_label: Option<String>,
    grace_ms: Option<u64>,
    player: Option<PlayerConfigFile>,
    devices: Option<DevicesConfigFile>,
    teardown_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct AudioConfigFile {
    dir: Option<PathBuf>,
    extension: Option<String>,
    case_sensitive: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct PlayerConfigFile {
    command: Option<String>,
    args: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct DevicesConfigFile {
    paths: Option<Vec<String>>,
    poll_ms: Option<u64>,
    require_at_startup: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct PresencedConfig {
    pub audio: AudioSettings,
    pub target_label: String,
    pub grace: Duration,
    pub player: PlayerSettings,
    pub devices: DeviceSettings,
    pub teardown_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AudioSettings {
    pub dir: PathBuf,
    pub extension: String,
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PlayerSettings {
    /// Explicit player program; discovered on PATH when unset.
    pub command: Option<String>,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DeviceSettings {
    pub paths: Vec<String>,
    pub poll_interval: Duration,
    /// Exit at startup when none of the configured devices is present.
    pub require_at_startup: bool,
}

impl PresencedConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PRESENCE_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load with an explicit config file path (e.g. from the command line)
    /// instead of `PRESENCE_CONFIG`. Environment overrides still apply.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PresencedConfigFile) -> Self {
        let audio = AudioSettings {
            dir: file
                .audio
                .as_ref()
                .and_then(|audio| audio.dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_AUDIO_DIR)),
            extension: file
                .audio
                .as_ref()
                .and_then(|audio| audio.extension.clone())
                .unwrap_or_else(|| DEFAULT_AUDIO_EXTENSION.to_string()),
            case_sensitive: file
                .audio
                .and_then(|audio| audio.case_sensitive)
                .unwrap_or(true),
        };
        let player = PlayerSettings {
            command: file.player.as_ref().and_then(|player| player.command.clone()),
            args: file
                .player
                .and_then(|player| player.args)
                .unwrap_or_default(),
        };
        let devices = DeviceSettings {
            paths: file
                .devices
                .as_ref()
                .and_then(|devices| devices.paths.clone())
                .unwrap_or_else(|| vec![DEFAULT_DEVICE.to_string()]),
            poll_interval: Duration::from_millis(
                file.devices
                    .as_ref()
                    .and_then(|devices| devices.poll_ms)
                    .unwrap_or(DEFAULT_POLL_MS),
            ),
            require_at_startup: file
                .devices
                .and_then(|devices| devices.require_at_startup)
                .unwrap_or(false),
        };
        Self {
            audio,
            target_label: file
                .target_label
                .unwrap_or_else(|| DEFAULT_TARGET_LABEL.to_string()),
            grace: Duration::from_millis(file.grace_ms.unwrap_or(DEFAULT_GRACE_MS)),
            player,
            devices,
            teardown_timeout: Duration::from_millis(
                file.teardown_timeout_ms
                    .unwrap_or(DEFAULT_TEARDOWN_TIMEOUT_MS),
            ),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("PRESENCE_AUDIO_DIR") {
            if !dir.trim().is_empty() {
                self.audio.dir = PathBuf::from(dir);
            }
        }
        if let Ok(ext) = std::env::var("PRESENCE_AUDIO_EXT") {
            if !ext.trim().is_empty() {
                self.audio.extension = ext.trim().to_string();
            }
        }
        if let Ok(label) = std::env::var("PRESENCE_TARGET_LABEL") {
            if !label.trim().is_empty() {
                self.target_label = label.trim().to_string();
            }
        }
        if let Ok(player) = std::env::var("PRESENCE_PLAYER") {
            if !player.trim().is_empty() {
                self.player.command = Some(player.trim().to_string());
            }
        }
        if let Ok(devices) = std::env::var("PRESENCE_DEVICES") {
            let parsed = split_csv(&devices);
            if !parsed.is_empty() {
                self.devices.paths = parsed;
            }
        }
        if let Some(ms) = env_millis("PRESENCE_GRACE_MS")? {
            self.grace = ms;
        }
        if let Some(ms) = env_millis("PRESENCE_POLL_MS")? {
            self.devices.poll_interval = ms;
        }
        if let Some(ms) = env_millis("PRESENCE_TEARDOWN_TIMEOUT_MS")? {
            self.teardown_timeout = ms;
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        self.audio.extension = self.audio.extension.trim_start_matches('.').to_string();
        if self.audio.extension.is_empty() {
            return Err(anyhow!("audio extension must not be empty"));
        }
        if self.target_label.trim().is_empty() {
            return Err(anyhow!("target label must not be empty"));
        }
        if self.grace.is_zero() {
            return Err(anyhow!("grace window must be greater than zero"));
        }
        if self.devices.paths.is_empty() {
            return Err(anyhow!("at least one device path must be configured"));
        }
        if self.devices.poll_interval.is_zero() {
            return Err(anyhow!("device poll interval must be greater than zero"));
        }
        if self.teardown_timeout.is_zero() {
            return Err(anyhow!("teardown timeout must be greater than zero"));
        }
        if let Some(command) = &self.player.command {
            if command.trim().is_empty() {
                self.player.command = None;
            }
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            reactor: ReactorConfig {
                target_label: self.target_label.clone(),
                grace: self.grace,
            },
            teardown_timeout: self.teardown_timeout,
        }
    }
}

fn env_millis(key: &str) -> Result<Option<Duration>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => {
            let ms: u64 = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("{} must be an integer number of milliseconds", key))?;
            Ok(Some(Duration::from_millis(ms)))
        }
        _ => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<PresencedConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path.extension().is_some_and(|ext| ext == "toml");
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
