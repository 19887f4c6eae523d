//! Audio actuator adapter.
//!
//! Playback is delegated to an external command-line player. Starting spawns
//! the player with the item path as its last argument; stopping kills and
//! reaps it. The adapter never decodes audio itself.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::error::{Error, Result};

/// Start/stop actuator driven by the debounce reactor.
pub trait Actuator: Send {
    /// Opaque handle owned by the caller between `start` and `stop`.
    type Handle: Send;

    fn start(&mut self, item: &Path) -> Result<Self::Handle>;

    /// Best-effort: failures are logged, never returned.
    fn stop(&mut self, handle: Self::Handle);
}

/// Players probed on `PATH` when none is configured, with the arguments that
/// make them play a single file and exit quietly.
pub const KNOWN_PLAYERS: &[(&str, &[&str])] = &[
    ("mplayer", &["-really-quiet"]),
    ("afplay", &[]),
    ("mpg123", &["-q"]),
    ("mpg321", &["-q"]),
    ("play", &["-q"]),
    ("omxplayer", &[]),
    ("aplay", &["-q"]),
    ("cvlc", &["--play-and-exit", "--quiet"]),
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl PlayerCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// First entry of [`KNOWN_PLAYERS`] found on `PATH`.
    pub fn discover() -> Result<Self> {
        for (name, args) in KNOWN_PLAYERS {
            if let Ok(program) = which::which(name) {
                log::info!("using audio player {}", program.display());
                return Ok(Self::new(
                    program,
                    args.iter().map(|arg| arg.to_string()).collect(),
                ));
            }
        }
        let names: Vec<&str> = KNOWN_PLAYERS.iter().map(|(name, _)| *name).collect();
        Err(Error::ActuationFailed(format!(
            "no audio player found on PATH (tried {})",
            names.join(", ")
        )))
    }

    /// Resolve a configured program name against `PATH`.
    pub fn resolve(program: &str, args: Vec<String>) -> Result<Self> {
        let resolved = which::which(program).map_err(|e| {
            Error::ActuationFailed(format!("audio player '{program}' not found: {e}"))
        })?;
        Ok(Self::new(resolved, args))
    }
}

/// A running player process.
#[derive(Debug)]
pub struct PlaybackHandle {
    child: Child,
    item: PathBuf,
}

impl PlaybackHandle {
    pub fn item(&self) -> &Path {
        &self.item
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

#[derive(Clone, Debug)]
pub struct ProcessPlayer {
    command: PlayerCommand,
}

impl ProcessPlayer {
    pub fn new(command: PlayerCommand) -> Self {
        Self { command }
    }
}

impl Actuator for ProcessPlayer {
    type Handle = PlaybackHandle;

    fn start(&mut self, item: &Path) -> Result<PlaybackHandle> {
        let child = Command::new(&self.command.program)
            .args(&self.command.args)
            .arg(item)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                Error::ActuationFailed(format!(
                    "failed to spawn {}: {}",
                    self.command.program.display(),
                    e
                ))
            })?;
        log::debug!("player pid {} started for {}", child.id(), item.display());
        Ok(PlaybackHandle {
            child,
            item: item.to_path_buf(),
        })
    }

    fn stop(&mut self, mut handle: PlaybackHandle) {
        let pid = handle.pid();
        match handle.child.try_wait() {
            Ok(Some(status)) => {
                log::debug!("player pid {} already exited ({})", pid, status);
                return;
            }
            Ok(None) => {}
            Err(e) => log::warn!("player pid {} status check failed: {}", pid, e),
        }
        if let Err(e) = handle.child.kill() {
            log::warn!("failed to kill player pid {}: {}", pid, e);
        }
        if let Err(e) = handle.child.wait() {
            log::warn!("failed to reap player pid {}: {}", pid, e);
        }
    }
}
