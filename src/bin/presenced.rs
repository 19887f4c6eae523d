//! presenced - presence-triggered audio daemon
//!
//! This daemon:
//! 1. Watches the configured camera devices for attach/detach
//! 2. Starts one detector session and debounce reactor per attached camera
//! 3. Plays a random clip while the target label is in view
//! 4. Stops every clip and closes every device on Ctrl-C before exiting

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use presence_player::config::PresencedConfig;
use presence_player::{
    AssetCatalog, AssetSource, DeviceId, ManagerEvent, PathWatcher, PlayerCommand,
    ProcessPlayer, RescanRequests, SessionManager,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Play audio while a camera detects a person"
)]
struct Args {
    /// Config file (JSON, or TOML when the name ends in .toml).
    #[arg(long, env = "PRESENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory of audio clips.
    #[arg(long)]
    audio_dir: Option<PathBuf>,

    /// Grace window in milliseconds before playback stops.
    #[arg(long)]
    grace_ms: Option<u64>,

    /// Camera device path or stub://name. May be repeated.
    #[arg(long = "device")]
    devices: Vec<String>,

    /// Audio player program (discovered on PATH when unset).
    #[arg(long)]
    player: Option<String>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let code = match run() {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            log::error!("presenced failed: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

fn load_config(args: &Args) -> Result<PresencedConfig> {
    let mut cfg = PresencedConfig::load_from(args.config.as_deref())?;
    if let Some(dir) = &args.audio_dir {
        cfg.audio.dir = dir.clone();
    }
    if let Some(ms) = args.grace_ms {
        cfg.grace = std::time::Duration::from_millis(ms);
    }
    if !args.devices.is_empty() {
        cfg.devices.paths = args.devices.clone();
    }
    if let Some(player) = &args.player {
        cfg.player.command = Some(player.clone());
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Returns Ok(false) when teardown reported device errors.
fn run() -> Result<bool> {
    let args = Args::parse();
    let cfg = load_config(&args)?;

    let catalog = AssetCatalog::new(
        &cfg.audio.dir,
        &cfg.audio.extension,
        cfg.audio.case_sensitive,
    );
    if !cfg.audio.dir.is_dir() {
        log::warn!("audio directory {} does not exist", cfg.audio.dir.display());
    } else if catalog.eligible().is_empty() {
        log::warn!(
            "no .{} files in {} yet; playback starts once some are added",
            cfg.audio.extension,
            cfg.audio.dir.display()
        );
    }
    let assets: Arc<dyn AssetSource> = Arc::new(catalog);

    let player = match &cfg.player.command {
        Some(command) => PlayerCommand::resolve(command, cfg.player.args.clone())?,
        None => PlayerCommand::discover()?,
    };

    let watcher = PathWatcher::new(
        cfg.devices.paths.clone(),
        cfg.devices.poll_interval,
        cfg.teardown_timeout,
    )?
    .with_synthetic_label(&cfg.target_label);
    if watcher.present_paths().is_empty() {
        if cfg.devices.require_at_startup {
            return Err(anyhow!(
                "no camera present at startup (looked for {})",
                cfg.devices.paths.join(", ")
            ));
        }
        log::info!("waiting for a camera to be attached...");
    }

    let rescan = RescanRequests::default();
    let (tx, rx) = mpsc::channel();
    let interrupt_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(ManagerEvent::Interrupt);
    })
    .context("error setting Ctrl-C handler")?;

    let mut manager = SessionManager::new(
        cfg.session_config(),
        assets,
        move |_id: &DeviceId| ProcessPlayer::new(player.clone()),
        tx.clone(),
    )
    .with_rescan_requests(rescan.clone());
    let watcher_handle = watcher.with_rescan_requests(rescan).spawn(tx)?;

    log::info!(
        "presenced running. label={} grace={:?} audio_dir={} devices={}",
        cfg.target_label,
        cfg.grace,
        cfg.audio.dir.display(),
        cfg.devices.paths.join(",")
    );

    let report = manager.run(rx);

    if let Err(e) = watcher_handle.stop() {
        log::warn!("device watcher: {}", e);
    }

    if report.has_device_errors() {
        log::error!(
            "shutdown finished with {} device error(s)",
            report.errors.len()
        );
        return Ok(false);
    }
    log::info!("shutdown complete");
    Ok(true)
}
