mod animation;
mod config;
mod controller;
mod display;
mod events;
mod ipc_server;
mod lifecycle;
mod macros;
mod pidfile;
mod playback;
mod power;
mod surface;
mod video;
mod visibility;

#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use clap::Parser;
use common::{BackdropError, Catalog, RuntimePaths, process};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::controller::Controller;
use crate::events::{ControlEvent, EventReceiver, EventSender};
use crate::lifecycle::{LifecycleManager, PlaybackState};
use crate::pidfile::{Acquire, PidFile};
use crate::playback::MediaPlaybackFactory;
use crate::surface::{HeadlessBackend, SurfaceBackend};
use crate::visibility::{DesktopProbe, NullProbe, Orchestrator, hyprland};

const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "backdropd")]
#[command(about = "Animated wallpaper daemon", long_about = None)]
#[command(version)]
struct Args {
    /// Stay attached to the terminal instead of detaching
    #[arg(short, long)]
    foreground: bool,

    /// Render into memory only, even when a compositor is available
    #[arg(long)]
    headless: bool,

    /// Configuration file
    #[arg(short, long, env = "BACKDROP_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // The log level lives in the config, so load it before the logger.
    let loaded = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };
    let (config, config_error) = match loaded {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.general.log_level.as_str()),
    )
    .init();

    if let Some(e) = config_error {
        log::warn!("Failed to load config: {:#}. Using defaults.", e);
    }

    let paths = RuntimePaths::from_env();
    if args.foreground {
        run_foreground(args, config, paths).await
    } else {
        detach(&args, &paths).await
    }
}

/// Re-launch ourselves in the background and wait for the pid file.
async fn detach(args: &Args, paths: &RuntimePaths) -> Result<()> {
    if let Some(pid) = process::running_pid(&paths.pid_file) {
        log::info!("backdropd already running (pid {})", pid);
        return Ok(());
    }

    let exe = std::env::current_exe().context("Failed to locate backdropd executable")?;
    let mut child_args = vec!["--foreground".to_string()];
    if args.headless {
        child_args.push("--headless".to_string());
    }
    if let Some(config) = &args.config {
        child_args.push("--config".to_string());
        child_args.push(config.display().to_string());
    }
    let argv: Vec<&str> = child_args.iter().map(String::as_str).collect();

    process::spawn_detached(&exe, &argv).context("Failed to spawn backdropd")?;

    if wait_for_witness(&paths.pid_file, STARTUP_TIMEOUT).await {
        log::info!("backdropd started");
        Ok(())
    } else {
        Err(BackdropError::StartupFailure(STARTUP_TIMEOUT).into())
    }
}

async fn wait_for_witness(pid_file: &Path, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if process::is_running(pid_file) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(process::POLL_INTERVAL).await;
    }
}

async fn run_foreground(args: Args, config: Config, paths: RuntimePaths) -> Result<()> {
    log::info!("Starting backdropd v{}", env!("CARGO_PKG_VERSION"));

    let mut pid_file = match PidFile::acquire(&paths.pid_file)? {
        Acquire::Acquired(pid_file) => pid_file,
        Acquire::AlreadyRunning(Some(pid)) => {
            log::info!("backdropd already running (pid {}), exiting", pid);
            return Ok(());
        }
        Acquire::AlreadyRunning(None) => {
            log::info!("Another backdropd is starting, exiting");
            return Ok(());
        }
    };
    log::debug!("Pid file: {}", pid_file.path().display());

    let result = serve(args.headless, config, &paths).await;

    ipc_server::unbind(&paths.socket);
    pid_file.release();
    log::info!("Daemon shutting down");
    result
}

async fn serve(headless: bool, config: Config, paths: &RuntimePaths) -> Result<()> {
    let catalog = Catalog::open(common::paths::catalog_path()).context("Failed to open catalog")?;
    log::info!("Catalog: {}", catalog.path().display());

    let (events_tx, events_rx) = events::channel();
    let listener = ipc_server::bind(&paths.socket)?;

    let mut tasks = vec![
        tokio::spawn(ipc_server::serve(listener, events_tx.clone())),
        tokio::spawn(forward_signals(events_tx.clone())),
        tokio::spawn(poll_visibility(events_tx.clone(), config.poll_interval())),
    ];
    if uses_hyprland(&config) {
        tasks.push(tokio::spawn(hyprland::listen(events_tx.clone())));
    }
    power::spawn_power_monitor(events_tx.clone());

    let control = tokio::task::spawn_blocking(move || {
        run_control(headless, &config, catalog, events_tx, events_rx)
    });
    let result = control.await.context("Control thread panicked")?;

    for task in tasks {
        task.abort();
    }
    result
}

async fn forward_signals(events: EventSender) {
    use tokio::signal::unix::{SignalKind, signal};

    let handlers = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::hangup()),
    );
    let (mut sigterm, mut sigint, mut sighup) = match handlers {
        (Ok(term), Ok(int), Ok(hup)) => (term, int, hup),
        _ => {
            log::error!("Failed to set up signal handlers");
            return;
        }
    };

    // Keep listening: a second signal during teardown must stay harmless.
    loop {
        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
            _ = sighup.recv() => "SIGHUP",
        };
        emit_or_return!(events, ControlEvent::Shutdown(name));
    }
}

async fn poll_visibility(events: EventSender, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        emit_or_return!(events, ControlEvent::VisibilityPoll);
    }
}

fn uses_hyprland(config: &Config) -> bool {
    match config.visibility.probe.as_str() {
        "hyprland" => true,
        "auto" => hyprland::is_available(),
        _ => false,
    }
}

fn select_probe(config: &Config) -> Box<dyn DesktopProbe> {
    if uses_hyprland(config) {
        Box::new(hyprland::HyprlandProbe)
    } else {
        Box::new(NullProbe)
    }
}

/// Runs on a blocking thread: picks the backend and owns it until exit.
fn run_control(
    headless: bool,
    config: &Config,
    catalog: Catalog,
    events_tx: EventSender,
    events_rx: EventReceiver,
) -> Result<()> {
    let backend = config.general.backend.as_str();
    let wants_wayland = !headless
        && (backend == "wayland"
            || (backend == "auto" && std::env::var_os("WAYLAND_DISPLAY").is_some()));

    #[cfg(feature = "wayland")]
    if wants_wayland {
        match surface::wayland::WaylandBackend::connect() {
            Ok(wayland) => return drive(wayland, config, catalog, events_tx, events_rx),
            Err(e) if backend == "wayland" => return Err(e),
            Err(e) => log::warn!("Wayland unavailable ({:#}), using headless backend", e),
        }
    }

    #[cfg(not(feature = "wayland"))]
    if wants_wayland {
        log::warn!("Built without Wayland support, using headless backend");
    }

    log::info!("Using headless backend");
    drive(
        HeadlessBackend::new(config.headless_displays()),
        config,
        catalog,
        events_tx,
        events_rx,
    )
}

fn drive<B: SurfaceBackend>(
    backend: B,
    config: &Config,
    catalog: Catalog,
    events_tx: EventSender,
    events_rx: EventReceiver,
) -> Result<()> {
    let state = PlaybackState::from_settings(catalog.settings());
    let factory = MediaPlaybackFactory::new(events_tx, config.tick_interval());
    let manager = LifecycleManager::new(backend, Box::new(factory), state);
    let orchestrator = Orchestrator::new(
        select_probe(config),
        config.visibility.coverage_threshold,
        config.wake_settle(),
    );

    let mut controller = Controller::new(
        catalog,
        manager,
        orchestrator,
        events_rx,
        config.tick_interval(),
    );
    controller.run()
}
