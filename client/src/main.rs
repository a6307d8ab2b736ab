use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use common::process::{self, POLL_INTERVAL};
use common::{BackdropError, Catalog, Command, ContentKind, DisplayTarget, RuntimePaths};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

/// How long `start` and `stop` wait for the pid file to appear or vanish.
const LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(5);

const DAEMON_BINARY: &str = "backdropd";
const DAEMON_ENV: &str = "BACKDROP_DAEMON";

#[derive(Parser)]
#[command(name = "backdrop")]
#[command(about = "Animated wallpaper daemon control", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a looping video or animated image as wallpaper
    Set {
        /// Path to the wallpaper file
        path: PathBuf,

        /// Display index (1-based, left to right), or 'all'
        #[arg(short, long, default_value = "all")]
        display: DisplayTarget,
    },

    /// Remove the wallpaper from a display
    Unset {
        /// Display index (1-based, left to right), or 'all'
        #[arg(short, long, default_value = "all")]
        display: DisplayTarget,
    },

    /// Start the daemon
    Start {
        /// Run the daemon in this terminal instead of detaching
        #[arg(short, long)]
        foreground: bool,
    },

    /// Stop the daemon
    Stop,

    /// Show daemon state and wallpaper assignments
    Status,

    /// Change playback settings
    #[command(group(ArgGroup::new("setting").required(true).multiple(true)))]
    Config {
        /// Keep playing even when windows cover the desktop
        #[arg(long, group = "setting", conflicts_with = "auto_pause")]
        always_on: bool,

        /// Pause while the desktop is covered
        #[arg(long, group = "setting")]
        auto_pause: bool,

        /// Scale content to fill each display
        #[arg(long, group = "setting", conflicts_with = "no_resize")]
        auto_resize: bool,

        /// Show content at its original size, centered
        #[arg(long, group = "setting")]
        no_resize: bool,
    },

    /// Pause playback until `resume`
    Pause,

    /// Resume playback
    Resume,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let paths = RuntimePaths::from_env();

    if let Err(e) = run(cli.command, &paths).await {
        eprintln!("Error: {:#}", e);
        if matches!(
            e.downcast_ref::<BackdropError>(),
            Some(BackdropError::NotRunning)
        ) {
            eprintln!("\nStart the daemon with: backdrop start");
        }
        std::process::exit(1);
    }
}

async fn run(command: Commands, paths: &RuntimePaths) -> Result<()> {
    match command {
        Commands::Set { path, display } => {
            let path = absolute_content_path(&path)?;
            ensure_running(paths).await?;
            send_commands(
                &paths.socket,
                &[Command::SetWallpaper { path, display }],
            )
            .await?;
            println!("✓ Wallpaper sent to display {}", display);
        }
        Commands::Unset { display } => {
            send_commands(&paths.socket, &[Command::UnsetWallpaper { display }]).await?;
            println!("✓ Unset display {}", display);
        }
        Commands::Start { foreground } => {
            if foreground {
                return exec_foreground(paths);
            }
            if let Some(pid) = process::running_pid(&paths.pid_file) {
                println!("✓ Daemon already running (pid {})", pid);
            } else {
                let pid = start_daemon(paths).await?;
                println!("✓ Daemon started (pid {})", pid);
            }
        }
        Commands::Stop => stop_daemon(paths).await?,
        Commands::Status => print_status(paths)?,
        Commands::Config {
            always_on,
            auto_pause,
            auto_resize,
            no_resize,
        } => {
            let commands = config_commands(always_on, auto_pause, auto_resize, no_resize);
            ensure_running(paths).await?;
            send_commands(&paths.socket, &commands).await?;
            println!("✓ Settings sent");
        }
        Commands::Pause => {
            send_commands(&paths.socket, &[Command::Pause]).await?;
            println!("✓ Paused");
        }
        Commands::Resume => {
            send_commands(&paths.socket, &[Command::Resume]).await?;
            println!("✓ Resumed");
        }
    }
    Ok(())
}

/// Translate `config` flags into commands, always-on first.
fn config_commands(
    always_on: bool,
    auto_pause: bool,
    auto_resize: bool,
    no_resize: bool,
) -> Vec<Command> {
    let mut commands = Vec::new();
    if always_on || auto_pause {
        commands.push(Command::SetAlwaysOn { enabled: always_on });
    }
    if auto_resize || no_resize {
        commands.push(Command::SetAutoResize {
            enabled: auto_resize,
        });
    }
    commands
}

/// The daemon only understands absolute paths; reject what it could never play.
fn absolute_content_path(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to read current directory")?
            .join(path)
    };

    if !absolute.is_file() {
        anyhow::bail!("{} does not exist", absolute.display());
    }
    if ContentKind::from_path(&absolute).is_none() {
        anyhow::bail!(
            "{} is not a supported video or animated image",
            absolute.display()
        );
    }
    Ok(absolute)
}

/// Write every command on one connection, in order, then close it.
async fn send_commands(socket: &Path, commands: &[Command]) -> Result<()> {
    let mut stream = UnixStream::connect(socket)
        .await
        .map_err(|e| connect_error(socket, e))?;

    let mut payload = Vec::new();
    for command in commands {
        payload.extend(command.encode()?);
    }

    stream
        .write_all(&payload)
        .await
        .map_err(|e| BackdropError::Channel(e.to_string()))?;
    stream
        .shutdown()
        .await
        .map_err(|e| BackdropError::Channel(e.to_string()))?;

    log::debug!("Sent {} command(s) to {}", commands.len(), socket.display());
    Ok(())
}

fn connect_error(socket: &Path, e: io::Error) -> anyhow::Error {
    match e.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => {
            BackdropError::NotRunning.into()
        }
        _ => anyhow::Error::from(BackdropError::Channel(e.to_string()))
            .context(format!("Failed to connect to {}", socket.display())),
    }
}

async fn ensure_running(paths: &RuntimePaths) -> Result<()> {
    if process::is_running(&paths.pid_file) && paths.socket.exists() {
        return Ok(());
    }
    let pid = start_daemon(paths).await?;
    log::info!("Started daemon (pid {})", pid);
    Ok(())
}

/// Spawn a detached daemon and wait until its pid file and socket exist.
async fn start_daemon(paths: &RuntimePaths) -> Result<i32> {
    let daemon = daemon_binary(
        std::env::var_os(DAEMON_ENV),
        std::env::current_exe().ok(),
    );
    log::debug!("Spawning {}", daemon.display());

    let mut child = process::spawn_detached(&daemon, &["--foreground"])
        .with_context(|| format!("Failed to spawn {}", daemon.display()))?;

    let deadline = Instant::now() + LIFECYCLE_TIMEOUT;
    loop {
        if let Some(pid) = process::running_pid(&paths.pid_file)
            && paths.socket.exists()
        {
            return Ok(pid);
        }

        // The daemon exits 0 when it lost the race to another instance.
        if let Ok(Some(status)) = child.try_wait()
            && !status.success()
        {
            anyhow::bail!("Daemon exited during startup ({})", status);
        }

        if Instant::now() >= deadline {
            return Err(BackdropError::StartupFailure(LIFECYCLE_TIMEOUT).into());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn stop_daemon(paths: &RuntimePaths) -> Result<()> {
    let Some(pid) = process::running_pid(&paths.pid_file) else {
        println!("Daemon is not running");
        return Ok(());
    };

    if let Err(e) = send_commands(&paths.socket, &[Command::Quit]).await {
        log::debug!("Quit not delivered ({:#}), sending SIGTERM", e);
        process::terminate(pid)?;
    }

    let deadline = Instant::now() + LIFECYCLE_TIMEOUT;
    while process::is_running(&paths.pid_file) {
        if Instant::now() >= deadline {
            anyhow::bail!(
                "Daemon (pid {}) still running after {:?}",
                pid,
                LIFECYCLE_TIMEOUT
            );
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    println!("✓ Daemon stopped");
    Ok(())
}

fn print_status(paths: &RuntimePaths) -> Result<()> {
    match process::running_pid(&paths.pid_file) {
        Some(pid) => println!("Daemon: running (pid {})", pid),
        None => println!("Daemon: not running"),
    }

    let catalog = Catalog::open(common::paths::catalog_path())?;
    let settings = catalog.settings();
    println!("Settings:");
    println!(
        "  Playback: {}",
        if settings.always_on {
            "always on"
        } else {
            "pause when covered"
        }
    );
    println!(
        "  Fit: {}",
        if settings.auto_resize {
            "fill display"
        } else {
            "original size"
        }
    );

    let assignments = catalog.list_assignments();
    if assignments.is_empty() {
        println!("Wallpapers: none");
        return Ok(());
    }
    println!("Wallpapers:");
    for assignment in assignments {
        match catalog.resolve(&assignment.wallpaper_id) {
            Some(wallpaper) => println!(
                "  {} -> {} ({})",
                assignment.display,
                wallpaper.name,
                wallpaper.path.display()
            ),
            None => println!(
                "  {} -> unknown wallpaper {}",
                assignment.display, assignment.wallpaper_id
            ),
        }
    }
    Ok(())
}

/// `$BACKDROP_DAEMON`, then a `backdropd` next to this binary, then `$PATH`.
fn daemon_binary(env_override: Option<OsString>, current_exe: Option<PathBuf>) -> PathBuf {
    if let Some(path) = env_override.filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }

    current_exe
        .and_then(|exe| exe.parent().map(|dir| dir.join(DAEMON_BINARY)))
        .filter(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from(DAEMON_BINARY))
}

/// Replace this process with a foreground daemon.
fn exec_foreground(paths: &RuntimePaths) -> Result<()> {
    use std::os::unix::process::CommandExt;

    if let Some(pid) = process::running_pid(&paths.pid_file) {
        println!("✓ Daemon already running (pid {})", pid);
        return Ok(());
    }

    let daemon = daemon_binary(
        std::env::var_os(DAEMON_ENV),
        std::env::current_exe().ok(),
    );
    let err = std::process::Command::new(&daemon).arg("--foreground").exec();
    Err(err).with_context(|| format!("Failed to exec {}", daemon.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_display_defaults_to_all() {
        let cli = Cli::try_parse_from(["backdrop", "set", "/tmp/a.gif"]).unwrap();
        match cli.command {
            Commands::Set { display, .. } => assert_eq!(display, DisplayTarget::All),
            _ => panic!("expected set"),
        }

        let cli = Cli::try_parse_from(["backdrop", "unset", "--display", "2"]).unwrap();
        match cli.command {
            Commands::Unset { display } => assert_eq!(display, DisplayTarget::Index(2)),
            _ => panic!("expected unset"),
        }
    }

    #[test]
    fn test_invalid_display_rejected() {
        assert!(Cli::try_parse_from(["backdrop", "unset", "-d", "0"]).is_err());
        assert!(Cli::try_parse_from(["backdrop", "unset", "-d", "left"]).is_err());
    }

    #[test]
    fn test_config_requires_a_setting() {
        assert!(Cli::try_parse_from(["backdrop", "config"]).is_err());
        assert!(Cli::try_parse_from(["backdrop", "config", "--always-on", "--auto-pause"]).is_err());
        assert!(Cli::try_parse_from(["backdrop", "config", "--auto-resize", "--no-resize"]).is_err());
        assert!(
            Cli::try_parse_from(["backdrop", "config", "--auto-pause", "--no-resize"]).is_ok()
        );
    }

    #[test]
    fn test_config_commands_order() {
        assert_eq!(
            config_commands(false, true, false, true),
            vec![
                Command::SetAlwaysOn { enabled: false },
                Command::SetAutoResize { enabled: false },
            ]
        );
        assert_eq!(
            config_commands(false, false, true, false),
            vec![Command::SetAutoResize { enabled: true }]
        );
        assert_eq!(
            config_commands(true, false, false, false),
            vec![Command::SetAlwaysOn { enabled: true }]
        );
    }

    #[test]
    fn test_daemon_binary_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("backdrop");

        // Nothing next to the client: fall back to $PATH lookup.
        assert_eq!(
            daemon_binary(None, Some(exe.clone())),
            PathBuf::from("backdropd")
        );

        let sibling = dir.path().join("backdropd");
        fs::write(&sibling, b"").unwrap();
        assert_eq!(daemon_binary(None, Some(exe.clone())), sibling);

        assert_eq!(
            daemon_binary(Some(OsString::from("/opt/bd/backdropd")), Some(exe.clone())),
            PathBuf::from("/opt/bd/backdropd")
        );
        assert_eq!(daemon_binary(Some(OsString::new()), Some(exe)), sibling);
    }

    #[test]
    fn test_content_path_validation() {
        let dir = tempfile::tempdir().unwrap();
        let gif = dir.path().join("loop.gif");
        let text = dir.path().join("notes.txt");
        fs::write(&gif, b"GIF89a").unwrap();
        fs::write(&text, b"hi").unwrap();

        assert_eq!(absolute_content_path(&gif).unwrap(), gif);
        assert!(absolute_content_path(&text).is_err());
        assert!(absolute_content_path(&dir.path().join("missing.mp4")).is_err());
    }

    #[tokio::test]
    async fn test_send_without_daemon_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let err = send_commands(&dir.path().join("backdrop.sock"), &[Command::Pause])
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BackdropError>(),
            Some(BackdropError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_send_writes_terminated_records() {
        use tokio::io::AsyncReadExt;

        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("backdrop.sock");
        let listener = tokio::net::UnixListener::bind(&socket).unwrap();

        let commands = config_commands(true, false, false, true);
        let reader = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).await.unwrap();
            buf
        });

        send_commands(&socket, &commands).await.unwrap();
        let received = reader.await.unwrap();

        let records: Vec<Command> = received
            .split_inclusive(|b| *b == common::COMMAND_TERMINATOR)
            .map(|r| Command::decode(r).unwrap())
            .collect();
        assert_eq!(records, commands);
    }
}
