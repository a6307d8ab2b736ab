//! Common types and utilities for backdrop.
//!
//! This crate defines the shared data structures and the command protocol
//! used between the daemon (`backdropd`) and the client (`backdrop`), plus
//! the helpers both sides need to find and probe a running daemon.
//!
//! # Command protocol
//!
//! A client connects to the daemon's Unix socket, writes one or more
//! [`Command`] records and closes the connection. Every record is a compact
//! JSON object followed by [`COMMAND_TERMINATOR`]. The daemon never replies:
//! delivery is at-most-once and outcomes are observed out of band (for
//! example through `backdrop status`).
//!
//! # Examples
//!
//! ```
//! use common::{Command, DisplayTarget};
//!
//! let cmd = Command::SetWallpaper {
//!     path: "/home/user/loop.gif".into(),
//!     display: DisplayTarget::Index(1),
//! };
//!
//! let record = cmd.encode().unwrap();
//! assert_eq!(record.last(), Some(&common::COMMAND_TERMINATOR));
//! assert_eq!(Command::decode(&record).unwrap(), cmd);
//! ```

pub mod catalog;
pub mod paths;
pub mod process;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub use catalog::{Catalog, DisplayAssignment, Settings, WallpaperRef};
pub use paths::RuntimePaths;

/// Sentinel byte closing every encoded command.
///
/// Compact JSON escapes control characters inside strings, so the byte can
/// never appear inside a payload.
pub const COMMAND_TERMINATOR: u8 = b'\n';

/// Upper bound for a single encoded command, terminator included.
pub const MAX_COMMAND_BYTES: usize = 64 * 1024;

/// Error taxonomy shared by client and daemon.
#[derive(Error, Debug)]
pub enum BackdropError {
    #[error("daemon did not report itself alive within {0:?}")]
    StartupFailure(Duration),

    #[error("daemon is not running")]
    NotRunning,

    #[error("channel error: {0}")]
    Channel(String),

    #[error("malformed command: {0}")]
    MalformedCommand(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BackdropError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for BackdropError {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedCommand(e.to_string())
    }
}

/// Which display(s) a command applies to.
///
/// Indices are 1-based and refer to the daemon's position-sorted list of
/// connected displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayTarget {
    All,
    Index(u32),
}

impl FromStr for DisplayTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }

        match s.parse::<u32>() {
            Ok(0) => Err("display indices start at 1".to_string()),
            Ok(index) => Ok(Self::Index(index)),
            Err(_) => Err(format!(
                "invalid display '{}': expected a number or 'all'",
                s
            )),
        }
    }
}

impl fmt::Display for DisplayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Index(index) => write!(f, "{}", index),
        }
    }
}

/// Commands sent from client to daemon.
///
/// All commands are fire-and-forget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Show a looping video or animated image on the target display(s).
    SetWallpaper {
        /// Path to the content file (absolute)
        path: PathBuf,
        display: DisplayTarget,
    },
    /// Remove the wallpaper from the target display(s).
    UnsetWallpaper { display: DisplayTarget },
    /// Keep playing even when the desktop is covered.
    SetAlwaysOn { enabled: bool },
    /// Fill the display (true) or keep the content's original size (false).
    SetAutoResize { enabled: bool },
    /// Pause playback on every display until an explicit resume.
    Pause,
    /// Resume playback and hand control back to visibility tracking.
    Resume,
    /// Tear down all surfaces and exit the daemon.
    Quit,
}

impl Command {
    /// Serialize into a terminated record ready to be written to the socket.
    pub fn encode(&self) -> Result<Vec<u8>, BackdropError> {
        let mut record = serde_json::to_vec(self)?;
        record.push(COMMAND_TERMINATOR);
        Ok(record)
    }

    /// Parse one record. A trailing terminator is accepted and ignored.
    pub fn decode(record: &[u8]) -> Result<Self, BackdropError> {
        let payload = record
            .strip_suffix(&[COMMAND_TERMINATOR])
            .unwrap_or(record);

        if payload.iter().all(u8::is_ascii_whitespace) {
            return Err(BackdropError::MalformedCommand("empty record".to_string()));
        }

        Ok(serde_json::from_slice(payload)?)
    }
}

/// How a wallpaper's content is played back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentKind {
    /// Decoded by the video pipeline and looped at end of stream.
    LoopingVideo,
    /// Decoded once into frames and driven by the animation timer.
    FrameSequence,
}

impl ContentKind {
    const FRAME_SEQUENCE_EXTENSIONS: &[&str] = &["gif", "apng", "png", "webp"];
    const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "webm", "mkv", "avi", "ogv"];

    /// Detect the content kind from the file extension.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())?;

        if Self::FRAME_SEQUENCE_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::FrameSequence)
        } else if Self::VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::LoopingVideo)
        } else {
            None
        }
    }
}

/// Content-fit policy applied to every surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Scale to cover the whole display, cropping the overflow.
    #[default]
    Fill,
    /// Keep the original size, centered.
    Preserve,
}

impl FitMode {
    pub fn from_auto_resize(auto_resize: bool) -> Self {
        if auto_resize {
            Self::Fill
        } else {
            Self::Preserve
        }
    }
}
