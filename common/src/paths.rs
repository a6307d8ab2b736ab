//! Filesystem locations shared by client and daemon.

use std::env;
use std::path::{Path, PathBuf};

/// Overrides the directory holding the socket and pid file.
pub const RUNTIME_DIR_ENV: &str = "BACKDROP_RUNTIME_DIR";
/// Overrides the directory holding the wallpaper catalog.
pub const DATA_DIR_ENV: &str = "BACKDROP_DATA_DIR";

const SOCKET_NAME: &str = "backdrop.sock";
const PID_FILE_NAME: &str = "backdrop.pid";
const CATALOG_NAME: &str = "catalog.json";

/// The two witness files of a running daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    pub socket: PathBuf,
    pub pid_file: PathBuf,
}

impl RuntimePaths {
    /// Locations for the current user, honouring [`RUNTIME_DIR_ENV`].
    pub fn from_env() -> Self {
        Self::in_dir(runtime_dir())
    }

    /// Witness files placed inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            socket: dir.join(SOCKET_NAME),
            pid_file: dir.join(PID_FILE_NAME),
        }
    }
}

/// Per-user runtime directory.
pub fn runtime_dir() -> PathBuf {
    resolve_runtime_dir(
        env::var_os(RUNTIME_DIR_ENV).map(PathBuf::from),
        env::var_os("XDG_RUNTIME_DIR").map(PathBuf::from),
    )
}

fn resolve_runtime_dir(explicit: Option<PathBuf>, xdg: Option<PathBuf>) -> PathBuf {
    explicit
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| xdg.filter(|p| !p.as_os_str().is_empty()))
        .unwrap_or_else(|| {
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/run/user/{}", uid))
        })
}

/// Directory holding the persisted catalog.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = env::var_os(DATA_DIR_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }

    dirs::data_dir()
        .map(|d| d.join("backdrop"))
        .unwrap_or_else(|| runtime_dir().join("backdrop"))
}

pub fn catalog_path() -> PathBuf {
    data_dir().join(CATALOG_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_dir_names() {
        let paths = RuntimePaths::in_dir("/tmp/rt");
        assert_eq!(paths.socket, PathBuf::from("/tmp/rt/backdrop.sock"));
        assert_eq!(paths.pid_file, PathBuf::from("/tmp/rt/backdrop.pid"));
    }

    #[test]
    fn test_explicit_runtime_dir_wins() {
        let dir = resolve_runtime_dir(
            Some(PathBuf::from("/tmp/override")),
            Some(PathBuf::from("/run/user/1000")),
        );
        assert_eq!(dir, PathBuf::from("/tmp/override"));
    }

    #[test]
    fn test_xdg_runtime_dir_used() {
        let dir = resolve_runtime_dir(None, Some(PathBuf::from("/run/user/1000")));
        assert_eq!(dir, PathBuf::from("/run/user/1000"));
    }

    #[test]
    fn test_empty_values_fall_through() {
        let dir = resolve_runtime_dir(Some(PathBuf::new()), None);
        assert!(dir.to_string_lossy().starts_with("/run/user/"));
    }
}
