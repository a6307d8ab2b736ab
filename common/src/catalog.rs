//! Persisted wallpaper catalog.
//!
//! One JSON document holds the known wallpapers, the display assignments and
//! the playback settings. The daemon writes it after every successful
//! command; the client only reads it (for `status`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::{BackdropError, ContentKind};

/// A wallpaper known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WallpaperRef {
    pub id: String,
    pub name: String,
    pub kind: ContentKind,
    pub path: PathBuf,
}

/// One display → wallpaper entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayAssignment {
    pub display: String,
    pub wallpaper_id: String,
}

/// Persisted playback settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub always_on: bool,

    #[serde(default = "default_true")]
    pub auto_resize: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            always_on: false,
            auto_resize: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    wallpapers: BTreeMap<String, WallpaperRef>,

    #[serde(default)]
    assignments: BTreeMap<String, String>,

    #[serde(default)]
    settings: Settings,
}

#[derive(Debug)]
pub struct Catalog {
    path: PathBuf,
    data: CatalogFile,
}

impl Catalog {
    /// Load the catalog at `path`. A missing file yields an empty catalog.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, BackdropError> {
        let path = path.into();

        let data = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                BackdropError::Catalog(format!("failed to parse {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CatalogFile::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn resolve(&self, id: &str) -> Option<&WallpaperRef> {
        self.data.wallpapers.get(id)
    }

    /// Return the record for `path`, creating it on first use.
    pub fn register(&mut self, path: &Path) -> Result<WallpaperRef, BackdropError> {
        let path = path.canonicalize().map_err(|e| {
            BackdropError::Catalog(format!("cannot open {}: {}", path.display(), e))
        })?;

        if let Some(existing) = self.data.wallpapers.values().find(|w| w.path == path) {
            return Ok(existing.clone());
        }

        let kind = ContentKind::from_path(&path).ok_or_else(|| {
            BackdropError::Catalog(format!("unsupported content type: {}", path.display()))
        })?;

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "wallpaper".to_string());

        let wallpaper = WallpaperRef {
            id: wallpaper_id(&path),
            name,
            kind,
            path,
        };

        self.data
            .wallpapers
            .insert(wallpaper.id.clone(), wallpaper.clone());
        self.save()?;

        Ok(wallpaper)
    }

    /// Record (or with `None`, remove) the wallpaper shown on `display`.
    pub fn persist_assignment(
        &mut self,
        display: &str,
        wallpaper_id: Option<&str>,
    ) -> Result<(), BackdropError> {
        match wallpaper_id {
            Some(id) => {
                self.data
                    .assignments
                    .insert(display.to_string(), id.to_string());
            }
            None => {
                if self.data.assignments.remove(display).is_none() {
                    return Ok(());
                }
            }
        }
        self.save()
    }

    pub fn clear_assignments(&mut self) -> Result<(), BackdropError> {
        if self.data.assignments.is_empty() {
            return Ok(());
        }
        self.data.assignments.clear();
        self.save()
    }

    pub fn list_assignments(&self) -> Vec<DisplayAssignment> {
        self.data
            .assignments
            .iter()
            .map(|(display, id)| DisplayAssignment {
                display: display.clone(),
                wallpaper_id: id.clone(),
            })
            .collect()
    }

    pub fn settings(&self) -> Settings {
        self.data.settings
    }

    pub fn persist_settings(&mut self, settings: Settings) -> Result<(), BackdropError> {
        if self.data.settings == settings {
            return Ok(());
        }
        self.data.settings = settings;
        self.save()
    }

    /// Write via a sibling temp file and rename so readers never see a torn file.
    fn save(&self) -> Result<(), BackdropError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_vec_pretty(&self.data)
            .map_err(|e| BackdropError::Catalog(e.to_string()))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// 64-bit FNV-1a of the canonical path bytes, so ids survive toolchain
/// upgrades.
fn wallpaper_id(path: &Path) -> String {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let hash = path
        .as_os_str()
        .as_bytes()
        .iter()
        .fold(OFFSET_BASIS, |hash, byte| {
            (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
        });
    format!("{:016x}", hash)
}
