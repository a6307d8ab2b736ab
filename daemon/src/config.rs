use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::display::{Display, Rect};
use crate::validate_enum;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSettings,

    #[serde(default)]
    pub visibility: VisibilitySettings,

    #[serde(default)]
    pub animation: AnimationSettings,

    #[serde(default)]
    pub headless: HeadlessSettings,
}

/// General daemon settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// auto | wayland | headless
    #[serde(default = "default_auto")]
    pub backend: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            backend: default_auto(),
        }
    }
}

/// Desktop visibility tracking
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VisibilitySettings {
    /// auto | hyprland | none
    #[serde(default = "default_auto")]
    pub probe: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Fraction of a display a window must cover to hide the desktop there
    #[serde(default = "default_coverage_threshold")]
    pub coverage_threshold: f64,

    #[serde(default = "default_wake_settle_ms")]
    pub wake_settle_ms: u64,
}

impl Default for VisibilitySettings {
    fn default() -> Self {
        Self {
            probe: default_auto(),
            poll_interval_ms: default_poll_interval_ms(),
            coverage_threshold: default_coverage_threshold(),
            wake_settle_ms: default_wake_settle_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnimationSettings {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for AnimationSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

/// Displays simulated by the headless backend
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeadlessSettings {
    #[serde(default = "default_headless_displays")]
    pub display: Vec<HeadlessDisplay>,
}

impl Default for HeadlessSettings {
    fn default() -> Self {
        Self {
            display: default_headless_displays(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeadlessDisplay {
    pub name: String,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_auto() -> String {
    "auto".to_string()
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_coverage_threshold() -> f64 {
    0.9
}
fn default_wake_settle_ms() -> u64 {
    1500
}
fn default_tick_interval_ms() -> u64 {
    16
}
fn default_headless_displays() -> Vec<HeadlessDisplay> {
    vec![HeadlessDisplay {
        name: "HEADLESS-1".to_string(),
        x: 0,
        y: 0,
        width: 1920,
        height: 1080,
    }]
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("backdrop");
        Ok(config_dir.join("config.toml"))
    }

    fn validate(&self) -> Result<()> {
        validate_enum!(
            self.general.log_level.as_str(),
            "trace",
            "debug",
            "info",
            "warn",
            "error"
        )?;
        validate_enum!(
            self.general.backend.as_str(),
            "auto",
            "wayland",
            "headless"
        )?;
        validate_enum!(self.visibility.probe.as_str(), "auto", "hyprland", "none")?;

        let threshold = self.visibility.coverage_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            anyhow::bail!(
                "Invalid coverage_threshold: {} (must be in (0, 1])",
                threshold
            );
        }
        if self.visibility.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than zero");
        }
        if self.animation.tick_interval_ms == 0 {
            anyhow::bail!("tick_interval_ms must be greater than zero");
        }
        for display in &self.headless.display {
            if display.width == 0 || display.height == 0 {
                anyhow::bail!("Headless display {} has an empty size", display.name);
            }
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.visibility.poll_interval_ms)
    }

    pub fn wake_settle(&self) -> Duration {
        Duration::from_millis(self.visibility.wake_settle_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.animation.tick_interval_ms)
    }

    pub fn headless_displays(&self) -> Vec<Display> {
        self.headless
            .display
            .iter()
            .map(|d| {
                Display::new(
                    d.name.as_str(),
                    Rect::new(
                        f64::from(d.x),
                        f64::from(d.y),
                        f64::from(d.width),
                        f64::from(d.height),
                    ),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.backend, "auto");
        assert_eq!(config.visibility.probe, "auto");
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.wake_settle(), Duration::from_millis(1500));
        assert_eq!(config.tick_interval(), Duration::from_millis(16));
        assert!((config.visibility.coverage_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.headless_displays().len(), 1);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let toml = r#"
[visibility]
coverage_threshold = 0.75

[[headless.display]]
name = "LEFT"
width = 1280
height = 720

[[headless.display]]
name = "RIGHT"
x = 1280
width = 1920
height = 1080
"#;

        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.visibility.poll_interval_ms, 1000);
        assert!((config.visibility.coverage_threshold - 0.75).abs() < f64::EPSILON);

        let displays = config.headless_displays();
        assert_eq!(displays.len(), 2);
        assert_eq!(displays[1].id.as_str(), "RIGHT");
        assert!((displays[1].geometry.x - 1280.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.general.backend = "x11".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.visibility.probe = "sway".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.general.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.visibility.coverage_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.animation.tick_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.general.backend, "auto");
    }

    #[test]
    fn test_load_invalid_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[general]\nbackend = \"x11\"\n").unwrap();
        assert!(Config::load_from_path(&path).is_err());
    }
}
