//! Configuration
//!
//! Loads configuration from a TOML file at
//! `~/.config/stackmirror/config.toml` and auto-generates a default file
//! on first run if missing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub compositor: CompositorConfig,
}

impl Config {
    /// Load configuration from file, or use defaults if it doesn't exist.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            info!("Config file not found at {:?}, using defaults", config_path);
            if let Err(e) = Self::save_default(&config_path) {
                warn!("Failed to create default config file: {}", e);
            }
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Configuration loaded from {:?}", config_path);
        debug!("Config: {:?}", config);
        Ok(config)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("stackmirror");
        Ok(config_dir.join("config.toml"))
    }

    fn save_default(path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let toml_string = toml::to_string_pretty(&Self::default())
            .context("Failed to serialize default config")?;
        fs::write(path, toml_string).context("Failed to write default config file")?;
        info!("Created default config file at {:?}", path);
        Ok(())
    }
}

/// X server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Display to connect to; `None` uses $DISPLAY.
    pub display: Option<String>,
    /// Manual redirection (we own window contents on screen) versus
    /// automatic (the server keeps painting windows itself).
    pub manual_redirect: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            display: None,
            manual_redirect: true,
        }
    }
}

/// Render loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositorConfig {
    /// Frame rate cap for the render loop.
    pub target_fps: u32,
    /// Opacity applied to every window quad.
    pub opacity: f32,
    /// Background clear color (RGB, 0.0 to 1.0).
    pub background: [f32; 3],
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            target_fps: 60,
            opacity: 1.0,
            background: [0.1, 0.1, 0.1],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roundtrips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.compositor.target_fps, config.compositor.target_fps);
        assert!(parsed.connection.manual_redirect);
        assert!(parsed.connection.display.is_none());
    }

    #[test]
    fn test_full_config_parses() {
        let text = r#"
            [connection]
            display = ":1"
            manual_redirect = false

            [compositor]
            target_fps = 30
            opacity = 0.9
            background = [0.0, 0.0, 0.0]
        "#;
        let parsed: Config = toml::from_str(text).unwrap();
        assert_eq!(parsed.connection.display.as_deref(), Some(":1"));
        assert_eq!(parsed.compositor.target_fps, 30);
        assert!((parsed.compositor.opacity - 0.9).abs() < f32::EPSILON);
    }
}
