//! Agent configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/framecast/agent.toml`
//! - Windows: `%APPDATA%/framecast/agent.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// HTTP port for the frame server (0 = auto-assign).
    #[serde(default)]
    pub server_port: u16,

    /// Answer each request with one JPEG instead of a multipart stream.
    #[serde(default)]
    pub single_frame: bool,

    /// Start serving as soon as the agent is up.
    #[serde(default = "default_true")]
    pub auto_start: bool,

    /// Directory holding the `.jpg` / `.jpeg` frames to play.
    #[serde(default = "default_frames_dir")]
    pub frames_dir: PathBuf,

    /// Frames per second taken from `frames_dir`.
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,

    /// Interface to bind (`0.0.0.0` = all).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Serve every viewer on its own task. When `false`, one connection is
    /// served at a time.
    #[serde(default = "default_true")]
    pub concurrent_connections: bool,
}

fn default_true() -> bool {
    true
}

fn default_frames_dir() -> PathBuf {
    PathBuf::from("frames")
}

fn default_frame_rate() -> u32 {
    30
}

fn default_bind_address() -> String {
    "0.0.0.0".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 0,
            single_frame: false,
            auto_start: default_true(),
            frames_dir: default_frames_dir(),
            frame_rate: default_frame_rate(),
            bind_address: default_bind_address(),
            concurrent_connections: default_true(),
        }
    }
}

impl Config {
    /// Loads configuration from the platform path, creating a default file
    /// if none exists.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Loads configuration from `path`, creating a default file if missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            tracing::info!(path = %path.display(), "default configuration written");
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("framecast")
            .join("agent.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("framecast").join("agent.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/framecast/agent.toml"))
    }
}
