//! TOML configuration for a shadow session.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working X11 session on `$DISPLAY`:
//!
//! ```toml
//! [display]
//! endpoint = ":1"        # overrides $DISPLAY
//! backend = "auto"       # auto | x11 | wayland
//!
//! [capture]
//! use_shm = true
//! use_damage = true
//! frame_interval_ms = 33
//! full_refresh_interval_ms = 1000
//! duration_secs = 0      # 0 = run until killed
//!
//! [input]
//! enabled = true
//! ```

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub display: DisplayConfig,
    pub capture: CaptureConfig,
    pub input: InputConfig,
}

/// Which windowing system backend to create.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Pick from the session environment.
    #[default]
    Auto,
    X11,
    Wayland,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplayConfig {
    /// Display endpoint, e.g. `":0"`. Falls back to `$DISPLAY`, then `":0"`.
    pub endpoint: Option<String>,
    pub backend: Backend,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    /// Try the MIT-SHM shared pixmap path before falling back to GetImage.
    pub use_shm: bool,
    /// Try the DAMAGE extension before falling back to periodic full refresh.
    pub use_damage: bool,
    pub frame_interval_ms: u64,
    /// Full-screen invalidation cadence when damage events are unavailable.
    pub full_refresh_interval_ms: u64,
    pub duration_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            use_shm: true,
            use_damage: true,
            frame_interval_ms: 33,
            full_refresh_interval_ms: 1000,
            duration_secs: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputConfig {
    /// When false, remote input is accepted and dropped.
    pub enabled: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::parse(&text)?;
        log::debug!("config: loaded {}", path.display());
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.frame_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "capture.frame_interval_ms must be greater than 0".into(),
            ));
        }
        if self.capture.full_refresh_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "capture.full_refresh_interval_ms must be greater than 0".into(),
            ));
        }
        if self.display.endpoint.as_deref() == Some("") {
            return Err(ConfigError::Invalid(
                "display.endpoint must not be empty; omit it to use $DISPLAY".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
