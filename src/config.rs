//! Optional TOML configuration, loaded from `~/.ptywrap/config.toml`.
//!
//! Everything has a default; the file only exists for users who want to
//! change one. Command-line flags override whatever the file says.
//!
//! ```toml
//! # Default TERM for the child (Unix)
//! term = "xterm-256color"
//!
//! # Fallback window size when stdout is not a terminal
//! cols = 80
//! rows = 24
//!
//! # Pause after forwarding a lone ESC to the pseudo-console (Windows)
//! escape_delay_ms = 20
//!
//! # How long teardown waits for the relay to wind down
//! grace_period_ms = 2000
//! ```

use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// TERM value exported to the child.
    pub term: Option<String>,
    /// Fallback columns when no controlling terminal reports a size.
    pub cols: u16,
    /// Fallback rows.
    pub rows: u16,
    /// Inbound ESC pacing delay, milliseconds.
    pub escape_delay_ms: u64,
    /// Relay teardown grace period, milliseconds.
    pub grace_period_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            term: None,
            cols: 80,
            rows: 24,
            escape_delay_ms: 20,
            grace_period_ms: 2000,
        }
    }
}

impl Config {
    /// Load the config file if present, defaults otherwise. A malformed
    /// file is reported and ignored rather than refusing to start.
    pub fn load() -> Self {
        let Some(path) = config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!("ignoring malformed {}: {e}", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                warn!("could not read {}: {e}", path.display());
                Self::default()
            }
        }
    }
}

fn config_path() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".ptywrap").join("config.toml"))
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.cols, 80);
        assert_eq!(config.rows, 24);
        assert_eq!(config.escape_delay_ms, 20);
        assert_eq!(config.grace_period_ms, 2000);
        assert!(config.term.is_none());
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let config: Config = toml::from_str("term = \"vt100\"\ncols = 132\n").unwrap();
        assert_eq!(config.term.as_deref(), Some("vt100"));
        assert_eq!(config.cols, 132);
        assert_eq!(config.rows, 24);
        assert_eq!(config.grace_period_ms, 2000);
    }

    #[test]
    fn unknown_keys_are_tolerated() {
        let config: Config = toml::from_str("rows = 50\nshiny = true\n").unwrap();
        assert_eq!(config.rows, 50);
    }
}
