//! Configuration loading and defaults.
//!
//! The config file is resolved from (first match wins):
//!
//! 1. `--config <path>` CLI flag
//! 2. `PANEL_CONSOLE_CONFIG` environment variable
//! 3. `panel-console.toml` in the current directory
//! 4. Nothing: compiled defaults with no instances
//!
//! `PANEL_URL` + `PANEL_API_KEY` are applied on top: with no instances
//! configured they define one named `default`; otherwise they override the
//! default instance.
//!
//! ```toml
//! default_instance = "home"
//!
//! [instances.home]
//! url = "https://panel.example.com"
//! api_key = "ptlc_xxxxxxxx"
//!
//! [console]
//! reconnect_delay_secs = 5
//! keepalive_interval_secs = 15
//! connect_timeout_secs = 10
//! request_timeout_secs = 30
//! daemon_marker = "[Pterodactyl Daemon]:"
//! strip_ansi = true
//! scrollback_lines = 1000
//! token_path = "/api/client/servers/{server}/connection-token"
//!
//! [logging]
//! level = "info"
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::reassembly::DEFAULT_DAEMON_MARKER;

/// Looked up in the current directory when no path is given.
pub const CONFIG_FILE_NAME: &str = "panel-console.toml";

/// Name of the instance synthesized from `PANEL_URL` / `PANEL_API_KEY`.
pub const ENV_INSTANCE_NAME: &str = "default";

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Instance used when none is named on the command line.
    pub default_instance: Option<String>,
    /// Panel instances keyed by a user-chosen name.
    #[serde(default)]
    pub instances: BTreeMap<String, InstanceEntry>,
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One panel the user has an account on.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceEntry {
    /// Panel base URL, e.g. `https://panel.example.com`.
    pub url: String,
    /// Client API key used as the Bearer token.
    pub api_key: String,
}

/// Console session tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleConfig {
    /// Fixed delay before the single reconnect attempt after a drop (default 5).
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    /// Keep-alive probe period while disconnected (default 15).
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,
    /// WebSocket handshake timeout (default 10).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Connection-token request timeout (default 30).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Banner prefix the daemon writes without a leading newline.
    /// Empty disables marker splitting.
    #[serde(default = "default_daemon_marker")]
    pub daemon_marker: String,
    /// Remove ANSI escape sequences from console output (default true).
    #[serde(default = "default_strip_ansi")]
    pub strip_ansi: bool,
    /// Lines kept in the visible console log (default 1000).
    #[serde(default = "default_scrollback_lines")]
    pub scrollback_lines: usize,
    /// Connection-token endpoint path; `{server}` is replaced by the server identifier.
    #[serde(default = "default_token_path")]
    pub token_path: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter (default `info`). Overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_reconnect_delay() -> u64 {
    5
}
fn default_keepalive_interval() -> u64 {
    15
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_request_timeout() -> u64 {
    30
}
fn default_daemon_marker() -> String {
    DEFAULT_DAEMON_MARKER.to_string()
}
fn default_strip_ansi() -> bool {
    true
}
fn default_scrollback_lines() -> usize {
    1000
}
fn default_token_path() -> String {
    "/api/client/servers/{server}/connection-token".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: default_reconnect_delay(),
            keepalive_interval_secs: default_keepalive_interval(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            daemon_marker: default_daemon_marker(),
            strip_ansi: default_strip_ansi(),
            scrollback_lines: default_scrollback_lines(),
            token_path: default_token_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ConsoleConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        // A zero period would make tokio's interval panic
        Duration::from_secs(self.keepalive_interval_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// An instance picked out of the config, ready to build clients from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInstance {
    pub name: String,
    pub url: String,
    pub api_key: String,
}

impl Config {
    /// Load the config file (see module docs for the lookup order) and apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = if let Some(p) = path {
            Self::from_file(&expand_tilde(p))?
        } else if let Ok(p) = std::env::var("PANEL_CONSOLE_CONFIG") {
            Self::from_file(&expand_tilde(Path::new(&p)))?
        } else if Path::new(CONFIG_FILE_NAME).exists() {
            Self::from_file(Path::new(CONFIG_FILE_NAME))?
        } else {
            Self::default()
        };

        config.apply_env_overrides(
            std::env::var("PANEL_URL").ok(),
            std::env::var("PANEL_API_KEY").ok(),
        );
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Fold `PANEL_URL` / `PANEL_API_KEY` into the instance table.
    pub fn apply_env_overrides(&mut self, url: Option<String>, api_key: Option<String>) {
        if self.instances.is_empty() {
            if let (Some(url), Some(api_key)) = (url, api_key) {
                self.instances
                    .insert(ENV_INSTANCE_NAME.to_string(), InstanceEntry { url, api_key });
            }
            return;
        }

        let Some(name) = self.default_instance_name().map(str::to_string) else {
            return;
        };
        if let Some(entry) = self.instances.get_mut(&name) {
            if let Some(url) = url {
                entry.url = url;
            }
            if let Some(api_key) = api_key {
                entry.api_key = api_key;
            }
        }
    }

    /// The configured default, or the only instance if there is exactly one.
    pub fn default_instance_name(&self) -> Option<&str> {
        if let Some(d) = self.default_instance.as_deref() {
            return Some(d);
        }
        if self.instances.len() == 1 {
            return self.instances.keys().next().map(String::as_str);
        }
        None
    }

    /// Pick an instance by name (or the default) and validate it.
    pub fn instance(&self, name: Option<&str>) -> Result<ResolvedInstance, ConfigError> {
        if self.instances.is_empty() {
            return Err(ConfigError::Invalid(
                "No panel instances configured; add [instances.<name>] or set PANEL_URL and PANEL_API_KEY"
                    .into(),
            ));
        }

        let name = match name.or_else(|| self.default_instance_name()) {
            Some(n) => n,
            None => {
                return Err(ConfigError::Invalid(
                    "Multiple instances configured but no default_instance specified".into(),
                ))
            }
        };

        let entry = self
            .instances
            .get(name)
            .ok_or_else(|| ConfigError::Invalid(format!("Unknown instance: '{name}'")))?;

        if entry.url.is_empty() {
            return Err(ConfigError::Invalid(format!("Instance '{name}' has empty url")));
        }
        if entry.api_key.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "Instance '{name}' has empty api_key"
            )));
        }

        Ok(ResolvedInstance {
            name: name.to_string(),
            url: entry.url.trim_end_matches('/').to_string(),
            api_key: entry.api_key.clone(),
        })
    }
}

/// Expand a leading `~` to `$HOME`.
fn expand_tilde(path: &Path) -> Cow<'_, Path> {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME") {
            return Cow::Owned(PathBuf::from(home).join(rest));
        }
    }
    Cow::Borrowed(path)
}
