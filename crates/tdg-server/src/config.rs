//! Server configuration: TOML file + environment + CLI overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;
use tdg_core::TdgResult;

/// Top-level config file structure.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub upstream: UpstreamSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// `[upstream]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSection {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub transform: bool,
    #[serde(default)]
    pub proxy: bool,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            rest_url: default_rest_url(),
            api_key: None,
            api_secret: None,
            agent: None,
            transform: false,
            proxy: false,
        }
    }
}

fn default_port() -> u16 {
    23521
}
fn default_ws_url() -> String {
    "wss://api.bitfinex.com/ws/2".to_string()
}
fn default_rest_url() -> String {
    "https://api-pub.bitfinex.com".to_string()
}

/// Resolved server configuration (CLI and environment overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub upstream: UpstreamConfig,
}

/// Settings for the connections to the upstream venue.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub ws_url: String,
    pub rest_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub agent: Option<String>,
    pub transform: bool,
    pub proxy: bool,
}

impl UpstreamConfig {
    /// API credentials, when both halves are present and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let key = self.api_key.as_deref().filter(|k| !k.is_empty())?;
        let secret = self.api_secret.as_deref().filter(|s| !s.is_empty())?;
        Some((key, secret))
    }
}

impl ServerConfig {
    /// Load config from TOML file, then apply environment and CLI overrides.
    ///
    /// Credentials come from the file or from `TDG_API_KEY` /
    /// `TDG_API_SECRET`; the environment wins. They are never logged.
    pub fn load(
        config_path: Option<&Path>,
        cli_port: Option<u16>,
        cli_ws_url: Option<&str>,
        cli_rest_url: Option<&str>,
        cli_transform: bool,
        cli_proxy: bool,
    ) -> TdgResult<Self> {
        // Load base config from file
        let file_config = if let Some(path) = config_path {
            let expanded = expand_tilde(path);
            if expanded.exists() {
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)?;
                toml::from_str::<ConfigFile>(&content).map_err(|e| {
                    tdg_core::TdgError::Config(format!("config parse error: {e}"))
                })?
            } else {
                info!(path = %expanded.display(), "config file not found, using defaults");
                ConfigFile {
                    server: ServerSection::default(),
                    upstream: UpstreamSection::default(),
                }
            }
        } else {
            ConfigFile {
                server: ServerSection::default(),
                upstream: UpstreamSection::default(),
            }
        };

        // Merge CLI overrides
        let port = cli_port.unwrap_or(file_config.server.port);
        let ws_url = cli_ws_url
            .map(|s| s.to_string())
            .unwrap_or(file_config.upstream.ws_url);
        let rest_url = cli_rest_url
            .map(|s| s.to_string())
            .unwrap_or(file_config.upstream.rest_url);

        // Environment wins over the file for credentials
        let api_key = std::env::var("TDG_API_KEY")
            .ok()
            .or(file_config.upstream.api_key);
        let api_secret = std::env::var("TDG_API_SECRET")
            .ok()
            .or(file_config.upstream.api_secret);

        Ok(Self {
            port,
            upstream: UpstreamConfig {
                ws_url,
                rest_url,
                api_key,
                api_secret,
                agent: file_config.upstream.agent,
                transform: cli_transform || file_config.upstream.transform,
                proxy: cli_proxy || file_config.upstream.proxy,
            },
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if s.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&s[2..]);
        }
    }
    PathBuf::from(s)
}
