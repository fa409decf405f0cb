//! Server configuration loading from file and environment variables.

use callbridge_voice::SpeechConfig;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Realtime speech provider settings.
    #[serde(default)]
    pub speech: SpeechConfig,

    /// Evaluation collaborator settings.
    #[serde(default)]
    pub evaluation: EvaluationConfig,

    /// Session lifetime limits.
    #[serde(default)]
    pub sessions: SessionLimits,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "callbridge_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Where finished transcripts are submitted.
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationConfig {
    /// Base URL of the evaluation service. Unset disables submission.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_evaluation_timeout_secs")]
    pub timeout_secs: u64,
}

/// Bounds enforced by the session reaper. Zero disables a limit.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SessionLimits {
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_evaluation_timeout_secs() -> u64 {
    30
}

fn default_max_duration_secs() -> u64 {
    3600
}

fn default_idle_timeout_secs() -> u64 {
    120
}

fn default_sweep_interval_secs() -> u64 {
    15
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_evaluation_timeout_secs(),
        }
    }
}

impl EvaluationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_duration_secs: default_max_duration_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl SessionLimits {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// `true` when at least one limit is enforced.
    pub fn enabled(&self) -> bool {
        self.max_duration_secs > 0 || self.idle_timeout_secs > 0
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `CALLBRIDGE_HOST` overrides `server.host`
/// - `CALLBRIDGE_PORT` (or `PORT`) overrides `server.port`
/// - `CALLBRIDGE_LOG_LEVEL` overrides `logging.level`
/// - `CALLBRIDGE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `GEMINI_API_KEY` overrides `speech.api_key`
/// - `GEMINI_MODEL` overrides `speech.model`
/// - `LITMUS_API_URL` overrides `evaluation.base_url`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("CALLBRIDGE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("CALLBRIDGE_PORT").or_else(|| var("PORT")) {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(level) = var("CALLBRIDGE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("CALLBRIDGE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(key) = var("GEMINI_API_KEY").filter(|v| !v.trim().is_empty()) {
        config.speech.api_key = key;
    }
    if let Some(model) = var("GEMINI_MODEL").filter(|v| !v.trim().is_empty()) {
        config.speech.model = model;
    }
    if let Some(url) = var("LITMUS_API_URL") {
        config.evaluation.base_url = Some(url);
    }
    if config
        .evaluation
        .base_url
        .as_deref()
        .is_some_and(|url| url.trim().is_empty())
    {
        config.evaluation.base_url = None;
    }
}
