//! Shared configuration for the rackdash service.
//!
//! TOML file with named environment profiles, layered with `RACKDASH_*`
//! environment overrides, and translation to `rackdash_core::EngineConfig`.
//! The core never reads this file; the binary resolves it and hands the
//! result in.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rackdash_core::{DEFAULT_API_BASE, EngineConfig};

/// Prefix for environment overrides. Nested keys use `__`
/// (`RACKDASH_SERVER__BIND`).
pub const ENV_PREFIX: &str = "RACKDASH_";

/// File name of the persisted credential inside the state directory.
pub const CREDENTIAL_FILE: &str = "credential.json";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("environment '{name}' is not defined")]
    UnknownEnvironment { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Name of the profile in `environments` to use.
    pub environment: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Tokens older than this are reported stale.
    #[serde(default = "default_token_max_age")]
    pub token_max_age_hours: u64,

    /// Keep devices the upstream reports as disconnected.
    #[serde(default)]
    pub include_disconnected: bool,

    /// Where the credential record lives. Defaults to the platform data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub speedtest: SpeedTestConfig,

    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentProfile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "production".into(),
            poll_interval_secs: default_poll_interval(),
            retention_secs: default_retention(),
            request_timeout_secs: default_request_timeout(),
            token_max_age_hours: default_token_max_age(),
            include_disconnected: false,
            state_dir: None,
            server: ServerConfig::default(),
            speedtest: SpeedTestConfig::default(),
            environments: BTreeMap::from([(
                "production".to_owned(),
                EnvironmentProfile::default(),
            )]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SpeedTestConfig {
    #[serde(default = "default_speedtest_poll")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_speedtest_deadline")]
    pub deadline_secs: u64,
}

impl Default for SpeedTestConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_speedtest_poll(),
            deadline_secs: default_speedtest_deadline(),
        }
    }
}

/// A named upstream environment.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EnvironmentProfile {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Network to poll. Empty until an operator sets it.
    #[serde(default)]
    pub network_id: String,
}

impl Default for EnvironmentProfile {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            network_id: String::new(),
        }
    }
}

fn default_poll_interval() -> u64 {
    60
}
fn default_retention() -> u64 {
    7200
}
fn default_request_timeout() -> u64 {
    10
}
fn default_token_max_age() -> u64 {
    24
}
fn default_bind() -> String {
    "0.0.0.0:8080".into()
}
fn default_speedtest_poll() -> u64 {
    5
}
fn default_speedtest_deadline() -> u64 {
    180
}
fn default_api_base() -> String {
    DEFAULT_API_BASE.into()
}

// ── Validation & resolution ─────────────────────────────────────────

impl Config {
    /// The profile named by `environment`.
    pub fn selected(&self) -> Result<&EnvironmentProfile, ConfigError> {
        self.environments
            .get(&self.environment)
            .ok_or_else(|| ConfigError::UnknownEnvironment {
                name: self.environment.clone(),
            })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(invalid("poll_interval_secs", "must be greater than zero"));
        }
        if self.retention_secs == 0 {
            return Err(invalid("retention_secs", "must be greater than zero"));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs", "must be greater than zero"));
        }
        if self.speedtest.poll_interval_secs == 0 || self.speedtest.deadline_secs == 0 {
            return Err(invalid("speedtest", "intervals must be greater than zero"));
        }
        self.bind_addr()?;

        let profile = self.selected()?;
        url::Url::parse(&profile.api_base)
            .map_err(|e| invalid("api_base", format!("{}: {e}", profile.api_base)))?;
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .bind
            .parse()
            .map_err(|_| invalid("server.bind", format!("not a socket address: {}", self.server.bind)))
    }

    /// Update the selected profile's network id.
    pub fn set_network_id(&mut self, network_id: &str) -> Result<(), ConfigError> {
        let network_id = network_id.trim();
        if network_id.is_empty() {
            return Err(invalid("network_id", "must not be empty"));
        }
        if network_id.contains('/') {
            return Err(invalid("network_id", format!("{network_id:?} contains '/'")));
        }
        let name = self.environment.clone();
        let profile = self
            .environments
            .get_mut(&name)
            .ok_or(ConfigError::UnknownEnvironment { name })?;
        network_id.clone_into(&mut profile.network_id);
        Ok(())
    }

    /// Directory holding `credential.json`.
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(default_state_dir)
    }

    /// Build the engine configuration for the selected environment.
    pub fn to_engine_config(&self) -> Result<EngineConfig, ConfigError> {
        self.validate()?;
        let profile = self.selected()?;
        let api_base = url::Url::parse(&profile.api_base)
            .map_err(|e| invalid("api_base", e.to_string()))?;

        let mut engine = EngineConfig::new(api_base, profile.network_id.trim());
        engine.poll_interval = Duration::from_secs(self.poll_interval_secs);
        engine.retention = Duration::from_secs(self.retention_secs);
        engine.request_timeout = Duration::from_secs(self.request_timeout_secs);
        engine.token_max_age = Duration::from_secs(self.token_max_age_hours.saturating_mul(3600));
        engine.include_disconnected = self.include_disconnected;
        engine.speedtest_poll_interval = Duration::from_secs(self.speedtest.poll_interval_secs);
        engine.speedtest_deadline = Duration::from_secs(self.speedtest.deadline_secs);
        engine.credential_path = Some(self.state_dir().join(CREDENTIAL_FILE));
        Ok(engine)
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("io", "rackdash", "rackdash")
}

fn home_fallback(parts: &[&str]) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.extend(parts);
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(&[".config", "rackdash", "config.toml"]),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default state directory (credential record).
pub fn default_state_dir() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(&[".local", "share", "rackdash"]),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

// ── Loading & saving ────────────────────────────────────────────────

/// Load defaults ← file at `path` ← `RACKDASH_*` environment, then validate.
/// A missing file is not an error.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}
