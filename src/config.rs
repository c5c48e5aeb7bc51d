use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::api::{DEFAULT_UPSTREAM_BASE, RequestRouter};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/moviebox-env";
pub const DEFAULT_MOVIEBOX_PORT: u16 = 3000;
pub const DEFAULT_MOVIEBOX_HOST: &str = "127.0.0.1";
pub const DEFAULT_HISTORY_DB: &str = "moviebox-history.db";

/// Raw values found in the env-style config file.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub upstream_base: Option<String>,
    pub moviebox_host: Option<String>,
    pub moviebox_port: Option<u16>,
    pub history_db: Option<PathBuf>,
    pub relay_origin: Option<String>,
}

/// Settings after defaults are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub upstream_base: String,
    pub moviebox_host: String,
    pub moviebox_port: u16,
    pub history_db: PathBuf,
    /// When set, the front-end calls go through the relay at this origin.
    pub relay_origin: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_env_config(EnvConfig::default())
    }
}

impl RuntimeConfig {
    fn from_env_config(cfg: EnvConfig) -> Self {
        Self {
            upstream_base: cfg
                .upstream_base
                .unwrap_or_else(|| DEFAULT_UPSTREAM_BASE.to_string()),
            moviebox_host: cfg
                .moviebox_host
                .unwrap_or_else(|| DEFAULT_MOVIEBOX_HOST.to_string()),
            moviebox_port: cfg.moviebox_port.unwrap_or(DEFAULT_MOVIEBOX_PORT),
            history_db: cfg
                .history_db
                .unwrap_or_else(|| PathBuf::from(DEFAULT_HISTORY_DB)),
            relay_origin: cfg.relay_origin,
        }
    }

    /// Builds the request router once, routing through the relay if one is
    /// configured.
    pub fn request_router(&self) -> RequestRouter {
        match &self.relay_origin {
            Some(origin) => RequestRouter::relayed(&self.upstream_base, origin),
            None => RequestRouter::direct(&self.upstream_base),
        }
    }
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value_raw)) = trimmed.split_once('=') else {
            continue;
        };
        let value = value_raw.trim().trim_matches('"');
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "UPSTREAM_BASE" => cfg.upstream_base = Some(value.trim_end_matches('/').to_string()),
            "MOVIEBOX_HOST" => cfg.moviebox_host = Some(value.to_string()),
            "MOVIEBOX_PORT" => {
                let port: u16 = value
                    .parse()
                    .with_context(|| format!("Parsing MOVIEBOX_PORT from {}", path.display()))?;
                cfg.moviebox_port = Some(port);
            }
            "HISTORY_DB" => cfg.history_db = Some(PathBuf::from(value)),
            "RELAY_ORIGIN" => cfg.relay_origin = Some(value.trim_end_matches('/').to_string()),
            _ => {}
        }
    }
    Ok(Some(cfg))
}

pub fn load_runtime_config() -> Result<RuntimeConfig> {
    load_runtime_config_from(Path::new(DEFAULT_CONFIG_PATH))
}

/// A missing file is not an error: every setting has a default.
pub fn load_runtime_config_from(path: impl AsRef<Path>) -> Result<RuntimeConfig> {
    let cfg = read_env_config(path.as_ref())?.unwrap_or_default();
    Ok(RuntimeConfig::from_env_config(cfg))
}
