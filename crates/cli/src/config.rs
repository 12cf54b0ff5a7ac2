//! Server configuration: a TOML file plus environment overrides.
//!
//! ```toml
//! [server]
//! port = 8080
//! rate_limit = 60
//! max_body_bytes = 1048576
//!
//! [[users]]
//! id = "alice"
//! role = "employee"
//! api_key = "alice-key"
//! ```
//!
//! `POSTMORTEM_PORT` and `POSTMORTEM_RATE_LIMIT` override the file.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use postmortem_core::Role;
use postmortem_engine::Actor;

pub(crate) const PORT_ENV: &str = "POSTMORTEM_PORT";
pub(crate) const RATE_LIMIT_ENV: &str = "POSTMORTEM_RATE_LIMIT";

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_RATE_LIMIT: u64 = 60;
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConfigError {
    #[error("cannot read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Every problem found, not just the first.
    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    #[serde(default)]
    pub(crate) server: ServerConfig,
    #[serde(default)]
    pub(crate) users: Vec<UserConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ServerConfig {
    #[serde(default = "default_port")]
    pub(crate) port: u16,
    /// Requests per minute per client IP.
    #[serde(default = "default_rate_limit")]
    pub(crate) rate_limit: u64,
    #[serde(default = "default_max_body_bytes")]
    pub(crate) max_body_bytes: usize,
}

/// One entry of the `[[users]]` table: an API key bound to a user and role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct UserConfig {
    pub(crate) id: String,
    pub(crate) role: Role,
    pub(crate) api_key: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_rate_limit() -> u64 {
    DEFAULT_RATE_LIMIT
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: DEFAULT_PORT,
            rate_limit: DEFAULT_RATE_LIMIT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl Config {
    /// Read, apply process environment overrides, and validate.
    pub(crate) fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Config::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn parse(text: &str) -> Result<Config, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply overrides from `lookup` (the process environment in production).
    pub(crate) fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        if let Some(raw) = lookup(PORT_ENV) {
            match raw.trim().parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => problems.push(format!("{} must be a port number, got '{}'", PORT_ENV, raw)),
            }
        }
        if let Some(raw) = lookup(RATE_LIMIT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(limit) => self.server.rate_limit = limit,
                Err(_) => problems.push(format!(
                    "{} must be a non-negative integer, got '{}'",
                    RATE_LIMIT_ENV, raw
                )),
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        if self.server.rate_limit == 0 {
            problems.push("server.rate_limit must be at least 1".to_string());
        }
        if self.server.max_body_bytes == 0 {
            problems.push("server.max_body_bytes must be at least 1".to_string());
        }
        if self.users.is_empty() {
            problems.push("no [[users]] configured; every request would be refused".to_string());
        }

        let mut ids = HashSet::new();
        let mut keys = HashSet::new();
        for (i, user) in self.users.iter().enumerate() {
            if user.id.trim().is_empty() {
                problems.push(format!("users[{}].id must not be empty", i));
            } else if !ids.insert(user.id.as_str()) {
                problems.push(format!("users[{}]: duplicate user id '{}'", i, user.id));
            }
            if user.api_key.trim().is_empty() {
                problems.push(format!("users[{}].api_key must not be empty", i));
            } else if !keys.insert(user.api_key.as_str()) {
                problems.push(format!("users[{}]: api_key already assigned to another user", i));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    /// API key -> authenticated actor.
    pub(crate) fn credentials(&self) -> HashMap<String, Actor> {
        self.users
            .iter()
            .map(|u| (u.api_key.clone(), Actor::new(u.id.clone(), u.role)))
            .collect()
    }
}
