use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::store::DEFAULT_CHANNEL_CAPACITY;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for `{var}`: {message}")]
    InvalidValue { var: &'static str, message: String },
}

/// Startup settings, read once from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub persist_path: Option<PathBuf>,
    pub channel_capacity: usize,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_raw = lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw
            .parse::<SocketAddr>()
            .map_err(|err| ConfigError::InvalidValue {
                var: "BIND_ADDR",
                message: format!("{bind_raw}: {err}"),
            })?;

        let persist_path = lookup("PERSIST_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let channel_capacity = match lookup("ROOM_CHANNEL_CAPACITY") {
            None => DEFAULT_CHANNEL_CAPACITY,
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: "ROOM_CHANNEL_CAPACITY",
                        message: format!("{raw}: expected a positive integer"),
                    })
                }
            },
        };

        Ok(Self {
            bind_addr,
            persist_path,
            channel_capacity,
        })
    }
}
