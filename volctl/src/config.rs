use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use volume_protocol::{TransportConfig, TransportKind};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 4000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: String,
        value: String,
        reason: String,
    },
}

/// Where and how to reach the volume server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub transport: TransportKind,
    pub transport_config: TransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            transport: TransportKind::Udp,
            transport_config: TransportConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from `VOLCTL_*` environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("VOLCTL_HOST") {
            if host.trim().is_empty() {
                return Err(invalid("VOLCTL_HOST", &host, "host cannot be empty"));
            }
            config.host = host.trim().to_string();
        }
        if let Some(port) = parse_var::<u16, _>(&lookup, "VOLCTL_PORT")? {
            config.port = port;
        }
        if let Some(kind) = parse_var::<TransportKind, _>(&lookup, "VOLCTL_TRANSPORT")? {
            config.transport = kind;
        }

        let datagram = &mut config.transport_config.datagram;
        if let Some(ms) = parse_millis(&lookup, "VOLCTL_UPDATE_INTERVAL_MS")? {
            datagram.update_interval = ms;
        }
        if let Some(misses) = parse_var::<u32, _>(&lookup, "VOLCTL_PING_MISSES")? {
            datagram.ping_misses_before_disconnect = misses;
        }
        if let Some(ms) = parse_millis(&lookup, "VOLCTL_RETRANSMIT_DELAY_MS")? {
            datagram.retransmit_delay = ms;
        }

        Ok(config)
    }
}

fn invalid(var: &str, value: &str, reason: impl Display) -> ConfigError {
    ConfigError::InvalidValue {
        var: var.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_var<T, F>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(var, &value, e)),
        None => Ok(None),
    }
}

fn parse_millis<F>(lookup: &F, var: &str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_var::<u64, _>(lookup, var)? {
        Some(0) => Err(invalid(var, "0", "must be greater than zero")),
        Some(ms) => Ok(Some(Duration::from_millis(ms))),
        None => Ok(None),
    }
}
