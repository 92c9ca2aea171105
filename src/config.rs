//! Runtime configuration from the environment (optionally seeded from `.env`).

use std::net::{IpAddr, SocketAddr};

/// Smallest mailbox that still absorbs a burst of friend notifications.
pub const MIN_MAILBOX_CAPACITY: usize = 64;
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;
pub const DEFAULT_INTAKE_CAPACITY: usize = 256;
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key}={value:?} is not valid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: IpAddr,
    pub port: u16,
    pub jwt_secret: String,
    pub cors_origins: Vec<String>,
    pub mailbox_capacity: usize,
    pub intake_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_address = parse_or(get("APP_BIND_ADDRESS"), "APP_BIND_ADDRESS", IpAddr::from([0, 0, 0, 0]))?;
        let port = parse_or(get("APP_PORT"), "APP_PORT", DEFAULT_PORT)?;
        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        let cors_origins = get("CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let mailbox_capacity =
            parse_or(get("HUB_MAILBOX_CAPACITY"), "HUB_MAILBOX_CAPACITY", DEFAULT_MAILBOX_CAPACITY)?;
        if mailbox_capacity < MIN_MAILBOX_CAPACITY {
            return Err(ConfigError::Invalid {
                key: "HUB_MAILBOX_CAPACITY",
                value: mailbox_capacity.to_string(),
                reason: format!("must be at least {}", MIN_MAILBOX_CAPACITY),
            });
        }
        let intake_capacity =
            parse_or(get("HUB_INTAKE_CAPACITY"), "HUB_INTAKE_CAPACITY", DEFAULT_INTAKE_CAPACITY)?;
        if intake_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "HUB_INTAKE_CAPACITY",
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }

        Ok(Self {
            bind_address,
            port,
            jwt_secret,
            cors_origins,
            mailbox_capacity,
            intake_capacity,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

fn parse_or<T>(raw: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: v.clone(),
            reason: e.to_string(),
        }),
    }
}
