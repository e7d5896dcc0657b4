// src/utils/config.rs
//! Service configuration.
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. Optional `config.toml` (or any format `config` understands) in the working directory
//! 3. Environment variables prefixed with `TRANSCRIPT_` (e.g. `TRANSCRIPT_PORT=8080`)
//!
//! A `.env` file is loaded into the process environment by `main` before this runs.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Five minutes, the lifetime of an authentication challenge.
pub const DEFAULT_NONCE_TTL_SECONDS: u64 = 300;
pub const DEFAULT_SESSION_TTL_MINUTES: u64 = 60;
/// Seven days.
pub const DEFAULT_EXPIRY_MINUTES: i64 = 10_080;

/// Runtime settings for the API server and its stores.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Interface to bind (e.g. "127.0.0.1")
    pub host: IpAddr,
    pub port: u16,
    /// Lifetime of an issued nonce
    pub nonce_ttl_seconds: u64,
    /// Lifetime of a session token
    pub session_ttl_minutes: u64,
    /// Request expiry applied when the recipient does not supply one
    pub default_expiry_minutes: i64,
    /// Postgres connection string. When absent the in-memory record store is used.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
}

impl Settings {
    /// Loads settings from defaults, an optional config file and the environment.
    ///
    /// # Errors
    /// Returns `ConfigError` if a source is malformed or a value has the wrong type.
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder()?
            .add_source(File::with_name("config").required(false))
            .add_source(Environment::with_prefix("TRANSCRIPT"))
            .build()?
            .try_deserialize()
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("host", "127.0.0.1")?
            .set_default("port", 3000)?
            .set_default("nonce_ttl_seconds", DEFAULT_NONCE_TTL_SECONDS)?
            .set_default("session_ttl_minutes", DEFAULT_SESSION_TTL_MINUTES)?
            .set_default("default_expiry_minutes", DEFAULT_EXPIRY_MINUTES)?
            .set_default("database_max_connections", 10)
    }

    /// Socket address the API server binds to.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn nonce_ttl(&self) -> Duration {
        Duration::from_secs(self.nonce_ttl_seconds)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_minutes.saturating_mul(60))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            port: 3000,
            nonce_ttl_seconds: DEFAULT_NONCE_TTL_SECONDS,
            session_ttl_minutes: DEFAULT_SESSION_TTL_MINUTES,
            default_expiry_minutes: DEFAULT_EXPIRY_MINUTES,
            database_url: None,
            database_max_connections: 10,
        }
    }
}
