use crate::{env_or_default, env_required, ConfigError, FromEnv};
use std::net::Ipv4Addr;

/// Configuration for the realtime gateway server.
#[derive(Clone, Debug)]
pub struct RealtimeConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed to open a websocket connection.
    pub allowed_origins: Vec<String>,
    /// HS256 secret used to verify bearer tokens.
    pub auth_secret: String,
}

impl RealtimeConfig {
    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check an Origin header value against the allow-list.
    ///
    /// An empty allow-list rejects every cross-origin upgrade.
    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|o| o == origin)
    }
}

impl FromEnv for RealtimeConfig {
    /// Reads from environment variables:
    /// - HOST: defaults to 0.0.0.0 (all interfaces)
    /// - REALTIME_PORT: defaults to 8080
    /// - ALLOWED_ORIGINS: comma-separated, empty by default
    /// - AUTH_SECRET: required
    fn from_env() -> Result<Self, ConfigError> {
        let host = env_or_default("HOST", &Ipv4Addr::UNSPECIFIED.to_string());
        let port = env_or_default("REALTIME_PORT", "8080")
            .parse()
            .map_err(|e| ConfigError::ParseError {
                key: "REALTIME_PORT".to_string(),
                details: format!("{}", e),
            })?;
        let allowed_origins = env_or_default("ALLOWED_ORIGINS", "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let auth_secret = env_required("AUTH_SECRET")?;

        Ok(Self {
            host,
            port,
            allowed_origins,
            auth_secret,
        })
    }
}
