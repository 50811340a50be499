use crate::{env_or_default, ConfigError, FromEnv};

/// Configuration for the queue broker's redis-style backing store.
///
/// The broker itself is in-process; the backing store is used for the
/// progress cache, the health ping, and the gateway metrics snapshot.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl BrokerConfig {
    pub fn new(host: String, port: u16, password: Option<String>) -> Self {
        Self {
            host,
            port,
            password,
        }
    }

    /// Build a redis connection URI from the configured parts.
    pub fn uri(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}", password, self.host, self.port),
            None => format!("redis://{}:{}", self.host, self.port),
        }
    }
}

impl FromEnv for BrokerConfig {
    /// Reads BROKER_HOST (default "127.0.0.1"), BROKER_PORT (default 6379)
    /// and the optional BROKER_PASSWORD.
    fn from_env() -> Result<Self, ConfigError> {
        let host = env_or_default("BROKER_HOST", "127.0.0.1");
        let port = env_or_default("BROKER_PORT", "6379")
            .parse()
            .map_err(|e| ConfigError::ParseError {
                key: "BROKER_PORT".to_string(),
                details: format!("{}", e),
            })?;
        let password = std::env::var("BROKER_PASSWORD").ok();

        Ok(Self {
            host,
            port,
            password,
        })
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_config_defaults() {
        temp_env::with_vars(
            [
                ("BROKER_HOST", None::<&str>),
                ("BROKER_PORT", None),
                ("BROKER_PASSWORD", None),
            ],
            || {
                let config = BrokerConfig::from_env().unwrap();
                assert_eq!(config.host, "127.0.0.1");
                assert_eq!(config.port, 6379);
                assert!(config.password.is_none());
                assert_eq!(config.uri(), "redis://127.0.0.1:6379");
            },
        );
    }

    #[test]
    fn test_broker_config_with_password() {
        temp_env::with_vars(
            [
                ("BROKER_HOST", Some("queue.internal")),
                ("BROKER_PORT", Some("6380")),
                ("BROKER_PASSWORD", Some("hunter2")),
            ],
            || {
                let config = BrokerConfig::from_env().unwrap();
                assert_eq!(config.uri(), "redis://:hunter2@queue.internal:6380");
            },
        );
    }

    #[test]
    fn test_broker_config_invalid_port() {
        temp_env::with_var("BROKER_PORT", Some("not_a_number"), || {
            let result = BrokerConfig::from_env();
            assert!(result.is_err());
            assert!(result.unwrap_err().to_string().contains("BROKER_PORT"));
        });
    }
}
