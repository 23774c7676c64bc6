//! Store connection configuration.
//!
//! Server-backed store implementations take their connection parameters from
//! this struct. The reference deployment reads credentials from the
//! `STORE_USERNAME` / `STORE_PASSWORD` environment variables, falling back
//! to the development defaults.

use latch_commons::{Error, ErrorKind, Result};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: &str = "27017";
const DEFAULT_USERNAME: &str = "root";
const DEFAULT_PASSWORD: &str = "password";

/// Connection parameters for a server-backed store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub host: String,
    pub port: String,
    pub username: String,
    pub password: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT.to_string(),
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
        }
    }
}

impl StoreConfig {
    /// Builds a config from the environment, falling back to defaults.
    ///
    /// Recognized variables: `STORE_USERNAME`, `STORE_PASSWORD`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(username) = std::env::var("STORE_USERNAME") {
            if !username.is_empty() {
                config.username = username;
            }
        }
        if let Ok(password) = std::env::var("STORE_PASSWORD") {
            if !password.is_empty() {
                config.password = password;
            }
        }
        config
    }

    /// Normalizes empty fields to defaults and validates the port.
    ///
    /// Fails *invalid-argument* when the port is not numeric.
    pub fn validate(&mut self) -> Result<()> {
        if self.host.is_empty() {
            self.host = DEFAULT_HOST.to_string();
        }
        if self.port.is_empty() || self.port == "0" {
            self.port = DEFAULT_PORT.to_string();
        } else if self.port.parse::<u16>().is_err() {
            return Err(Error::wrap(ErrorKind::InvalidArgument, "invalid database port"));
        }
        Ok(())
    }

    /// Host:port address of the store server.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let mut config = StoreConfig::default();
        config.validate().unwrap();
        assert_eq!(config.address(), "localhost:27017");
        assert_eq!(config.username, "root");
    }

    #[test]
    fn test_empty_fields_normalized() {
        let mut config = StoreConfig {
            host: String::new(),
            port: "0".to_string(),
            ..StoreConfig::default()
        };
        config.validate().unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, "27017");
    }

    #[test]
    fn test_invalid_port_rejected() {
        let mut config = StoreConfig {
            port: "not-a-port".to_string(),
            ..StoreConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.is_invalid_argument());
    }
}
