//! Connection configuration
//!
//! `ConnectionConfig` is what a host hands to the adapter: host, port,
//! optional user and password, database and schema. The user falls back to
//! the operating-system user; that lookup happens once, in
//! [`ConnectionConfig::resolve`], when a session is opened.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::security::validate_identifier;

/// Environment variables consulted, in order, for the OS user
const OS_USER_VARS: &[&str] = &["USER", "LOGNAME", "USERNAME"];

/// Wrapper for sensitive configuration values
#[derive(Debug, Clone)]
pub struct SensitiveString(SecretString);

impl SensitiveString {
    /// Create a new sensitive string
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    /// Expose the secret value
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl From<String> for SensitiveString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SensitiveString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Serialize for SensitiveString {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("***REDACTED***")
    }
}

impl<'de> Deserialize<'de> for SensitiveString {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

/// Configuration for opening a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Server host name or address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Login role; the OS user when None or empty
    pub user: Option<String>,
    /// Password, if the server asks for one
    pub password: Option<SensitiveString>,
    /// Database name
    pub database: String,
    /// Schema whose tables are exposed as collections
    pub schema: String,
    /// Connection timeout in milliseconds (0 = driver default)
    pub connect_timeout_ms: u64,
    /// Application name (shown in pg_stat_activity)
    pub application_name: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            user: None,
            password: None,
            database: "postgres".into(),
            schema: "public".into(),
            connect_timeout_ms: 10_000,
            application_name: Some("tablescope-rdbc".into()),
        }
    }
}

impl ConnectionConfig {
    /// Create configuration for a host and database
    pub fn new(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            database: database.into(),
            ..Default::default()
        }
    }

    /// Set port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set login user
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SensitiveString::new(password));
        self
    }

    /// Set schema
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set application name
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Connection timeout as a duration, if one is set
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }

    /// Validate the configuration and settle the effective user.
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        if self.host.trim().is_empty() {
            return Err(Error::config("host cannot be empty"));
        }
        if self.database.trim().is_empty() {
            return Err(Error::config("database cannot be empty"));
        }
        validate_identifier(&self.schema)?;

        let user = match self.user.as_deref().map(str::trim) {
            Some(user) if !user.is_empty() => user.to_string(),
            _ => current_os_user().ok_or_else(|| {
                Error::config(format!(
                    "no user configured and the OS user could not be determined (checked {})",
                    OS_USER_VARS.join(", ")
                ))
            })?,
        };

        Ok(ResolvedConfig {
            config: self.clone(),
            user,
        })
    }
}

/// A validated configuration with its effective user fixed
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    config: ConnectionConfig,
    user: String,
}

impl ResolvedConfig {
    /// The configuration this was resolved from
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The effective login user
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Schema whose tables are exposed as collections
    pub fn schema(&self) -> &str {
        &self.config.schema
    }
}

/// Name of the user running this process, if the environment reveals it
pub fn current_os_user() -> Option<String> {
    OS_USER_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|user| user.trim().to_string())
        .find(|user| !user.is_empty())
}
