//! Registry server configuration.
//!
//! Configuration is read from a TOML file. Every section and field has a
//! default, so an empty file is a valid configuration:
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 5000
//!
//! [storage]
//! local = { path = "/var/lib/registry" }
//!
//! [registry]
//! bucket = "registry"
//! realm = "Registry"
//!
//! [logging]
//! level = "info"
//! format = "text"
//!
//! [auth]
//! enabled = false
//! username = ""
//! password = ""
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use storage::StorageConfig;

/// Errors loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("reading config file {path}: {source}")]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration.
    #[error("parsing config: {0}")]
    Parse(#[from] toml_edit::de::Error),

    /// Authentication is enabled without credentials.
    #[error("auth is enabled but no username is configured")]
    MissingCredentials,
}

/// Complete server configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Listener settings.
    pub server: ServerConfig,
    /// Storage backend.
    pub storage: StorageConfig,
    /// Registry settings.
    pub registry: RegistrySettings,
    /// Log output.
    pub logging: LoggingConfig,
    /// Basic authentication.
    pub auth: AuthConfig,
}

impl RegistryConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml_edit::de::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.enabled && self.auth.username.is_empty() {
            return Err(ConfigError::MissingCredentials);
        }
        Ok(())
    }

    /// Address to listen on.
    pub fn address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Listener settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
        }
    }
}

/// Registry settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistrySettings {
    /// Storage bucket holding all registry data.
    pub bucket: String,
    /// Realm announced in authentication challenges.
    pub realm: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            bucket: "registry".into(),
            realm: "Registry".into(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Log output.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `registry=debug,tower_http=info`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

/// A single set of basic auth credentials.
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuthConfig {
    /// Whether uploads and the management API require credentials.
    pub enabled: bool,
    /// Expected username.
    pub username: String,
    /// Expected password.
    pub password: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("enabled", &self.enabled)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
