//! Configuration management for the bot application.
//!
//! This module handles loading, validation, and conversion of bot
//! configuration from TOML files and command-line arguments.

use alta_client::{ClientConfig, LogVerbosity, Scope};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Application configuration loaded from a TOML file.
///
/// Encompasses credentials, client tuning, and logging output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Platform credentials
    pub credentials: CredentialSettings,
    /// Client behavior settings
    #[serde(default)]
    pub client: ClientSettings,
    /// Logging output settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Platform credentials: a bot (client id/secret/scopes) or a user
/// (username/password). The two are mutually exclusive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialSettings {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<Scope>,
    #[serde(default)]
    pub username: Option<String>,
    /// Plain password or an SHA-512 hex digest
    #[serde(default)]
    pub password: Option<String>,
}

/// Client behavior settings; anything omitted keeps the library default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Denylist of group ids
    #[serde(default)]
    pub excluded_groups: Vec<i64>,
    /// Allowlist of group ids; non-empty means allow-only-if-listed
    #[serde(default)]
    pub included_groups: Vec<i64>,
    /// Fleet tags eligible for console connection
    #[serde(default)]
    pub supported_server_fleets: Option<Vec<String>>,
    /// Worker pool concurrency bound
    #[serde(default)]
    pub max_worker_concurrency: Option<usize>,
    /// REST base URL override
    #[serde(default)]
    pub rest_base_url: Option<String>,
    /// Token endpoint override
    #[serde(default)]
    pub token_url: Option<String>,
    /// Account WebSocket URL override
    #[serde(default)]
    pub web_socket_url: Option<String>,
    /// Platform API key override
    #[serde(default)]
    pub x_api_key: Option<String>,
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
    /// Prefix prepended to every client log line
    #[serde(default)]
    pub prefix: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            prefix: String::new(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at
    /// the specified path and returns the default configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The loaded or default configuration, or an error if loading or
    /// creation failed.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the application configuration into a client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig {
            client_id: self.credentials.client_id.clone(),
            client_secret: self.credentials.client_secret.clone(),
            scopes: self.credentials.scopes.clone(),
            username: self.credentials.username.clone(),
            password: self.credentials.password.clone(),
            excluded_groups: self.client.excluded_groups.clone(),
            included_groups: self.client.included_groups.clone(),
            log_verbosity: verbosity_from_level(&self.logging.level),
            log_prefix: self.logging.prefix.clone(),
            ..ClientConfig::default()
        };

        if let Some(fleets) = &self.client.supported_server_fleets {
            config.supported_server_fleets = fleets.clone();
        }
        if let Some(concurrency) = self.client.max_worker_concurrency {
            config.max_worker_concurrency = concurrency;
        }
        if let Some(url) = &self.client.rest_base_url {
            config.rest_base_url = url.clone();
        }
        if let Some(url) = &self.client.token_url {
            config.token_url = url.clone();
        }
        if let Some(url) = &self.client.web_socket_url {
            config.web_socket_url = url.clone();
        }
        if let Some(key) = &self.client.x_api_key {
            config.x_api_key = key.clone();
        }
        config
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string
    /// describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }
        self.to_client_config().validate()
    }
}

/// Maps a tracing level string onto the client's verbosity threshold.
fn verbosity_from_level(level: &str) -> LogVerbosity {
    match level {
        "error" => LogVerbosity::Error,
        "warn" => LogVerbosity::Warning,
        "debug" | "trace" => LogVerbosity::Debug,
        _ => LogVerbosity::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::fs;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert!(config.credentials.client_id.is_none());
        assert!(config.client.included_groups.is_empty());
    }

    #[test]
    fn test_validation_rejects_missing_credentials() {
        let config = AppConfig::default();
        let result = config.validate();
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_rejects_bad_log_level() {
        let mut config = AppConfig::default();
        config.credentials.client_id = Some("id".to_string());
        config.credentials.client_secret = Some("secret".to_string());
        config.logging.level = "verbose".to_string();

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("Invalid log level"));
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[credentials]
client_id = "my-bot"
client_secret = "hunter2"
scopes = ["ws.group", "server.console"]

[client]
included_groups = [42]
max_worker_concurrency = 3

[logging]
level = "debug"
json_format = true
prefix = "bot "
"#;
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(&temp_file.path().to_path_buf())
            .await
            .unwrap();
        assert_eq!(config.credentials.client_id, Some("my-bot".to_string()));
        assert_eq!(config.credentials.scopes.len(), 2);
        assert_eq!(config.client.included_groups, vec![42]);
        assert_eq!(config.logging.level, "debug");

        let client_config = config.to_client_config();
        assert_eq!(client_config.included_groups, vec![42]);
        assert_eq!(client_config.max_worker_concurrency, 3);
        assert_eq!(client_config.log_verbosity, LogVerbosity::Debug);
        assert_eq!(client_config.log_prefix, "bot ");
        assert!(client_config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(verbosity_from_level("error"), LogVerbosity::Error);
        assert_eq!(verbosity_from_level("warn"), LogVerbosity::Warning);
        assert_eq!(verbosity_from_level("info"), LogVerbosity::Info);
        assert_eq!(verbosity_from_level("debug"), LogVerbosity::Debug);
        assert_eq!(verbosity_from_level("trace"), LogVerbosity::Debug);
        assert_eq!(verbosity_from_level("bogus"), LogVerbosity::Info);
    }
}
