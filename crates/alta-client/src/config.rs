//! Client configuration types and defaults.
//!
//! This module contains the client configuration structure and default
//! values used to initialize and customize client behavior. All durations
//! are in milliseconds unless noted.

use crate::logging::LogVerbosity;
use serde::{Deserialize, Serialize};

/// Configuration structure for the client.
///
/// Contains credentials, group filtering, logging preferences, worker and
/// fan-out bounds, every socket-lifecycle timing knob, and endpoint
/// overrides. Credentials are either a bot (`client_id`/`client_secret`/
/// `scopes`) or a user (`username`/`password`); the two are mutually
/// exclusive and validated at client construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Bot client id (mutually exclusive with `username`)
    #[serde(default)]
    pub client_id: Option<String>,

    /// Bot client secret
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Token scopes requested for a bot principal
    #[serde(default)]
    pub scopes: Vec<Scope>,

    /// User name (mutually exclusive with `client_id`)
    #[serde(default)]
    pub username: Option<String>,

    /// User password, either plain text or an SHA-512 hex digest
    #[serde(default)]
    pub password: Option<String>,

    /// Denylist of group ids; ignored when `included_groups` is non-empty
    #[serde(default)]
    pub excluded_groups: Vec<i64>,

    /// Allowlist of group ids; non-empty means allow-only-if-listed
    #[serde(default)]
    pub included_groups: Vec<i64>,

    /// Verbosity threshold for the client's log surface
    #[serde(default)]
    pub log_verbosity: LogVerbosity,

    /// Prefix prepended to every log line
    #[serde(default)]
    pub log_prefix: String,

    /// Bound on concurrent worker-pool tasks; warn above 10
    #[serde(default = "default_max_worker_concurrency")]
    pub max_worker_concurrency: usize,

    /// Subscription fan-out cap per account socket
    #[serde(default = "default_max_subscriptions_per_web_socket")]
    pub max_subscriptions_per_web_socket: usize,

    /// Missed-heartbeat budget before a server's console is closed
    #[serde(default = "default_max_missed_server_heartbeats")]
    pub max_missed_server_heartbeats: u32,

    /// Per-tick heartbeat timer period
    #[serde(default = "default_server_heartbeat_interval_ms")]
    pub server_heartbeat_interval_ms: u64,

    /// Delay before a console reconnect attempt
    #[serde(default = "default_server_connection_recovery_delay_ms")]
    pub server_connection_recovery_delay_ms: u64,

    /// Fleet tags eligible for console connection
    #[serde(default = "default_supported_server_fleets")]
    pub supported_server_fleets: Vec<String>,

    /// Account-socket ping period
    #[serde(default = "default_web_socket_ping_interval_ms")]
    pub web_socket_ping_interval_ms: u64,

    /// Routine account-socket migration period
    #[serde(default = "default_web_socket_migration_interval_ms")]
    pub web_socket_migration_interval_ms: u64,

    /// How long the pre-migration socket lingers to drain responses
    #[serde(default = "default_web_socket_migration_handover_period_ms")]
    pub web_socket_migration_handover_period_ms: u64,

    /// Delay before retrying a failed migration-token request
    #[serde(default = "default_web_socket_migration_retry_delay_ms")]
    pub web_socket_migration_retry_delay_ms: u64,

    /// Delay between recovery rounds
    #[serde(default = "default_web_socket_recovery_retry_delay_ms")]
    pub web_socket_recovery_retry_delay_ms: u64,

    /// Cap on one recovery round's resubscribe race
    #[serde(default = "default_web_socket_recovery_timeout_ms")]
    pub web_socket_recovery_timeout_ms: u64,

    /// Attempts per account-socket RPC
    #[serde(default = "default_web_socket_request_attempts")]
    pub web_socket_request_attempts: u32,

    /// Fixed delay between account-socket RPC attempts
    #[serde(default = "default_web_socket_request_retry_delay_ms")]
    pub web_socket_request_retry_delay_ms: u64,

    /// Attempts per REST request
    #[serde(default = "default_api_request_attempts")]
    pub api_request_attempts: u32,

    /// Fixed delay between REST attempts
    #[serde(default = "default_api_request_retry_delay_ms")]
    pub api_request_retry_delay_ms: u64,

    /// Per-request REST timeout
    #[serde(default = "default_api_request_timeout_ms")]
    pub api_request_timeout_ms: u64,

    /// REST base URL
    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,

    /// OAuth token endpoint for bot credentials
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Account WebSocket URL
    #[serde(default = "default_web_socket_url")]
    pub web_socket_url: String,

    /// Platform API key sent as `x-api-key`
    #[serde(default = "default_x_api_key")]
    pub x_api_key: String,
}

/// Token scopes a bot principal may request.
///
/// A scope list is a subset of this fixed enum; serde renames match the
/// platform's dotted wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    #[serde(rename = "group.info")]
    GroupInfo,
    #[serde(rename = "group.join")]
    GroupJoin,
    #[serde(rename = "group.leave")]
    GroupLeave,
    #[serde(rename = "group.members")]
    GroupMembers,
    #[serde(rename = "group.view")]
    GroupView,
    #[serde(rename = "server.view")]
    ServerView,
    #[serde(rename = "server.console")]
    ServerConsole,
    #[serde(rename = "ws.group")]
    WsGroup,
    #[serde(rename = "ws.group_bans")]
    WsGroupBans,
    #[serde(rename = "ws.group_invites")]
    WsGroupInvites,
    #[serde(rename = "ws.group_members")]
    WsGroupMembers,
    #[serde(rename = "ws.group_servers")]
    WsGroupServers,
}

impl Scope {
    /// The wire name used in space-joined scope lists.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::GroupInfo => "group.info",
            Scope::GroupJoin => "group.join",
            Scope::GroupLeave => "group.leave",
            Scope::GroupMembers => "group.members",
            Scope::GroupView => "group.view",
            Scope::ServerView => "server.view",
            Scope::ServerConsole => "server.console",
            Scope::WsGroup => "ws.group",
            Scope::WsGroupBans => "ws.group_bans",
            Scope::WsGroupInvites => "ws.group_invites",
            Scope::WsGroupMembers => "ws.group_members",
            Scope::WsGroupServers => "ws.group_servers",
        }
    }
}

fn default_max_worker_concurrency() -> usize {
    5
}

fn default_max_subscriptions_per_web_socket() -> usize {
    500
}

fn default_max_missed_server_heartbeats() -> u32 {
    3
}

fn default_server_heartbeat_interval_ms() -> u64 {
    20_000
}

fn default_server_connection_recovery_delay_ms() -> u64 {
    10_000
}

fn default_supported_server_fleets() -> Vec<String> {
    vec!["att-release".to_string(), "att-quest".to_string()]
}

fn default_web_socket_ping_interval_ms() -> u64 {
    5 * 60 * 1000
}

fn default_web_socket_migration_interval_ms() -> u64 {
    110 * 60 * 1000
}

fn default_web_socket_migration_handover_period_ms() -> u64 {
    10_000
}

fn default_web_socket_migration_retry_delay_ms() -> u64 {
    10_000
}

fn default_web_socket_recovery_retry_delay_ms() -> u64 {
    5_000
}

fn default_web_socket_recovery_timeout_ms() -> u64 {
    2 * 60 * 1000
}

fn default_web_socket_request_attempts() -> u32 {
    3
}

fn default_web_socket_request_retry_delay_ms() -> u64 {
    3_000
}

fn default_api_request_attempts() -> u32 {
    3
}

fn default_api_request_retry_delay_ms() -> u64 {
    3_000
}

fn default_api_request_timeout_ms() -> u64 {
    5_000
}

fn default_rest_base_url() -> String {
    "https://webapi.townshiptale.com/api".to_string()
}

fn default_token_url() -> String {
    "https://accounts.townshiptale.com/connect/token".to_string()
}

fn default_web_socket_url() -> String {
    "wss://websocket.townshiptale.com".to_string()
}

fn default_x_api_key() -> String {
    "2l6aQGoNes8EHb94qMhqQ5m8iaiOM9666oDTPORf".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            scopes: Vec::new(),
            username: None,
            password: None,
            excluded_groups: Vec::new(),
            included_groups: Vec::new(),
            log_verbosity: LogVerbosity::default(),
            log_prefix: String::new(),
            max_worker_concurrency: default_max_worker_concurrency(),
            max_subscriptions_per_web_socket: default_max_subscriptions_per_web_socket(),
            max_missed_server_heartbeats: default_max_missed_server_heartbeats(),
            server_heartbeat_interval_ms: default_server_heartbeat_interval_ms(),
            server_connection_recovery_delay_ms: default_server_connection_recovery_delay_ms(),
            supported_server_fleets: default_supported_server_fleets(),
            web_socket_ping_interval_ms: default_web_socket_ping_interval_ms(),
            web_socket_migration_interval_ms: default_web_socket_migration_interval_ms(),
            web_socket_migration_handover_period_ms: default_web_socket_migration_handover_period_ms(
            ),
            web_socket_migration_retry_delay_ms: default_web_socket_migration_retry_delay_ms(),
            web_socket_recovery_retry_delay_ms: default_web_socket_recovery_retry_delay_ms(),
            web_socket_recovery_timeout_ms: default_web_socket_recovery_timeout_ms(),
            web_socket_request_attempts: default_web_socket_request_attempts(),
            web_socket_request_retry_delay_ms: default_web_socket_request_retry_delay_ms(),
            api_request_attempts: default_api_request_attempts(),
            api_request_retry_delay_ms: default_api_request_retry_delay_ms(),
            api_request_timeout_ms: default_api_request_timeout_ms(),
            rest_base_url: default_rest_base_url(),
            token_url: default_token_url(),
            web_socket_url: default_web_socket_url(),
            x_api_key: default_x_api_key(),
        }
    }
}

impl ClientConfig {
    /// Validates the configuration for consistency and correctness.
    ///
    /// Checks credential completeness and mutual exclusion, retry budgets,
    /// and endpoint URLs.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing
    /// the issue.
    pub fn validate(&self) -> Result<(), String> {
        let has_bot = self.client_id.is_some() || self.client_secret.is_some();
        let has_user = self.username.is_some() || self.password.is_some();

        if has_bot && has_user {
            return Err("Bot and user credentials are mutually exclusive".to_string());
        }
        if !has_bot && !has_user {
            return Err("Either bot or user credentials must be provided".to_string());
        }
        if has_bot && (self.client_id.is_none() || self.client_secret.is_none()) {
            return Err("Bot credentials require both client_id and client_secret".to_string());
        }
        if has_user && (self.username.is_none() || self.password.is_none()) {
            return Err("User credentials require both username and password".to_string());
        }

        if self.max_worker_concurrency == 0 {
            return Err("max_worker_concurrency must be greater than 0".to_string());
        }
        if self.max_subscriptions_per_web_socket == 0 {
            return Err("max_subscriptions_per_web_socket must be greater than 0".to_string());
        }
        if self.web_socket_request_attempts == 0 {
            return Err("web_socket_request_attempts must be greater than 0".to_string());
        }
        if self.api_request_attempts == 0 {
            return Err("api_request_attempts must be greater than 0".to_string());
        }

        for (name, url) in [
            ("rest_base_url", &self.rest_base_url),
            ("token_url", &self.token_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(format!("Invalid {name}: {url}"));
            }
        }
        if !self.web_socket_url.starts_with("ws://") && !self.web_socket_url.starts_with("wss://")
        {
            return Err(format!("Invalid web_socket_url: {}", self.web_socket_url));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bot_config() -> ClientConfig {
        ClientConfig {
            client_id: Some("client".to_string()),
            client_secret: Some("secret".to_string()),
            scopes: vec![Scope::WsGroup, Scope::ServerConsole],
            ..ClientConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.max_worker_concurrency, 5);
        assert_eq!(config.max_subscriptions_per_web_socket, 500);
        assert_eq!(config.max_missed_server_heartbeats, 3);
        assert_eq!(config.server_heartbeat_interval_ms, 20_000);
        assert_eq!(config.server_connection_recovery_delay_ms, 10_000);
        assert_eq!(config.web_socket_ping_interval_ms, 300_000);
        assert_eq!(config.web_socket_migration_interval_ms, 6_600_000);
        assert_eq!(config.web_socket_migration_handover_period_ms, 10_000);
        assert_eq!(config.web_socket_recovery_retry_delay_ms, 5_000);
        assert_eq!(config.web_socket_recovery_timeout_ms, 120_000);
        assert_eq!(config.web_socket_request_attempts, 3);
        assert_eq!(config.api_request_attempts, 3);
        assert_eq!(config.api_request_timeout_ms, 5_000);
        assert_eq!(
            config.supported_server_fleets,
            vec!["att-release".to_string(), "att-quest".to_string()]
        );
    }

    #[test]
    fn test_validation_requires_credentials() {
        let config = ClientConfig::default();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("credentials must be provided"));
    }

    #[test]
    fn test_validation_rejects_ambiguous_credentials() {
        let mut config = bot_config();
        config.username = Some("user".to_string());
        config.password = Some("pass".to_string());

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("mutually exclusive"));
    }

    #[test]
    fn test_validation_rejects_partial_credentials() {
        let mut config = ClientConfig::default();
        config.client_id = Some("client".to_string());
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.username = Some("user".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_valid_bot_config() {
        assert!(bot_config().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_urls() {
        let mut config = bot_config();
        config.web_socket_url = "https://not-a-websocket".to_string();
        assert!(config.validate().is_err());

        let mut config = bot_config();
        config.token_url = "ftp://tokens".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scope_wire_names() {
        assert_eq!(Scope::WsGroup.as_str(), "ws.group");
        assert_eq!(Scope::ServerConsole.as_str(), "server.console");
        let json = serde_json::to_string(&Scope::WsGroupServers).unwrap();
        assert_eq!(json, "\"ws.group_servers\"");
    }
}
