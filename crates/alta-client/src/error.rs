//! Error types and handling for the client.
//!
//! This module defines the error types that can occur across the client's
//! subsystems, providing clear categorization of different failure modes.

/// Enumeration of possible client errors.
///
/// Categorizes errors by origin (configuration, network, authentication,
/// protocol) and by recoverability. All network and protocol errors inside
/// the streaming pipeline are caught and logged where they occur; only
/// configuration errors, usage errors, and the final resolution of
/// caller-initiated operations surface through public APIs.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Credentials missing or ambiguous, or an option set out of range
    #[error("Configuration error: {0}")]
    Config(String),

    /// A fetch, open, or send failed at the transport level
    #[error("Network error: {0}")]
    Network(String),

    /// The token endpoint rejected the credentials
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The platform answered with a non-2xx code
    #[error("API error ({code}): {message}")]
    Api {
        /// HTTP or WebSocket response code
        code: u16,
        /// The response `message` field if present, else the stringified body
        message: String,
    },

    /// The configured retry budget was exhausted without success
    #[error("Retries exhausted: {0}")]
    RetriesExhausted(String),

    /// A public API was called in a way that can never succeed
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// The subscription pair is already registered
    #[error("Already subscribed to {0}")]
    AlreadySubscribed(String),

    /// The subscription pair is not registered
    #[error("Not subscribed to {0}")]
    NotSubscribed(String),

    /// A socket migration failed; recovery has been initiated
    #[error("Migration aborted: {0}")]
    MigrationAborted(String),

    /// A recovery round failed or timed out; the loop will retry
    #[error("Recovery failed: {0}")]
    RecoveryFailed(String),

    /// The platform refused a console connection or returned no details
    #[error("Console connection refused: {0}")]
    ConsoleRefused(String),

    /// The underlying connection closed while an operation was in flight
    #[error("Connection closed: {0}")]
    Closed(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
