//! Per-client log surface over the `tracing` transport.
//!
//! The client exposes a small log sink (error, warn, info, debug) gated by
//! the configured verbosity and prefixed with the configured prefix. The
//! actual transport is `tracing`; hosts install whatever subscriber they
//! want.

use serde::{Deserialize, Serialize};

/// Verbosity threshold for the client's log output.
///
/// Calls below the configured threshold are no-ops. `Quiet` suppresses
/// everything including errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogVerbosity {
    /// No output at all
    Quiet,
    /// Errors only
    Error,
    /// Errors and warnings
    Warning,
    /// Errors, warnings, and informational messages
    Info,
    /// Everything
    Debug,
}

impl Default for LogVerbosity {
    fn default() -> Self {
        LogVerbosity::Info
    }
}

/// A cheap, cloneable handle carrying verbosity and prefix.
///
/// Components derive child loggers with [`Logger::with_context`] so that
/// log lines carry their origin (for example the account-socket instance
/// id), matching the `<instanceId>-<messageId>` disambiguation the message
/// ids use.
#[derive(Debug, Clone)]
pub struct Logger {
    verbosity: LogVerbosity,
    prefix: String,
}

impl Logger {
    /// Creates a logger with the given verbosity and prefix.
    pub fn new(verbosity: LogVerbosity, prefix: impl Into<String>) -> Self {
        Self {
            verbosity,
            prefix: prefix.into(),
        }
    }

    /// Derives a child logger whose prefix is extended with `context`.
    pub fn with_context(&self, context: &str) -> Self {
        let prefix = if self.prefix.is_empty() {
            format!("[{context}] ")
        } else {
            format!("{}[{context}] ", self.prefix)
        };
        Self {
            verbosity: self.verbosity,
            prefix,
        }
    }

    /// Logs an error-level message.
    pub fn error(&self, message: impl std::fmt::Display) {
        if self.verbosity >= LogVerbosity::Error {
            tracing::error!("{}{}", self.prefix, message);
        }
    }

    /// Logs a warning-level message.
    pub fn warn(&self, message: impl std::fmt::Display) {
        if self.verbosity >= LogVerbosity::Warning {
            tracing::warn!("{}{}", self.prefix, message);
        }
    }

    /// Logs an info-level message.
    pub fn info(&self, message: impl std::fmt::Display) {
        if self.verbosity >= LogVerbosity::Info {
            tracing::info!("{}{}", self.prefix, message);
        }
    }

    /// Logs a debug-level message.
    pub fn debug(&self, message: impl std::fmt::Display) {
        if self.verbosity >= LogVerbosity::Debug {
            tracing::debug!("{}{}", self.prefix, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_ordering() {
        assert!(LogVerbosity::Quiet < LogVerbosity::Error);
        assert!(LogVerbosity::Error < LogVerbosity::Warning);
        assert!(LogVerbosity::Warning < LogVerbosity::Info);
        assert!(LogVerbosity::Info < LogVerbosity::Debug);
    }

    #[test]
    fn test_with_context_extends_prefix() {
        let root = Logger::new(LogVerbosity::Debug, "bot ");
        let child = root.with_context("ws-3");
        assert_eq!(child.prefix, "bot [ws-3] ");

        let bare = Logger::new(LogVerbosity::Debug, "");
        let child = bare.with_context("ws-1");
        assert_eq!(child.prefix, "[ws-1] ");
    }
}
