//! Console wire messages.
//!
//! Console frames are JSON objects named by `type` and optionally
//! `eventType`; command replies additionally carry the originating
//! `commandId`.

use serde::Deserialize;
use serde_json::Value;

/// One inbound console message.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleMessage {
    /// Message family, e.g. `SystemMessage`, `CommandResult`,
    /// `Subscription`
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Sub-name, e.g. `InfoLog` or a subscribed event name
    #[serde(rename = "eventType", default)]
    pub event_type: Option<String>,
    /// Present on command replies
    #[serde(rename = "commandId", default)]
    pub command_id: Option<u64>,
    /// Message payload; strings for logs, objects for events and results
    #[serde(default)]
    pub data: Value,
    /// Server-side timestamp
    #[serde(rename = "timeStamp", default)]
    pub time_stamp: Option<String>,
}

impl ConsoleMessage {
    /// The dispatch name: `<type>` or `<type>/<eventType>`.
    pub fn event_name(&self) -> String {
        match &self.event_type {
            Some(event_type) => format!("{}/{event_type}", self.kind),
            None => self.kind.clone(),
        }
    }

    /// Whether this is the asynchronous authentication confirmation.
    pub fn is_auth_confirmation(&self) -> bool {
        if self.kind != "SystemMessage" || self.event_type.as_deref() != Some("InfoLog") {
            return false;
        }
        let text = self
            .data
            .as_str()
            .or_else(|| self.data.get("message").and_then(|m| m.as_str()))
            .unwrap_or_default();
        text.starts_with("Connection Succeeded")
    }
}

/// The reply to one console command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// The id of the command this answers
    pub command_id: u64,
    /// Parsed result payload
    pub data: Value,
    /// Server-side timestamp
    pub time_stamp: Option<String>,
}

impl From<ConsoleMessage> for CommandResult {
    fn from(message: ConsoleMessage) -> Self {
        Self {
            command_id: message.command_id.unwrap_or_default(),
            data: message.data,
            time_stamp: message.time_stamp,
        }
    }
}
