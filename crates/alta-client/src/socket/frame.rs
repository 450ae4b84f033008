//! Account-socket wire frames.
//!
//! Outbound frames are RPC requests carrying a correlation id and a
//! stringified payload. Inbound frames split into broadcast events
//! (`id == 0`), correlated RPC responses (`id > 0`), and the migration
//! confirmation, which the platform does not always correlate and which is
//! therefore matched on its key instead.

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key of the migration-presentation response frame.
pub const MIGRATE_RESPONSE_KEY: &str = "POST /ws/migrate";

/// An outbound RPC request frame.
#[derive(Debug, Clone, Serialize)]
pub struct RequestFrame {
    pub method: String,
    pub path: String,
    pub authorization: String,
    pub id: u64,
    pub content: Value,
}

impl RequestFrame {
    /// Builds a request frame; the payload is stringified per the wire
    /// contract, with `null` standing in for an absent payload.
    pub fn new(method: &str, path: &str, bearer: &str, id: u64, content: Option<&Value>) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            authorization: format!("Bearer {bearer}"),
            id,
            content: match content {
                Some(value) => Value::String(value.to_string()),
                None => Value::Null,
            },
        }
    }
}

/// Raw inbound frame shape before classification.
#[derive(Debug, Clone, Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: u64,
    #[serde(default)]
    event: String,
    #[serde(default)]
    key: String,
    #[serde(default, rename = "responseCode")]
    response_code: u16,
    #[serde(default)]
    content: Option<Value>,
}

/// A classified inbound frame.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// A broadcast event (`id == 0`), dispatched by `event/key`
    Event {
        event: String,
        key: String,
        response_code: u16,
        content: Value,
    },
    /// A correlated RPC response (`id > 0`)
    Response(WsResponse),
}

/// A resolved RPC response.
#[derive(Debug, Clone)]
pub struct WsResponse {
    pub id: u64,
    pub key: String,
    pub code: u16,
    pub content: Value,
}

impl WsResponse {
    /// Whether the platform answered with a 2xx code.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Whether this is the (possibly uncorrelated) migration confirmation.
    pub fn is_migrate_confirmation(&self) -> bool {
        self.key == MIGRATE_RESPONSE_KEY
    }
}

impl InboundFrame {
    /// Parses and classifies one text frame.
    ///
    /// Frames without a `content` field are protocol noise and rejected so
    /// the caller can log and drop them.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawFrame = serde_json::from_str(text)
            .map_err(|e| ClientError::Network(format!("Unparseable frame: {e}")))?;

        let content = match raw.content {
            Some(content) => unwrap_content(content),
            None => {
                return Err(ClientError::Network(format!(
                    "Frame without content (event '{}', key '{}')",
                    raw.event, raw.key
                )))
            }
        };

        if raw.id == 0 && raw.event != "response" {
            Ok(InboundFrame::Event {
                event: raw.event,
                key: raw.key,
                response_code: raw.response_code,
                content,
            })
        } else {
            Ok(InboundFrame::Response(WsResponse {
                id: raw.id,
                key: raw.key,
                code: raw.response_code,
                content,
            }))
        }
    }
}

/// Unwraps the platform's stringified content payloads.
///
/// Content arrives as a JSON string containing JSON; an empty string means
/// an empty payload. Content that is not a string (older event shapes) is
/// passed through.
fn unwrap_content(content: Value) -> Value {
    match content {
        Value::String(text) if text.is_empty() => Value::Null,
        Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_frame_stringifies_payload() {
        let payload = serde_json::json!({"token": "MT"});
        let frame = RequestFrame::new("POST", "migrate", "B", 3, Some(&payload));
        assert_eq!(frame.authorization, "Bearer B");
        assert_eq!(frame.content, Value::String("{\"token\":\"MT\"}".to_string()));

        let frame = RequestFrame::new("GET", "migrate", "B", 4, None);
        assert_eq!(frame.content, Value::Null);
    }

    #[test]
    fn test_parse_event_frame() {
        let text = r#"{"id":0,"event":"group-server-heartbeat","key":"42","responseCode":200,"content":"{\"id\":7,\"isOnline\":true}"}"#;
        match InboundFrame::parse(text).unwrap() {
            InboundFrame::Event {
                event,
                key,
                content,
                ..
            } => {
                assert_eq!(event, "group-server-heartbeat");
                assert_eq!(key, "42");
                assert_eq!(content["id"], 7);
                assert_eq!(content["isOnline"], true);
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_response_frame() {
        let text = r#"{"id":9,"event":"response","key":"POST /ws/subscription/group-update/42","responseCode":200,"content":""}"#;
        match InboundFrame::parse(text).unwrap() {
            InboundFrame::Response(response) => {
                assert_eq!(response.id, 9);
                assert!(response.is_success());
                assert!(!response.is_migrate_confirmation());
                assert_eq!(response.content, Value::Null);
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_uncorrelated_migrate_confirmation() {
        let text = r#"{"id":0,"event":"response","key":"POST /ws/migrate","responseCode":200,"content":""}"#;
        match InboundFrame::parse(text).unwrap() {
            InboundFrame::Response(response) => {
                assert!(response.is_migrate_confirmation());
                assert!(response.is_success());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_missing_content() {
        let text = r#"{"id":0,"event":"ping","key":""}"#;
        assert!(InboundFrame::parse(text).is_err());
        assert!(InboundFrame::parse("not json").is_err());
    }
}
