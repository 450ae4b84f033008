//! Bearer-authenticated REST gateway.
//!
//! Every request carries the fixed header set, a configurable timeout, and
//! a bounded retry budget with a fixed delay. List endpoints paginate via
//! the `paginationToken` response header; follow-up pages are fetched and
//! merged until the header comes back empty. POSTs are retried like GETs
//! because the platform is idempotent on the operations this gateway
//! exposes.

use crate::auth::TokenManager;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::logging::Logger;
use crate::rest::types::{
    GroupInfo, GroupInviteInfo, GroupMemberInfo, JoinedGroupInfo, ServerInfo, ServerJoinResult,
};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Page size requested from paginated list endpoints.
const PAGE_SIZE: u32 = 1000;

/// Sends bearer-authenticated HTTP requests to the platform.
///
/// The gateway reads the current bearer from the token manager on every
/// request, so a token refresh reauthorizes it without any push
/// notification.
pub struct RestGateway {
    config: Arc<ClientConfig>,
    log: Logger,
    http: reqwest::Client,
    tokens: Arc<TokenManager>,
}

impl RestGateway {
    /// Creates a gateway bound to the given token manager.
    pub fn new(config: Arc<ClientConfig>, log: Logger, tokens: Arc<TokenManager>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.api_request_timeout_ms))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            config,
            log: log.with_context("api"),
            http,
            tokens,
        }
    }

    /// Builds the fixed header set.
    ///
    /// On a missing bearer the token manager is asked to refresh before
    /// headers are assembled, so the first REST call after construction
    /// self-heals.
    async fn authorize(&self) -> Result<HeaderMap> {
        let token = match self.tokens.current().await {
            Ok(token) => token,
            Err(_) => {
                self.log.debug("No bearer token yet, refreshing");
                self.tokens.refresh().await?
            }
        };

        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.x_api_key)
                .map_err(|e| ClientError::Config(format!("Invalid x-api-key: {e}")))?,
        );
        headers.insert("User-Agent", HeaderValue::from_static(crate::USER_AGENT));
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {}", token.bearer))
                .map_err(|e| ClientError::Auth(format!("Invalid bearer token: {e}")))?,
        );
        Ok(headers)
    }

    /// Sends one request with the configured retry policy.
    ///
    /// Returns the parsed JSON body and the `paginationToken` header, if
    /// any.
    async fn request_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<(Value, Option<String>)> {
        let attempts = self.config.api_request_attempts;
        let delay = Duration::from_millis(self.config.api_request_retry_delay_ms);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(delay).await;
            }

            let headers = self.authorize().await?;
            let mut request = self.http.request(method.clone(), url).headers(headers);
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let pagination = response
                        .headers()
                        .get("paginationToken")
                        .and_then(|v| v.to_str().ok())
                        .filter(|v| !v.is_empty())
                        .map(str::to_string);
                    let text = response.text().await.unwrap_or_default();

                    if status.is_success() {
                        let value = if text.is_empty() {
                            Value::Null
                        } else {
                            serde_json::from_str(&text).map_err(|e| {
                                ClientError::Network(format!("Response was not JSON: {e}"))
                            })?
                        };
                        return Ok((value, pagination));
                    }

                    let message = extract_message(&text);
                    self.log.warn(format!(
                        "{method} {url} answered {status} (attempt {attempt}/{attempts}): {message}"
                    ));
                    last_error = Some(ClientError::Api {
                        code: status.as_u16(),
                        message,
                    });
                }
                Err(e) => {
                    self.log.warn(format!(
                        "{method} {url} failed (attempt {attempt}/{attempts}): {e}"
                    ));
                    last_error = Some(ClientError::Network(e.to_string()));
                }
            }
        }

        Err(ClientError::RetriesExhausted(format!(
            "{method} {url} failed after {attempts} attempts: {}",
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string())
        )))
    }

    /// Sends a request to a non-paginated endpoint.
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = format!("{}/{path}", self.config.rest_base_url);
        let (value, _) = self.request_once(method, &url, body).await?;
        Ok(value)
    }

    /// Fetches every page of a paginated list endpoint and merges the
    /// result arrays.
    async fn request_paginated(&self, path: &str) -> Result<Vec<Value>> {
        let base = format!("{}/{path}?limit={PAGE_SIZE}", self.config.rest_base_url);
        let mut merged = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let url = match &token {
                Some(token) => format!("{base}&paginationToken={token}"),
                None => base.clone(),
            };
            let (value, next) = self.request_once(Method::GET, &url, None).await?;
            match value {
                Value::Array(items) => merged.extend(items),
                Value::Null => {}
                other => merged.push(other),
            }
            match next {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        Ok(merged)
    }

    /// Accepts a pending group invite.
    pub async fn accept_group_invite(&self, group_id: i64) -> Result<()> {
        self.request(Method::POST, &format!("groups/invites/{group_id}"), None)
            .await?;
        self.log.info(format!("Accepted invite to group {group_id}"));
        Ok(())
    }

    /// Fetches a group's descriptor.
    pub async fn get_group_info(&self, group_id: i64) -> Result<GroupInfo> {
        let value = self
            .request(Method::GET, &format!("groups/{group_id}"), None)
            .await?;
        serde_json::from_value(value)
            .map_err(|e| ClientError::Network(format!("Malformed group descriptor: {e}")))
    }

    /// Fetches one member of a group.
    pub async fn get_group_member(&self, group_id: i64, user_id: &str) -> Result<GroupMemberInfo> {
        let value = self
            .request(
                Method::GET,
                &format!("groups/{group_id}/members/{user_id}"),
                None,
            )
            .await?;
        serde_json::from_value(value)
            .map_err(|e| ClientError::Network(format!("Malformed group member: {e}")))
    }

    /// Lists every group the principal has joined, following pagination.
    pub async fn list_joined_groups(&self) -> Result<Vec<JoinedGroupInfo>> {
        let items = self.request_paginated("groups/joined").await?;
        items
            .into_iter()
            .map(|item| {
                serde_json::from_value(item)
                    .map_err(|e| ClientError::Network(format!("Malformed joined group: {e}")))
            })
            .collect()
    }

    /// Lists every pending group invite, following pagination.
    pub async fn list_pending_group_invites(&self) -> Result<Vec<GroupInviteInfo>> {
        let items = self.request_paginated("groups/invites").await?;
        items
            .into_iter()
            .map(|item| {
                serde_json::from_value(item)
                    .map_err(|e| ClientError::Network(format!("Malformed group invite: {e}")))
            })
            .collect()
    }

    /// Fetches a server's descriptor.
    pub async fn get_server_info(&self, server_id: i64) -> Result<ServerInfo> {
        let value = self
            .request(Method::GET, &format!("servers/{server_id}"), None)
            .await?;
        serde_json::from_value(value)
            .map_err(|e| ClientError::Network(format!("Malformed server descriptor: {e}")))
    }

    /// Requests console connection details for a server.
    ///
    /// The request never launches an offline server and never ignores its
    /// offline state; refusal is reported through the result's `allowed`
    /// flag.
    pub async fn get_server_connection_details(&self, server_id: i64) -> Result<ServerJoinResult> {
        let body = serde_json::json!({
            "should_launch": false,
            "ignore_offline": false,
        });
        let value = self
            .request(
                Method::POST,
                &format!("servers/{server_id}/console"),
                Some(&body),
            )
            .await?;
        serde_json::from_value(value)
            .map_err(|e| ClientError::Network(format!("Malformed join result: {e}")))
    }
}

/// Extracts the `message` field from an error body, falling back to the
/// stringified body.
fn extract_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_message_prefers_message_field() {
        assert_eq!(
            extract_message("{\"message\":\"no such group\",\"code\":404}"),
            "no such group"
        );
        assert_eq!(extract_message("plain body"), "plain body");
        assert_eq!(extract_message("{\"error\":\"x\"}"), "{\"error\":\"x\"}");
    }
}
