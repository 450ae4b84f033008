//! Access-token lifecycle management.
//!
//! The token manager obtains a bearer token from the platform, decodes its
//! claims, and schedules a refresh at 90% of the token's remaining
//! lifetime. Authentication failures are retried every 10 seconds
//! indefinitely so a platform outage never terminates the process.

use crate::auth::credentials::{decode_claims, Credentials, Principal, TokenClaims};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::logging::Logger;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// Delay between authentication attempts while the token endpoint is
/// failing.
const AUTH_RETRY_DELAY: Duration = Duration::from_secs(10);

/// The current bearer token together with its decoded claims.
#[derive(Debug, Clone)]
pub struct AccessToken {
    /// Opaque bearer string
    pub bearer: String,
    /// Decoded claims (not cryptographically verified; the platform is
    /// trusted)
    pub claims: TokenClaims,
}

/// Manages the client's single active access token.
///
/// At most one token is active at a time; `refresh` replaces it atomically.
/// The refresh timer is always either unset or scheduled strictly before
/// the token's expiry. No two refreshes run concurrently.
pub struct TokenManager {
    weak_self: Weak<Self>,
    config: Arc<ClientConfig>,
    log: Logger,
    http: reqwest::Client,
    credentials: Credentials,
    current: RwLock<Option<AccessToken>>,
    refresh_timer: Mutex<Option<JoinHandle<()>>>,
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    /// Creates a token manager without fetching a token.
    ///
    /// The first token is obtained by the supervisor's forced refresh
    /// during `start`.
    pub fn new(config: Arc<ClientConfig>, log: Logger, credentials: Credentials) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            config,
            log: log.with_context("auth"),
            http: reqwest::Client::new(),
            credentials,
            current: RwLock::new(None),
            refresh_timer: Mutex::new(None),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Returns the current bearer token and claims.
    pub async fn current(&self) -> Result<AccessToken> {
        self.current
            .read()
            .await
            .clone()
            .ok_or_else(|| ClientError::Auth("No access token yet".to_string()))
    }

    /// Returns the decoded principal of the current token.
    pub async fn principal(&self) -> Result<Principal> {
        self.current().await?.claims.principal()
    }

    /// Forces a token refresh, retrying every 10 seconds until the token
    /// endpoint answers.
    ///
    /// On success the new token replaces the old one atomically and the
    /// next refresh is scheduled at 90% of the remaining lifetime. The
    /// indefinite retry is deliberate: it keeps the process alive through
    /// platform outages.
    pub async fn refresh(&self) -> Result<AccessToken> {
        let _guard = self.refresh_lock.lock().await;

        let token = loop {
            match self.request_token().await {
                Ok(token) => break token,
                Err(e) => {
                    self.log
                        .error(format!("Authentication failed, retrying in 10s: {e}"));
                    tokio::time::sleep(AUTH_RETRY_DELAY).await;
                }
            }
        };

        *self.current.write().await = Some(token.clone());
        self.log.info(format!(
            "Authenticated as {:?}, token expires at {}",
            token.claims.principal(),
            token.claims.exp
        ));

        self.schedule_refresh(&token).await;
        Ok(token)
    }

    /// Cancels any scheduled refresh.
    ///
    /// Called when the supervisor stops; idempotent.
    pub async fn cancel_refresh(&self) {
        if let Some(handle) = self.refresh_timer.lock().await.take() {
            handle.abort();
        }
    }

    /// Schedules the next refresh strictly before the token expires.
    ///
    /// Any previously scheduled refresh is cancelled first.
    ///
    /// Returns a boxed future rather than being declared `async fn`: this
    /// function and `refresh` call each other (directly and via the spawned
    /// timer task), and an opaque `impl Future` return type here would make
    /// the compiler try to unfold that recursion when deciding whether the
    /// result is `Send`. The explicit boxed return type gives it a concrete,
    /// already-`Send` type to stop at.
    fn schedule_refresh<'a>(
        &'a self,
        token: &'a AccessToken,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let now_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64;
            let expiry_ms = token.claims.exp.saturating_mul(1000);
            let delay_ms = (expiry_ms.saturating_sub(now_ms) as f64 * 0.9).floor() as u64;

            let mut timer = self.refresh_timer.lock().await;
            if let Some(handle) = timer.take() {
                handle.abort();
            }

            let manager = self.weak_self.clone();
            let refresh_fut: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> =
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    if let Some(manager) = manager.upgrade() {
                        if let Err(e) = manager.refresh().await {
                            manager.log.error(format!("Scheduled refresh failed: {e}"));
                        }
                    }
                });
            *timer = Some(tokio::spawn(refresh_fut));

            self.log
                .debug(format!("Next token refresh in {delay_ms}ms"));
        })
    }

    /// Sends the credentials-specific authentication request and decodes
    /// the resulting token.
    async fn request_token(&self) -> Result<AccessToken> {
        let response = match &self.credentials {
            Credentials::Bot {
                client_id,
                client_secret,
                ..
            } => {
                let scope = self.credentials.scope_string();
                let form = [
                    ("grant_type", "client_credentials"),
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.as_str()),
                    ("scope", scope.as_str()),
                ];
                self.http
                    .post(&self.config.token_url)
                    .header("User-Agent", crate::USER_AGENT)
                    .form(&form)
                    .send()
                    .await
            }
            Credentials::User {
                username,
                password_hash,
            } => {
                let body = serde_json::json!({
                    "username": username,
                    "password_hash": password_hash,
                });
                self.http
                    .post(format!("{}/sessions", self.config.rest_base_url))
                    .header("Content-Type", "application/json")
                    .header("User-Agent", crate::USER_AGENT)
                    .header("x-api-key", &self.config.x_api_key)
                    .json(&body)
                    .send()
                    .await
            }
        }
        .map_err(|e| ClientError::Network(format!("Token request failed: {e}")))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ClientError::Network(format!("Token response was not JSON: {e}")))?;

        if !status.is_success() {
            let message = body
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string());
            return Err(ClientError::Auth(format!(
                "Token endpoint answered {status}: {message}"
            )));
        }

        let bearer = body
            .get("access_token")
            .or_else(|| body.get("token"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| {
                ClientError::Auth("Token response carried no access_token".to_string())
            })?
            .to_string();

        let claims = decode_claims(&bearer)?;
        Ok(AccessToken { bearer, claims })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogVerbosity;

    fn manager() -> Arc<TokenManager> {
        let config = Arc::new(ClientConfig {
            client_id: Some("id".to_string()),
            client_secret: Some("secret".to_string()),
            ..ClientConfig::default()
        });
        let credentials = Credentials::from_config(&config).unwrap();
        let log = Logger::new(LogVerbosity::Quiet, "");
        TokenManager::new(config, log, credentials)
    }

    #[tokio::test]
    async fn test_current_requires_refresh_first() {
        let manager = manager();
        assert!(manager.current().await.is_err());
        assert!(manager.principal().await.is_err());
    }

    #[tokio::test]
    async fn test_schedule_refresh_is_strictly_before_expiry() {
        // An expiry one hour out schedules the refresh at ~54 minutes; the
        // scheduled delay must always land before the expiry instant.
        let manager = manager();
        let now_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let token = AccessToken {
            bearer: "t".to_string(),
            claims: TokenClaims {
                nbf: now_s,
                exp: now_s + 3600,
                aud: vec![],
                client_sub: Some("U1".to_string()),
                user_id: None,
                role: None,
            },
        };
        manager.schedule_refresh(&token).await;

        let timer = manager.refresh_timer.lock().await;
        assert!(timer.is_some());
        drop(timer);
        manager.cancel_refresh().await;
        assert!(manager.refresh_timer.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_refresh_is_idempotent() {
        let manager = manager();
        manager.cancel_refresh().await;
        manager.cancel_refresh().await;
    }
}
