//! Credential sets, principals, and token claims.
//!
//! A client authenticates either as a bot (client-credentials grant) or as
//! a user (password-hash session). The decoded token's subject determines
//! the principal, which gates which automation paths the supervisor
//! enables.

use crate::config::{ClientConfig, Scope};
use crate::error::ClientError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use sha2::{Digest, Sha512};

/// Resolved authentication material, one variant per principal type.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Bot account authenticated via the client-credentials grant
    Bot {
        client_id: String,
        client_secret: String,
        scopes: Vec<Scope>,
    },
    /// User account authenticated via a password-hash session
    User {
        username: String,
        password_hash: String,
    },
}

impl Credentials {
    /// Resolves credentials from configuration.
    ///
    /// The bot and user credential sets are mutually exclusive; a missing
    /// or ambiguous set is a configuration error surfaced synchronously at
    /// client construction.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        config
            .validate()
            .map_err(ClientError::Config)?;

        if let (Some(client_id), Some(client_secret)) =
            (config.client_id.clone(), config.client_secret.clone())
        {
            return Ok(Credentials::Bot {
                client_id,
                client_secret,
                scopes: config.scopes.clone(),
            });
        }

        let username = config.username.clone().ok_or_else(|| {
            ClientError::Config("Either bot or user credentials must be provided".to_string())
        })?;
        let password = config.password.clone().unwrap_or_default();

        Ok(Credentials::User {
            username,
            password_hash: hash_password(&password),
        })
    }

    /// The space-joined scope list for a bot, empty for a user.
    pub fn scope_string(&self) -> String {
        match self {
            Credentials::Bot { scopes, .. } => scopes
                .iter()
                .map(Scope::as_str)
                .collect::<Vec<_>>()
                .join(" "),
            Credentials::User { .. } => String::new(),
        }
    }
}

/// Hashes a password into the lowercase SHA-512 hex digest the platform
/// expects.
///
/// If the supplied value already looks like an SHA-512 hex digest (128 hex
/// characters, any case) it is used as-is, lowered, and not rehashed, so
/// configurations may carry either the plain password or the digest.
pub fn hash_password(password: &str) -> String {
    if password.len() == 128 && password.bytes().all(|b| b.is_ascii_hexdigit()) {
        return password.to_ascii_lowercase();
    }
    let digest = Sha512::digest(password.as_bytes());
    let mut out = String::with_capacity(128);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// The decoded JWT subject: a bot or a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Bot principal, carrying the `client_sub` claim
    Bot(String),
    /// User principal, carrying the user id claim
    User(String),
}

impl Principal {
    /// The subscription key used for account-level channels.
    pub fn key(&self) -> &str {
        match self {
            Principal::Bot(sub) => sub,
            Principal::User(id) => id,
        }
    }
}

/// Decoded token claims.
///
/// The platform is trusted, so the signature is not verified; only the
/// payload segment is decoded.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenClaims {
    /// Not-before, seconds since the epoch
    #[serde(default)]
    pub nbf: u64,
    /// Expiry, seconds since the epoch
    pub exp: u64,
    /// Audience list
    #[serde(default, deserialize_with = "string_or_seq")]
    pub aud: Vec<String>,
    /// Bot subject, present for client-credentials tokens
    #[serde(default)]
    pub client_sub: Option<String>,
    /// User id, present for session tokens
    #[serde(default, rename = "UserId")]
    pub user_id: Option<String>,
    /// Role classification, e.g. "Bot" or "Member"
    #[serde(default)]
    pub role: Option<String>,
}

impl TokenClaims {
    /// Classifies the token's subject.
    pub fn principal(&self) -> Result<Principal, ClientError> {
        if let Some(sub) = &self.client_sub {
            return Ok(Principal::Bot(sub.clone()));
        }
        if let Some(id) = &self.user_id {
            return Ok(Principal::User(id.clone()));
        }
        Err(ClientError::Auth(
            "Token carries neither client_sub nor UserId".to_string(),
        ))
    }
}

/// Decodes the claims segment of a JWT without verifying the signature.
pub fn decode_claims(token: &str) -> Result<TokenClaims, ClientError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| ClientError::Auth("Malformed access token".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| ClientError::Auth(format!("Token payload is not base64: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ClientError::Auth(format!("Token payload is not valid JSON: {e}")))
}

/// Accepts either a single audience string or a list.
fn string_or_seq<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_token(claims: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(b"{\"alg\":\"RS256\"}");
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn test_hash_password_plain() {
        let hash = hash_password("hunter2");
        assert_eq!(hash.len(), 128);
        assert!(hash.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(hash, hash.to_ascii_lowercase());
    }

    #[test]
    fn test_hash_password_idempotent_on_digest() {
        // An already-hashed input bypasses rehash, so hashing twice is a
        // fixed point.
        let once = hash_password("hunter2");
        assert_eq!(hash_password(&once), once);

        let upper = once.to_ascii_uppercase();
        assert_eq!(hash_password(&upper), once);
    }

    #[test]
    fn test_decode_claims_bot() {
        let token = encode_token(&serde_json::json!({
            "nbf": 100,
            "exp": 4_000,
            "aud": ["a", "b"],
            "client_sub": "U1",
            "role": "Bot",
        }));
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.exp, 4_000);
        assert_eq!(claims.aud, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(claims.principal().unwrap(), Principal::Bot("U1".to_string()));
    }

    #[test]
    fn test_decode_claims_user_and_single_audience() {
        let token = encode_token(&serde_json::json!({
            "exp": 9_999,
            "aud": "only",
            "UserId": "42",
        }));
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.aud, vec!["only".to_string()]);
        assert_eq!(
            claims.principal().unwrap(),
            Principal::User("42".to_string())
        );
    }

    #[test]
    fn test_decode_claims_rejects_garbage() {
        assert!(decode_claims("not-a-token").is_err());
        assert!(decode_claims("a.%%%.c").is_err());
    }

    #[test]
    fn test_credentials_resolution() {
        let config = ClientConfig {
            client_id: Some("id".to_string()),
            client_secret: Some("secret".to_string()),
            scopes: vec![Scope::WsGroup, Scope::GroupInfo],
            ..ClientConfig::default()
        };
        let creds = Credentials::from_config(&config).unwrap();
        assert_eq!(creds.scope_string(), "ws.group group.info");

        let config = ClientConfig {
            username: Some("alice".to_string()),
            password: Some("hunter2".to_string()),
            ..ClientConfig::default()
        };
        match Credentials::from_config(&config).unwrap() {
            Credentials::User { password_hash, .. } => {
                assert_eq!(password_hash, hash_password("hunter2"));
            }
            other => panic!("expected user credentials, got {other:?}"),
        }
    }
}
