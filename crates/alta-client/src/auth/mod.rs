//! Authentication: credential sets, token lifecycle, and decoded claims.

pub mod credentials;
pub mod token;

pub use credentials::{decode_claims, hash_password, Credentials, Principal, TokenClaims};
pub use token::{AccessToken, TokenManager};
