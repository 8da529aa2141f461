//! Short-lived HS256 JWTs for the AMO API.
//!
//! AMO authenticates every request with a JWT whose issuer is the API key,
//! signed with the API secret. Tokens live for 60 seconds and are minted
//! per request.

use chrono::Utc;
use extship_types::StoreError;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};

/// Lifetime of a minted token
pub const TOKEN_LIFETIME_SECS: i64 = 60;

/// Registered claims AMO expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// An encoded token together with the claims it carries.
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub claims: Claims,
}

/// Mint a token issued now.
pub fn mint(api_key: &str, api_secret: &str) -> Result<SignedToken, StoreError> {
    mint_at(api_key, api_secret, Utc::now().timestamp())
}

/// Mint a token with an explicit issue time (unix seconds).
pub fn mint_at(api_key: &str, api_secret: &str, issued_at: i64) -> Result<SignedToken, StoreError> {
    if api_key.trim().is_empty() || api_secret.is_empty() {
        return Err(StoreError::Auth(
            "AMO API key and secret must both be set".to_string(),
        ));
    }

    let claims = Claims {
        iss: api_key.to_string(),
        jti: nonce(),
        iat: issued_at,
        exp: issued_at + TOKEN_LIFETIME_SECS,
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(api_secret.as_bytes()),
    )
    .map_err(|e| StoreError::Auth(format!("failed to sign JWT: {e}")))?;

    Ok(SignedToken { token, claims })
}

fn nonce() -> String {
    format!("{:016x}{:016x}", rand::random::<u64>(), rand::random::<u64>())
}
