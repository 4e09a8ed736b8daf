use std::path::Path;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::Serialize;

use crate::auth::middleware::{Claims, TokenKind};
use crate::auth::AuthError;
use crate::db::models::UserId;

/// Access tokens live for a day.
pub const ACCESS_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// Refresh tokens live for a week.
pub const REFRESH_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Authenticated principal behind a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Load or generate the JWT signing key (256-bit random secret).
/// Key is stored as raw bytes in data_dir/jwt_secret.
pub fn load_or_generate_jwt_secret(data_dir: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;
    let key_path = Path::new(data_dir).join("jwt_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!(path = %key_path.display(), "JWT signing key loaded");
            return Ok(key);
        }
        tracing::warn!(len = key.len(), "JWT key file has wrong size, regenerating");
    }

    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!(path = %key_path.display(), "JWT signing key generated");
    Ok(key.to_vec())
}

fn issue_token(
    secret: &[u8],
    user_id: UserId,
    username: &str,
    kind: TokenKind,
) -> Result<String, AuthError> {
    let now = Utc::now().timestamp();
    let ttl = match kind {
        TokenKind::Access => ACCESS_TOKEN_TTL_SECS,
        TokenKind::Refresh => REFRESH_TOKEN_TTL_SECS,
    };
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        kind,
        iat: now,
        exp: now + ttl,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
        .map_err(AuthError::Encode)
}

pub fn issue_access_token(secret: &[u8], user_id: UserId, username: &str) -> Result<String, AuthError> {
    issue_token(secret, user_id, username, TokenKind::Access)
}

pub fn issue_refresh_token(secret: &[u8], user_id: UserId, username: &str) -> Result<String, AuthError> {
    issue_token(secret, user_id, username, TokenKind::Refresh)
}

pub fn issue_token_pair(secret: &[u8], user_id: UserId, username: &str) -> Result<TokenPair, AuthError> {
    Ok(TokenPair {
        access_token: issue_access_token(secret, user_id, username)?,
        refresh_token: issue_refresh_token(secret, user_id, username)?,
    })
}

/// Verify signature and expiry of any token kind.
pub fn decode_claims(secret: &[u8], token: &str) -> Result<Claims, AuthError> {
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::Invalid,
        })
}

fn resolve_kind(secret: &[u8], token: &str, kind: TokenKind) -> Result<Identity, AuthError> {
    let claims = decode_claims(secret, token)?;
    if claims.kind != kind {
        return Err(AuthError::WrongKind);
    }
    Ok(Identity {
        user_id: claims.sub,
        username: claims.username,
    })
}

/// Resolve an access token to the identity it was issued for.
pub fn resolve(secret: &[u8], token: &str) -> Result<Identity, AuthError> {
    resolve_kind(secret, token, TokenKind::Access)
}

pub fn resolve_refresh(secret: &[u8], token: &str) -> Result<Identity, AuthError> {
    resolve_kind(secret, token, TokenKind::Refresh)
}
