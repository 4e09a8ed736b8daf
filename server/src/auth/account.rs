//! Account endpoints: register, login, refresh.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::auth::jwt::{self, TokenPair};
use crate::auth::password;
use crate::chat::store::StoreError;
use crate::db::models::UserInfo;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: UserInfo,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// POST /api/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<(StatusCode, Json<UserInfo>), (StatusCode, String)> {
    let username = req.username.trim();
    if username.is_empty() || req.password.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Username and password are required".to_string(),
        ));
    }

    let hash = password::hash_password_async(req.password).await.map_err(|e| {
        tracing::error!(error = %e, "Password hashing failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "Registration failed".to_string())
    })?;

    match state.store.create_user(username, &hash).await {
        Ok(user) => {
            tracing::info!(user_id = user.id, username = %user.username, "User registered");
            Ok((StatusCode::CREATED, Json(user)))
        }
        Err(StoreError::UsernameTaken) => Err((
            StatusCode::BAD_REQUEST,
            "Username already exists".to_string(),
        )),
        Err(e) => {
            tracing::error!(error = %e, "Failed to create user");
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Registration failed".to_string()))
        }
    }
}

/// POST /api/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<LoginResponse>, StatusCode> {
    let creds = state
        .store
        .user_credentials(req.username.trim())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Credential lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let verified = password::verify_password_async(req.password, creds.password_hash.clone())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Password verification failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    if !verified {
        tracing::debug!(username = %creds.username, "Login rejected");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let tokens = jwt::issue_token_pair(&state.jwt_secret, creds.id, &creds.username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    tracing::info!(user_id = creds.id, "User logged in");

    Ok(Json(LoginResponse {
        tokens,
        user: UserInfo {
            id: creds.id,
            username: creds.username,
            created_at: creds.created_at,
        },
    }))
}

/// POST /api/refresh
/// Exchange a refresh token for a fresh pair. The user must still exist.
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, StatusCode> {
    let identity = jwt::resolve_refresh(&state.jwt_secret, &req.refresh_token)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let user = state
        .store
        .user_info(identity.user_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let tokens = jwt::issue_token_pair(&state.jwt_secret, user.id, &user.username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(tokens))
}
