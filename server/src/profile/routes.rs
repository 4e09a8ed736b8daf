//! REST endpoints for the caller's profile.
//!
//! GET /api/profile — profile with photos
//! PUT /api/profile/photo — multipart upload, file field `photo`
//! DELETE /api/profile/photo/{photo_id} — remove one of the caller's photos

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;

use super::{photo_filename, photo_url};
use crate::auth::middleware::Claims;
use crate::chat::store::StoreError;
use crate::db::models::{Photo, Profile};
use crate::state::AppState;

/// GET /api/profile
pub async fn get_profile(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Profile>, StatusCode> {
    state
        .store
        .profile(claims.sub)
        .await
        .map_err(|e| {
            tracing::error!(user_id = claims.sub, error = %e, "Failed to load profile");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// PUT /api/profile/photo
///
/// Stores the `photo` field under the upload directory and records it.
/// The file is removed again if the database insert fails.
pub async fn upload_photo(
    State(state): State<AppState>,
    claims: Claims,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Photo>), (StatusCode, String)> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.body_text()))?
    {
        if field.name() != Some("photo") {
            continue;
        }
        let original = field.file_name().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, e.body_text()))?;
        upload = Some((original, data));
        break;
    }

    let (original, data) = upload
        .filter(|(_, data)| !data.is_empty())
        .ok_or((StatusCode::BAD_REQUEST, "photo file is required".to_string()))?;

    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let filename = photo_filename(claims.sub, nanos, original.as_deref());
    let upload_dir = &state.settings.upload_dir;
    let path = upload_dir.join(&filename);

    let saved = async {
        tokio::fs::create_dir_all(upload_dir).await?;
        tokio::fs::write(&path, &data).await
    };
    saved.await.map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "Failed to write photo");
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to save photo".to_string())
    })?;

    let url = photo_url(state.settings.base_url.as_deref(), &filename);
    match state.store.add_photo(claims.sub, &filename, &url).await {
        Ok(photo) => {
            tracing::info!(user_id = claims.sub, photo_id = photo.id, bytes = data.len(), "Photo uploaded");
            Ok((StatusCode::CREATED, Json(photo)))
        }
        Err(e) => {
            tracing::error!(user_id = claims.sub, error = %e, "Failed to record photo");
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove orphaned photo");
            }
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Failed to save photo".to_string()))
        }
    }
}

/// DELETE /api/profile/photo/{photo_id}
pub async fn delete_photo(
    State(state): State<AppState>,
    claims: Claims,
    Path(photo_id): Path<i64>,
) -> Result<StatusCode, (StatusCode, String)> {
    if photo_id <= 0 {
        return Err((StatusCode::BAD_REQUEST, "invalid photo id".to_string()));
    }

    let photo = match state.store.delete_photo(claims.sub, photo_id).await {
        Ok(photo) => photo,
        Err(StoreError::NotFound(_)) => {
            return Err((StatusCode::NOT_FOUND, "photo not found".to_string()))
        }
        Err(e) => {
            tracing::error!(user_id = claims.sub, photo_id, error = %e, "Failed to delete photo");
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to delete photo".to_string(),
            ));
        }
    };

    // The row is gone either way; a missing file only gets a log line.
    let path = state.settings.upload_dir.join(&photo.filename);
    if let Err(e) = tokio::fs::remove_file(&path).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove photo file");
    }

    tracing::info!(user_id = claims.sub, photo_id, "Photo deleted");
    Ok(StatusCode::NO_CONTENT)
}
