//! User profiles and profile photos.
//!
//! Photos are written flat into the upload directory as
//! `<user_id>_<nanos><.ext>` and served back under `/uploads`.

pub mod routes;

use crate::db::models::UserId;

/// URL path under which uploaded photos are served.
pub const PHOTO_PATH: &str = "/uploads";

/// Upper bound for a single photo upload.
pub const PHOTO_MAX_BYTES: usize = 10 * 1024 * 1024;

/// Lowercased extension of an uploaded file name, dot included.
/// Anything that is not a short alphanumeric extension is dropped.
pub fn photo_extension(original: Option<&str>) -> String {
    original
        .and_then(|name| std::path::Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

pub fn photo_filename(user_id: UserId, nanos: i64, original: Option<&str>) -> String {
    format!("{}_{}{}", user_id, nanos, photo_extension(original))
}

/// Public URL of a stored photo, absolute when a base URL is configured.
pub fn photo_url(base_url: Option<&str>, filename: &str) -> String {
    match base_url {
        Some(base) => format!("{base}{PHOTO_PATH}/{filename}"),
        None => format!("{PHOTO_PATH}/{filename}"),
    }
}
