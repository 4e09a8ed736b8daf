use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post, put};
use axum::{middleware, Json, Router};
use std::path::Path;
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::auth::account;
use crate::auth::middleware::JwtSecret;
use crate::chat::rooms;
use crate::profile::{self, routes as profile_routes};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router. `upload_dir` is served under `/uploads`.
///
/// Must be served with `into_make_service_with_connect_info::<SocketAddr>()`,
/// the auth rate limiter keys on the peer address.
pub fn build_router(state: AppState, upload_dir: impl AsRef<Path>) -> Router {
    // 10 requests per minute per IP, burst of 10
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(6)
            .burst_size(10)
            .finish()
            .expect("static governor config is valid"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // Forget idle peers once a minute
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    let auth_routes = Router::new()
        .route("/api/register", post(account::register))
        .route("/api/login", post(account::login))
        .route("/api/refresh", post(account::refresh))
        .layer(GovernorLayer {
            config: governor_config,
        });

    // Bearer JWT required, checked by the Claims extractor
    let authenticated_routes = Router::new()
        .route("/api/rooms/direct", post(rooms::create_direct_room))
        .route("/api/users", get(rooms::list_users))
        .route("/api/profile", get(profile_routes::get_profile))
        .route(
            "/api/profile/photo",
            put(profile_routes::upload_photo)
                .layer(DefaultBodyLimit::max(profile::PHOTO_MAX_BYTES)),
        )
        .route(
            "/api/profile/photo/{photo_id}",
            delete(profile_routes::delete_photo),
        );

    // Auth via ?access_token= or Bearer header, checked before upgrade
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(auth_routes)
        .merge(authenticated_routes)
        .merge(ws_routes)
        .merge(health)
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
