use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware, Json, Router,
};
use serde_json::json;

use crate::auth::middleware::{Claims, JwtSecret};
use crate::db;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    State(state): State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// GET /api/leaderboard
/// All users ordered by rating. Requires a valid JWT.
async fn leaderboard(
    _claims: Claims,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let users = db::users::leaderboard(&state.db).await.map_err(|err| {
        tracing::error!(error = %err, "leaderboard query failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(json!(users)))
}

/// GET /api/users/{username}
/// Profile plus completed-match history, newest first. Requires a valid JWT.
async fn user_profile(
    _claims: Claims,
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let user = db::users::get_by_username(&state.db, &username)
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "profile query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    let history = db::matches::history_for_user(&state.db, user.id)
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "history query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(json!({
        "user": user,
        "online": state.connections.is_online(user.id),
        "history": history,
    })))
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Authenticated REST surface (JWT required, Claims extractor validates token)
    let api_routes = Router::new()
        .route("/api/leaderboard", axum::routing::get(leaderboard))
        .route("/api/users/{username}", axum::routing::get(user_profile));

    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(api_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}
