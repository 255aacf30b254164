//! The HTTP surface.
//!
//! Every API handler follows the same shape: acquire the broker session,
//! run one operation, flush the state file if the operation dirtied it,
//! and answer with a `{"data": ...}` or `{"error": "..."}` JSON envelope.
//! Unmatched paths fall through to the static asset directory.

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use leapgate_core::ops::{self, ZoneCommand};
use leapgate_core::session::Session;
use leapgate_core::{Error, SessionManager, StateStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Shared state accessible from every handler.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
    pub store: Arc<StateStore>,
}

/// Build the full router, optionally nested under a secret base path.
pub fn router(state: AppState, asset_dir: &Path, base_path: Option<&str>) -> Router {
    let api = Router::new()
        .route("/devices", get(devices))
        .route("/programming_models", get(programming_models))
        .route("/clear_cache", get(clear_cache).post(clear_cache))
        .route("/command/all_off", get(all_off).post(all_off))
        .route("/command/set_level", get(set_level).post(set_level))
        .route(
            "/command/press_and_release",
            get(press_and_release).post(press_and_release),
        )
        .route("/scenes", get(scenes))
        .route("/scene/activate", get(activate_scene).post(activate_scene))
        .route(
            "/scene/activate_by_name",
            get(activate_scene_by_name).post(activate_scene_by_name),
        )
        .fallback_service(ServeDir::new(asset_dir))
        .with_state(state);

    let app = match base_path {
        Some(prefix) => Router::new().nest(prefix, api),
        None => api,
    };
    app.layer(TraceLayer::new_for_http())
}

// ── Query parameters ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SetLevelParams {
    #[serde(rename = "type", default)]
    command_type: String,
    #[serde(default)]
    zone: String,
    level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ButtonParams {
    #[serde(default)]
    button: String,
}

#[derive(Debug, Deserialize)]
struct SceneParams {
    #[serde(default)]
    scene: String,
}

#[derive(Debug, Deserialize)]
struct NameParams {
    #[serde(default)]
    name: String,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn devices(State(state): State<AppState>) -> Response {
    let session = match state.sessions.get_session().await {
        Ok(session) => session,
        Err(error) => return error_response(&error),
    };
    respond(&state, ops::get_devices(session.client()).await)
}

async fn programming_models(State(state): State<AppState>) -> Response {
    let session = match state.sessions.get_session().await {
        Ok(session) => session,
        Err(error) => return error_response(&error),
    };
    respond(
        &state,
        ops::get_programming_models(session.client(), &state.store).await,
    )
}

async fn clear_cache(State(state): State<AppState>) -> Response {
    state.store.clear_cache();
    respond(&state, Ok(true))
}

async fn all_off(State(state): State<AppState>) -> Response {
    run_command(&state, |session| async move {
        ops::all_off(session.client()).await?;
        Ok(true)
    })
    .await
}

async fn set_level(State(state): State<AppState>, Query(params): Query<SetLevelParams>) -> Response {
    run_command(&state, |session| async move {
        let command = ZoneCommand::parse(&params.command_type, params.level.as_deref())?;
        ops::send_zone_command(session.client(), &params.zone, &command).await?;
        Ok(true)
    })
    .await
}

async fn press_and_release(
    State(state): State<AppState>,
    Query(params): Query<ButtonParams>,
) -> Response {
    run_command(&state, |session| async move {
        ops::press_and_release(session.client(), &params.button).await?;
        Ok(true)
    })
    .await
}

async fn scenes(State(state): State<AppState>) -> Response {
    let session = match state.sessions.get_session().await {
        Ok(session) => session,
        Err(error) => return error_response(&error),
    };
    respond(&state, ops::get_scenes(session.client()).await)
}

async fn activate_scene(
    State(state): State<AppState>,
    Query(params): Query<SceneParams>,
) -> Response {
    run_command(&state, |session| async move {
        ops::activate_scene(session.client(), &params.scene).await?;
        Ok(true)
    })
    .await
}

async fn activate_scene_by_name(
    State(state): State<AppState>,
    Query(params): Query<NameParams>,
) -> Response {
    run_command(&state, |session| async move {
        ops::activate_scene_by_name(session.client(), &params.name).await
    })
    .await
}

// ── Response plumbing ────────────────────────────────────────────────

async fn run_command<F, Fut, T>(state: &AppState, operation: F) -> Response
where
    F: FnOnce(Arc<Session>) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
    T: Serialize,
{
    let session = match state.sessions.get_session().await {
        Ok(session) => session,
        Err(error) => return error_response(&error),
    };
    respond(state, operation(session).await)
}

/// Persist any pending state mutation, then wrap the result in the JSON
/// envelope. A persist failure fails the whole request even though the
/// in-memory mutation stands.
fn respond<T: Serialize>(state: &AppState, result: Result<T, Error>) -> Response {
    let value = match result {
        Ok(value) => value,
        Err(error) => return error_response(&error),
    };
    if let Err(error) = state.store.persist_if_dirty() {
        return error_response(&error);
    }
    match serde_json::to_value(value) {
        Ok(value) => (StatusCode::OK, Json(json!({ "data": value }))).into_response(),
        Err(error) => error_response(&Error::encode("response body", error)),
    }
}

fn error_response(error: &Error) -> Response {
    let status = if error.is_bad_request() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}
