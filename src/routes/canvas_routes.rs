use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::canvas::feed::canvas_feed;
use crate::models::CanvasPatch;
use crate::routes::{error_status, AppState};
use crate::session::clear_session_cookie;

#[derive(Deserialize)]
pub struct MergeBody {
    pub input: CanvasPatch,
}

/// GET `/canvas/{id}` — current snapshot; an absent document comes back as
/// the empty shape carrying the id, never an error.
pub async fn get_canvas_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.store.get(&id).await {
        Ok(canvas) => Json(json!({ "canvas": canvas })).into_response(),
        Err(e) => {
            error!("canvas read failed: {e}");
            (error_status(&e), e.to_string()).into_response()
        }
    }
}

/// POST `/canvas/{id}` — applies the field-level merge policy (sequences
/// append, scalars overwrite) and stamps the update timestamp.
pub async fn post_canvas_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<MergeBody>,
) -> Response {
    match state.store.merge(&id, body.input).await {
        Ok(_) => Json(json!({ "result": "OK" })).into_response(),
        Err(e) => {
            error!("canvas merge failed: {e}");
            (error_status(&e), e.to_string()).into_response()
        }
    }
}

/// DELETE `/canvas/{id}` — removes the document (idempotent) and invalidates
/// the session cookie so the next visit mints a fresh identifier.
pub async fn delete_canvas_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
    jar: CookieJar,
) -> Response {
    match state.store.delete(&id).await {
        Ok(()) => (StatusCode::CREATED, clear_session_cookie(jar)).into_response(),
        Err(e) => {
            error!("canvas delete failed: {e}");
            (error_status(&e), e.to_string()).into_response()
        }
    }
}

/// GET `/canvas/{id}/stream` — long-lived SSE channel of canvas snapshots.
/// The first event fires immediately; afterwards only snapshots with a newer
/// `last_updated` are pushed. Client reconnects start fresh: only current
/// state matters.
pub async fn stream_canvas_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let snapshots = canvas_feed(
        state.store.clone(),
        state.feed_registry.clone(),
        id,
        state.feed_config.clone(),
    );

    let stream = snapshots.map(|canvas| {
        let data = serde_json::to_string(&json!({ "canvas": canvas })).unwrap_or_default();
        Ok(Event::default().data(data))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
