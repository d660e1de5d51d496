pub mod canvas_routes;
pub mod chat_routes;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agent::Agent;
use crate::canvas::feed::{FeedConfig, FeedRegistry};
use crate::canvas::CanvasStore;
use crate::errors::AppError;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CanvasStore>,
    pub feed_registry: Arc<FeedRegistry>,
    pub feed_config: FeedConfig,
    pub agent: Arc<Agent>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/canvas/{id}",
            get(canvas_routes::get_canvas_handler)
                .post(canvas_routes::post_canvas_handler)
                .delete(canvas_routes::delete_canvas_handler),
        )
        .route("/canvas/{id}/stream", get(canvas_routes::stream_canvas_handler))
        .route("/chat", post(chat_routes::chat_handler))
        .layer(axum::middleware::from_fn(crate::session::bind_session))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub(crate) fn error_status(err: &AppError) -> StatusCode {
    if err.is_validation() {
        StatusCode::BAD_REQUEST
    } else if err.is_upstream_unavailable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}
