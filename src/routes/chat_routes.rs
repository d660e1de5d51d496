use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::agent::oracle::Turn;
use crate::errors::AppError;
use crate::models::{ChatRequest, ChatRole};
use crate::routes::{error_status, AppState};
use crate::session::SessionContext;

/// POST `/chat` — runs one streaming exchange.
///
/// The caller supplies the full conversation history every time (no
/// server-side history between exchanges). The response is an SSE stream of
/// tagged `AgentEvent`s: `text_delta` for incremental assistant text,
/// `tool_call`/`tool_result` markers for tool activity, then `done`. Canvas
/// mutations caused by tools are observed separately on the canvas stream.
pub async fn chat_handler(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Json(request): Json<ChatRequest>,
) -> Response {
    let last_user_message = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == ChatRole::User)
        .map(|m| m.content.trim());
    if last_user_message.map(str::is_empty).unwrap_or(true) {
        let err = AppError::EmptyField { field_name: "messages".to_string() };
        return (error_status(&err), err.to_string()).into_response();
    }

    let turns: Vec<Turn> = request
        .messages
        .into_iter()
        .map(|m| match m.role {
            ChatRole::User => Turn::User(m.content),
            ChatRole::Assistant => Turn::Assistant(m.content),
        })
        .collect();

    info!(session = session.canvas_id, turns = turns.len(), "starting chat exchange");

    // The agent runs detached; dropping the SSE response (client disconnect)
    // closes the channel, which the agent observes and treats as a clean
    // cancellation.
    let (events_tx, events_rx) = mpsc::channel(64);
    let agent = state.agent.clone();
    tokio::spawn(async move {
        if let Err(e) = agent.run(&session, turns, events_tx).await {
            warn!("chat exchange ended with error: {e}");
        }
    });

    let stream = ReceiverStream::new(events_rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok::<_, Infallible>(Event::default().data(data))
    });

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}
