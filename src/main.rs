mod agent;
mod canvas;
mod clients;
mod config;
mod errors;
mod models;
mod routes;
mod session;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::agent::oracle::OpenAiOracle;
use crate::agent::tools::{ToolRegistry, ToolSettings};
use crate::agent::Agent;
use crate::canvas::feed::{FeedConfig, FeedRegistry};
use crate::canvas::{CanvasStore, MemoryCanvasStore};
use crate::clients::{MedusaClient, VectorIndexClient};
use crate::config::Config;
use crate::routes::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storefront_agent=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let oracle = Arc::new(OpenAiOracle::new(
        http.clone(),
        &config.oracle_base_url,
        &config.oracle_api_key,
        &config.oracle_model,
    ));
    let search = Arc::new(VectorIndexClient::new(
        http.clone(),
        &config.vector_url,
        &config.vector_token,
    ));
    let commerce = Arc::new(MedusaClient::new(
        http,
        &config.commerce_base_url,
        &config.commerce_publishable_key,
    ));

    let store: Arc<dyn CanvasStore> = Arc::new(MemoryCanvasStore::new());

    let tools = Arc::new(ToolRegistry::new(
        search,
        commerce,
        store.clone(),
        ToolSettings {
            relevance_threshold: config.relevance_threshold,
            best_sellers_marker: config.best_sellers_marker.clone(),
            top_k: config.vector_top_k,
        },
    ));
    let agent = Arc::new(Agent::new(oracle, tools, config.max_agent_steps));

    // ── Router ────────────────────────────────────────────────────────────────
    let state = AppState {
        store,
        feed_registry: FeedRegistry::new(),
        feed_config: FeedConfig {
            poll_interval: config.feed_poll_interval,
            error_backoff: config.feed_error_backoff,
        },
        agent,
    };
    let app = build_router(state);

    // ── Listen ────────────────────────────────────────────────────────────────
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}/");

    axum::serve(listener, app).await?;
    Ok(())
}
