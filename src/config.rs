use std::time::Duration;

/// Runtime configuration, read once from the environment at startup and
/// passed down explicitly. `.env` loading happens in `main` via dotenvy.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,

    // Text-generation oracle (OpenAI-compatible chat completions endpoint)
    pub oracle_base_url: String,
    pub oracle_api_key: String,
    pub oracle_model: String,

    // Similarity search index (Upstash-style REST)
    pub vector_url: String,
    pub vector_token: String,
    pub vector_top_k: usize,

    // Commerce backend
    pub commerce_base_url: String,
    pub commerce_publishable_key: String,

    // Agent heuristics — configurable because they are empirical, not principled
    pub max_agent_steps: usize,
    pub relevance_threshold: f64,
    pub best_sellers_marker: String,

    // Canvas change feed
    pub feed_poll_interval: Duration,
    pub feed_error_backoff: Duration,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let oracle_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY must be set (copy .env.example to .env)"))?;

        Ok(Self {
            port: env_parse("PORT", 3000),

            oracle_base_url: env_or("OPENAI_API_BASE_URL", "https://api.openai.com"),
            oracle_api_key,
            oracle_model: env_or("OPENAI_MODEL", "gpt-4o-mini"),

            vector_url: std::env::var("VECTOR_REST_URL")
                .map_err(|_| anyhow::anyhow!("VECTOR_REST_URL must be set"))?,
            vector_token: std::env::var("VECTOR_REST_TOKEN")
                .map_err(|_| anyhow::anyhow!("VECTOR_REST_TOKEN must be set"))?,
            vector_top_k: env_parse("VECTOR_TOP_K", 6),

            commerce_base_url: env_or("COMMERCE_BACKEND_URL", "http://localhost:9000"),
            commerce_publishable_key: env_or("COMMERCE_PUBLISHABLE_KEY", ""),

            max_agent_steps: env_parse("MAX_AGENT_STEPS", 5),
            relevance_threshold: env_parse("RELEVANCE_THRESHOLD", 0.7),
            best_sellers_marker: env_or("BEST_SELLERS_MARKER", "Best Sellers"),

            feed_poll_interval: Duration::from_millis(env_parse("FEED_POLL_INTERVAL_MS", 1000)),
            feed_error_backoff: Duration::from_millis(env_parse("FEED_ERROR_BACKOFF_MS", 5000)),
        })
    }
}
