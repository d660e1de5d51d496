use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Canvas ────────────────────────────────────────────────────────────────────

/// The per-session UI state document shared between the agent's tool side
/// effects and the client's live canvas view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Canvas {
    pub id: String,
    #[serde(default)]
    pub product_recommendations: Vec<RecommendationBlock>,
    #[serde(default)]
    pub checkout_initialized: bool,
    #[serde(default)]
    pub order_open: bool,
    /// Snapshot of the last completed order, opaque to the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Value>,
    /// Epoch millis, bumped monotonically on every merge. The change feed's
    /// only delivery signal.
    #[serde(default)]
    pub last_updated: u64,
}

impl Canvas {
    /// A fresh empty canvas carrying the session id, used wherever a read
    /// finds no stored document.
    pub fn empty(id: &str) -> Self {
        Self { id: id.to_string(), ..Default::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationBlock {
    pub heading: String,
    pub products: Vec<Product>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    pub title: String,
    pub price: f64,
    pub thumbnail: String,
    pub description: String,
    pub score: f64,
    #[serde(default)]
    pub images: Vec<String>,
    pub best_option: bool,
    pub might_also_like: bool,
}

/// Partial canvas update. The merge policy is schema-driven: sequence fields
/// append, scalar fields overwrite, absent fields are untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanvasPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_recommendations: Option<Vec<RecommendationBlock>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout_initialized: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_open: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Value>,
}

// ── Cart (commerce backend projection) ───────────────────────────────────────

/// The slice of the commerce backend's cart shape the agent cares about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Cart {
    pub id: String,
    #[serde(default)]
    pub items: Vec<CartLine>,
    #[serde(default)]
    pub item_total: f64,
    #[serde(default)]
    pub total: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CartLine {
    #[serde(default)]
    pub product_title: String,
    #[serde(default)]
    pub quantity: u32,
    #[serde(default)]
    pub unit_price: f64,
    #[serde(default)]
    pub total: f64,
}

/// Compact cart summary fed back to the oracle by the `getCart` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartSummary {
    pub items: Vec<CartSummaryLine>,
    pub item_total: String,
    pub total: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartSummaryLine {
    pub title: String,
    pub price: String,
    pub quantity: u32,
    pub subtotal: String,
}

// ── Chat wire types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Events pushed over the `/chat` stream. Tagged so the client can react to
/// text deltas and tool activity independently.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    TextDelta { content: String },
    ToolCall { tool: String, arguments: Value },
    ToolResult { tool: String, result: Value },
    Done,
    Error { message: String },
}
