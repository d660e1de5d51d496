use std::cmp::Ordering;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::agent::oracle::{ToolCallRequest, ToolDefinition};
use crate::canvas::CanvasStore;
use crate::errors::AppError;
use crate::clients::{CommerceBackend, SearchHit, SimilaritySearch};
use crate::models::{
    CanvasPatch, Cart, CartSummary, CartSummaryLine, Product, RecommendationBlock,
};
use crate::session::SessionContext;

pub const GET_PRODUCT_RECOMMENDATIONS: &str = "getProductRecommendations";
pub const INITIALIZE_CHECKOUT: &str = "initializeCheckout";
pub const GET_CART: &str = "getCart";
pub const FOLLOW_UP_PROMPT_SUGGESTIONS: &str = "followUpPromptSuggestions";

/// Heuristic knobs for the recommendation tool. Empirical values, hence
/// configuration rather than constants.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub relevance_threshold: f64,
    pub best_sellers_marker: String,
    pub top_k: usize,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            relevance_threshold: 0.7,
            best_sellers_marker: "Best Sellers".to_string(),
            top_k: 6,
        }
    }
}

/// Result of executing one tool call, one variant per tool. `Failed` carries
/// the textual error handed back to the oracle so the conversation degrades
/// gracefully instead of aborting the stream.
#[derive(Debug)]
pub enum ToolOutcome {
    Recommendations { heading: String, products: Vec<Product> },
    CheckoutInitialized { message: String },
    Cart(CartSummary),
    FollowUp { options: Vec<String> },
    Failed { message: String },
}

impl ToolOutcome {
    /// JSON-serializable shape fed back into the oracle's context and echoed
    /// on the chat stream as a tool-result event.
    pub fn to_result_value(&self) -> Value {
        match self {
            ToolOutcome::Recommendations { heading, products } => {
                json!({ "heading": heading, "products": products })
            }
            ToolOutcome::CheckoutInitialized { message } => Value::String(message.clone()),
            ToolOutcome::Cart(summary) => {
                serde_json::to_value(summary).unwrap_or(Value::Null)
            }
            ToolOutcome::FollowUp { options } => json!(options),
            ToolOutcome::Failed { message } => Value::String(message.clone()),
        }
    }
}

// ── Tool argument schemas ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RecommendationArgs {
    heading: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct FollowUpArgs {
    options: Vec<String>,
}

fn parse_args<T: serde::de::DeserializeOwned>(tool: &str, arguments: &Value) -> Result<T, AppError> {
    serde_json::from_value(arguments.clone()).map_err(|e| AppError::InvalidToolArguments {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Named, independently invocable operations the oracle can request. Each has
/// a typed parameter schema, an execution body, and a declared canvas side
/// effect. Upstream failures never escape a tool body.
pub struct ToolRegistry {
    search: Arc<dyn SimilaritySearch>,
    commerce: Arc<dyn CommerceBackend>,
    canvas: Arc<dyn CanvasStore>,
    settings: ToolSettings,
}

impl ToolRegistry {
    pub fn new(
        search: Arc<dyn SimilaritySearch>,
        commerce: Arc<dyn CommerceBackend>,
        canvas: Arc<dyn CanvasStore>,
        settings: ToolSettings,
    ) -> Self {
        Self { search, commerce, canvas, settings }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: GET_PRODUCT_RECOMMENDATIONS,
                description: "Get product recommendations. The results render as a visual \
                              product grid on the canvas, outside of the chat transcript.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "heading": {
                            "type": "string",
                            "description": "The heading to display above the products",
                        },
                        "prompt": {
                            "type": "string",
                            "description": "The prompt to search for in the product vector database",
                        },
                    },
                    "required": ["heading", "prompt"],
                }),
            },
            ToolDefinition {
                name: INITIALIZE_CHECKOUT,
                description: "Initialize the checkout process for the customer. This will \
                              render a checkout form in the canvas for the user to fill out.",
                parameters: json!({ "type": "object", "properties": {} }),
            },
            ToolDefinition {
                name: GET_CART,
                description: "Get the contents of the current cart",
                parameters: json!({ "type": "object", "properties": {} }),
            },
            ToolDefinition {
                name: FOLLOW_UP_PROMPT_SUGGESTIONS,
                description: "Give the user follow up prompt suggestions. This will render \
                              buttons in the chat for the user to select from for a quick \
                              response. Call this tool when you ask a clarifying question.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "options": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "The response suggestions to display to the user. \
                                            Example: ['Yes', 'No'] or ['Vintage', 'Modern', 'Minimalist']",
                        },
                    },
                    "required": ["options"],
                }),
            },
        ]
    }

    /// Executes one requested tool call. Never returns an error: invalid
    /// arguments and upstream failures fold into `ToolOutcome::Failed` so the
    /// orchestrator can keep the conversation going.
    pub async fn execute(&self, session: &SessionContext, call: &ToolCallRequest) -> ToolOutcome {
        info!(tool = call.name, session = session.canvas_id, "executing tool call");
        match call.name.as_str() {
            GET_PRODUCT_RECOMMENDATIONS => self.product_recommendations(session, call).await,
            INITIALIZE_CHECKOUT => self.initialize_checkout(session).await,
            GET_CART => self.get_cart(session).await,
            FOLLOW_UP_PROMPT_SUGGESTIONS => self.follow_up_suggestions(call),
            other => ToolOutcome::Failed { message: format!("Unknown tool '{other}'") },
        }
    }

    async fn product_recommendations(
        &self,
        session: &SessionContext,
        call: &ToolCallRequest,
    ) -> ToolOutcome {
        let args: RecommendationArgs = match parse_args(&call.name, &call.arguments) {
            Ok(args) => args,
            Err(e) => return ToolOutcome::Failed { message: e.to_string() },
        };

        let hits = match self.search.query(&args.prompt, self.settings.top_k).await {
            Ok(hits) => hits,
            Err(e) => {
                return ToolOutcome::Failed {
                    message: format!("Error retrieving product recommendations: {e}"),
                }
            }
        };

        // The top-item markers are meaningless in a best-sellers context.
        let suppress_markers = args.heading.contains(&self.settings.best_sellers_marker);
        let products = map_products(hits, self.settings.relevance_threshold, suppress_markers);

        // The canvas write is a side effect; its failure must not take the
        // tool result down with it.
        let patch = CanvasPatch {
            product_recommendations: Some(vec![RecommendationBlock {
                heading: args.heading.clone(),
                products: products.clone(),
            }]),
            ..Default::default()
        };
        if let Err(e) = self.canvas.merge(&session.canvas_id, patch).await {
            error!("failed to push recommendations to canvas: {e}");
        }

        ToolOutcome::Recommendations { heading: args.heading, products }
    }

    async fn initialize_checkout(&self, session: &SessionContext) -> ToolOutcome {
        let cart = match self.commerce.retrieve_cart(session.cart_id.as_deref()).await {
            Ok(cart) => cart,
            Err(e) => {
                return ToolOutcome::Failed {
                    message: format!("Error initializing checkout because of: {e}"),
                }
            }
        };

        let has_items = cart.as_ref().map(|c| !c.items.is_empty()).unwrap_or(false);
        if !has_items {
            return ToolOutcome::CheckoutInitialized {
                message: "No items in cart. Add items to the cart before initializing \
                          the checkout process."
                    .to_string(),
            };
        }

        let patch = CanvasPatch { checkout_initialized: Some(true), ..Default::default() };
        if let Err(e) = self.canvas.merge(&session.canvas_id, patch).await {
            return ToolOutcome::Failed {
                message: format!("Error initializing checkout because of: {e}"),
            };
        }

        ToolOutcome::CheckoutInitialized { message: "Checkout initialized".to_string() }
    }

    async fn get_cart(&self, session: &SessionContext) -> ToolOutcome {
        match self.commerce.retrieve_cart(session.cart_id.as_deref()).await {
            Ok(cart) => ToolOutcome::Cart(summarize_cart(cart.unwrap_or_default())),
            Err(e) => ToolOutcome::Failed {
                message: format!("Error retrieving cart. Reason: {e}"),
            },
        }
    }

    fn follow_up_suggestions(&self, call: &ToolCallRequest) -> ToolOutcome {
        match parse_args::<FollowUpArgs>(&call.name, &call.arguments) {
            Ok(args) => ToolOutcome::FollowUp { options: args.options },
            Err(e) => ToolOutcome::Failed { message: e.to_string() },
        }
    }
}

// ── Pure mapping helpers ─────────────────────────────────────────────────────

fn meta_str(metadata: &Value, key: &str) -> String {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn meta_f64(metadata: &Value, key: &str) -> f64 {
    metadata.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

/// Maps ranked index hits into canvas products: defensive re-sort by score,
/// relevance filter, then `best_option`/`might_also_like` marks on the top
/// two survivors (never both on one item, suppressed for best-sellers
/// blocks). Zero survivors is a valid, empty result.
pub(crate) fn map_products(
    mut hits: Vec<SearchHit>,
    threshold: f64,
    suppress_markers: bool,
) -> Vec<Product> {
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    hits.into_iter()
        .filter(|hit| hit.score > threshold)
        .enumerate()
        .map(|(index, hit)| {
            let metadata = &hit.metadata;
            let variant_id = metadata
                .get("variants")
                .and_then(|v| v.get(0))
                .and_then(|v| v.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let images = metadata
                .get("images")
                .and_then(Value::as_array)
                .map(|images| {
                    images
                        .iter()
                        .filter_map(|image| image.get("url").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            Product {
                id: hit.id.clone(),
                variant_id,
                title: meta_str(metadata, "title"),
                price: meta_f64(metadata, "price"),
                thumbnail: meta_str(metadata, "thumbnail"),
                description: meta_str(metadata, "description"),
                score: hit.score,
                images,
                best_option: !suppress_markers && index == 0,
                might_also_like: !suppress_markers && index == 1,
            }
        })
        .collect()
}

fn format_currency(amount: f64) -> String {
    format!("€{amount:.2}")
}

fn summarize_cart(cart: Cart) -> CartSummary {
    let items = cart
        .items
        .iter()
        .map(|line| CartSummaryLine {
            title: line.product_title.clone(),
            price: format_currency(line.unit_price),
            quantity: line.quantity,
            subtotal: format_currency(line.total),
        })
        .collect();
    CartSummary {
        items,
        item_total: format_currency(cart.item_total),
        total: format_currency(cart.total),
    }
}
