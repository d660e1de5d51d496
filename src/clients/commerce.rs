use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error};

use crate::errors::AppError;
use crate::models::Cart;

/// The commerce backend consumed at its interface boundary. The agent only
/// reads cart state; cart mutation and order placement stay in the web front
/// end, and completed orders reach the canvas through the public merge
/// endpoint.
#[async_trait]
pub trait CommerceBackend: Send + Sync {
    /// Current cart for the session, `None` when the session has no cart yet
    /// or the cart id is stale.
    async fn retrieve_cart(&self, cart_id: Option<&str>) -> Result<Option<Cart>, AppError>;
}

/// REST client for a Medusa-style store API.
#[derive(Clone)]
pub struct MedusaClient {
    http: reqwest::Client,
    base_url: String,
    publishable_key: String,
}

impl MedusaClient {
    pub fn new(http: reqwest::Client, base_url: &str, publishable_key: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            publishable_key: publishable_key.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CartResponse {
    cart: Cart,
}

#[async_trait]
impl CommerceBackend for MedusaClient {
    async fn retrieve_cart(&self, cart_id: Option<&str>) -> Result<Option<Cart>, AppError> {
        let Some(cart_id) = cart_id else {
            return Ok(None);
        };

        let url = format!("{}/store/carts/{cart_id}", self.base_url);
        debug!(cart_id, "retrieving cart");

        let response = self
            .http
            .get(&url)
            .header("x-publishable-api-key", &self.publishable_key)
            .query(&[(
                "fields",
                "*items, *items.product, *items.variant, +items.total, +item_total, +total",
            )])
            .send()
            .await
            .map_err(|e| {
                error!("cart retrieval failed: {e}");
                AppError::CommerceFailed { message: e.to_string() }
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            error!("commerce backend returned {status} for cart {cart_id}");
            return Err(AppError::CommerceFailed {
                message: format!("backend returned {status}"),
            });
        }

        let parsed: CartResponse = response.json().await.map_err(|e| {
            AppError::CommerceFailed { message: format!("malformed cart response: {e}") }
        })?;

        Ok(Some(parsed.cart))
    }
}
