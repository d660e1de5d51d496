pub mod feed;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::AppError;
use crate::models::{Canvas, CanvasPatch};

/// Server-held, per-session canvas document store.
///
/// One document per session id, created lazily. `merge` is the only write
/// path downstream consumers observe; the change feed infers updates purely
/// from the stored `last_updated` value.
#[async_trait]
pub trait CanvasStore: Send + Sync {
    /// Current snapshot; synthesizes an empty canvas carrying the id when no
    /// document exists (absence is not an error for reads).
    async fn get(&self, session_id: &str) -> Result<Canvas, AppError>;

    /// Applies the field-level merge policy (sequences append, scalars
    /// overwrite), stamps `last_updated`, returns the full new snapshot.
    /// Atomic per session id.
    async fn merge(&self, session_id: &str, patch: CanvasPatch) -> Result<Canvas, AppError>;

    /// Removes the document entirely. Deleting an absent document succeeds.
    async fn delete(&self, session_id: &str) -> Result<(), AppError>;
}

/// Applies a patch to a canvas in place. Sequence fields append to preserve
/// previously pushed blocks; scalars and the order snapshot overwrite.
fn apply_patch(canvas: &mut Canvas, patch: CanvasPatch) {
    if let Some(blocks) = patch.product_recommendations {
        canvas.product_recommendations.extend(blocks);
    }
    if let Some(flag) = patch.checkout_initialized {
        canvas.checkout_initialized = flag;
    }
    if let Some(flag) = patch.order_open {
        canvas.order_open = flag;
    }
    if let Some(order) = patch.order {
        canvas.order = Some(order);
    }
}

/// Next `last_updated` value. Strictly greater than the previous one even
/// when consecutive merges land within the same clock millisecond — the feed
/// uses `new > last_seen` as its sole delivery predicate.
fn next_timestamp(previous: u64) -> u64 {
    let now = Utc::now().timestamp_millis().max(0) as u64;
    now.max(previous + 1)
}

/// In-memory store. The map mutex is the per-session serialization point for
/// concurrent merges; cross-session contention does not exist in practice
/// because updates are human-paced and keyed by independent session ids.
#[derive(Clone, Default)]
pub struct MemoryCanvasStore {
    inner: Arc<Mutex<HashMap<String, Canvas>>>,
}

impl MemoryCanvasStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CanvasStore for MemoryCanvasStore {
    async fn get(&self, session_id: &str) -> Result<Canvas, AppError> {
        let map = self.inner.lock().await;
        Ok(map
            .get(session_id)
            .cloned()
            .unwrap_or_else(|| Canvas::empty(session_id)))
    }

    async fn merge(&self, session_id: &str, patch: CanvasPatch) -> Result<Canvas, AppError> {
        let mut map = self.inner.lock().await;
        let canvas = map
            .entry(session_id.to_string())
            .or_insert_with(|| Canvas::empty(session_id));
        apply_patch(canvas, patch);
        canvas.last_updated = next_timestamp(canvas.last_updated);
        debug!(
            session_id,
            last_updated = canvas.last_updated,
            "canvas merged"
        );
        Ok(canvas.clone())
    }

    async fn delete(&self, session_id: &str) -> Result<(), AppError> {
        let mut map = self.inner.lock().await;
        map.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecommendationBlock;

    fn block(heading: &str) -> RecommendationBlock {
        RecommendationBlock { heading: heading.to_string(), products: vec![] }
    }

    #[tokio::test]
    async fn get_synthesizes_empty_canvas() {
        let store = MemoryCanvasStore::new();
        let canvas = store.get("s1").await.unwrap();
        assert_eq!(canvas.id, "s1");
        assert!(canvas.product_recommendations.is_empty());
        assert!(!canvas.checkout_initialized);
        assert_eq!(canvas.last_updated, 0);
    }

    #[tokio::test]
    async fn sequences_append_and_scalars_overwrite() {
        let store = MemoryCanvasStore::new();

        store
            .merge("s1", CanvasPatch {
                product_recommendations: Some(vec![block("Mid-century chairs")]),
                checkout_initialized: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();

        let canvas = store
            .merge("s1", CanvasPatch {
                product_recommendations: Some(vec![block("Art deco lamps")]),
                checkout_initialized: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();

        let headings: Vec<_> = canvas
            .product_recommendations
            .iter()
            .map(|b| b.heading.as_str())
            .collect();
        assert_eq!(headings, ["Mid-century chairs", "Art deco lamps"]);
        assert!(canvas.checkout_initialized);
    }

    #[tokio::test]
    async fn absent_patch_fields_leave_canvas_untouched() {
        let store = MemoryCanvasStore::new();
        store
            .merge("s1", CanvasPatch {
                checkout_initialized: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();

        let canvas = store
            .merge("s1", CanvasPatch {
                order_open: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(canvas.checkout_initialized);
        assert!(canvas.order_open);
    }

    #[tokio::test]
    async fn last_updated_strictly_increases_under_rapid_merges() {
        let store = MemoryCanvasStore::new();
        let mut previous = 0;
        for _ in 0..100 {
            let canvas = store.merge("s1", CanvasPatch::default()).await.unwrap();
            assert!(canvas.last_updated > previous);
            previous = canvas.last_updated;
        }
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_resets_state() {
        let store = MemoryCanvasStore::new();
        store.delete("never-existed").await.unwrap();

        store
            .merge("s1", CanvasPatch {
                checkout_initialized: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        store.delete("s1").await.unwrap();
        store.delete("s1").await.unwrap();

        let canvas = store.get("s1").await.unwrap();
        assert!(!canvas.checkout_initialized);
        assert_eq!(canvas.last_updated, 0);
    }
}
