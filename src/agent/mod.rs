pub mod oracle;
pub mod tools;

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::agent::oracle::{CompletionOracle, OracleRequest, StepOutcome, Turn};
use crate::agent::tools::ToolRegistry;
use crate::errors::AppError;
use crate::models::AgentEvent;
use crate::session::SessionContext;

/// Fixed instruction for every exchange. Product listings and clarifying
/// options must go through tools so the canvas, not the transcript, renders
/// them.
const SYSTEM_INSTRUCTION: &str = "\
You are a seasoned, charming vintage furniture salesperson working at a stylish boutique. \
Your goal is to help users discover products, provide tailored recommendations, and guide \
them smoothly through the checkout process.

Your tone should always be friendly, helpful, and conversational; witty, concise, and \
engaging. Describe the vibe or character of a product or the store when appropriate, but \
keep it short and punchy.

ABSOLUTE RULES - DO NOT BREAK THESE:

- NEVER list or describe specific products in your text response.
- NEVER include images in your text response.
- NEVER discuss topics unrelated to the store, its products, or the shopping experience.

Use tools instead of manual responses for product recommendations or clarifications:

- followUpPromptSuggestions: give the user follow up prompt suggestions, rendered as \
quick-reply buttons. Call this whenever you ask a clarifying question.
- getProductRecommendations: retrieve product recommendations. They render as a visual \
product grid outside of your context. Introduce the results with a single short sentence, \
e.g. \"I've added a few pieces that might interest you to the canvas.\" Do not describe \
or list the results.
- getCart: retrieve the contents of the current cart. Use it to inform your \
recommendations and don't recommend items already in the cart.
- initializeCheckout: start the checkout process; this renders a checkout form in the \
canvas.

You can chain tools, use the same tool multiple times in a row, and use the same tool \
with different parameters as needed.";

fn system_prompt() -> String {
    let now = chrono::Local::now();
    let today = now.format("%A, %e %B %Y");
    let time = now.format("%H:%M");
    format!("{SYSTEM_INSTRUCTION}\n\nCurrent context: today is {today}. The time is {time}.")
}

/// Drives one streaming exchange: a bounded loop that submits the
/// accumulated turns plus the tool registry to the oracle, executes any
/// requested tool calls, feeds results back into context, and repeats until
/// the oracle answers in plain text or the step budget runs out.
///
/// Conversation history is stateless-per-call: the caller resends the full
/// history on every request and nothing is kept between exchanges.
pub struct Agent {
    oracle: Arc<dyn CompletionOracle>,
    tools: Arc<ToolRegistry>,
    max_steps: usize,
}

impl Agent {
    pub fn new(oracle: Arc<dyn CompletionOracle>, tools: Arc<ToolRegistry>, max_steps: usize) -> Self {
        Self { oracle, tools, max_steps }
    }

    /// Runs the step loop, emitting `AgentEvent`s into `events`. The events
    /// channel closing (client disconnect) terminates the run cleanly; tool
    /// failures are surfaced to the oracle as textual results and never end
    /// the exchange.
    pub async fn run(
        &self,
        session: &SessionContext,
        mut turns: Vec<Turn>,
        events: mpsc::Sender<AgentEvent>,
    ) -> Result<(), AppError> {
        let system = system_prompt();
        let definitions = self.tools.definitions();

        for step in 0..self.max_steps {
            debug!(step, session = session.canvas_id, "agent step");

            // Forward oracle text deltas to the caller as they arrive. If the
            // caller is gone the forwarder drops the receiver, which the
            // oracle client observes as a failed send and aborts with
            // `Cancelled`.
            let (delta_tx, mut delta_rx) = mpsc::channel::<String>(64);
            let forward_to = events.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(content) = delta_rx.recv().await {
                    if forward_to.send(AgentEvent::TextDelta { content }).await.is_err() {
                        break;
                    }
                }
            });

            let outcome = self
                .oracle
                .step(
                    OracleRequest { system: &system, turns: &turns, tools: &definitions },
                    delta_tx,
                )
                .await;
            let _ = forwarder.await;

            match outcome {
                Err(e) if e.is_cancelled() => {
                    info!(session = session.canvas_id, "exchange cancelled by client");
                    return Ok(());
                }
                Err(e) => {
                    error!("oracle step failed: {e}");
                    let _ = events.send(AgentEvent::Error { message: e.to_string() }).await;
                    return Err(e);
                }
                Ok(StepOutcome::Final(text)) => {
                    turns.push(Turn::Assistant(text));
                    break;
                }
                Ok(StepOutcome::ToolCalls(calls)) => {
                    for call in &calls {
                        let event = AgentEvent::ToolCall {
                            tool: call.name.clone(),
                            arguments: call.arguments.clone(),
                        };
                        if events.send(event).await.is_err() {
                            return Ok(());
                        }
                    }

                    // Independent calls run concurrently; results are kept in
                    // request order so the next oracle call sees a
                    // deterministic context.
                    let outcomes =
                        join_all(calls.iter().map(|call| self.tools.execute(session, call))).await;

                    turns.push(Turn::ToolCalls(calls.clone()));
                    for (call, outcome) in calls.iter().zip(outcomes) {
                        let result = outcome.to_result_value();
                        let event = AgentEvent::ToolResult {
                            tool: call.name.clone(),
                            result: result.clone(),
                        };
                        if events.send(event).await.is_err() {
                            return Ok(());
                        }
                        turns.push(Turn::ToolResult {
                            call_id: call.id.clone(),
                            tool: call.name.clone(),
                            content: result,
                        });
                    }
                }
            }
        }

        let _ = events.send(AgentEvent::Done).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::oracle::ToolCallRequest;
    use crate::agent::tools::{
        ToolSettings, FOLLOW_UP_PROMPT_SUGGESTIONS, GET_CART, GET_PRODUCT_RECOMMENDATIONS,
    };
    use crate::canvas::MemoryCanvasStore;
    use crate::clients::{CommerceBackend, SearchHit, SimilaritySearch};
    use crate::models::Cart;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoSearch;

    #[async_trait]
    impl SimilaritySearch for NoSearch {
        async fn query(&self, _text: &str, _top_k: usize) -> Result<Vec<SearchHit>, AppError> {
            Ok(vec![])
        }
    }

    struct NoCart;

    #[async_trait]
    impl CommerceBackend for NoCart {
        async fn retrieve_cart(&self, _cart_id: Option<&str>) -> Result<Option<Cart>, AppError> {
            Ok(None)
        }
    }

    fn test_registry() -> Arc<ToolRegistry> {
        Arc::new(ToolRegistry::new(
            Arc::new(NoSearch),
            Arc::new(NoCart),
            Arc::new(MemoryCanvasStore::new()),
            ToolSettings::default(),
        ))
    }

    fn session() -> SessionContext {
        SessionContext { canvas_id: "s1".to_string(), cart_id: None }
    }

    async fn collect_events(mut rx: mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut events = vec![];
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    /// Oracle that requests the same tool call on every step, forever.
    struct AlwaysToolCalls {
        steps: AtomicUsize,
    }

    #[async_trait]
    impl CompletionOracle for AlwaysToolCalls {
        async fn step(
            &self,
            _request: OracleRequest<'_>,
            _deltas: mpsc::Sender<String>,
        ) -> Result<StepOutcome, AppError> {
            let step = self.steps.fetch_add(1, Ordering::SeqCst);
            Ok(StepOutcome::ToolCalls(vec![ToolCallRequest {
                id: format!("call_{step}"),
                name: FOLLOW_UP_PROMPT_SUGGESTIONS.to_string(),
                arguments: json!({ "options": ["Yes", "No"] }),
            }]))
        }
    }

    #[tokio::test]
    async fn step_loop_terminates_at_budget() {
        let oracle = Arc::new(AlwaysToolCalls { steps: AtomicUsize::new(0) });
        let agent = Agent::new(oracle.clone(), test_registry(), 5);
        let (tx, rx) = mpsc::channel(256);

        agent.run(&session(), vec![Turn::User("hi".into())], tx).await.unwrap();
        let events = collect_events(rx).await;

        assert_eq!(oracle.steps.load(Ordering::SeqCst), 5);
        let tool_calls = events
            .iter()
            .filter(|e| matches!(e, AgentEvent::ToolCall { .. }))
            .count();
        assert_eq!(tool_calls, 5);
        assert!(matches!(events.last(), Some(AgentEvent::Done)));
    }

    /// Oracle that streams a fixed answer in two deltas.
    struct TextOracle;

    #[async_trait]
    impl CompletionOracle for TextOracle {
        async fn step(
            &self,
            _request: OracleRequest<'_>,
            deltas: mpsc::Sender<String>,
        ) -> Result<StepOutcome, AppError> {
            for part in ["Wel", "come!"] {
                if deltas.send(part.to_string()).await.is_err() {
                    return Err(AppError::Cancelled);
                }
            }
            Ok(StepOutcome::Final("Welcome!".to_string()))
        }
    }

    #[tokio::test]
    async fn final_text_streams_deltas_then_done() {
        let agent = Agent::new(Arc::new(TextOracle), test_registry(), 5);
        let (tx, rx) = mpsc::channel(256);

        agent.run(&session(), vec![Turn::User("hi".into())], tx).await.unwrap();
        let events = collect_events(rx).await;

        let text: String = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::TextDelta { content } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Welcome!");
        assert!(matches!(events.last(), Some(AgentEvent::Done)));
    }

    /// Oracle that asks for an unknown tool once, then answers in text.
    struct BadToolThenText {
        steps: AtomicUsize,
    }

    #[async_trait]
    impl CompletionOracle for BadToolThenText {
        async fn step(
            &self,
            request: OracleRequest<'_>,
            _deltas: mpsc::Sender<String>,
        ) -> Result<StepOutcome, AppError> {
            if self.steps.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(StepOutcome::ToolCalls(vec![ToolCallRequest {
                    id: "call_0".to_string(),
                    name: "generateImage".to_string(),
                    arguments: json!({}),
                }]));
            }
            // The failed call must be visible to the oracle as a turn.
            assert!(request
                .turns
                .iter()
                .any(|t| matches!(t, Turn::ToolResult { tool, .. } if tool == "generateImage")));
            Ok(StepOutcome::Final("Let's stick to furniture.".to_string()))
        }
    }

    #[tokio::test]
    async fn tool_failure_degrades_gracefully() {
        let oracle = Arc::new(BadToolThenText { steps: AtomicUsize::new(0) });
        let agent = Agent::new(oracle, test_registry(), 5);
        let (tx, rx) = mpsc::channel(256);

        agent.run(&session(), vec![Turn::User("hi".into())], tx).await.unwrap();
        let events = collect_events(rx).await;

        let failed = events.iter().any(|e| match e {
            AgentEvent::ToolResult { result, .. } => {
                result.as_str().map(|s| s.contains("Unknown tool")).unwrap_or(false)
            }
            _ => false,
        });
        assert!(failed);
        assert!(matches!(events.last(), Some(AgentEvent::Done)));
    }

    /// Search that answers only after a delay, so a later call in the same
    /// batch finishes first.
    struct SlowSearch;

    #[async_trait]
    impl SimilaritySearch for SlowSearch {
        async fn query(&self, _text: &str, _top_k: usize) -> Result<Vec<SearchHit>, AppError> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(vec![])
        }
    }

    /// Oracle that requests two tools in one step, then verifies the order in
    /// which their results were appended to the context.
    struct TwoCallsThenText {
        steps: AtomicUsize,
    }

    #[async_trait]
    impl CompletionOracle for TwoCallsThenText {
        async fn step(
            &self,
            request: OracleRequest<'_>,
            _deltas: mpsc::Sender<String>,
        ) -> Result<StepOutcome, AppError> {
            if self.steps.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(StepOutcome::ToolCalls(vec![
                    ToolCallRequest {
                        id: "call_0".to_string(),
                        name: GET_PRODUCT_RECOMMENDATIONS.to_string(),
                        arguments: json!({ "heading": "Reading nooks", "prompt": "armchair" }),
                    },
                    ToolCallRequest {
                        id: "call_1".to_string(),
                        name: GET_CART.to_string(),
                        arguments: json!({}),
                    },
                ]));
            }
            // Results must sit in request order even though the first call
            // finished last.
            let result_order: Vec<&str> = request
                .turns
                .iter()
                .filter_map(|t| match t {
                    Turn::ToolResult { tool, .. } => Some(tool.as_str()),
                    _ => None,
                })
                .collect();
            assert_eq!(result_order, [GET_PRODUCT_RECOMMENDATIONS, GET_CART]);
            Ok(StepOutcome::Final("All set.".to_string()))
        }
    }

    #[tokio::test]
    async fn concurrent_tool_results_keep_request_order() {
        let oracle = Arc::new(TwoCallsThenText { steps: AtomicUsize::new(0) });
        let tools = Arc::new(ToolRegistry::new(
            Arc::new(SlowSearch),
            Arc::new(NoCart),
            Arc::new(MemoryCanvasStore::new()),
            ToolSettings::default(),
        ));
        let agent = Agent::new(oracle, tools, 5);
        let (tx, rx) = mpsc::channel(256);

        agent.run(&session(), vec![Turn::User("hi".into())], tx).await.unwrap();
        let events = collect_events(rx).await;

        let event_order: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::ToolResult { tool, .. } => Some(tool.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(event_order, [GET_PRODUCT_RECOMMENDATIONS, GET_CART]);
        assert!(matches!(events.last(), Some(AgentEvent::Done)));
    }

    /// Oracle that streams until the caller disappears.
    struct EndlessOracle;

    #[async_trait]
    impl CompletionOracle for EndlessOracle {
        async fn step(
            &self,
            _request: OracleRequest<'_>,
            deltas: mpsc::Sender<String>,
        ) -> Result<StepOutcome, AppError> {
            loop {
                if deltas.send("token".to_string()).await.is_err() {
                    return Err(AppError::Cancelled);
                }
                tokio::task::yield_now().await;
            }
        }
    }

    #[tokio::test]
    async fn client_disconnect_terminates_cleanly() {
        let agent = Agent::new(Arc::new(EndlessOracle), test_registry(), 5);
        let (tx, rx) = mpsc::channel(4);

        // Simulate the client going away mid-stream.
        drop(rx);

        let result = agent.run(&session(), vec![Turn::User("hi".into())], tx).await;
        assert!(result.is_ok());
    }
}
