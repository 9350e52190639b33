//! Model client abstraction.
//!
//! The orchestrator talks to the model through [`ModelClient`], which
//! returns a closed [`ModelOutcome`] instead of leaking sentinel strings or
//! using exceptions as control flow: a decline (`NO_PATCH`) is a variant,
//! not an error, and transient-vs-fatal is decided inside the client where
//! the HTTP detail lives.

pub mod openai;

pub use openai::OpenAiResponsesClient;

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// Literal token a model returns to decline producing a patch.
pub const NO_PATCH_TOKEN: &str = "NO_PATCH";

/// Result of one model call, after the client's own retry policy ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelOutcome {
    /// The model produced patch text (format still undetermined).
    Produced(String),
    /// The model explicitly declined with the `NO_PATCH` token.
    Declined,
    /// Retries were exhausted on a transient failure (429/5xx/timeout).
    TransientFailure(String),
    /// A failure retrying cannot help: quota exhaustion, bad credentials,
    /// empty/unusable content at the token cap.
    FatalFailure(String),
}

impl ModelOutcome {
    /// Classify raw response text into `Produced`/`Declined`/`FatalFailure`.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Self::FatalFailure("model returned an empty response".to_string());
        }
        if trimmed == NO_PATCH_TOKEN {
            return Self::Declined;
        }
        Self::Produced(trimmed.to_string())
    }
}

/// Abstraction for model calls.
///
/// Object-safe (`Box<dyn ModelClient>`) so the orchestrator can take any
/// backend, and `Send + Sync` for async contexts.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send one prompt and return the classified outcome.
    ///
    /// Implementations own their retry/backoff policy; by the time this
    /// returns, the outcome is terminal for the current flow.
    async fn generate(&self, prompt: &str) -> ModelOutcome;

    /// Human-readable model identifier for logs.
    fn model_name(&self) -> &str;
}

#[async_trait]
impl<T: ModelClient + ?Sized> ModelClient for std::sync::Arc<T> {
    async fn generate(&self, prompt: &str) -> ModelOutcome {
        self.as_ref().generate(prompt).await
    }

    fn model_name(&self) -> &str {
        self.as_ref().model_name()
    }
}

/// Scriptable model client for tests.
///
/// Returns queued outcomes in order, repeating the last one when the queue
/// runs dry. Records received prompts for assertions.
#[derive(Debug)]
pub struct MockModelClient {
    outcomes: Mutex<Vec<ModelOutcome>>,
    prompts: Mutex<Vec<String>>,
    call_count: AtomicU32,
    model: String,
}

impl Default for MockModelClient {
    fn default() -> Self {
        Self {
            outcomes: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
            call_count: AtomicU32::new(0),
            model: "mock-model".to_string(),
        }
    }
}

impl MockModelClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome; the last queued outcome repeats forever.
    #[must_use]
    pub fn with_outcome(self, outcome: ModelOutcome) -> Self {
        self.outcomes.lock().unwrap().push(outcome);
        self
    }

    /// Shorthand for queuing produced text.
    #[must_use]
    pub fn with_response(self, text: &str) -> Self {
        self.with_outcome(ModelOutcome::from_text(text))
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn generate(&self, prompt: &str) -> ModelOutcome {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst) as usize;
        self.prompts.lock().unwrap().push(prompt.to_string());

        let outcomes = self.outcomes.lock().unwrap();
        match outcomes.get(call).or_else(|| outcomes.last()) {
            Some(outcome) => outcome.clone(),
            None => ModelOutcome::FatalFailure("mock has no scripted outcome".to_string()),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_text() {
        assert_eq!(
            ModelOutcome::from_text("  NO_PATCH  "),
            ModelOutcome::Declined
        );
        assert!(matches!(
            ModelOutcome::from_text(""),
            ModelOutcome::FatalFailure(_)
        ));
        assert!(matches!(
            ModelOutcome::from_text("   \n"),
            ModelOutcome::FatalFailure(_)
        ));
        assert_eq!(
            ModelOutcome::from_text("--- a/x\n+++ b/x\n"),
            ModelOutcome::Produced("--- a/x\n+++ b/x".to_string())
        );
    }

    #[tokio::test]
    async fn test_mock_replays_outcomes_in_order() {
        let client = MockModelClient::new()
            .with_outcome(ModelOutcome::TransientFailure("503".into()))
            .with_response("patch text");

        assert!(matches!(
            client.generate("p1").await,
            ModelOutcome::TransientFailure(_)
        ));
        assert!(matches!(
            client.generate("p2").await,
            ModelOutcome::Produced(_)
        ));
        // Last outcome repeats.
        assert!(matches!(
            client.generate("p3").await,
            ModelOutcome::Produced(_)
        ));
        assert_eq!(client.call_count(), 3);
        assert_eq!(client.prompts().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_is_object_safe() {
        let client: Box<dyn ModelClient> = Box::new(MockModelClient::new().with_response("ok"));
        assert!(matches!(
            client.generate("x").await,
            ModelOutcome::Produced(_)
        ));
        assert_eq!(client.model_name(), "mock-model");
    }
}
