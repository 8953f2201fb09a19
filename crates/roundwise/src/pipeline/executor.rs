//! The provider-execution capability consumed by the orchestrator.
//!
//! An executor runs one round against a model and returns its structured
//! result. Retries, backoff and timeouts are the executor's business; the
//! orchestrator never retries. Failures must say whether they were
//! transient (retries exhausted), fatal, or cancelled.

use crate::rounds::{RoundId, RoundResult};
use std::future::Future;
use std::pin::Pin;

/// Everything an executor needs to run one round.
#[derive(Debug, Clone)]
pub struct RoundRequest {
    pub round: RoundId,
    pub name: String,
    pub model: String,
    pub prompt: String,
    /// JSON Schema the payload is expected to satisfy.
    pub schema: Option<serde_json::Value>,
    /// Output token limit for the response.
    pub max_output_tokens: Option<usize>,
}

/// Why a round could not be executed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecuteError {
    /// A transient failure that persisted through every retry.
    #[error("transient failure after retries: {0}")]
    Transient(String),
    /// A failure retrying cannot fix (bad request, auth, malformed payload).
    #[error("{0}")]
    Fatal(String),
    /// The call was aborted through the executor's cancellation path.
    #[error("cancelled")]
    Cancelled,
}

impl ExecuteError {
    pub fn fatal(message: impl Into<String>) -> Self {
        ExecuteError::Fatal(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        ExecuteError::Transient(message.into())
    }
}

/// Boxed future returned by [`RoundExecutor::execute`].
pub type ExecuteFuture<'a> =
    Pin<Box<dyn Future<Output = Result<RoundResult, ExecuteError>> + Send + 'a>>;

/// Runs a single round against a model provider.
///
/// # Example
///
/// ```ignore
/// struct Canned;
///
/// impl RoundExecutor for Canned {
///     fn execute(&self, request: RoundRequest) -> ExecuteFuture<'_> {
///         Box::pin(async move {
///             Ok(RoundResult {
///                 data: serde_json::json!({"round": request.round}),
///                 usage: TokenUsage::default(),
///                 model: request.model,
///                 duration_ms: 0,
///             })
///         })
///     }
/// }
/// ```
pub trait RoundExecutor: Send + Sync {
    fn execute(&self, request: RoundRequest) -> ExecuteFuture<'_>;
}
