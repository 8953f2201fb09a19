//! Provider layer: everything between the orchestrator and the model API.
//!
//! - [`client`]: minimal chat completions client (OpenRouter by default,
//!   any OpenAI-compatible endpoint through `with_endpoint`).
//! - [`retry`]: transient error detection with exponential backoff. Never
//!   retries 400/401 errors.
//! - [`openrouter`]: [`OpenRouterExecutor`], the
//!   [`RoundExecutor`](crate::pipeline::RoundExecutor) used by the CLI.

pub mod client;
pub mod openrouter;
pub mod retry;

pub use client::{ChatCompletion, ChatRequest, Message, OpenRouterClient, UsageInfo};
pub use openrouter::{OpenRouterExecutor, parse_json_payload};
pub use retry::RetryConfig;
