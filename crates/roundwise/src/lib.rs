//! Incremental, cache-backed multi-round LLM analysis of a codebase.
//!
//! `roundwise` feeds a project's files through a fixed DAG of dependent
//! analysis *rounds*. Each round asks a model for a structured JSON result;
//! later rounds build on the results of earlier ones. Results are cached per
//! round under a key derived from the file contents and every upstream
//! result, so re-running on an unchanged project costs nothing, and a change
//! re-runs exactly the rounds it can affect.
//!
//! # Getting started
//!
//! ```ignore
//! use roundwise::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let root = std::path::Path::new(".");
//!     let files = discover(root, &DiscoveryOptions::default())?;
//!     let records: Vec<FileRecord> = files.iter().map(|f| f.record.clone()).collect();
//!
//!     let graph = RoundGraph::new(standard_rounds())?;
//!     let cache = RoundCache::new(FsStore::for_project(root));
//!     let client = OpenRouterClient::new(std::env::var("OPENROUTER_KEY")?)?;
//!     let executor = OpenRouterExecutor::new(Arc::new(client), RetryConfig::default());
//!
//!     let report = Orchestrator::new(&graph, &cache, &executor, OrchestratorConfig::default())
//!         .with_event_handler(&LoggingHandler)
//!         .run(&fingerprint(&records))
//!         .await?;
//!
//!     print!("{}", report.summary_table());
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`fingerprint`] | Order-invariant digest of the file set; reference file discovery |
//! | [`cache`] | [`RoundCache`](cache::RoundCache) over a pluggable [`CacheStore`](cache::CacheStore), key derivation |
//! | [`context`] | [`ContextBudgeter`](context::ContextBudgeter) and [`PromptComposer`](context::PromptComposer) |
//! | [`rounds`] | Round definitions, statuses, the validated [`RoundGraph`](rounds::RoundGraph) and the standard catalog |
//! | [`pipeline`] | [`Orchestrator`](pipeline::Orchestrator), executor trait, events, run report |
//! | [`api`] | Chat completions client, retry with backoff, [`OpenRouterExecutor`](api::OpenRouterExecutor) |
//! | [`config`] | [`PipelineConfig`](config::PipelineConfig) loaded from JSON |
//!
//! # Guarantees
//!
//! 1. **Deterministic keys.** A round's cache key depends only on its id,
//!    the model, the file fingerprint and its dependencies' result hashes.
//!
//! 2. **Partial failure is an outcome.** A failed round blocks its
//!    dependents and nothing else. The run still returns a full report.
//!
//! 3. **Fresh results are never lost silently.** Cache corruption costs a
//!    recomputation, but a failed cache write aborts the run.

pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod fingerprint;
pub mod pipeline;
pub mod prelude;
pub mod rounds;

use schemars::JsonSchema;

pub use error::{Error, Result};

// Re-export schemars for downstream crates defining their own round outputs.
pub use schemars;

/// Default model for all rounds.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`.
///
/// # Example
///
/// ```
/// use roundwise::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct Summary {
///     text: String,
///     #[serde(default)]
///     tags: Vec<String>,
/// }
///
/// let schema = json_schema_for::<Summary>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"text".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}
