//! Convenience re-exports for common `roundwise` types.
//!
//! ```ignore
//! use roundwise::prelude::*;
//! ```
//!
//! Covers discovery, the cache, the orchestrator and its handlers, and the
//! OpenRouter executor. Specialized items (store internals, scoring
//! constants, catalog output types) are imported from their modules.

// ── Inputs ──────────────────────────────────────────────────────────
pub use crate::fingerprint::{DiscoveryOptions, FileRecord, Fingerprint, discover, fingerprint};

// ── Rounds ──────────────────────────────────────────────────────────
pub use crate::rounds::catalog::standard_rounds;
pub use crate::rounds::{
    RoundDefinition, RoundGraph, RoundId, RoundResult, RoundStatus, TokenUsage,
};

// ── Cache ───────────────────────────────────────────────────────────
pub use crate::cache::{CacheStore, FsStore, MemoryStore, RoundCache, result_hash, round_hash};

// ── Context ─────────────────────────────────────────────────────────
pub use crate::context::{Candidate, ContextBudgeter, PromptComposer, ScoringPolicy};

// ── Pipeline ────────────────────────────────────────────────────────
pub use crate::pipeline::{
    CancelToken, CompositeEventHandler, EventHandler, ExecuteError, ExecuteFuture,
    FnEventHandler, LoggingHandler, NoopHandler, Orchestrator, OrchestratorConfig,
    PipelineEvent, RoundExecutor, RoundRequest, RunReport,
};

// ── Provider ────────────────────────────────────────────────────────
pub use crate::api::{OpenRouterClient, OpenRouterExecutor, RetryConfig};

// ── Config & errors ─────────────────────────────────────────────────
pub use crate::config::PipelineConfig;
pub use crate::error::{Error, Result};
