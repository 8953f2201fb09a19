//! Round orchestration: scheduling, execution and reporting.
//!
//! - [`Orchestrator`] walks the [`RoundGraph`](crate::rounds::RoundGraph)
//!   wave by wave, consulting the [`RoundCache`](crate::cache::RoundCache)
//!   before every provider call.
//! - [`RoundExecutor`] is the provider capability it calls on a miss.
//! - [`EventHandler`] observes the run; [`RunReport`] is its outcome.

pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod report;

pub use events::{
    CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
    PipelineEvent,
};
pub use executor::{ExecuteError, ExecuteFuture, RoundExecutor, RoundRequest};
pub use orchestrator::{
    CancelToken, DEFAULT_CONCURRENCY, Orchestrator, OrchestratorConfig, validate_payload,
};
pub use report::{RoundOutcome, RoundRecord, RunReport, RunSummary, UNAVAILABLE_MARKER};
