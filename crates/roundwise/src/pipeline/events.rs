//! Lifecycle events emitted by the [`Orchestrator`](super::Orchestrator).
//!
//! Callers implement [`EventHandler`] to observe a run for logging, progress
//! display or metrics. Handlers are informational only; they cannot steer
//! the run.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use super::report::RunReport;
use crate::fingerprint::Fingerprint;
use crate::rounds::{RoundId, TokenUsage};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Events emitted during a pipeline run.
#[derive(Debug)]
pub enum PipelineEvent<'a> {
    RunStarted {
        fingerprint: &'a Fingerprint,
        model: &'a str,
        rounds: usize,
        waves: usize,
    },
    WaveStarted {
        index: usize,
        total: usize,
        rounds: &'a [RoundId],
    },
    /// A round's result was served from the cache.
    RoundCacheHit { round: RoundId, name: &'a str },
    /// A round missed the cache and is being sent to the provider.
    RoundStarted {
        round: RoundId,
        name: &'a str,
        prompt_tokens: usize,
    },
    RoundSucceeded {
        round: RoundId,
        name: &'a str,
        elapsed: Duration,
        usage: TokenUsage,
    },
    RoundFailed {
        round: RoundId,
        name: &'a str,
        error: &'a str,
    },
    /// A round was skipped because a dependency failed or was blocked.
    RoundBlocked {
        round: RoundId,
        name: &'a str,
        failed_dependencies: &'a [RoundId],
    },
    RoundCancelled { round: RoundId, name: &'a str },
    WaveFinished { index: usize, elapsed: Duration },
    /// Cancellation was observed; no further rounds will be submitted.
    CancellationRequested,
    RunFinished { report: &'a RunReport },
}

/// Observer for pipeline events.
///
/// # Example
///
/// ```ignore
/// struct Progress;
///
/// impl EventHandler for Progress {
///     fn on_event(&self, event: &PipelineEvent<'_>) {
///         if let PipelineEvent::RoundSucceeded { name, elapsed, .. } = event {
///             println!("{name} done in {elapsed:?}");
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &PipelineEvent<'_>) {
        let _ = event;
    }
}

/// Ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
pub struct FnEventHandler<F>(F)
where
    F: Fn(&PipelineEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&PipelineEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&PipelineEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &PipelineEvent<'_>) {
        (self.0)(event)
    }
}

/// Dispatches every event to each inner handler, in registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(show_progress, ProgressHandler::new());
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Add `handler` only when `condition` holds.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &PipelineEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &PipelineEvent<'_>) {
        match event {
            PipelineEvent::RunStarted {
                fingerprint,
                model,
                rounds,
                waves,
            } => {
                info!(
                    "Starting analysis: {rounds} rounds in {waves} waves, model={model}, fingerprint={}",
                    fingerprint.short()
                );
            }
            PipelineEvent::WaveStarted {
                index,
                total,
                rounds,
            } => {
                debug!("[wave {}/{total}] rounds {rounds:?}", index + 1);
            }
            PipelineEvent::RoundCacheHit { round, name } => {
                info!("[round {round}] {name}: cached");
            }
            PipelineEvent::RoundStarted {
                round,
                name,
                prompt_tokens,
            } => {
                info!("[round {round}] {name}: running (~{prompt_tokens} prompt tokens)");
            }
            PipelineEvent::RoundSucceeded {
                round,
                name,
                elapsed,
                usage,
            } => {
                info!(
                    "[round {round}] {name}: done in {:.1}s ({} in / {} out tokens)",
                    elapsed.as_secs_f64(),
                    usage.input_tokens,
                    usage.output_tokens
                );
            }
            PipelineEvent::RoundFailed { round, name, error } => {
                warn!("[round {round}] {name}: failed: {error}");
            }
            PipelineEvent::RoundBlocked {
                round,
                name,
                failed_dependencies,
            } => {
                warn!("[round {round}] {name}: blocked by {failed_dependencies:?}");
            }
            PipelineEvent::RoundCancelled { round, name } => {
                info!("[round {round}] {name}: cancelled");
            }
            PipelineEvent::WaveFinished { index, elapsed } => {
                debug!("[wave {}] finished in {:.1}s", index + 1, elapsed.as_secs_f64());
            }
            PipelineEvent::CancellationRequested => {
                warn!("Cancellation requested; no further rounds will start");
            }
            PipelineEvent::RunFinished { report } => {
                info!("Analysis finished: {}", report.summary().to_log_string());
            }
        }
    }
}
