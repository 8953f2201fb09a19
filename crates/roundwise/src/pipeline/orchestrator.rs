//! Wave-by-wave round scheduling.
//!
//! For each execution wave, in order:
//!
//! 1. Rounds with a failed or blocked dependency are marked
//!    [`Blocked`](RoundStatus::Blocked) and never submitted. Rounds whose
//!    dependency was cancelled, or that are reached after cancellation was
//!    requested, are marked [`Cancelled`](RoundStatus::Cancelled).
//! 2. The remaining rounds run concurrently, at most `concurrency` at a
//!    time. Each derives its cache key from the fingerprint, the model and
//!    the in-memory result hashes of its direct dependencies, then either
//!    reuses the cached result or composes a prompt, calls the executor,
//!    validates the payload and persists it.
//! 3. The next wave starts only after every round of this one is terminal.
//!
//! Round failures never abort the run. Only a cache write failure does.

use super::events::{EventHandler, NoopHandler, PipelineEvent};
use super::executor::{ExecuteError, RoundExecutor, RoundRequest};
use super::report::{RoundRecord, RunReport};
use crate::cache::{CacheStore, RoundCache, result_hash, round_hash};
use crate::context::PromptComposer;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::rounds::{RoundDefinition, RoundGraph, RoundId, RoundResult, RoundStatus};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Default number of rounds in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Scheduling settings for one run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub model: String,
    /// Maximum rounds in flight. Never below 1.
    pub concurrency: usize,
}

impl OrchestratorConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new(crate::DEFAULT_MODEL)
    }
}

/// Shared flag that stops submission of new rounds once set.
///
/// Rounds already sent to the executor finish normally.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs a [`RoundGraph`] against a cache and an executor.
///
/// # Example
///
/// ```ignore
/// let graph = RoundGraph::new(standard_rounds())?;
/// let cache = RoundCache::new(FsStore::for_project(root));
/// let executor = OpenRouterExecutor::new(client, RetryConfig::default());
///
/// let report = Orchestrator::new(&graph, &cache, &executor, OrchestratorConfig::default())
///     .with_composer(PromptComposer::new(budgeter, candidates))
///     .with_event_handler(&LoggingHandler)
///     .run(&fingerprint)
///     .await?;
/// print!("{}", report.summary_table());
/// ```
pub struct Orchestrator<'a, S> {
    graph: &'a RoundGraph,
    cache: &'a RoundCache<S>,
    executor: &'a dyn RoundExecutor,
    config: OrchestratorConfig,
    composer: PromptComposer,
    events: &'a dyn EventHandler,
    cancel: CancelToken,
}

impl<'a, S: CacheStore> Orchestrator<'a, S> {
    pub fn new(
        graph: &'a RoundGraph,
        cache: &'a RoundCache<S>,
        executor: &'a dyn RoundExecutor,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            graph,
            cache,
            executor,
            config,
            composer: PromptComposer::new(Default::default(), Vec::new()),
            events: &NoopHandler,
            cancel: CancelToken::new(),
        }
    }

    /// Content pool and budgeter used for round prompts.
    pub fn with_composer(mut self, composer: PromptComposer) -> Self {
        self.composer = composer;
        self
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.events = handler;
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run every wave and return the status of every round.
    ///
    /// Returns `Err` only when persisting a fresh result fails.
    pub async fn run(&self, fingerprint: &Fingerprint) -> Result<RunReport> {
        let started = Instant::now();
        self.cache.ensure_schema_current().await;

        let waves = self.graph.waves();
        self.events.on_event(&PipelineEvent::RunStarted {
            fingerprint,
            model: &self.config.model,
            rounds: self.graph.len(),
            waves: waves.len(),
        });

        let semaphore = Semaphore::new(self.config.concurrency.max(1));
        let mut records: BTreeMap<RoundId, RoundRecord> = BTreeMap::new();
        let mut result_hashes: BTreeMap<RoundId, String> = BTreeMap::new();
        let mut cancel_announced = false;

        for (index, wave) in waves.iter().enumerate() {
            let wave_started = Instant::now();
            self.events.on_event(&PipelineEvent::WaveStarted {
                index,
                total: waves.len(),
                rounds: wave,
            });

            let mut runnable: Vec<&RoundDefinition> = Vec::new();
            for &id in wave {
                let Some(def) = self.graph.get(id) else {
                    continue;
                };

                let failed: Vec<RoundId> = def
                    .depends_on
                    .iter()
                    .copied()
                    .filter(|d| {
                        records
                            .get(d)
                            .is_some_and(|r| r.status.blocks_dependents())
                    })
                    .collect();
                if !failed.is_empty() {
                    self.events.on_event(&PipelineEvent::RoundBlocked {
                        round: id,
                        name: &def.name,
                        failed_dependencies: &failed,
                    });
                    let mut record = RoundRecord::new(id, &def.name, RoundStatus::Blocked);
                    record.blocked_by = failed;
                    records.insert(id, record);
                    continue;
                }

                let dependency_missing = def
                    .depends_on
                    .iter()
                    .any(|d| records.get(d).is_none_or(|r| !r.status.has_result()));
                if self.cancel.is_cancelled() && !cancel_announced {
                    cancel_announced = true;
                    self.events.on_event(&PipelineEvent::CancellationRequested);
                }
                if dependency_missing || self.cancel.is_cancelled() {
                    records.insert(id, self.cancelled(def));
                    continue;
                }

                runnable.push(def);
            }

            let outcomes = join_all(runnable.iter().map(|def| {
                self.run_round(def, fingerprint, &records, &result_hashes, &semaphore)
            }))
            .await;

            for outcome in outcomes {
                let record = outcome?;
                if let Some(result) = &record.result {
                    result_hashes.insert(record.id, result_hash(result));
                }
                records.insert(record.id, record);
            }

            if self.cancel.is_cancelled() && !cancel_announced {
                cancel_announced = true;
                self.events.on_event(&PipelineEvent::CancellationRequested);
            }
            self.events.on_event(&PipelineEvent::WaveFinished {
                index,
                elapsed: wave_started.elapsed(),
            });
        }

        let report = RunReport {
            fingerprint: fingerprint.clone(),
            model: self.config.model.clone(),
            rounds: records,
            elapsed: started.elapsed(),
        };
        let stats = self.cache.stats();
        debug!(
            "Cache: {} hits, {} misses, {} corrupt ({:.0}% hit rate)",
            stats.hits,
            stats.misses,
            stats.corrupt,
            stats.hit_rate() * 100.0
        );
        self.events.on_event(&PipelineEvent::RunFinished { report: &report });
        Ok(report)
    }

    /// Look up or execute one round whose dependencies all have results.
    async fn run_round(
        &self,
        def: &RoundDefinition,
        fingerprint: &Fingerprint,
        records: &BTreeMap<RoundId, RoundRecord>,
        result_hashes: &BTreeMap<RoundId, String>,
        semaphore: &Semaphore,
    ) -> Result<RoundRecord> {
        let Ok(_permit) = semaphore.acquire().await else {
            return Ok(self.cancelled(def));
        };
        if self.cancel.is_cancelled() {
            return Ok(self.cancelled(def));
        }

        let started = Instant::now();
        let dependency_hashes: Vec<String> = def
            .depends_on
            .iter()
            .filter_map(|d| result_hashes.get(d).cloned())
            .collect();
        let key = round_hash(def.id, &self.config.model, fingerprint, &dependency_hashes);

        let mut record = RoundRecord::new(def.id, &def.name, RoundStatus::Running);
        record.cache_key = Some(key.clone());

        if let Some(result) = self.cache.get(def.id, &key).await {
            self.events.on_event(&PipelineEvent::RoundCacheHit {
                round: def.id,
                name: &def.name,
            });
            record.status = RoundStatus::Cached;
            record.result = Some(result);
            record.elapsed = started.elapsed();
            return Ok(record);
        }

        let dependencies: Vec<(&RoundDefinition, &RoundResult)> = def
            .depends_on
            .iter()
            .filter_map(|d| Some((self.graph.get(*d)?, records.get(d)?.result.as_ref()?)))
            .collect();
        let prompt = self.composer.compose(def, &dependencies);
        debug!(
            "[round {}] context: {}",
            def.id,
            prompt.selection.summary()
        );
        self.events.on_event(&PipelineEvent::RoundStarted {
            round: def.id,
            name: &def.name,
            prompt_tokens: self.composer.budgeter().estimate(&prompt.text),
        });

        let request = RoundRequest {
            round: def.id,
            name: def.name.clone(),
            model: self.config.model.clone(),
            prompt: prompt.text,
            schema: def.schema.clone(),
            max_output_tokens: def.output_tokens,
        };

        let outcome = match self.executor.execute(request).await {
            Ok(result) => match validate_payload(def.schema.as_ref(), &result.data) {
                Ok(()) => Ok(result),
                Err(message) => Err(ExecuteError::Fatal(message)),
            },
            Err(e) => Err(e),
        };
        record.elapsed = started.elapsed();

        match outcome {
            Ok(result) => {
                self.cache
                    .set(def.id, &key, &result, &self.config.model)
                    .await?;
                self.events.on_event(&PipelineEvent::RoundSucceeded {
                    round: def.id,
                    name: &def.name,
                    elapsed: record.elapsed,
                    usage: result.usage,
                });
                record.status = RoundStatus::Succeeded;
                record.result = Some(result);
            }
            Err(ExecuteError::Cancelled) => {
                self.events.on_event(&PipelineEvent::RoundCancelled {
                    round: def.id,
                    name: &def.name,
                });
                record.status = RoundStatus::Cancelled;
            }
            Err(e) => {
                let message = e.to_string();
                self.events.on_event(&PipelineEvent::RoundFailed {
                    round: def.id,
                    name: &def.name,
                    error: &message,
                });
                record.status = RoundStatus::Failed;
                record.error = Some(message);
            }
        }
        Ok(record)
    }

    fn cancelled(&self, def: &RoundDefinition) -> RoundRecord {
        self.events.on_event(&PipelineEvent::RoundCancelled {
            round: def.id,
            name: &def.name,
        });
        RoundRecord::new(def.id, &def.name, RoundStatus::Cancelled)
    }
}

/// Check a payload against a round's schema.
///
/// A missing schema accepts anything. An invalid schema is logged and
/// skipped rather than failing every run of the round.
pub fn validate_payload(
    schema: Option<&serde_json::Value>,
    data: &serde_json::Value,
) -> std::result::Result<(), String> {
    let Some(schema) = schema else {
        return Ok(());
    };
    let validator = match jsonschema::validator_for(schema) {
        Ok(v) => v,
        Err(e) => {
            warn!("Skipping payload validation, schema is invalid: {e}");
            return Ok(());
        }
    };

    let errors: Vec<String> = validator
        .iter_errors(data)
        .map(|e| format!("{}: {e}", e.instance_path()))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "payload does not match schema: {}",
            errors.join("; ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn concurrency_never_below_one() {
        let config = OrchestratorConfig::new("m").with_concurrency(0);
        assert_eq!(config.concurrency, 1);
        assert_eq!(OrchestratorConfig::default().concurrency, DEFAULT_CONCURRENCY);
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn payload_validation() {
        let schema = json!({
            "type": "object",
            "properties": {"summary": {"type": "string"}},
            "required": ["summary"]
        });
        assert!(validate_payload(Some(&schema), &json!({"summary": "ok"})).is_ok());
        assert!(validate_payload(None, &json!(42)).is_ok());

        let err = validate_payload(Some(&schema), &json!({"summary": 3})).unwrap_err();
        assert!(err.contains("/summary"), "{err}");
    }

    #[test]
    fn invalid_schema_is_skipped() {
        let schema = json!({"type": 12});
        assert!(validate_payload(Some(&schema), &json!({})).is_ok());
    }
}
