//! Pipeline configuration.
//!
//! Loaded from `roundwise.json` at the project root when present. Every
//! field is optional; missing fields take the defaults below. CLI flags are
//! applied on top with the `with_*` builders.
//!
//! ```json
//! {
//!   "model": "anthropic/claude-sonnet-4",
//!   "concurrency": 4,
//!   "contextWindow": 200000,
//!   "rounds": ["architecture", "onboarding"],
//!   "pinned": ["src/core"]
//! }
//! ```

use crate::api::RetryConfig;
use crate::cache::FsStore;
use crate::cache::store::STATE_DIR;
use crate::context::budget::{
    DEFAULT_CHARS_PER_TOKEN, DEFAULT_CONTEXT_WINDOW, DEFAULT_INSTRUCTION_RESERVE,
    DEFAULT_OUTPUT_RESERVE,
};
use crate::context::{ContextBudgeter, ScoringPolicy};
use crate::error::{Error, Result};
use crate::fingerprint::{DEFAULT_MAX_FILE_BYTES, DiscoveryOptions};
use crate::pipeline::{DEFAULT_CONCURRENCY, OrchestratorConfig};
use crate::rounds::{RoundDefinition, RoundGraph, RoundId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// File name looked up at the project root.
pub const CONFIG_FILE_NAME: &str = "roundwise.json";

/// In-flight limit for local inference backends.
pub const LOCAL_CONCURRENCY_CAP: usize = 2;

const LOCAL_MODEL_PREFIXES: &[&str] = &["ollama/", "local/", "lmstudio/"];

/// Settings for a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Model identifier. Default: [`DEFAULT_MODEL`](crate::DEFAULT_MODEL).
    pub model: String,
    /// Maximum rounds in flight. Default: `4`, capped at `2` for local
    /// backends.
    pub concurrency: usize,
    /// OpenAI-compatible endpoint overriding OpenRouter.
    pub endpoint: Option<String>,
    pub context_window: usize,
    pub output_reserve: usize,
    pub instruction_reserve: usize,
    /// Calibrated characters-per-token ratio. Default: `3.5`.
    pub chars_per_token: f64,
    /// Cache directory. Default: `<project>/.roundwise/rounds`.
    pub cache_dir: Option<PathBuf>,
    /// Round ids or names to run (plus their dependencies). Empty runs all.
    pub rounds: Vec<String>,
    /// Skip the AI rounds entirely.
    pub static_only: bool,
    /// Clear the cache before running.
    pub force: bool,
    /// Paths always ranked first in prompt content.
    pub pinned: Vec<String>,
    pub boosted: Vec<String>,
    pub max_file_bytes: u64,
    /// Directory names skipped by discovery, in addition to the defaults.
    pub skip_dirs: Vec<String>,
    /// Per-attempt request timeout. Default: `300`.
    pub request_timeout_secs: u64,
    /// Provider-level retries for transient failures. Default: `3`.
    pub max_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: crate::DEFAULT_MODEL.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            endpoint: None,
            context_window: DEFAULT_CONTEXT_WINDOW,
            output_reserve: DEFAULT_OUTPUT_RESERVE,
            instruction_reserve: DEFAULT_INSTRUCTION_RESERVE,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            cache_dir: None,
            rounds: Vec::new(),
            static_only: false,
            force: false,
            pinned: Vec::new(),
            boosted: Vec::new(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            skip_dirs: Vec::new(),
            request_timeout_secs: 300,
            max_retries: 3,
        }
    }
}

impl PipelineConfig {
    /// Load a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load `<root>/roundwise.json`, or defaults when it does not exist.
    pub fn load_for_project(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE_NAME);
        if path.exists() {
            debug!("Loading config from {}", path.display());
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_rounds(mut self, rounds: Vec<String>) -> Self {
        self.rounds = rounds;
        self
    }

    pub fn with_static_only(mut self, static_only: bool) -> Self {
        self.static_only = static_only;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Whether the model runs on a local inference backend.
    pub fn is_local_model(&self) -> bool {
        LOCAL_MODEL_PREFIXES.iter().any(|p| self.model.starts_with(p))
            || self.endpoint.as_deref().is_some_and(|e| {
                e.starts_with("http://localhost") || e.starts_with("http://127.0.0.1")
            })
    }

    /// Concurrency after applying the local backend cap. Never below 1.
    pub fn effective_concurrency(&self) -> usize {
        let limit = if self.is_local_model() {
            self.concurrency.min(LOCAL_CONCURRENCY_CAP)
        } else {
            self.concurrency
        };
        limit.max(1)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig::new(self.model.clone()).with_concurrency(self.effective_concurrency())
    }

    pub fn scoring_policy(&self) -> ScoringPolicy {
        ScoringPolicy::default()
            .with_pinned(self.pinned.iter().cloned())
            .with_boosted(self.boosted.iter().cloned())
    }

    pub fn budgeter(&self) -> ContextBudgeter {
        ContextBudgeter::default()
            .with_context_window(self.context_window)
            .with_output_reserve(self.output_reserve)
            .with_instruction_reserve(self.instruction_reserve)
            .with_chars_per_token(self.chars_per_token)
            .with_policy(self.scoring_policy())
    }

    /// Discovery settings for a project rooted at `root`. The cache and
    /// output directories are excluded so writing results never changes the
    /// fingerprint.
    pub fn discovery_options(&self, root: &Path) -> DiscoveryOptions {
        let mut options = DiscoveryOptions {
            max_file_bytes: self.max_file_bytes,
            ..Default::default()
        };
        options.skip_dirs.extend(self.skip_dirs.iter().cloned());
        options.exclude.push(self.cache_store(root).dir().to_path_buf());
        options.exclude.push(root.join(STATE_DIR));
        options
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::with_retries(self.max_retries)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Build the round graph, restricted to the configured subset.
    pub fn select_graph(&self, definitions: Vec<RoundDefinition>) -> Result<RoundGraph> {
        let graph = RoundGraph::new(definitions)?;
        if self.rounds.is_empty() {
            return Ok(graph);
        }
        let selected = self
            .rounds
            .iter()
            .map(|r| graph.resolve(r))
            .collect::<Result<Vec<RoundId>>>()?;
        graph.restrict_to(&selected)
    }

    /// The cache store for a project rooted at `root`.
    pub fn cache_store(&self, root: &Path) -> FsStore {
        let store = FsStore::for_project(root);
        match &self.cache_dir {
            Some(dir) if dir.is_absolute() => store.with_dir(dir.clone()),
            Some(dir) => store.with_dir(root.join(dir)),
            None => store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RoundCache;
    use crate::fingerprint::{FileRecord, discover, fingerprint};
    use crate::rounds::catalog::{self, standard_rounds};
    use crate::rounds::{RoundResult, TokenUsage};

    #[test]
    fn defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.model, crate::DEFAULT_MODEL);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.context_window, 200_000);
        assert!(!config.static_only);
        assert_eq!(config.effective_concurrency(), 4);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"model": "openai/gpt-4o", "contextWindow": 128000}"#)
                .unwrap();
        assert_eq!(config.model, "openai/gpt-4o");
        assert_eq!(config.context_window, 128_000);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn load_reports_path_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();
        let err = PipelineConfig::load(&path).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("roundwise.json"));
    }

    #[test]
    fn load_for_project_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load_for_project(dir.path()).unwrap();
        assert_eq!(config.model, crate::DEFAULT_MODEL);
    }

    #[test]
    fn local_models_are_capped() {
        let config = PipelineConfig::default()
            .with_model("ollama/qwen2.5-coder")
            .with_concurrency(8);
        assert!(config.is_local_model());
        assert_eq!(config.effective_concurrency(), LOCAL_CONCURRENCY_CAP);

        let endpoint = PipelineConfig {
            endpoint: Some("http://localhost:1234/v1/chat/completions".into()),
            ..Default::default()
        };
        assert!(endpoint.is_local_model());

        let zero = PipelineConfig::default().with_concurrency(0);
        assert_eq!(zero.effective_concurrency(), 1);
    }

    #[test]
    fn round_subset_keeps_dependencies() {
        let config = PipelineConfig::default().with_rounds(vec!["data_flow".into()]);
        let graph = config.select_graph(standard_rounds()).unwrap();
        assert!(graph.contains(catalog::OVERVIEW));
        assert!(graph.contains(catalog::ARCHITECTURE));
        assert!(graph.contains(catalog::MODULES));
        assert!(graph.contains(catalog::DATA_FLOW));
        assert!(!graph.contains(catalog::API_SURFACE));
        assert!(!graph.contains(catalog::ONBOARDING));
    }

    #[test]
    fn unknown_round_in_subset_fails() {
        let config = PipelineConfig::default().with_rounds(vec!["nope".into()]);
        assert!(matches!(
            config.select_graph(standard_rounds()),
            Err(Error::UnknownRound(_))
        ));
    }

    #[test]
    fn cache_dir_is_relative_to_project() {
        let config = PipelineConfig {
            cache_dir: Some("build/cache".into()),
            ..Default::default()
        };
        let store = config.cache_store(Path::new("/work/project"));
        assert_eq!(store.dir(), Path::new("/work/project/build/cache"));

        let default = PipelineConfig::default().cache_store(Path::new("/work/project"));
        assert_eq!(default.dir(), Path::new("/work/project/.roundwise/rounds"));
    }

    #[test]
    fn budgeter_uses_configured_window() {
        let config = PipelineConfig {
            context_window: 32_000,
            output_reserve: 2_000,
            instruction_reserve: 1_000,
            ..Default::default()
        };
        assert_eq!(config.budgeter().effective_tokens(), 29_000);
    }

    #[test]
    fn discovery_excludes_cache_and_output_dirs() {
        let config = PipelineConfig {
            cache_dir: Some("analysis-cache".into()),
            skip_dirs: vec!["fixtures".into()],
            ..Default::default()
        };
        let options = config.discovery_options(Path::new("/work/project"));
        assert!(options.skip_dirs.iter().any(|d| d == "fixtures"));
        assert!(options.skip_dirs.iter().any(|d| d == "target"));
        assert_eq!(
            options.exclude,
            vec![
                PathBuf::from("/work/project/analysis-cache"),
                PathBuf::from("/work/project/.roundwise"),
            ]
        );
    }

    #[tokio::test]
    async fn writing_to_visible_cache_dir_keeps_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("lib.rs"), "pub fn answer() -> u32 { 42 }").unwrap();
        std::fs::write(
            root.join(CONFIG_FILE_NAME),
            r#"{"cacheDir": "analysis-cache"}"#,
        )
        .unwrap();
        let config = PipelineConfig::load_for_project(root).unwrap();

        let scan = |config: &PipelineConfig| {
            let files = discover(root, &config.discovery_options(root)).unwrap();
            let records: Vec<FileRecord> = files.into_iter().map(|f| f.record).collect();
            fingerprint(&records)
        };
        let before = scan(&config);

        let cache = RoundCache::new(config.cache_store(root));
        let result = RoundResult {
            data: serde_json::json!({"summary": "ok"}),
            usage: TokenUsage::new(10, 5),
            model: "model-x".into(),
            duration_ms: 5,
        };
        cache.set(1, "hash", &result, "model-x").await.unwrap();
        assert!(root.join("analysis-cache/round-001.json").exists());

        assert_eq!(scan(&config), before);
    }
}
