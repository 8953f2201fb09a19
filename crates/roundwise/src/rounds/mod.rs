//! Round declarations: definitions, results, statuses and the dependency graph.
//!
//! - [`graph::RoundGraph`]: validated DAG of [`RoundDefinition`]s, partitioned
//!   into execution waves.
//! - [`catalog`]: the fixed set of analysis rounds shipped with this version.

pub mod catalog;
pub mod graph;

pub use graph::{ExecutionWave, RoundGraph};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Numeric round identifier. Stable across application versions.
pub type RoundId = u32;

/// Static declaration of one analysis round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundDefinition {
    pub id: RoundId,
    /// Short machine-friendly name (`"architecture"`).
    pub name: String,
    /// Rounds whose results this round consumes.
    #[serde(default)]
    pub depends_on: BTreeSet<RoundId>,
    /// Task instructions placed at the top of the round prompt.
    #[serde(default)]
    pub instructions: String,
    /// JSON Schema the provider payload must satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
    /// Tokens reserved for this round's output. Falls back to the budgeter's
    /// output reserve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<usize>,
}

impl RoundDefinition {
    pub fn new(id: RoundId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            depends_on: BTreeSet::new(),
            instructions: String::new(),
            schema: None,
            output_tokens: None,
        }
    }

    pub fn depends_on(mut self, ids: impl IntoIterator<Item = RoundId>) -> Self {
        self.depends_on.extend(ids);
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_output_tokens(mut self, tokens: usize) -> Self {
        self.output_tokens = Some(tokens);
        self
    }
}

/// Token usage reported by the provider for one round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

/// Output of one successful round execution. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResult {
    /// Structured payload returned by the provider.
    pub data: serde_json::Value,
    pub usage: TokenUsage,
    /// Model that actually produced the payload.
    pub model: String,
    pub duration_ms: u64,
}

/// Lifecycle state of a round within one run.
///
/// `Pending → (Cached | Running) → (Succeeded | Failed)`. Rounds downstream
/// of a failure become `Blocked` without ever running; rounds that were never
/// submitted because the run was cancelled become `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Pending,
    Running,
    Cached,
    Succeeded,
    Failed,
    Blocked,
    Cancelled,
}

impl RoundStatus {
    /// Whether the round has reached a final state for this run.
    pub fn is_terminal(self) -> bool {
        !matches!(self, RoundStatus::Pending | RoundStatus::Running)
    }

    /// Whether a result is available for downstream rounds and the renderer.
    pub fn has_result(self) -> bool {
        matches!(self, RoundStatus::Cached | RoundStatus::Succeeded)
    }

    /// Whether dependents of a round in this state must be blocked.
    pub fn blocks_dependents(self) -> bool {
        matches!(self, RoundStatus::Failed | RoundStatus::Blocked)
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RoundStatus::Pending => "pending",
            RoundStatus::Running => "running",
            RoundStatus::Cached => "cached",
            RoundStatus::Succeeded => "succeeded",
            RoundStatus::Failed => "failed",
            RoundStatus::Blocked => "blocked",
            RoundStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}
