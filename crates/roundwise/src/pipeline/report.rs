//! Outcome of a pipeline run.
//!
//! A run always ends with a [`RunReport`], even when rounds failed: partial
//! completion is a reportable outcome. The report carries every round's
//! terminal status, result or error, and timings, and renders both the CLI
//! summary table and a markdown document in which unavailable rounds are
//! marked explicitly.

use crate::fingerprint::Fingerprint;
use crate::rounds::{RoundId, RoundResult, RoundStatus, TokenUsage};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

/// Placeholder rendered in place of a round without a result.
pub const UNAVAILABLE_MARKER: &str = "Analysis unavailable for this round";

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Terminal state of one round.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundRecord {
    pub id: RoundId,
    pub name: String,
    pub status: RoundStatus,
    /// Cache key the round was looked up under. `None` for rounds that were
    /// never scheduled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RoundResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Direct dependencies that failed or were blocked.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<RoundId>,
    #[serde(rename = "elapsedMs", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

impl RoundRecord {
    pub fn new(id: RoundId, name: impl Into<String>, status: RoundStatus) -> Self {
        Self {
            id,
            name: name.into(),
            status,
            cache_key: None,
            result: None,
            error: None,
            blocked_by: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }
}

/// What a renderer sees for one round.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RoundOutcome<'a> {
    Completed { result: &'a RoundResult },
    Failed { error: &'a str },
    Blocked { blocked_by: &'a [RoundId] },
    Cancelled,
}

/// Aggregate counts for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub cached: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub blocked: usize,
    pub cancelled: usize,
    /// Tokens spent on rounds executed in this run. Cached rounds cost
    /// nothing.
    pub usage: TokenUsage,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn to_log_string(&self) -> String {
        format!(
            "{} rounds: {} cached, {} succeeded, {} failed, {} blocked, {} cancelled; \
             {} tokens in {:.1}s",
            self.total,
            self.cached,
            self.succeeded,
            self.failed,
            self.blocked,
            self.cancelled,
            self.usage.total(),
            self.elapsed.as_secs_f64(),
        )
    }
}

/// Status and result of every round in a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub fingerprint: Fingerprint,
    pub model: String,
    pub rounds: BTreeMap<RoundId, RoundRecord>,
    #[serde(rename = "elapsedMs", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

impl RunReport {
    pub fn record(&self, id: RoundId) -> Option<&RoundRecord> {
        self.rounds.get(&id)
    }

    pub fn status(&self, id: RoundId) -> Option<RoundStatus> {
        self.rounds.get(&id).map(|r| r.status)
    }

    pub fn result(&self, id: RoundId) -> Option<&RoundResult> {
        self.rounds.get(&id).and_then(|r| r.result.as_ref())
    }

    pub fn count(&self, status: RoundStatus) -> usize {
        self.rounds.values().filter(|r| r.status == status).count()
    }

    /// Whether every round produced a result.
    pub fn is_complete(&self) -> bool {
        self.rounds.values().all(|r| r.status.has_result())
    }

    pub fn summary(&self) -> RunSummary {
        let mut usage = TokenUsage::default();
        for record in self.rounds.values() {
            if record.status == RoundStatus::Succeeded
                && let Some(result) = &record.result
            {
                usage += result.usage;
            }
        }
        RunSummary {
            total: self.rounds.len(),
            cached: self.count(RoundStatus::Cached),
            succeeded: self.count(RoundStatus::Succeeded),
            failed: self.count(RoundStatus::Failed),
            blocked: self.count(RoundStatus::Blocked),
            cancelled: self.count(RoundStatus::Cancelled),
            usage,
            elapsed: self.elapsed,
        }
    }

    /// The `{round → result | failed | blocked}` map handed to renderers.
    pub fn outcomes(&self) -> BTreeMap<RoundId, RoundOutcome<'_>> {
        self.rounds
            .iter()
            .map(|(&id, record)| (id, outcome_of(record)))
            .collect()
    }

    /// Fixed-width table for terminal output.
    pub fn summary_table(&self) -> String {
        let name_width = self
            .rounds
            .values()
            .map(|r| r.name.len())
            .max()
            .unwrap_or(0)
            .max(4);

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<5}  {:<name_width$}  {:<9}  {:>7}  {:>9}",
            "ROUND", "NAME", "STATUS", "TIME", "TOKENS"
        );
        for record in self.rounds.values() {
            let tokens = match (&record.result, record.status) {
                (Some(result), RoundStatus::Succeeded) => result.usage.total().to_string(),
                _ => "-".to_string(),
            };
            let _ = writeln!(
                out,
                "{:<5}  {:<name_width$}  {:<9}  {:>6.1}s  {:>9}",
                record.id,
                record.name,
                record.status.to_string(),
                record.elapsed.as_secs_f64(),
                tokens
            );
        }
        let _ = writeln!(out, "\n{}", self.summary().to_log_string());
        out
    }

    /// Markdown document with one section per round. Rounds without a
    /// result get an explicit [`UNAVAILABLE_MARKER`] note.
    pub fn render_markdown(&self) -> String {
        let mut out = String::from("# Codebase analysis\n\n");
        let _ = writeln!(
            out,
            "Model `{}`, fingerprint `{}`.\n",
            self.model,
            self.fingerprint.short()
        );

        for record in self.rounds.values() {
            let _ = writeln!(out, "## {}. {}\n", record.id, record.name);
            match outcome_of(record) {
                RoundOutcome::Completed { result } => {
                    let json = serde_json::to_string_pretty(&result.data)
                        .unwrap_or_else(|_| result.data.to_string());
                    let _ = writeln!(out, "```json\n{json}\n```\n");
                }
                RoundOutcome::Failed { error } => {
                    let _ = writeln!(out, "> **{UNAVAILABLE_MARKER}** (failed: {error})\n");
                }
                RoundOutcome::Blocked { blocked_by } => {
                    let ids: Vec<String> = blocked_by.iter().map(|id| id.to_string()).collect();
                    let _ = writeln!(
                        out,
                        "> **{UNAVAILABLE_MARKER}** (blocked by round {})\n",
                        ids.join(", ")
                    );
                }
                RoundOutcome::Cancelled => {
                    let _ = writeln!(out, "> **{UNAVAILABLE_MARKER}** (cancelled)\n");
                }
            }
        }
        out
    }
}

fn outcome_of(record: &RoundRecord) -> RoundOutcome<'_> {
    match (&record.result, record.status) {
        (Some(result), status) if status.has_result() => RoundOutcome::Completed { result },
        (_, RoundStatus::Blocked) => RoundOutcome::Blocked {
            blocked_by: &record.blocked_by,
        },
        (_, RoundStatus::Failed) => RoundOutcome::Failed {
            error: record.error.as_deref().unwrap_or("unknown error"),
        },
        _ => RoundOutcome::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;
    use serde_json::json;

    fn report() -> RunReport {
        let mut rounds = BTreeMap::new();

        let mut cached = RoundRecord::new(1, "overview", RoundStatus::Cached);
        cached.result = Some(RoundResult {
            data: json!({"summary": "demo"}),
            usage: TokenUsage::new(900, 100),
            model: "m".into(),
            duration_ms: 10,
        });
        rounds.insert(1, cached);

        let mut ran = RoundRecord::new(5, "api_surface", RoundStatus::Succeeded);
        ran.result = Some(RoundResult {
            data: json!({"items": []}),
            usage: TokenUsage::new(40, 2),
            model: "m".into(),
            duration_ms: 1500,
        });
        ran.elapsed = Duration::from_millis(1500);
        rounds.insert(5, ran);

        let mut failed = RoundRecord::new(2, "architecture", RoundStatus::Failed);
        failed.error = Some("rate limited".into());
        rounds.insert(2, failed);

        let mut blocked = RoundRecord::new(4, "data_flow", RoundStatus::Blocked);
        blocked.blocked_by = vec![2];
        rounds.insert(4, blocked);

        RunReport {
            fingerprint: fingerprint(&[]),
            model: "m".into(),
            rounds,
            elapsed: Duration::from_secs(2),
        }
    }

    #[test]
    fn summary_counts_statuses_and_fresh_usage() {
        let summary = report().summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.cached, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.blocked, 1);
        assert_eq!(summary.usage, TokenUsage::new(40, 2));
        assert!(summary.to_log_string().starts_with("4 rounds: 1 cached"));
    }

    #[test]
    fn markdown_marks_unavailable_rounds() {
        let md = report().render_markdown();
        assert!(md.contains("## 1. overview"));
        assert!(md.contains("\"summary\": \"demo\""));
        assert!(md.contains(&format!("**{UNAVAILABLE_MARKER}** (failed: rate limited)")));
        assert!(md.contains(&format!("**{UNAVAILABLE_MARKER}** (blocked by round 2)")));
    }

    #[test]
    fn outcomes_map_is_tagged() {
        let report = report();
        let value = serde_json::to_value(report.outcomes()).unwrap();
        assert_eq!(value["1"]["status"], "completed");
        assert_eq!(value["2"]["status"], "failed");
        assert_eq!(value["4"]["status"], "blocked");
        assert_eq!(value["4"]["blocked_by"], json!([2]));
    }

    #[test]
    fn summary_table_lists_every_round() {
        let table = report().summary_table();
        let lines: Vec<&str> = table.lines().collect();
        assert!(lines[0].starts_with("ROUND"));
        assert!(lines[1].contains("overview") && lines[1].contains("cached"));
        assert!(table.contains("blocked"));
        assert!(table.contains("42"));
    }

    #[test]
    fn report_serializes_elapsed_as_millis() {
        let value = serde_json::to_value(report()).unwrap();
        assert_eq!(value["elapsedMs"], 2000);
        assert_eq!(value["rounds"]["5"]["elapsedMs"], 1500);
        assert_eq!(value["rounds"]["4"]["blockedBy"], json!([2]));
        assert!(value["rounds"]["1"].get("error").is_none());
    }

    #[test]
    fn completeness() {
        assert!(!report().is_complete());
    }
}
