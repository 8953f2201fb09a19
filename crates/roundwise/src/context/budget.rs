//! Token budgeting for round prompts.
//!
//! Every round gets its own allocation: the model's context window minus the
//! tokens reserved for the round's output and for instructions. Candidate
//! files are ranked by a deterministic score and packed greedily into that
//! allocation. A candidate that no longer fits is truncated when its content
//! class allows it, otherwise excluded.
//!
//! Selection must be reproducible: unchanged input always yields the same
//! prompt, and therefore the same provider behavior, run after run.

use std::collections::BTreeSet;

/// Default characters per token (conservative estimate for English text and
/// source code).
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Default context window size in tokens.
pub const DEFAULT_CONTEXT_WINDOW: usize = 200_000;

/// Default tokens reserved for a round's output.
pub const DEFAULT_OUTPUT_RESERVE: usize = 8192;

/// Default tokens reserved for instructions and prompt framing.
pub const DEFAULT_INSTRUCTION_RESERVE: usize = 2048;

/// Truncating below this many tokens is not worth the prompt space.
pub const MIN_TRUNCATED_TOKENS: usize = 64;

/// Appended to truncated content.
pub const TRUNCATION_MARKER: &str = "\n[... truncated ...]\n";

/// Estimate tokens using [`DEFAULT_CHARS_PER_TOKEN`].
pub fn estimate_tokens(text: &str) -> usize {
    estimate_tokens_with(text, DEFAULT_CHARS_PER_TOKEN)
}

/// Estimate tokens as the byte length divided by `chars_per_token`, rounded
/// up. Monotonic in the length of `text`.
pub fn estimate_tokens_with(text: &str, chars_per_token: f64) -> usize {
    if text.is_empty() {
        return 0;
    }
    let cpt = if chars_per_token > 0.0 {
        chars_per_token
    } else {
        DEFAULT_CHARS_PER_TOKEN
    };
    (text.len() as f64 / cpt).ceil() as usize
}

// ── Candidates ─────────────────────────────────────────────────────

const MANIFEST_NAMES: &[&str] = &[
    "Cargo.toml",
    "package.json",
    "pyproject.toml",
    "setup.py",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "Gemfile",
    "composer.json",
    "CMakeLists.txt",
    "Makefile",
];

const ENTRY_POINT_NAMES: &[&str] = &[
    "main.rs",
    "lib.rs",
    "main.py",
    "__main__.py",
    "app.py",
    "main.go",
    "index.ts",
    "index.js",
    "main.ts",
    "main.c",
    "main.cpp",
    "Main.java",
];

const DOC_EXTENSIONS: &[&str] = &["md", "rst", "txt", "adoc"];

/// Kind of content, which decides whether it may be truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentClass {
    Source,
    /// Build manifests. Never truncated.
    Manifest,
    Documentation,
    /// Static-analysis summaries. Never truncated.
    Analysis,
}

impl ContentClass {
    /// Classify a path by its file name and extension.
    pub fn classify(path: &str) -> Self {
        let name = file_name(path);
        if MANIFEST_NAMES.contains(&name) {
            return ContentClass::Manifest;
        }
        let ext = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
        if DOC_EXTENSIONS.contains(&ext) {
            return ContentClass::Documentation;
        }
        ContentClass::Source
    }

    pub fn is_truncatable(self) -> bool {
        matches!(self, ContentClass::Source | ContentClass::Documentation)
    }
}

/// Content offered for inclusion in a prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub path: String,
    pub content: String,
    pub estimated_tokens: usize,
    pub class: ContentClass,
}

impl Candidate {
    /// Build a candidate, estimating tokens with the default ratio and
    /// classifying by path.
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let content = content.into();
        Self {
            estimated_tokens: estimate_tokens(&content),
            class: ContentClass::classify(&path),
            path,
            content,
        }
    }

    pub fn with_class(mut self, class: ContentClass) -> Self {
        self.class = class;
        self
    }

    pub fn with_estimated_tokens(mut self, tokens: usize) -> Self {
        self.estimated_tokens = tokens;
        self
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn is_test_path(path: &str) -> bool {
    let name = file_name(path);
    path.split('/')
        .any(|seg| matches!(seg, "test" | "tests" | "__tests__" | "spec"))
        || name.starts_with("test_")
        || name.contains("_test.")
        || name.contains(".test.")
        || name.contains(".spec.")
}

// ── Scoring ────────────────────────────────────────────────────────

/// Deterministic ranking of candidates. Higher scores are selected first.
///
/// Paths in `pinned` or `boosted` match exactly or as a directory prefix.
#[derive(Debug, Clone, Default)]
pub struct ScoringPolicy {
    pub pinned: BTreeSet<String>,
    pub boosted: BTreeSet<String>,
}

impl ScoringPolicy {
    pub fn with_pinned(mut self, paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.pinned.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn with_boosted(mut self, paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.boosted.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn score(&self, candidate: &Candidate) -> i64 {
        let path = candidate.path.as_str();
        let name = file_name(path);
        let mut score = 0i64;

        if matches_any(&self.pinned, path) {
            score += 1_000_000;
        }
        if matches_any(&self.boosted, path) {
            score += 10_000;
        }
        if MANIFEST_NAMES.contains(&name) || name.eq_ignore_ascii_case("README.md") {
            score += 800;
        }
        if ENTRY_POINT_NAMES.contains(&name) {
            score += 500;
        }
        score += match candidate.class {
            ContentClass::Analysis => 400,
            ContentClass::Manifest => 300,
            ContentClass::Documentation => 100,
            ContentClass::Source => 0,
        };
        score -= 50 * path.matches('/').count() as i64;
        if is_test_path(path) {
            score -= 200;
        }
        score
    }
}

fn matches_any(patterns: &BTreeSet<String>, path: &str) -> bool {
    patterns.iter().any(|p| {
        let p = p.trim_end_matches('/');
        path == p
            || path
                .strip_prefix(p)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

// ── Selection ──────────────────────────────────────────────────────

/// Outcome of packing candidates into a budget.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    /// Candidates included whole, in rank order.
    pub included: Vec<Candidate>,
    /// Candidates included with shortened content, in rank order.
    pub truncated: Vec<Candidate>,
    /// Paths left out entirely, in rank order.
    pub excluded: Vec<String>,
    pub used_tokens: usize,
    pub budget_tokens: usize,
}

impl Selection {
    /// Included and truncated candidates in path order, for prompt layout.
    pub fn selected(&self) -> Vec<(&Candidate, bool)> {
        let mut all: Vec<(&Candidate, bool)> = self
            .included
            .iter()
            .map(|c| (c, false))
            .chain(self.truncated.iter().map(|c| (c, true)))
            .collect();
        all.sort_by(|a, b| a.0.path.cmp(&b.0.path));
        all
    }

    pub fn summary(&self) -> String {
        format!(
            "{} included, {} truncated, {} excluded (~{}/{} tokens)",
            self.included.len(),
            self.truncated.len(),
            self.excluded.len(),
            self.used_tokens,
            self.budget_tokens,
        )
    }
}

/// Allocates per-round token budgets and selects prompt content.
///
/// # Example
///
/// ```ignore
/// let budgeter = ContextBudgeter::default()
///     .with_context_window(128_000)
///     .with_output_reserve(4096);
///
/// let budget = budgeter.allocation_for(round.output_tokens, &round.instructions);
/// let selection = budgeter.select(candidates, budget);
/// println!("{}", selection.summary());
/// ```
#[derive(Debug, Clone)]
pub struct ContextBudgeter {
    context_window: usize,
    output_reserve: usize,
    instruction_reserve: usize,
    chars_per_token: f64,
    policy: ScoringPolicy,
}

impl Default for ContextBudgeter {
    fn default() -> Self {
        Self {
            context_window: DEFAULT_CONTEXT_WINDOW,
            output_reserve: DEFAULT_OUTPUT_RESERVE,
            instruction_reserve: DEFAULT_INSTRUCTION_RESERVE,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            policy: ScoringPolicy::default(),
        }
    }
}

impl ContextBudgeter {
    /// Override the context window size (in tokens).
    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = tokens;
        self
    }

    /// Tokens reserved for output when a round does not declare its own.
    pub fn with_output_reserve(mut self, tokens: usize) -> Self {
        self.output_reserve = tokens;
        self
    }

    pub fn with_instruction_reserve(mut self, tokens: usize) -> Self {
        self.instruction_reserve = tokens;
        self
    }

    /// Use a calibrated chars-per-token ratio. Non-positive values are
    /// ignored.
    pub fn with_chars_per_token(mut self, cpt: f64) -> Self {
        if cpt > 0.0 {
            self.chars_per_token = cpt;
        }
        self
    }

    pub fn with_policy(mut self, policy: ScoringPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn context_window(&self) -> usize {
        self.context_window
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    /// Context window minus the default output and instruction reserves.
    pub fn effective_tokens(&self) -> usize {
        self.context_window
            .saturating_sub(self.output_reserve)
            .saturating_sub(self.instruction_reserve)
    }

    pub fn estimate(&self, text: &str) -> usize {
        estimate_tokens_with(text, self.chars_per_token)
    }

    /// Build a candidate estimated with this budgeter's ratio.
    pub fn candidate(&self, path: impl Into<String>, content: impl Into<String>) -> Candidate {
        let candidate = Candidate::new(path, content);
        let tokens = self.estimate(&candidate.content);
        candidate.with_estimated_tokens(tokens)
    }

    /// Content budget for one round: the window minus its output reserve,
    /// the instruction reserve and whatever `fixed_prompt` (instructions,
    /// dependency results) already occupies.
    pub fn allocation_for(&self, output_tokens: Option<usize>, fixed_prompt: &str) -> usize {
        self.context_window
            .saturating_sub(output_tokens.unwrap_or(self.output_reserve))
            .saturating_sub(self.instruction_reserve)
            .saturating_sub(self.estimate(fixed_prompt))
    }

    /// Rank `candidates` and pack them into `budget_tokens`.
    ///
    /// Packing is greedy in rank order and keeps going after a miss, so a
    /// small low-ranked file can still fill space a large one could not.
    pub fn select(&self, candidates: Vec<Candidate>, budget_tokens: usize) -> Selection {
        let mut ranked: Vec<(i64, Candidate)> = candidates
            .into_iter()
            .map(|c| (self.policy.score(&c), c))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.path.cmp(&b.1.path)));

        let mut selection = Selection {
            budget_tokens,
            ..Default::default()
        };
        let mut remaining = budget_tokens;

        for (_, candidate) in ranked {
            if candidate.estimated_tokens <= remaining {
                remaining -= candidate.estimated_tokens;
                selection.included.push(candidate);
            } else if candidate.class.is_truncatable() && remaining >= MIN_TRUNCATED_TOKENS {
                match self.truncate(&candidate, remaining) {
                    Some(cut) => {
                        remaining -= cut.estimated_tokens;
                        selection.truncated.push(cut);
                    }
                    None => selection.excluded.push(candidate.path),
                }
            } else {
                selection.excluded.push(candidate.path);
            }
        }

        selection.used_tokens = budget_tokens - remaining;
        selection
    }

    /// Shorten `candidate` so its estimate, marker included, fits
    /// `max_tokens`. Cuts on a char boundary, preferring a line break.
    fn truncate(&self, candidate: &Candidate, max_tokens: usize) -> Option<Candidate> {
        let content = candidate.content.as_str();
        let marker_tokens = self.estimate(TRUNCATION_MARKER);
        let target_tokens = max_tokens.checked_sub(marker_tokens)?;
        let mut limit = ((target_tokens as f64) * self.chars_per_token) as usize;
        limit = limit.min(content.len());

        loop {
            while limit > 0 && !content.is_char_boundary(limit) {
                limit -= 1;
            }
            let head = content.get(..limit)?;
            let head = match head.rfind('\n') {
                Some(nl) if nl >= limit / 2 => head.get(..nl)?,
                _ => head,
            };
            if head.is_empty() {
                return None;
            }

            let text = format!("{head}{TRUNCATION_MARKER}");
            let tokens = self.estimate(&text);
            if tokens <= max_tokens {
                return Some(Candidate {
                    path: candidate.path.clone(),
                    content: text,
                    estimated_tokens: tokens,
                    class: candidate.class,
                });
            }
            limit = head.len().saturating_sub(16);
        }
    }
}
