//! Prompt content selection under a token budget.
//!
//! 1. **[`budget`]**: [`ContextBudgeter`] derives each round's allocation from
//!    the model's context window and packs ranked [`Candidate`]s into it,
//!    truncating or excluding what does not fit.
//!
//! 2. **[`prompt`]**: [`PromptComposer`] lays out instructions, dependency
//!    results and the selected content into a deterministic prompt.

pub mod budget;
pub mod prompt;

pub use budget::{
    Candidate, ContentClass, ContextBudgeter, DEFAULT_CHARS_PER_TOKEN, ScoringPolicy, Selection,
    estimate_tokens, estimate_tokens_with,
};
pub use prompt::{ComposedPrompt, PromptComposer};
