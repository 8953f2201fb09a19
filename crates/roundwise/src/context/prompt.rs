//! Round prompt assembly.
//!
//! A prompt is laid out in a fixed order so unchanged input always produces
//! byte-identical text:
//!
//! 1. the round's instructions
//! 2. one `<dependency>` block per direct dependency, ascending by id,
//!    holding that round's JSON result
//! 3. one `<file>` block per selected candidate, ascending by path
//! 4. a single line naming files left out for budget

use super::budget::{Candidate, ContextBudgeter, Selection};
use crate::rounds::{RoundDefinition, RoundResult};
use std::fmt::Write as _;

/// A prompt ready to send, with the selection that produced it.
#[derive(Debug, Clone)]
pub struct ComposedPrompt {
    pub text: String,
    /// Content budget the selection was packed into.
    pub allocation: usize,
    pub selection: Selection,
}

/// Builds round prompts from a shared pool of candidate content.
#[derive(Debug, Clone)]
pub struct PromptComposer {
    budgeter: ContextBudgeter,
    candidates: Vec<Candidate>,
}

impl PromptComposer {
    pub fn new(budgeter: ContextBudgeter, candidates: Vec<Candidate>) -> Self {
        Self {
            budgeter,
            candidates,
        }
    }

    pub fn budgeter(&self) -> &ContextBudgeter {
        &self.budgeter
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Compose the prompt for `round` given its dependencies' results.
    pub fn compose(
        &self,
        round: &RoundDefinition,
        dependencies: &[(&RoundDefinition, &RoundResult)],
    ) -> ComposedPrompt {
        let mut deps = dependencies.to_vec();
        deps.sort_by_key(|(def, _)| def.id);

        let mut text = String::new();
        text.push_str(round.instructions.trim_end());
        text.push_str("\n\n");

        for (def, result) in deps {
            let json = serde_json::to_string_pretty(&result.data)
                .unwrap_or_else(|_| result.data.to_string());
            let _ = writeln!(
                text,
                "<dependency round=\"{}\" name=\"{}\">\n{json}\n</dependency>\n",
                def.id, def.name
            );
        }

        let allocation = self.budgeter.allocation_for(round.output_tokens, &text);
        let selection = self.budgeter.select(self.candidates.clone(), allocation);

        for (candidate, truncated) in selection.selected() {
            let attr = if truncated { " truncated=\"true\"" } else { "" };
            let _ = writeln!(
                text,
                "<file path=\"{}\"{attr}>\n{}\n</file>\n",
                candidate.path,
                candidate.content.trim_end_matches('\n')
            );
        }

        if !selection.excluded.is_empty() {
            let mut omitted = selection.excluded.clone();
            omitted.sort();
            let _ = writeln!(text, "Omitted for budget: {}", omitted.join(", "));
        }

        ComposedPrompt {
            text,
            allocation,
            selection,
        }
    }
}
