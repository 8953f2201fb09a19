//! The analysis rounds shipped with this version of roundwise.
//!
//! The shape of this DAG is part of the application, not user input:
//!
//! ```text
//! overview (1) ──┬── architecture (2) ──┬── data_flow (4) ──┐
//!                └── modules (3) ───────┘                   ├── onboarding (6)
//! api_surface (5) ───────────────────────────────────────────┘
//! ```
//!
//! Every round declares a typed output; its JSON Schema (derived with
//! `schemars`) is sent to the provider and used to validate the payload.
//! Changing a round's output type or instructions requires bumping
//! [`SCHEMA_VERSION`](crate::cache::SCHEMA_VERSION).

use super::{RoundDefinition, RoundId};
use crate::json_schema_for;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const OVERVIEW: RoundId = 1;
pub const ARCHITECTURE: RoundId = 2;
pub const MODULES: RoundId = 3;
pub const DATA_FLOW: RoundId = 4;
pub const API_SURFACE: RoundId = 5;
pub const ONBOARDING: RoundId = 6;

// ── Round outputs ──────────────────────────────────────────────────

/// Output of the `overview` round.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProjectOverview {
    /// Two or three sentences on what the project does.
    pub summary: String,
    pub languages: Vec<String>,
    /// Files where execution starts (binaries, servers, CLIs).
    pub entry_points: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Component {
    pub name: String,
    pub responsibility: String,
    pub paths: Vec<String>,
}

/// Output of the `architecture` round.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Architecture {
    pub components: Vec<Component>,
    /// Free-form notes on layering and boundaries.
    #[serde(default)]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ModuleNote {
    pub path: String,
    pub purpose: String,
}

/// Output of the `modules` round.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ModuleMap {
    pub modules: Vec<ModuleNote>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Flow {
    pub name: String,
    pub steps: Vec<String>,
}

/// Output of the `data_flow` round.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DataFlow {
    pub flows: Vec<Flow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ApiItem {
    pub name: String,
    /// `function`, `type`, `endpoint`, `command`, ...
    pub kind: String,
    pub location: String,
}

/// Output of the `api_surface` round.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ApiSurface {
    pub items: Vec<ApiItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GuideStep {
    pub title: String,
    pub body: String,
}

/// Output of the `onboarding` round.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OnboardingGuide {
    pub steps: Vec<GuideStep>,
}

// ── Definitions ────────────────────────────────────────────────────

const JSON_ONLY: &str = "Respond with a single JSON object matching the provided schema. \
                         Base every statement on the supplied files; do not speculate.";

/// The standard round catalog, in id order.
pub fn standard_rounds() -> Vec<RoundDefinition> {
    vec![
        RoundDefinition::new(OVERVIEW, "overview")
            .with_instructions(format!(
                "Summarize the project: its purpose, the languages it is written in, \
                 and its entry points.\n{JSON_ONLY}"
            ))
            .with_schema(json_schema_for::<ProjectOverview>())
            .with_output_tokens(2048),
        RoundDefinition::new(ARCHITECTURE, "architecture")
            .depends_on([OVERVIEW])
            .with_instructions(format!(
                "Identify the major components of the codebase, what each is \
                 responsible for, and which paths implement it.\n{JSON_ONLY}"
            ))
            .with_schema(json_schema_for::<Architecture>()),
        RoundDefinition::new(MODULES, "modules")
            .depends_on([OVERVIEW])
            .with_instructions(format!(
                "Describe the purpose of each significant module or directory.\n{JSON_ONLY}"
            ))
            .with_schema(json_schema_for::<ModuleMap>()),
        RoundDefinition::new(DATA_FLOW, "data_flow")
            .depends_on([ARCHITECTURE, MODULES])
            .with_instructions(format!(
                "Trace how data moves between the components described above, \
                 as named flows of ordered steps.\n{JSON_ONLY}"
            ))
            .with_schema(json_schema_for::<DataFlow>()),
        RoundDefinition::new(API_SURFACE, "api_surface")
            .with_instructions(format!(
                "List the public API surface: exported functions and types, HTTP \
                 endpoints, CLI commands.\n{JSON_ONLY}"
            ))
            .with_schema(json_schema_for::<ApiSurface>()),
        RoundDefinition::new(ONBOARDING, "onboarding")
            .depends_on([ARCHITECTURE, DATA_FLOW, API_SURFACE])
            .with_instructions(format!(
                "Write an ordered onboarding guide for a new contributor, using \
                 the analysis results above.\n{JSON_ONLY}"
            ))
            .with_schema(json_schema_for::<OnboardingGuide>())
            .with_output_tokens(6144),
    ]
}
