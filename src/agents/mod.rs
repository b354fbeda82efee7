//! The three collaborating agents (§1, §4.5–§4.7) plus the shared data
//! types their contracts pass between them (§3 `TestArtifact`, `Critique`).
//!
//! - `drafter.rs` — C5, produces attempt 0 from a `ContextPack`.
//! - `critic.rs` — C6, turns execution + reliability signals into an
//!   ordered `Critique`.
//! - `refiner.rs` — C7, rewrites a test module under critique instructions.

pub mod critic;
pub mod drafter;
pub mod refiner;

pub use critic::{Critic, CritiqueInputs, RuleBasedCritic};
pub use drafter::{Drafter, PromptDrafter};
pub use refiner::{PromptRefiner, Refiner};

use crate::context::FrameworkTag;
use crate::gateway::LLMMetadata;
use crate::static_analysis::analyze_syntax_and_complexity;
use serde::{Deserialize, Serialize};

/// §3 `TestArtifact`: the candidate test module for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestArtifact {
    pub text: String,
    pub framework: FrameworkTag,
    pub parsed_ok: bool,
}

impl TestArtifact {
    /// Builds an artifact from raw Drafter/Refiner output, running a quick
    /// syntax check so `parsed_ok` reflects reality even before the full
    /// static-analysis phase runs.
    pub fn new(text: String, framework: FrameworkTag) -> Self {
        let parsed_ok = analyze_syntax_and_complexity(&text).syntax_ok;
        Self {
            text,
            framework,
            parsed_ok,
        }
    }
}

/// The six categories of optional model-assisted critique (§3
/// `llm_suggestions`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmSuggestions {
    #[serde(default)]
    pub priority_issues: Vec<String>,
    #[serde(default)]
    pub coverage_suggestions: Vec<String>,
    #[serde(default)]
    pub mutation_suggestions: Vec<String>,
    #[serde(default)]
    pub code_quality_suggestions: Vec<String>,
    #[serde(default)]
    pub test_strategy_suggestions: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

/// §3 `Critique`: the Critic's structured analysis of one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Critique {
    pub compile_error: bool,
    pub no_tests: bool,
    pub low_coverage: bool,
    pub low_mutation: bool,
    pub no_progress: bool,

    pub mutation_score: f64,
    pub coverage_delta: f64,
    pub mutation_delta: f64,
    pub lint_issue_count: u32,

    pub missing_lines: Vec<u32>,
    pub instructions: Vec<String>,

    pub llm_suggestions: Option<LlmSuggestions>,
    pub llm_supervisor_metadata: Option<LLMMetadata>,
}

impl Critique {
    /// A minimal critique asking only for a compilation repair. Used as
    /// the collapse target when the critic's own analysis fails
    /// internally (§4.6 Failure semantics) and before any attempt has run.
    pub fn compile_repair_only() -> Self {
        Self {
            compile_error: true,
            no_tests: false,
            low_coverage: false,
            low_mutation: false,
            no_progress: false,
            mutation_score: -1.0,
            coverage_delta: 0.0,
            mutation_delta: 0.0,
            lint_issue_count: 0,
            missing_lines: Vec::new(),
            instructions: vec!["fix the syntax/compilation error before anything else".to_string()],
            llm_suggestions: None,
            llm_supervisor_metadata: None,
        }
    }
}
