//! quest - closed-loop, metric-driven unit-test synthesizer.
//!
//! Drives a draft/critique/refine agent loop over two external
//! collaborators (a model gateway and a sandboxed test runner) until a
//! generated test module for a target Python source file meets its
//! coverage and mutation-score targets, stagnates, or exhausts its
//! iteration/cost/time budget. See SPEC_FULL.md for the full component
//! list (C1-C10) and the orchestrator state machine.

pub mod agents;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod reliability;
pub mod router;
pub mod runner;
pub mod static_analysis;

pub use config::QuestConfig;
pub use error::{QuestError, Result};
pub use orchestrator::{Orchestrator, OrchestratorConfig, RunSummary};

/// Current quest version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
