//! Error kinds shared across the orchestration core.
//!
//! Every fallible boundary in quest resolves to one of these variants rather
//! than letting a provider- or transport-specific error type leak upward.
//! Call sites outside the orchestrator's own recovery points use
//! `anyhow::Result` with `.context(...)`; the orchestrator itself matches on
//! these variants to implement the propagation policy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuestError {
    /// Missing credential, provider library, or required config key.
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    /// A model gateway call exceeded its wall-clock timeout.
    #[error("upstream model call timed out after {seconds}s")]
    UpstreamTimeout { seconds: u64 },

    /// A non-retryable error surfaced by the model provider.
    #[error("upstream model error: {0}")]
    UpstreamError(String),

    /// The runner collaborator was unreachable or returned malformed data.
    #[error("runner error: {0}")]
    RunnerError(String),

    /// An optional static-analysis tool is not installed. Informational only.
    #[error("tool unavailable: {0}")]
    ToolUnavailable(String),

    /// Source text (context or candidate test) could not be parsed.
    #[error("parse failure: {0}")]
    ParseFailure(String),

    /// A payload failed schema validation (only reachable when runtime
    /// validation is enabled).
    #[error("validation failure: {0}")]
    ValidationFailure(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl QuestError {
    /// True for the model-gateway error kinds that are fatal only on
    /// attempt 0 and otherwise end the run gracefully with a best-so-far
    /// summary (see §7 propagation policy).
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            QuestError::UpstreamTimeout { .. } | QuestError::UpstreamError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, QuestError>;
