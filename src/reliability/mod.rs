//! Reliability Predictor (C4): pre- and post-execution scoring (§4.4).
//!
//! Grounded on the teacher's threshold-cascade-with-rationale classifier
//! design (`routing::classifier::TaskClassifier`), adapted to two ordered
//! cascades instead of one.

use crate::config::ReliabilityConfig;
use crate::runner::RunnerResponse;
use crate::static_analysis::StaticReport;
use serde::{Deserialize, Serialize};

/// Pre-execution reliability level (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreLevel {
    High,
    Medium,
    Low,
    Unknown,
}

/// Post-execution reliability level (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostLevel {
    Trusted,
    Pass,
    NeedsReview,
    Discard,
}

/// §3 pre-execution `ReliabilityRecord`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreReliabilityRecord {
    pub level: PreLevel,
    pub entropy: Option<f64>,
    pub avg_logprob: Option<f64>,
    pub token_count: u32,
    pub rationale: String,
    pub static_snapshot: StaticReport,
    pub lint_issue_count: u32,
}

/// §3 post-execution `ReliabilityRecord`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostReliabilityRecord {
    pub pre_level: PreLevel,
    pub level: PostLevel,
    pub reasons: Vec<String>,
    pub coverage: f64,
    pub target_coverage: f64,
    pub mutation_score: f64,
    pub target_mutation: f64,
    pub success: bool,
    pub lint_issue_count: u32,
}

/// §4.4 pre-execution scoring.
///
/// Initial level from entropy thresholds, then three downgrade rules
/// applied in order: syntax failure forces `low`; excess lint issues or
/// complexity cap the level at `medium`. The rationale records exactly
/// which rules fired, in firing order.
pub fn pre_score(
    entropy: Option<f64>,
    avg_logprob: Option<f64>,
    token_count: u32,
    static_report: &StaticReport,
    config: &ReliabilityConfig,
) -> PreReliabilityRecord {
    let mut rationale_parts = Vec::new();

    let mut level = match entropy {
        None => {
            rationale_parts.push("entropy unavailable".to_string());
            PreLevel::Unknown
        }
        Some(e) if e <= config.entropy_high => {
            rationale_parts.push(format!("entropy {e:.3} <= entropy_high {:.3}", config.entropy_high));
            PreLevel::High
        }
        Some(e) if e <= config.entropy_medium => {
            rationale_parts.push(format!(
                "entropy {e:.3} <= entropy_medium {:.3}",
                config.entropy_medium
            ));
            PreLevel::Medium
        }
        Some(e) => {
            rationale_parts.push(format!("entropy {e:.3} > entropy_medium {:.3}", config.entropy_medium));
            PreLevel::Low
        }
    };

    let lint_issue_count = static_report.lint_issue_count();

    // (a) syntax failure forces `low` unconditionally.
    if !static_report.syntax_ok {
        rationale_parts.push("syntax check failed: forced low".to_string());
        level = PreLevel::Low;
    }

    // (b) lint issues at or above threshold cap at `medium`.
    if lint_issue_count >= config.lint_downgrade_threshold && level == PreLevel::High {
        rationale_parts.push(format!(
            "lint_issue_count {lint_issue_count} >= lint_downgrade_threshold {}: capped at medium",
            config.lint_downgrade_threshold
        ));
        level = PreLevel::Medium;
    }

    // (c) complexity above the configured ceiling caps at `medium`.
    if static_report.cyclomatic_complexity > config.complexity_ceiling && level == PreLevel::High {
        rationale_parts.push(format!(
            "cyclomatic_complexity {} > complexity_ceiling {}: capped at medium",
            static_report.cyclomatic_complexity, config.complexity_ceiling
        ));
        level = PreLevel::Medium;
    }

    PreReliabilityRecord {
        level,
        entropy,
        avg_logprob,
        token_count,
        rationale: rationale_parts.join("; "),
        static_snapshot: static_report.clone(),
        lint_issue_count,
    }
}

/// §4.4 post-execution scoring.
///
/// Starts at `pass` and walks reason accumulators in the order the spec
/// lists them; an upgrade to `trusted` only happens once, at the end, and
/// only if nothing downgraded the level and the pre-level was `high`.
pub fn post_score(
    pre: &PreReliabilityRecord,
    response: &RunnerResponse,
    static_report: &StaticReport,
    target_coverage: f64,
    target_mutation: f64,
) -> PostReliabilityRecord {
    let mut reasons = Vec::new();
    let mut level = PostLevel::Pass;
    let lint_issue_count = static_report.lint_issue_count();

    if !response.success {
        reasons.push("execution did not succeed".to_string());
        level = PostLevel::Discard;
    }

    if response.test_error.is_some() && level != PostLevel::Discard {
        reasons.push("runner reported a test error".to_string());
        level = PostLevel::NeedsReview;
    }

    if response.coverage < target_coverage && level != PostLevel::Discard {
        reasons.push(format!(
            "coverage {:.1} below target {:.1}",
            response.coverage, target_coverage
        ));
        if level == PostLevel::Pass {
            level = PostLevel::NeedsReview;
        }
    }

    if target_mutation > 0.0 && response.mutation_score < target_mutation && level != PostLevel::Discard {
        reasons.push(format!(
            "mutation score {:.1} below target {:.1}",
            response.mutation_score, target_mutation
        ));
        if level == PostLevel::Pass {
            level = PostLevel::NeedsReview;
        }
    }

    const LINT_REVIEW_THRESHOLD: u32 = 1;
    if lint_issue_count >= LINT_REVIEW_THRESHOLD && level == PostLevel::Pass {
        reasons.push(format!("{lint_issue_count} unresolved lint issue(s)"));
        level = PostLevel::NeedsReview;
    }

    if level == PostLevel::Pass && pre.level == PreLevel::High {
        level = PostLevel::Trusted;
    }

    PostReliabilityRecord {
        pre_level: pre.level,
        level,
        reasons,
        coverage: response.coverage,
        target_coverage,
        mutation_score: response.mutation_score,
        target_mutation,
        success: response.success,
        lint_issue_count,
    }
}
