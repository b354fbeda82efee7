//! Orchestrator (C9): drives the draft/critique/refine loop over the
//! external sandboxed runner, persists every attempt's artifacts, and
//! decides when to stop (§4.9).
//!
//! # Architecture
//!
//! - `mod.rs` — the `Orchestrator` state machine and `RunSummary`.
//! - `state.rs` — `RunState`, the one piece of cross-attempt mutable state.
//! - `artifacts.rs` — `RunDir`, the per-run/per-attempt file layout and
//!   `events.log` formatting.

pub mod artifacts;
pub mod state;

pub use state::RunState;

use crate::agents::{Critic, Critique, CritiqueInputs, Drafter, PromptDrafter, PromptRefiner, Refiner, RuleBasedCritic, TestArtifact};
use crate::config::QuestConfig;
use crate::context::{ContextMiner, TreeSitterContextMiner};
use crate::error::{QuestError, Result};
use crate::gateway::{AnthropicGateway, Decoding, DryGateway, ModelGateway};
use crate::reliability::{PostReliabilityRecord, PreReliabilityRecord, post_score, pre_score};
use crate::router::{RouteDecision, route};
use crate::runner::{DryRunner, HttpRunner, Runner, RunnerRequest, RunnerResponse};
use crate::static_analysis::{StaticReport, analyze};
use artifacts::{RunDir, attempt_prefix, format_event, format_finish_event};
use serde::{Deserialize, Serialize};
use state::generate_run_id;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Everything that is fixed for the lifetime of one run: the run
/// configuration plus the repo/version/target coordinates the spec's CLI
/// surface (`quest run --repo . --version <tag> --file <path>`) supplies.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub quest: QuestConfig,
    pub repo: PathBuf,
    pub version: String,
    pub target_file: PathBuf,
    pub runs_dir: PathBuf,
    /// §4.2 Context Miner's character budget for embedded source text.
    pub context_max_chars: usize,
}

/// §3 per-attempt `metrics.json` contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptMetrics {
    pub attempt_index: u32,
    pub coverage: f64,
    pub mutation_score: f64,
    pub lint_issue_count: u32,
    pub cyclomatic_complexity: u32,
    pub cost: Option<f64>,
}

/// Written once, at `run_summary.json` (§4.9 "On finish...").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub iterations: u32,
    pub finish_reason: String,
    pub total_cost: f64,
    pub total_input_tokens: u32,
    pub total_output_tokens: u32,
    pub phase_durations_seconds: std::collections::BTreeMap<String, f64>,
    pub total_wall_seconds: f64,
    pub final_coverage: f64,
    pub final_mutation: f64,
    pub targets_met: bool,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    cancel_token: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, cancel_token: CancellationToken) -> Self {
        Self { config, cancel_token }
    }

    /// Drives one full run: context mining, then attempt 0 plus however
    /// many refine rounds the router calls for. Always returns `Ok` with a
    /// `RunSummary` — even a fatal failure on attempt 0 is a normal,
    /// recorded outcome (§7 "the orchestrator always produces a
    /// run_summary.json ... even on fatal termination"). `Err` is reserved
    /// for failures below the orchestration layer itself (e.g. the run
    /// directory cannot be created).
    pub async fn run(&self) -> Result<RunSummary> {
        let run_id = generate_run_id();
        let run_dir = RunDir::create(&self.config.runs_dir, &run_id).await?;
        let start = Instant::now();
        let targets = self.config.quest.targets;
        let mut state = RunState::new(
            run_id.clone(),
            targets,
            self.config.quest.max_total_cost,
            self.config.quest.max_total_wall_seconds,
        );

        tracing::info!(run_id = %run_id, "INIT");

        let context_miner =
            TreeSitterContextMiner::new(self.config.quest.runner_code_url.clone(), self.config.quest.runner_timeout_seconds);
        let context = context_miner
            .mine(
                &self.config.repo,
                &self.config.target_file,
                &self.config.repo.to_string_lossy(),
                &self.config.version,
                self.config.context_max_chars,
            )
            .await;
        run_dir.write_json("context.json", &context).await?;
        run_dir.write_text("target_code", &context.code_src).await?;

        let gateway = match build_gateway(&self.config.quest) {
            Ok(gateway) => gateway,
            Err(err) => {
                tracing::error!(run_id = %run_id, error = %err, "model gateway unavailable on attempt 0");
                return self
                    .finish(&run_dir, &mut state, start, "configuration-missing", 0, -1.0, -1.0)
                    .await;
            }
        };
        let runner = build_runner(&self.config.quest);
        let drafter = PromptDrafter::new(gateway.clone());
        let refiner = PromptRefiner::new(gateway.clone());
        let critic = RuleBasedCritic::from_config(Some(gateway.clone()), &self.config.quest);
        let decoding = Decoding {
            model: self.config.quest.llm.model.clone(),
            temperature: self.config.quest.llm.decoding.temperature,
            top_p: self.config.quest.llm.decoding.top_p,
            max_tokens: self.config.quest.llm.decoding.max_tokens,
            timeout_seconds: self.config.quest.llm.timeout_seconds,
        };
        let collect_logprobs = self.config.quest.llm.collect_logprobs;

        let mut current_test: Option<TestArtifact> = None;
        let mut last_critique: Option<Critique> = None;
        let mut prior_coverage: Option<f64> = None;
        let mut prior_mutation: Option<f64> = None;

        loop {
            if self.cancel_token.is_cancelled() {
                tracing::info!(run_id = %run_id, attempt = state.attempt_index, "run cancelled");
                return self
                    .finish(
                        &run_dir,
                        &mut state,
                        start,
                        "cancelled",
                        state.attempt_index.saturating_sub(1),
                        prior_coverage.unwrap_or(-1.0),
                        prior_mutation.unwrap_or(-1.0),
                    )
                    .await;
            }
            if state.budget_exceeded(start.elapsed()) {
                tracing::info!(run_id = %run_id, attempt = state.attempt_index, "budget exceeded");
                return self
                    .finish(
                        &run_dir,
                        &mut state,
                        start,
                        "budget-exceeded",
                        state.attempt_index.saturating_sub(1),
                        prior_coverage.unwrap_or(-1.0),
                        prior_mutation.unwrap_or(-1.0),
                    )
                    .await;
            }

            let attempt_index = state.attempt_index;
            let prefix = attempt_prefix(attempt_index);
            let code_file = self.config.target_file.display().to_string();

            // DRAFT (attempt 0) or REFINE (attempt >= 1).
            let phase_name = if attempt_index == 0 { "draft" } else { "refine" };
            let phase_start = Instant::now();
            let draft_outcome = if attempt_index == 0 {
                tracing::info!(run_id = %run_id, attempt = attempt_index, "DRAFT");
                drafter
                    .draft(&context, &self.config.repo.to_string_lossy(), &self.config.version, &code_file, &decoding, collect_logprobs)
                    .await
            } else {
                tracing::info!(run_id = %run_id, attempt = attempt_index, "REFINE");
                let prior_artifact = current_test.as_ref().expect("refine only runs after a prior attempt exists");
                let prior_critique = last_critique.as_ref().expect("refine only runs after a prior critique exists");
                refiner.refine(prior_artifact, prior_critique, &context, &decoding, collect_logprobs).await
            };
            state.add_phase_duration(phase_name, phase_start.elapsed());

            let (artifact, llm_metadata) = match draft_outcome {
                Ok(pair) => pair,
                Err(err) => {
                    run_dir
                        .append_event(&format_event(&run_id, attempt_index, phase_name, false, -1.0, -1.0))
                        .await?;
                    let reason = upstream_finish_reason(&err);
                    if attempt_index == 0 {
                        return self.finish(&run_dir, &mut state, start, reason, attempt_index, -1.0, -1.0).await;
                    }
                    return self
                        .finish(
                            &run_dir,
                            &mut state,
                            start,
                            reason,
                            attempt_index.saturating_sub(1),
                            prior_coverage.unwrap_or(-1.0),
                            prior_mutation.unwrap_or(-1.0),
                        )
                        .await;
                }
            };

            state.add_cost(llm_metadata.estimated_cost);
            state.add_tokens(llm_metadata.input_tokens, llm_metadata.output_tokens);

            run_dir
                .write_json(
                    &format!("{prefix}.request.json"),
                    &serde_json::json!({
                        "repo": self.config.repo.to_string_lossy(),
                        "version": self.config.version,
                        "code_file": code_file,
                    }),
                )
                .await?;
            run_dir.write_text(&format!("{prefix}.test_src"), &artifact.text).await?;
            run_dir.write_json(&format!("{prefix}.llm_metadata.json"), &llm_metadata).await?;

            // ANALYZE: static check fans out to pre-reliability.
            let phase_start = Instant::now();
            let static_report: StaticReport = analyze(
                &artifact.text,
                self.config.quest.static_analysis.enable,
                self.config.quest.static_analysis.timeout_seconds,
            )
            .await;
            state.add_phase_duration("static_analysis", phase_start.elapsed());
            run_dir.write_json(&format!("{prefix}.static.json"), &static_report).await?;

            let pre: PreReliabilityRecord = pre_score(
                llm_metadata.entropy,
                llm_metadata.avg_logprob,
                llm_metadata.total_tokens(),
                &static_report,
                &self.config.quest.reliability,
            );
            run_dir.write_json(&format!("{prefix}.pre_reliability.json"), &pre).await?;

            // EXECUTE: the runner client.
            tracing::info!(run_id = %run_id, attempt = attempt_index, "EXECUTE");
            let phase_start = Instant::now();
            let request = RunnerRequest {
                repo: &self.config.repo.to_string_lossy(),
                version: &self.config.version,
                code_file: &code_file,
                test_src: &artifact.text,
            };
            let response: RunnerResponse = match runner.run(request).await {
                Ok(response) => response,
                Err(err) => RunnerResponse::collaborator_error(err.to_string()),
            };
            state.add_phase_duration("runner", phase_start.elapsed());
            run_dir.write_json(&format!("{prefix}.response.json"), &response).await?;

            let post: PostReliabilityRecord = post_score(&pre, &response, &static_report, targets.coverage, targets.mutation);
            run_dir.write_json(&format!("{prefix}.post_reliability.json"), &post).await?;

            run_dir
                .append_event(&format_event(&run_id, attempt_index, "EXECUTE", response.success, response.coverage, response.mutation_score))
                .await?;

            // CRITIQUE.
            tracing::info!(run_id = %run_id, attempt = attempt_index, "CRITIQUE");
            let phase_start = Instant::now();
            let (critique, stagnation_count) = critic
                .critique(CritiqueInputs {
                    response: &response,
                    static_report: &static_report,
                    pre: &pre,
                    post: &post,
                    targets,
                    prior_coverage,
                    prior_mutation,
                    current_stagnation_count: state.stagnation_count,
                    current_test: &artifact.text,
                })
                .await;
            state.add_phase_duration("critique", phase_start.elapsed());
            state.stagnation_count = stagnation_count;
            run_dir.write_json(&format!("{prefix}.critique.json"), &critique).await?;
            if let Some(metadata) = &critique.llm_supervisor_metadata {
                run_dir.write_json(&format!("{prefix}.supervisor_llm_metadata.json"), metadata).await?;
            }

            state.record_attempt(response.coverage, response.mutation_score);
            run_dir
                .write_json(
                    &format!("{prefix}.metrics.json"),
                    &AttemptMetrics {
                        attempt_index,
                        coverage: response.coverage,
                        mutation_score: response.mutation_score,
                        lint_issue_count: static_report.lint_issue_count(),
                        cyclomatic_complexity: static_report.cyclomatic_complexity,
                        cost: llm_metadata.estimated_cost,
                    },
                )
                .await?;

            let attempts_done = attempt_index + 1;
            let decision = route(&critique, attempts_done, self.config.quest.max_iterations);

            prior_coverage = Some(response.coverage);
            prior_mutation = Some(response.mutation_score);
            let targets_met = !critique.low_coverage && !critique.low_mutation;
            current_test = Some(artifact);
            last_critique = Some(critique.clone());

            match decision {
                RouteDecision::Refine => {
                    state.attempt_index += 1;
                    continue;
                }
                RouteDecision::Finish => {
                    let reason = finish_reason(&critique, attempts_done, self.config.quest.max_iterations, targets_met);
                    return self
                        .finish(&run_dir, &mut state, start, reason, attempt_index, response.coverage, response.mutation_score)
                        .await;
                }
            }
        }
    }

    /// Writes `run_summary.json` and the final `events.log` line, then
    /// returns the summary. Shared by every termination path (targets met,
    /// stagnation, max iterations, budget exceeded, cancellation, and
    /// fatal upstream failures).
    async fn finish(
        &self,
        run_dir: &RunDir,
        state: &mut RunState,
        start: Instant,
        reason: &str,
        iter: u32,
        final_coverage: f64,
        final_mutation: f64,
    ) -> Result<RunSummary> {
        let phase_durations_seconds = state
            .phase_durations
            .iter()
            .map(|(name, duration): (&&'static str, &Duration)| (name.to_string(), duration.as_secs_f64()))
            .collect();

        let targets_met = final_coverage >= state.targets.coverage
            && (state.targets.mutation <= 0.0 || final_mutation >= state.targets.mutation);

        let summary = RunSummary {
            run_id: state.run_id.clone(),
            iterations: iter,
            finish_reason: reason.to_string(),
            total_cost: state.total_cost,
            total_input_tokens: state.total_input_tokens,
            total_output_tokens: state.total_output_tokens,
            phase_durations_seconds,
            total_wall_seconds: start.elapsed().as_secs_f64(),
            final_coverage,
            final_mutation,
            targets_met,
        };

        run_dir.write_json("run_summary.json", &summary).await?;
        run_dir.append_event(&format_finish_event(&state.run_id, iter, reason)).await?;
        tracing::info!(run_id = %state.run_id, reason, iterations = iter, "finish");

        Ok(summary)
    }
}

/// Maps a fatal gateway error to its `finish_reason` (§7).
fn upstream_finish_reason(err: &QuestError) -> &'static str {
    match err {
        QuestError::ConfigurationMissing(_) => "configuration-missing",
        QuestError::UpstreamTimeout { .. } => "upstream-timeout",
        QuestError::UpstreamError(_) => "upstream-error",
        _ => "error",
    }
}

/// §4.10-adjacent: turns a FINISH decision into the human-readable reason
/// recorded in `run_summary.json`/`events.log`, following the router's own
/// evaluation order so the reason always matches the clause that actually
/// fired.
fn finish_reason(critique: &Critique, attempts_done: u32, max_iterations: u32, targets_met: bool) -> &'static str {
    debug_assert!(
        attempts_done >= max_iterations || critique.no_progress || targets_met,
        "route() returned Finish without a matching reason"
    );
    if attempts_done >= max_iterations {
        "max-iterations"
    } else if critique.no_progress {
        "stagnation"
    } else {
        "targets-met"
    }
}

/// Constructs the model gateway. The only place `ConfigurationMissing` can
/// surface (§7) — a missing API key when `llm.dry=false`.
fn build_gateway(config: &QuestConfig) -> Result<Arc<dyn ModelGateway>> {
    if config.llm.dry {
        return Ok(Arc::new(DryGateway::new()));
    }
    let api_key = config
        .llm
        .api_key
        .clone()
        .ok_or_else(|| QuestError::ConfigurationMissing("QUEST_LLM_API_KEY".to_string()))?;
    Ok(Arc::new(AnthropicGateway::new(api_key)))
}

/// Constructs the runner collaborator: the dry stub when `runner_url` is
/// the literal string `"dry"` (§8 determinism property), otherwise the
/// HTTP collaborator.
fn build_runner(config: &QuestConfig) -> Arc<dyn Runner> {
    if config.runner_url == "dry" {
        Arc::new(DryRunner {
            target_coverage: config.targets.coverage,
            target_mutation: config.targets.mutation,
        })
    } else {
        Arc::new(HttpRunner::new(config.runner_url.clone(), config.runner_timeout_seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QuestConfig, TargetsConfig};

    fn base_config(runs_dir: PathBuf) -> OrchestratorConfig {
        let mut quest = QuestConfig::default();
        quest.llm.dry = true;
        quest.runner_url = "dry".to_string();
        quest.max_iterations = 3;
        quest.targets = TargetsConfig {
            coverage: 40.0,
            mutation: 30.0,
        };
        OrchestratorConfig {
            quest,
            repo: PathBuf::from("."),
            version: "v1".to_string(),
            target_file: PathBuf::from("nonexistent_target.py"),
            runs_dir,
            context_max_chars: 8_000,
        }
    }

    #[tokio::test]
    async fn dry_run_exhausts_max_iterations_when_stub_output_never_changes() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(base_config(dir.path().to_path_buf()), CancellationToken::new());
        let summary = orchestrator.run().await.unwrap();

        // DryRunner always reports half of target: coverage 20, mutation 15
        // against targets 40/30 configured above. That never meets targets
        // and never progresses attempt-over-attempt, so the router's
        // stagnation clause and its max-iterations clause would both fire
        // at attempt 2; max-iterations is evaluated first.
        assert_eq!(summary.finish_reason, "max-iterations");
        assert_eq!(summary.iterations, 2);
    }

    #[tokio::test]
    async fn dry_run_meets_targets_when_thresholds_match_the_stub() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = base_config(dir.path().to_path_buf());
        // DryRunner reports half of target; setting targets to exactly the
        // stub's output makes attempt 0 immediately satisfy them.
        config.quest.targets = TargetsConfig {
            coverage: 0.0,
            mutation: 0.0,
        };
        let orchestrator = Orchestrator::new(config, CancellationToken::new());
        let summary = orchestrator.run().await.unwrap();

        assert_eq!(summary.finish_reason, "targets-met");
        assert_eq!(summary.iterations, 0);
        assert!(summary.targets_met);
    }

    #[tokio::test]
    async fn missing_api_key_is_fatal_and_still_writes_a_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = base_config(dir.path().to_path_buf());
        config.quest.llm.dry = false;
        config.quest.llm.api_key = None;

        let orchestrator = Orchestrator::new(config, CancellationToken::new());
        let summary = orchestrator.run().await.unwrap();

        assert_eq!(summary.finish_reason, "configuration-missing");
        assert_eq!(summary.iterations, 0);

        let run_summary_path = dir.path().join(&summary.run_id).join("run_summary.json");
        assert!(run_summary_path.exists());
    }

    #[tokio::test]
    async fn artifact_set_is_written_for_every_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(base_config(dir.path().to_path_buf()), CancellationToken::new());
        let summary = orchestrator.run().await.unwrap();

        let run_root = dir.path().join(&summary.run_id);
        for k in 0..=summary.iterations {
            for suffix in [
                "request.json",
                "test_src",
                "llm_metadata.json",
                "static.json",
                "pre_reliability.json",
                "response.json",
                "post_reliability.json",
                "critique.json",
                "metrics.json",
            ] {
                let path = run_root.join(format!("attempt_{k}.{suffix}"));
                assert!(path.exists(), "missing {path:?}");
            }
        }
        assert!(run_root.join("context.json").exists());
        assert!(run_root.join("target_code").exists());
        assert!(run_root.join("events.log").exists());
        assert!(run_root.join("run_summary.json").exists());
    }
}
