//! Critic (C6): rule-based analysis of execution results into an ordered
//! `Critique`, with an optional model-assisted enhancement layer (§4.6).

use super::{Critique, LlmSuggestions};
use crate::config::{QuestConfig, TargetsConfig};
use crate::gateway::{Decoding, LLMMetadata, ModelGateway};
use crate::reliability::{PostReliabilityRecord, PreReliabilityRecord};
use crate::runner::RunnerResponse;
use crate::static_analysis::StaticReport;
use std::sync::Arc;

/// Markers the runner's stdout carries when no tests executed. The exact
/// phrase depends on the test framework in play and is left to the
/// implementer by §9 Open Questions; matched case-insensitively so
/// localized/differently-cased runner output is still recognized.
const NO_TESTS_MARKERS: &[&str] = &["collected 0 item", "no tests ran", "no tests collected"];

/// Truncation bound for `missing_lines` in the emitted critique (§3).
const MAX_MISSING_LINES: usize = 10;

/// Progress thresholds (§4.6 step 2): a coverage gain of at least one
/// point, or a mutation-score gain of at least two points, counts as
/// progress for stagnation purposes.
const COVERAGE_PROGRESS_THRESHOLD: f64 = 1.0;
const MUTATION_PROGRESS_THRESHOLD: f64 = 2.0;

/// Stagnation count at or above which the router (and §3 `no_progress`)
/// treats the run as stalled (§9 Glossary: "two consecutive attempts").
const STAGNATION_LIMIT: u32 = 2;

/// Inputs the critic reasons over for a single attempt.
pub struct CritiqueInputs<'a> {
    pub response: &'a RunnerResponse,
    pub static_report: &'a StaticReport,
    pub pre: &'a PreReliabilityRecord,
    pub post: &'a PostReliabilityRecord,
    pub targets: TargetsConfig,
    pub prior_coverage: Option<f64>,
    pub prior_mutation: Option<f64>,
    pub current_stagnation_count: u32,
    #[allow(dead_code)]
    pub current_test: &'a str,
}

/// Turns one attempt's execution and reliability signals into a structured
/// `Critique`, and returns the updated stagnation counter alongside it
/// (§3 `RunState.stagnation_count` is the one piece of cross-attempt
/// mutable state the critic affects).
#[async_trait::async_trait]
pub trait Critic: Send + Sync {
    async fn critique(&self, inputs: CritiqueInputs<'_>) -> (Critique, u32);
}

pub struct RuleBasedCritic {
    gateway: Option<Arc<dyn ModelGateway>>,
    use_llm: bool,
    decoding: Decoding,
}

impl RuleBasedCritic {
    pub fn new(gateway: Option<Arc<dyn ModelGateway>>, use_llm: bool, decoding: Decoding) -> Self {
        Self {
            gateway,
            use_llm,
            decoding,
        }
    }

    pub fn from_config(gateway: Option<Arc<dyn ModelGateway>>, config: &QuestConfig) -> Self {
        Self::new(
            gateway,
            config.supervisor.use_llm,
            Decoding {
                model: config.llm.model.clone(),
                temperature: config.llm.decoding.temperature,
                top_p: config.llm.decoding.top_p,
                max_tokens: config.llm.decoding.max_tokens,
                timeout_seconds: config.llm.timeout_seconds,
            },
        )
    }
}

#[async_trait::async_trait]
impl Critic for RuleBasedCritic {
    async fn critique(&self, inputs: CritiqueInputs<'_>) -> (Critique, u32) {
        let (mut critique, stagnation_count) = rule_based_critique(&inputs);

        if self.use_llm {
            if let Some(gateway) = &self.gateway {
                if let Some((suggestions, metadata)) =
                    model_assisted_suggestions(gateway.as_ref(), &self.decoding, &inputs, &critique).await
                {
                    critique.llm_suggestions = Some(suggestions);
                    critique.llm_supervisor_metadata = Some(metadata);
                }
                // Parse/call failure: the rule-based critique stands unchanged (§4.6.4).
            }
        }

        (critique, stagnation_count)
    }
}

/// The pure rule cascade of §4.6 steps 1-3. Never panics: every branch has
/// a concrete fallback, matching "the critic itself never throws".
fn rule_based_critique(inputs: &CritiqueInputs<'_>) -> (Critique, u32) {
    let response = inputs.response;
    let static_report = inputs.static_report;
    let targets = inputs.targets;

    // Step 1: boolean flags from thresholds.
    let compile_error = !response.success || !static_report.syntax_ok;
    let no_tests = detect_no_tests(&response.stdout) || detect_no_tests(&response.stderr);
    let low_coverage = response.coverage < targets.coverage;
    let low_mutation =
        targets.mutation > 0.0 && (response.mutation_score < targets.mutation || response.mutation_score < 0.0);

    // Step 2: deltas against the prior attempt, progress, stagnation.
    // Attempt 0 has no prior attempt to compare against, so it establishes
    // the baseline rather than counting as a stagnant round.
    let (coverage_delta, mutation_delta, stagnation_count) = match (inputs.prior_coverage, inputs.prior_mutation) {
        (Some(prior_coverage), Some(prior_mutation)) => {
            let coverage_delta = response.coverage - prior_coverage;
            let mutation_delta = response.mutation_score - prior_mutation;
            let made_progress =
                coverage_delta >= COVERAGE_PROGRESS_THRESHOLD || mutation_delta >= MUTATION_PROGRESS_THRESHOLD;
            let stagnation_count = if !made_progress && (low_coverage || low_mutation) {
                inputs.current_stagnation_count + 1
            } else {
                inputs.current_stagnation_count
            };
            (coverage_delta, mutation_delta, stagnation_count)
        }
        _ => (0.0, 0.0, inputs.current_stagnation_count),
    };
    let no_progress = stagnation_count >= STAGNATION_LIMIT;

    // Step 3: ordered instructions. Every applicable category contributes;
    // none short-circuits the rest ("stopping nothing along the way").
    let mut instructions = Vec::new();

    // a. syntax errors.
    if !static_report.syntax_ok {
        let detail = static_report
            .syntax_error
            .clone()
            .unwrap_or_else(|| "syntax error with no further detail".to_string());
        instructions.push(format!("fix the syntax error before anything else: {detail}"));
    }

    // b. lint/type issues.
    let lint_issue_count = static_report.lint_issue_count();
    if lint_issue_count > 0 {
        instructions.push(format!(
            "resolve {lint_issue_count} outstanding lint/type-checker issue(s) flagged on the test module"
        ));
    }

    // c. runner/compile errors (distinct from (a): covers a failed run
    // whose test module nonetheless parsed).
    if !response.success && static_report.syntax_ok {
        instructions.push("the test run did not succeed; investigate the runner failure before adding coverage".to_string());
    }

    // d. missing tests.
    if no_tests {
        instructions.push("no tests were collected; add at least one test function/method the runner can discover".to_string());
    }

    // e. missing coverage lines, truncated to the first ten (§3).
    let missing_lines: Vec<u32> = response.missing_lines().iter().copied().take(MAX_MISSING_LINES).collect();
    if !missing_lines.is_empty() {
        let rendered: Vec<String> = missing_lines.iter().map(|l| l.to_string()).collect();
        instructions.push(format!("cover the following untested line(s): {}", rendered.join(", ")));
    }

    // f. mutation target shortfall.
    if low_mutation {
        instructions.push(format!(
            "mutation score {:.1} is below the target of {:.1}; add tests that would fail under surviving mutants",
            response.mutation_score, targets.mutation
        ));
    }

    // g. reliability reasons (post-execution record's own reasons list).
    for reason in &inputs.post.reasons {
        instructions.push(format!("reliability concern: {reason}"));
    }

    // h. visible runner error text.
    if let Some(test_error) = &response.test_error {
        instructions.push(format!("runner reported: {test_error}"));
    }

    let critique = Critique {
        compile_error,
        no_tests,
        low_coverage,
        low_mutation,
        no_progress,
        mutation_score: response.mutation_score,
        coverage_delta,
        mutation_delta,
        lint_issue_count,
        missing_lines,
        instructions,
        llm_suggestions: None,
        llm_supervisor_metadata: None,
    };

    (critique, stagnation_count)
}

/// Case-insensitive match against the known "no tests ran" markers (§9
/// Open Questions).
fn detect_no_tests(text: &str) -> bool {
    let lowered = text.to_lowercase();
    NO_TESTS_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// §4.6 step 4: asks the gateway for structured suggestions under the six
/// enumerated categories. Parses leniently — any failure (call error,
/// malformed JSON, missing fields) returns `None` and the rule-based
/// critique stands.
async fn model_assisted_suggestions(
    gateway: &dyn ModelGateway,
    decoding: &Decoding,
    inputs: &CritiqueInputs<'_>,
    critique: &Critique,
) -> Option<(LlmSuggestions, LLMMetadata)> {
    let prompt = build_supervisor_prompt(inputs, critique);
    let (text, metadata) = gateway.complete(&prompt, decoding, false).await.ok()?;
    let suggestions = parse_suggestions_leniently(&text)?;
    Some((suggestions, metadata))
}

fn build_supervisor_prompt(inputs: &CritiqueInputs<'_>, critique: &Critique) -> String {
    format!(
        "You are a supervising test critic. Given the rule-based findings below, return a JSON \
         object with exactly these keys: priority_issues, coverage_suggestions, \
         mutation_suggestions, code_quality_suggestions, test_strategy_suggestions, next_steps \
         — each an array of short strings. Output only the JSON object.\n\n\
         coverage={:.1} target_coverage={:.1}\n\
         mutation_score={:.1} target_mutation={:.1}\n\
         compile_error={} no_tests={} lint_issue_count={}\n\
         instructions_so_far: {:?}\n",
        inputs.response.coverage,
        inputs.targets.coverage,
        inputs.response.mutation_score,
        inputs.targets.mutation,
        critique.compile_error,
        critique.no_tests,
        critique.lint_issue_count,
        critique.instructions,
    )
}

/// Lenient JSON parse: strips code fences (model output may or may not be
/// fenced, same as the Drafter/Refiner contract) before attempting to
/// deserialize.
fn parse_suggestions_leniently(text: &str) -> Option<LlmSuggestions> {
    let cleaned = crate::gateway::extract_code(text);
    serde_json::from_str(&cleaned).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn static_report(syntax_ok: bool) -> StaticReport {
        StaticReport {
            syntax_ok,
            syntax_error: if syntax_ok { None } else { Some("line 1: bad token".to_string()) },
            line_count: 10,
            function_count: 1,
            class_count: 1,
            max_function_length: 5,
            avg_function_length: 5.0,
            cyclomatic_complexity: 2,
            linters: Vec::new(),
        }
    }

    fn response(success: bool, coverage: f64, mutation: f64) -> RunnerResponse {
        RunnerResponse {
            success,
            exit_code: if success { 0 } else { 1 },
            coverage,
            coverage_details: crate::runner::CoverageDetails {
                missing_lines: vec![3, 7, 12],
            },
            mutation_score: mutation,
            mutation_num: 10,
            mutation_uncertainty: 0.0,
            test_error: None,
            stdout: String::new(),
            stderr: String::new(),
            execution_time: 1.0,
        }
    }

    fn pre(static_report: &StaticReport) -> PreReliabilityRecord {
        crate::reliability::pre_score(
            Some(0.01),
            Some(-0.01),
            100,
            static_report,
            &crate::config::ReliabilityConfig::default(),
        )
    }

    fn post(pre: &PreReliabilityRecord, response: &RunnerResponse, static_report: &StaticReport) -> PostReliabilityRecord {
        crate::reliability::post_score(pre, response, static_report, 80.0, 60.0)
    }

    #[tokio::test]
    async fn compile_error_instruction_comes_first() {
        let static_report = static_report(false);
        let response = response(false, 0.0, 0.0);
        let pre = pre(&static_report);
        let post = post(&pre, &response, &static_report);

        let critic = RuleBasedCritic::new(None, false, test_decoding());
        let (critique, _) = critic
            .critique(CritiqueInputs {
                response: &response,
                static_report: &static_report,
                pre: &pre,
                post: &post,
                targets: TargetsConfig {
                    coverage: 80.0,
                    mutation: 60.0,
                },
                prior_coverage: None,
                prior_mutation: None,
                current_stagnation_count: 0,
                current_test: "",
            })
            .await;

        assert!(critique.compile_error);
        assert!(critique.instructions[0].starts_with("fix the syntax error"));
    }

    #[tokio::test]
    async fn missing_lines_precede_mutation_instruction() {
        let static_report = static_report(true);
        let response = response(true, 40.0, 10.0);
        let pre = pre(&static_report);
        let post = post(&pre, &response, &static_report);

        let critic = RuleBasedCritic::new(None, false, test_decoding());
        let (critique, _) = critic
            .critique(CritiqueInputs {
                response: &response,
                static_report: &static_report,
                pre: &pre,
                post: &post,
                targets: TargetsConfig {
                    coverage: 80.0,
                    mutation: 60.0,
                },
                prior_coverage: Some(40.0),
                prior_mutation: Some(10.0),
                current_stagnation_count: 0,
                current_test: "",
            })
            .await;

        let missing_idx = critique
            .instructions
            .iter()
            .position(|i| i.contains("untested line"))
            .unwrap();
        let mutation_idx = critique
            .instructions
            .iter()
            .position(|i| i.contains("mutation score"))
            .unwrap();
        assert!(missing_idx < mutation_idx);
    }

    #[tokio::test]
    async fn coverage_met_but_mutation_missed_has_no_missing_lines_instruction() {
        let static_report = static_report(true);
        let mut response = response(true, 70.0, 20.0);
        response.coverage_details.missing_lines.clear();
        let pre = pre(&static_report);
        let post = post(&pre, &response, &static_report);

        let critic = RuleBasedCritic::new(None, false, test_decoding());
        let (critique, _) = critic
            .critique(CritiqueInputs {
                response: &response,
                static_report: &static_report,
                pre: &pre,
                post: &post,
                targets: TargetsConfig {
                    coverage: 60.0,
                    mutation: 50.0,
                },
                prior_coverage: Some(70.0),
                prior_mutation: Some(20.0),
                current_stagnation_count: 0,
                current_test: "",
            })
            .await;

        assert!(!critique.low_coverage);
        assert!(critique.low_mutation);
        assert!(!critique.instructions.iter().any(|i| i.contains("untested line")));
        assert!(critique.instructions.iter().any(|i| i.contains("mutation score")));
    }

    #[tokio::test]
    async fn stagnation_limit_trips_no_progress_after_two_shortfalls() {
        let static_report = static_report(true);
        let response = response(true, 20.0, 10.0);
        let pre = pre(&static_report);
        let post = post(&pre, &response, &static_report);
        let targets = TargetsConfig {
            coverage: 60.0,
            mutation: 50.0,
        };

        let critic = RuleBasedCritic::new(None, false, test_decoding());
        let (first, count_after_first) = critic
            .critique(CritiqueInputs {
                response: &response,
                static_report: &static_report,
                pre: &pre,
                post: &post,
                targets,
                prior_coverage: Some(20.0),
                prior_mutation: Some(10.0),
                current_stagnation_count: 0,
                current_test: "",
            })
            .await;
        assert!(!first.no_progress);
        assert_eq!(count_after_first, 1);

        let (second, count_after_second) = critic
            .critique(CritiqueInputs {
                response: &response,
                static_report: &static_report,
                pre: &pre,
                post: &post,
                targets,
                prior_coverage: Some(20.0),
                prior_mutation: Some(10.0),
                current_stagnation_count: count_after_first,
                current_test: "",
            })
            .await;
        assert!(second.no_progress);
        assert_eq!(count_after_second, 2);
    }

    #[test]
    fn no_tests_marker_is_case_insensitive() {
        assert!(detect_no_tests("Collected 0 Items"));
        assert!(detect_no_tests("== no tests ran in 0.01s =="));
        assert!(!detect_no_tests("collected 3 items"));
    }

    /// §4.6 step 4: a mocked gateway standing in for the model provider,
    /// exercised with `mockall` per the unit-level Orchestrator/Critic
    /// testing approach in SPEC_FULL.md §8.
    #[tokio::test]
    async fn model_assisted_suggestions_are_attached_when_the_gateway_returns_valid_json() {
        let mut mock_gateway = crate::gateway::MockModelGateway::new();
        mock_gateway.expect_complete().returning(|_, _, _| {
            let json = r#"{"priority_issues":["add a boundary-value test"],"coverage_suggestions":[],
                "mutation_suggestions":["kill the off-by-one mutant on line 12"],
                "code_quality_suggestions":[],"test_strategy_suggestions":[],"next_steps":[]}"#;
            Ok((
                json.to_string(),
                LLMMetadata {
                    avg_logprob: None,
                    entropy: None,
                    input_tokens: 50,
                    output_tokens: 20,
                    estimated_cost: Some(0.001),
                    duration: std::time::Duration::from_millis(5),
                },
            ))
        });

        let static_report = static_report(true);
        let response = response(true, 40.0, 10.0);
        let pre = pre(&static_report);
        let post = post(&pre, &response, &static_report);

        let critic = RuleBasedCritic::new(Some(std::sync::Arc::new(mock_gateway)), true, test_decoding());
        let (critique, _) = critic
            .critique(CritiqueInputs {
                response: &response,
                static_report: &static_report,
                pre: &pre,
                post: &post,
                targets: TargetsConfig {
                    coverage: 80.0,
                    mutation: 60.0,
                },
                prior_coverage: Some(40.0),
                prior_mutation: Some(10.0),
                current_stagnation_count: 0,
                current_test: "",
            })
            .await;

        let suggestions = critique.llm_suggestions.expect("suggestions should be attached");
        assert_eq!(suggestions.priority_issues, vec!["add a boundary-value test".to_string()]);
        assert!(critique.llm_supervisor_metadata.is_some());
    }

    /// A gateway call that succeeds but returns unparseable text leaves the
    /// rule-based critique untouched (§4.6 Failure semantics: "Parse
    /// leniently; if parse fails, the rule-based critique stands").
    #[tokio::test]
    async fn malformed_model_output_falls_back_to_rule_based_critique_only() {
        let mut mock_gateway = crate::gateway::MockModelGateway::new();
        mock_gateway.expect_complete().returning(|_, _, _| {
            Ok((
                "not valid json at all".to_string(),
                LLMMetadata {
                    avg_logprob: None,
                    entropy: None,
                    input_tokens: 10,
                    output_tokens: 5,
                    estimated_cost: Some(0.0),
                    duration: std::time::Duration::ZERO,
                },
            ))
        });

        let static_report = static_report(true);
        let response = response(true, 40.0, 10.0);
        let pre = pre(&static_report);
        let post = post(&pre, &response, &static_report);

        let critic = RuleBasedCritic::new(Some(std::sync::Arc::new(mock_gateway)), true, test_decoding());
        let (critique, _) = critic
            .critique(CritiqueInputs {
                response: &response,
                static_report: &static_report,
                pre: &pre,
                post: &post,
                targets: TargetsConfig {
                    coverage: 80.0,
                    mutation: 60.0,
                },
                prior_coverage: Some(40.0),
                prior_mutation: Some(10.0),
                current_stagnation_count: 0,
                current_test: "",
            })
            .await;

        assert!(critique.llm_suggestions.is_none());
        assert!(critique.low_coverage);
    }

    fn test_decoding() -> Decoding {
        Decoding {
            model: "dry".to_string(),
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: 256,
            timeout_seconds: 5,
        }
    }
}
