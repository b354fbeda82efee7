//! §3 `RunState`: the only cross-attempt mutable state in a run. Created
//! once per run, materialized into `run_summary.json` at the end; never
//! itself written to disk attempt-by-attempt (per-attempt artifacts carry
//! their own snapshot instead, §4.9).

use crate::config::TargetsConfig;
use rand::Rng;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Generates a run id as `run_<unix_millis>_<6 hex chars>` (§3: "timestamp
/// + random suffix").
pub fn generate_run_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let suffix: String = {
        let mut rng = rand::rng();
        (0..6).map(|_| char::from_digit(rng.random_range(0..16), 16).unwrap()).collect()
    };
    format!("run_{millis}_{suffix}")
}

#[derive(Debug, Clone)]
pub struct RunState {
    pub run_id: String,
    pub attempt_index: u32,
    pub best_coverage: f64,
    pub best_mutation: f64,
    pub stagnation_count: u32,
    pub total_cost: f64,
    pub total_input_tokens: u32,
    pub total_output_tokens: u32,
    /// Ordered `(coverage, mutation)` history, one entry per completed
    /// attempt (§3).
    pub history: Vec<(f64, f64)>,
    pub phase_durations: BTreeMap<&'static str, Duration>,
    pub targets: TargetsConfig,
    pub max_total_cost: Option<f64>,
    pub max_total_wall_seconds: Option<u64>,
}

impl RunState {
    pub fn new(run_id: String, targets: TargetsConfig, max_total_cost: Option<f64>, max_total_wall_seconds: Option<u64>) -> Self {
        Self {
            run_id,
            attempt_index: 0,
            best_coverage: f64::NEG_INFINITY,
            best_mutation: f64::NEG_INFINITY,
            stagnation_count: 0,
            total_cost: 0.0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            history: Vec::new(),
            phase_durations: BTreeMap::new(),
            targets,
            max_total_cost,
            max_total_wall_seconds,
        }
    }

    /// Records one attempt's coverage/mutation, maintaining the monotone
    /// `best_*` invariant of §8 property 2 regardless of whether this
    /// attempt itself made progress.
    pub fn record_attempt(&mut self, coverage: f64, mutation: f64) {
        self.history.push((coverage, mutation));
        self.best_coverage = self.best_coverage.max(coverage);
        self.best_mutation = self.best_mutation.max(mutation);
    }

    pub fn add_cost(&mut self, cost: Option<f64>) {
        if let Some(cost) = cost {
            self.total_cost += cost;
        }
    }

    pub fn add_tokens(&mut self, input: u32, output: u32) {
        self.total_input_tokens += input;
        self.total_output_tokens += output;
    }

    pub fn add_phase_duration(&mut self, phase: &'static str, duration: Duration) {
        *self.phase_durations.entry(phase).or_insert(Duration::ZERO) += duration;
    }

    /// True once accumulated cost or wall-clock time crosses a configured
    /// cap (§6 `max_total_cost`, `max_total_wall_seconds`). Checked by the
    /// orchestrator at the top of each attempt, independent of the router.
    pub fn budget_exceeded(&self, elapsed: Duration) -> bool {
        if let Some(cap) = self.max_total_cost {
            if self.total_cost > cap {
                return true;
            }
        }
        if let Some(cap) = self.max_total_wall_seconds {
            if elapsed.as_secs() > cap {
                return true;
            }
        }
        false
    }
}
