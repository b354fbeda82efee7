//! Router (C10): the pure decision function between `REFINE` and `FINISH`
//! (§4.10).
//!
//! Deliberately a free function rather than a trait/struct: the spec's
//! router carries no state of its own and takes only the critique plus two
//! counters, so there is nothing a narrower interface would buy.

use crate::agents::Critique;

/// §3/§4.10 routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Refine,
    Finish,
}

/// `(critique, attempts_done, max_iterations) -> {REFINE, FINISH}` (§4.10).
///
/// Evaluated in the order the spec lists, since later clauses assume
/// earlier ones didn't already decide:
/// 1. iteration budget exhausted -> FINISH unconditionally;
/// 2. stagnation -> FINISH;
/// 3. a compile error -> REFINE (attempt repair) even if targets otherwise
///    look met, since `coverage`/`mutation_score` from a failed run are not
///    trustworthy;
/// 4. targets met -> FINISH;
/// 5. otherwise -> REFINE.
pub fn route(critique: &Critique, attempts_done: u32, max_iterations: u32) -> RouteDecision {
    if attempts_done >= max_iterations {
        return RouteDecision::Finish;
    }
    if critique.no_progress {
        return RouteDecision::Finish;
    }
    if critique.compile_error {
        return RouteDecision::Refine;
    }
    if !critique.low_coverage && !critique.low_mutation {
        return RouteDecision::Finish;
    }
    RouteDecision::Refine
}
