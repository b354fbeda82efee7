//! Model Gateway (C1): invokes an external text-completion capability and
//! returns text plus per-call metadata (§4.1).
//!
//! # Architecture
//!
//! - `mod.rs` — the `ModelGateway` trait, `Decoding`, `LLMMetadata`, the
//!   code-fence extractor, and the cost table.
//! - `anthropic.rs` — an HTTP-backed gateway against the Messages API.
//! - `dry.rs` — the deterministic stub used when `llm.dry=true`.

pub mod anthropic;
pub mod dry;

pub use anthropic::AnthropicGateway;
pub use dry::DryGateway;

use crate::error::{QuestError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Decoding controls for a single completion (§6 `llm.decoding.*`).
#[derive(Debug, Clone)]
pub struct Decoding {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
}

/// Per-model-call metadata (§3 `LLMMetadata`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMMetadata {
    /// Arithmetic mean of per-token logprobs, when logprobs were collected.
    pub avg_logprob: Option<f64>,
    /// Mean of per-token `-log p`; `None` when logprobs are unavailable
    /// (downstream treats this as `unknown` reliability, §4.4).
    pub entropy: Option<f64>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// `None` for models absent from the price table (§4.1).
    pub estimated_cost: Option<f64>,
    pub duration: Duration,
}

impl LLMMetadata {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Invokes an external text-completion capability. Any provider satisfying
/// this capability is acceptable (§6) — the orchestration core depends only
/// on this trait, never on a concrete provider SDK.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ModelGateway: Send + Sync {
    /// Runs one completion. `collect_logprobs` requests per-output-token
    /// logprobs when the underlying provider supports them; providers that
    /// cannot supply them return `entropy=None`/`avg_logprob=None` rather
    /// than failing.
    async fn complete(
        &self,
        prompt: &str,
        decoding: &Decoding,
        collect_logprobs: bool,
    ) -> Result<(String, LLMMetadata)>;
}

/// Per-million-token `(input, output)` prices in USD. Unknown models price
/// as `None` (§4.1) rather than guessing.
fn price_table(model: &str) -> Option<(f64, f64)> {
    match model {
        "claude-opus-4-20250514" | "claude-opus-4-1-20250805" => Some((15.0, 75.0)),
        "claude-sonnet-4-20250514" | "claude-sonnet-4-5-20250929" => Some((3.0, 15.0)),
        "claude-haiku-4-20250514" | "claude-3-5-haiku-20241022" => Some((0.80, 4.0)),
        _ => None,
    }
}

/// Estimates the USD cost of a call from the price table. Returns `None`
/// for models absent from the table.
pub fn estimate_cost(model: &str, input_tokens: u32, output_tokens: u32) -> Option<f64> {
    let (input_price, output_price) = price_table(model)?;
    let input_cost = (input_tokens as f64 / 1_000_000.0) * input_price;
    let output_cost = (output_tokens as f64 / 1_000_000.0) * output_price;
    Some(input_cost + output_cost)
}

/// Computes `(entropy, avg_logprob)` from per-token logprobs, per §4.1:
/// entropy is the mean of `-logprob_i`; `avg_logprob` is the mean of the
/// logprobs themselves. Returns `(None, None)` for an empty slice.
pub fn entropy_from_logprobs(logprobs: &[f64]) -> (Option<f64>, Option<f64>) {
    if logprobs.is_empty() {
        return (None, None);
    }
    let sum: f64 = logprobs.iter().sum();
    let mean = sum / logprobs.len() as f64;
    let entropy = -mean;
    (Some(entropy), Some(mean))
}

/// Strips code-fence markers from a raw completion, per §4.1: accepts
/// ```` ```lang ````, ``` ``` ```, and a raw-code fallback that detects a
/// leading language keyword (`def`, `class`, `import`, `from`) when no
/// fence is present at all.
pub fn extract_code(raw: &str) -> String {
    let trimmed = raw.trim();

    if let Some(rest) = trimmed.strip_prefix("```") {
        // Skip an optional language tag up to the first newline.
        let after_tag = match rest.find('\n') {
            Some(idx) => &rest[idx + 1..],
            None => rest,
        };
        let body = after_tag.rsplit_once("```").map(|(body, _)| body).unwrap_or(after_tag);
        return body.trim().to_string();
    }

    // No fence at all: find the first line that looks like the start of
    // Python source and return from there, discarding any prose preamble
    // the model prepended ("Here's the implementation:" and similar). Falls
    // back to the raw text unchanged when no such line appears up front.
    let code_start = trimmed.lines().take(5).position(|line| {
        let l = line.trim_start();
        l.starts_with("def ")
            || l.starts_with("class ")
            || l.starts_with("import ")
            || l.starts_with("from ")
            || l.starts_with("async def ")
    });

    match code_start {
        Some(0) | None => trimmed.to_string(),
        Some(n) => trimmed.lines().skip(n).collect::<Vec<_>>().join("\n"),
    }
}

/// Runs `future` under a wall-clock timeout, mapping timeout to
/// `QuestError::UpstreamTimeout` per §4.1.
pub async fn with_timeout<T, F>(seconds: u64, future: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(Duration::from_secs(seconds), future).await {
        Ok(result) => result,
        Err(_) => Err(QuestError::UpstreamTimeout { seconds }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_code_with_language_tag() {
        let raw = "```python\ndef add(a, b):\n    return a + b\n```";
        assert_eq!(extract_code(raw), "def add(a, b):\n    return a + b");
    }

    #[test]
    fn extracts_fenced_code_without_language_tag() {
        let raw = "```\nimport unittest\n```";
        assert_eq!(extract_code(raw), "import unittest");
    }

    #[test]
    fn falls_back_to_raw_code_without_fences() {
        let raw = "import unittest\n\nclass T(unittest.TestCase):\n    pass\n";
        assert_eq!(extract_code(raw), raw.trim());
    }

    #[test]
    fn strips_prose_preamble_before_an_unfenced_code_line() {
        let raw = "Here's the implementation:\n\ndef add(a, b):\n    return a + b\n";
        assert_eq!(extract_code(raw), "def add(a, b):\n    return a + b");
    }

    #[test]
    fn returns_raw_text_when_nothing_looks_like_code() {
        let raw = "I could not find a safe way to implement this.";
        assert_eq!(extract_code(raw), raw);
    }

    #[test]
    fn entropy_is_mean_negative_logprob() {
        let logprobs = vec![-0.1, -0.2, -0.3];
        let (entropy, avg) = entropy_from_logprobs(&logprobs);
        assert!((entropy.unwrap() - 0.2).abs() < 1e-9);
        assert!((avg.unwrap() - (-0.2)).abs() < 1e-9);
    }

    #[test]
    fn entropy_none_for_empty_logprobs() {
        let (entropy, avg) = entropy_from_logprobs(&[]);
        assert!(entropy.is_none());
        assert!(avg.is_none());
    }

    #[test]
    fn unknown_model_prices_as_none() {
        assert_eq!(estimate_cost("some-unlisted-model", 1000, 1000), None);
    }

    #[test]
    fn known_model_prices_deterministically() {
        let cost = estimate_cost("claude-sonnet-4-20250514", 1_000_000, 0).unwrap();
        assert!((cost - 3.0).abs() < 1e-9);
    }
}
