//! Deterministic dry-run gateway (§4.1: `dry_llm=true`).
//!
//! Bypasses the provider entirely. Used both for offline development and
//! to satisfy the determinism property in SPEC_FULL.md §8 (identical config
//! and target must produce identical artifacts across runs).

use super::{Decoding, LLMMetadata, ModelGateway};
use crate::error::Result;
use std::time::Duration;

/// Returns a fixed-cost stub completion whose *text* is derived purely from
/// the prompt's content so that repeated calls with the same prompt produce
/// byte-identical output, but different prompts (draft vs. refine) are not
/// forced to collide.
pub struct DryGateway;

impl DryGateway {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ModelGateway for DryGateway {
    async fn complete(
        &self,
        prompt: &str,
        _decoding: &Decoding,
        _collect_logprobs: bool,
    ) -> Result<(String, LLMMetadata)> {
        let text = dry_stub_for_prompt(prompt);
        let input_tokens = estimate_tokens(prompt);
        let output_tokens = estimate_tokens(&text);

        let metadata = LLMMetadata {
            avg_logprob: None,
            entropy: None,
            input_tokens,
            output_tokens,
            estimated_cost: Some(0.0),
            duration: Duration::from_millis(0),
        };

        Ok((text, metadata))
    }
}

/// Deterministic stub content. When the prompt embeds target symbols
/// (the Drafter/Refiner prompts always do, per §4.5/§4.7) a minimal test
/// skeleton is built naming them; otherwise a single placeholder test is
/// returned. Either way the output is a pure function of `prompt`.
fn dry_stub_for_prompt(prompt: &str) -> String {
    let symbols = extract_symbol_hints(prompt);

    let mut body = String::from("import unittest\n\n\nclass DryStubTest(unittest.TestCase):\n");
    if symbols.is_empty() {
        body.push_str("    def test_placeholder(self):\n        self.assertTrue(True)\n");
    } else {
        for (i, symbol) in symbols.iter().enumerate() {
            body.push_str(&format!(
                "    def test_{}_{}(self):\n        self.assertTrue(True)  # exercises {}\n",
                i, sanitize_ident(symbol), symbol
            ));
        }
    }
    body
}

/// Pulls `SYMBOL: <name>` hint lines out of a prompt, the marker the
/// Drafter/Refiner prompt builders emit for each mined symbol.
fn extract_symbol_hints(prompt: &str) -> Vec<String> {
    prompt
        .lines()
        .filter_map(|line| line.strip_prefix("SYMBOL: "))
        .map(|s| s.trim().to_string())
        .collect()
}

fn sanitize_ident(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// Crude whitespace-based token estimate, used only to populate metadata
/// fields for dry runs — never fed into real cost accounting.
fn estimate_tokens(text: &str) -> u32 {
    text.split_whitespace().count().max(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Decoding;

    fn decoding() -> Decoding {
        Decoding {
            model: "dry".to_string(),
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: 100,
            timeout_seconds: 5,
        }
    }

    #[tokio::test]
    async fn same_prompt_yields_identical_output() {
        let gw = DryGateway::new();
        let prompt = "SYMBOL: add\nSYMBOL: subtract\n";
        let (a, _) = gw.complete(prompt, &decoding(), false).await.unwrap();
        let (b, _) = gw.complete(prompt, &decoding(), false).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn entropy_and_avg_logprob_are_null() {
        let gw = DryGateway::new();
        let (_, meta) = gw.complete("SYMBOL: foo\n", &decoding(), true).await.unwrap();
        assert!(meta.entropy.is_none());
        assert!(meta.avg_logprob.is_none());
    }

    #[tokio::test]
    async fn no_symbols_falls_back_to_placeholder() {
        let gw = DryGateway::new();
        let (text, _) = gw.complete("no hints here", &decoding(), false).await.unwrap();
        assert!(text.contains("test_placeholder"));
    }
}
