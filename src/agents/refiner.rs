//! Refiner (C7): rewrites a test module under critic instructions while
//! preserving framework style (§4.7).

use super::{Critique, TestArtifact};
use crate::context::{ContextPack, FrameworkTag};
use crate::error::Result;
use crate::gateway::{Decoding, LLMMetadata, ModelGateway};
use std::sync::Arc;

#[async_trait::async_trait]
pub trait Refiner: Send + Sync {
    async fn refine(
        &self,
        current_test: &TestArtifact,
        critique: &Critique,
        context: &ContextPack,
        decoding: &Decoding,
        collect_logprobs: bool,
    ) -> Result<(TestArtifact, LLMMetadata)>;
}

pub struct PromptRefiner {
    gateway: Arc<dyn ModelGateway>,
}

impl PromptRefiner {
    pub fn new(gateway: Arc<dyn ModelGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait::async_trait]
impl Refiner for PromptRefiner {
    async fn refine(
        &self,
        current_test: &TestArtifact,
        critique: &Critique,
        context: &ContextPack,
        decoding: &Decoding,
        collect_logprobs: bool,
    ) -> Result<(TestArtifact, LLMMetadata)> {
        let prompt = build_prompt(current_test, critique, context);
        let (text, metadata) = self.gateway.complete(&prompt, decoding, collect_logprobs).await?;
        Ok((TestArtifact::new(text, current_test.framework), metadata))
    }
}

/// Builds the Refiner prompt (§4.7): current test, ordered instructions
/// (substituting a generic one when the critique carries none), missing
/// lines, the framework guardrails, and the embedded target source for
/// reference.
fn build_prompt(current_test: &TestArtifact, critique: &Critique, context: &ContextPack) -> String {
    let mut prompt = String::new();

    prompt.push_str("You are revising an existing unit test module based on feedback from a\n");
    prompt.push_str("test critic. Preserve everything that already works; fix only what the\n");
    prompt.push_str("instructions below call out.\n\n");

    if !context.symbols.is_empty() {
        for symbol in &context.symbols {
            prompt.push_str(&format!("SYMBOL: {symbol}\n"));
        }
        prompt.push('\n');
    }

    prompt.push_str("Target source (for reference):\n```python\n");
    prompt.push_str(&context.code_src);
    prompt.push_str("\n```\n\n");

    prompt.push_str("Current test module:\n```python\n");
    prompt.push_str(&current_test.text);
    prompt.push_str("\n```\n\n");

    prompt.push_str("Instructions, in priority order:\n");
    if critique.instructions.is_empty() {
        prompt.push_str("1. improve coverage and robustness without breaking passing tests\n");
    } else {
        for (i, instruction) in critique.instructions.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, instruction));
        }
    }
    prompt.push('\n');

    if !critique.missing_lines.is_empty() {
        let lines: Vec<String> = critique.missing_lines.iter().map(|l| l.to_string()).collect();
        prompt.push_str(&format!("Lines not yet covered: {}\n\n", lines.join(", ")));
    }

    prompt.push_str(refiner_guardrails(current_test.framework));
    prompt.push_str(GLOBAL_CONSTRAINTS);

    prompt
}

fn refiner_guardrails(framework: FrameworkTag) -> &'static str {
    match framework {
        FrameworkTag::UnittestDjango | FrameworkTag::UnittestPlain => {
            "Guardrails:\n\
             - Preserve the existing unittest-style framework.\n\
             - Do not add a `__main__` entry point that triggers test execution directly.\n\
             - No network access. No database access beyond what the current test already uses.\n\
             - Keep existing imports unless strictly necessary to change them.\n\n"
        }
        FrameworkTag::Pytest => {
            "Guardrails:\n\
             - Preserve pytest style and remain consistent with the current module's \
             fixtures and naming.\n\n"
        }
    }
}

const GLOBAL_CONSTRAINTS: &str = "Output only raw code. Do not wrap the output in markdown code \
    fences and do not include any commentary before or after the code.\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextPack;
    use crate::gateway::dry::DryGateway;

    fn context() -> ContextPack {
        ContextPack {
            summary: String::new(),
            symbols: vec!["add".to_string()],
            docstrings: vec![String::new()],
            framework_hints: vec![FrameworkTag::Pytest],
            code_src: "def add(a, b):\n    return a + b\n".to_string(),
            parse_failed: false,
        }
    }

    fn artifact() -> TestArtifact {
        TestArtifact::new(
            "import pytest\n\n\ndef test_add():\n    assert add(1, 2) == 3\n".to_string(),
            FrameworkTag::Pytest,
        )
    }

    fn decoding() -> Decoding {
        Decoding {
            model: "dry".to_string(),
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: 512,
            timeout_seconds: 5,
        }
    }

    #[test]
    fn empty_instructions_substitute_generic_guidance() {
        let mut critique = Critique::compile_repair_only();
        critique.instructions.clear();
        let prompt = build_prompt(&artifact(), &critique, &context());
        assert!(prompt.contains("improve coverage and robustness without breaking passing tests"));
    }

    #[test]
    fn missing_lines_are_surfaced() {
        let mut critique = Critique::compile_repair_only();
        critique.missing_lines = vec![4, 9, 10];
        let prompt = build_prompt(&artifact(), &critique, &context());
        assert!(prompt.contains("Lines not yet covered: 4, 9, 10"));
    }

    #[tokio::test]
    async fn refines_and_preserves_framework_tag() {
        let refiner = PromptRefiner::new(Arc::new(DryGateway::new()));
        let critique = Critique::compile_repair_only();
        let (refined, _) = refiner
            .refine(&artifact(), &critique, &context(), &decoding(), false)
            .await
            .unwrap();
        assert_eq!(refined.framework, FrameworkTag::Pytest);
    }
}
