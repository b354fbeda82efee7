//! Drafter (C5): produces the attempt-0 test module (§4.5).

use super::TestArtifact;
use crate::context::{ContextPack, FrameworkTag};
use crate::error::Result;
use crate::gateway::{Decoding, LLMMetadata, ModelGateway};
use std::sync::Arc;

/// Produces an initial test module from a `ContextPack`, repo/version
/// coordinates, and decoding options.
#[async_trait::async_trait]
pub trait Drafter: Send + Sync {
    async fn draft(
        &self,
        context: &ContextPack,
        repo: &str,
        version: &str,
        target_file: &str,
        decoding: &Decoding,
        collect_logprobs: bool,
    ) -> Result<(TestArtifact, LLMMetadata)>;
}

pub struct PromptDrafter {
    gateway: Arc<dyn ModelGateway>,
}

impl PromptDrafter {
    pub fn new(gateway: Arc<dyn ModelGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait::async_trait]
impl Drafter for PromptDrafter {
    async fn draft(
        &self,
        context: &ContextPack,
        repo: &str,
        version: &str,
        target_file: &str,
        decoding: &Decoding,
        collect_logprobs: bool,
    ) -> Result<(TestArtifact, LLMMetadata)> {
        let framework = context.primary_framework();
        let prompt = build_prompt(context, repo, version, target_file, framework);

        let (text, metadata) = self.gateway.complete(&prompt, decoding, collect_logprobs).await?;
        Ok((TestArtifact::new(text, framework), metadata))
    }
}

/// Builds the Drafter prompt (§4.5): goal statement, embedded source,
/// framework-specific hard constraints, then global constraints.
fn build_prompt(
    context: &ContextPack,
    repo: &str,
    version: &str,
    target_file: &str,
    framework: FrameworkTag,
) -> String {
    let mut prompt = String::new();

    prompt.push_str("You are generating a unit test module. Your goal is to maximize ");
    prompt.push_str("branch coverage and mutation kill rate for the source file below.\n\n");
    prompt.push_str(&format!("Repository: {repo}\nVersion: {version}\nTarget file: {target_file}\n\n"));

    if !context.symbols.is_empty() {
        prompt.push_str("Top-level symbols:\n");
        for (symbol, doc) in context.symbols.iter().zip(context.docstrings.iter()) {
            prompt.push_str(&format!("SYMBOL: {symbol}\n"));
            if !doc.is_empty() {
                prompt.push_str(&format!("  docstring: {doc}\n"));
            }
        }
        prompt.push('\n');
    }

    if context.parse_failed {
        prompt.push_str("Note: the target source could not be fully parsed; read it carefully ");
        prompt.push_str("before assuming its structure.\n\n");
    }

    prompt.push_str("Target source:\n```python\n");
    prompt.push_str(&context.code_src);
    prompt.push_str("\n```\n\n");

    prompt.push_str(framework_constraints(framework));
    prompt.push_str(GLOBAL_CONSTRAINTS);

    prompt
}

/// Framework-specific hard constraints (§4.5).
fn framework_constraints(framework: FrameworkTag) -> &'static str {
    match framework {
        FrameworkTag::UnittestDjango => {
            "Constraints:\n\
             - Subclass Django's SimpleTestCase (or TestCase if database access is unavoidable).\n\
             - Do not import pytest or use pytest fixtures/decorators.\n\
             - Use self.assertEqual/self.assertTrue/etc. and django.test mocking utilities \
             (unittest.mock / django.test.override_settings) rather than ad-hoc patching.\n\n"
        }
        FrameworkTag::UnittestPlain => {
            "Constraints:\n\
             - Subclass unittest.TestCase.\n\
             - Do not import pytest or use pytest fixtures/decorators.\n\
             - Use self.assertEqual/self.assertTrue/etc.\n\n"
        }
        FrameworkTag::Pytest => {
            "Constraints:\n\
             - Function-style tests and pytest fixtures are allowed and preferred.\n\n"
        }
    }
}

const GLOBAL_CONSTRAINTS: &str = "Global constraints:\n\
    - Prefer real temporary-directory I/O over mocks when the target is I/O-bound.\n\
    - No network access. No database access.\n\
    - Output only raw code. Do not wrap the output in markdown code fences and do not \
    include any commentary before or after the code.\n";
