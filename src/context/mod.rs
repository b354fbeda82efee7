//! Context mining (C2): parses the target source into a compact summary fed
//! to the Drafter and Refiner prompts.
//!
//! # Architecture
//!
//! - `mod.rs` — `ContextPack`, `FrameworkTag`, the `ContextMiner` trait.
//! - `python.rs` — tree-sitter based extraction for the target language.

pub mod python;

pub use python::{ContextMiner, TreeSitterContextMiner};

use serde::{Deserialize, Serialize};
use std::path::Path;

/// An enumerated descriptor shaping prompts and guardrails for the test
/// style expected by the target repo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameworkTag {
    UnittestDjango,
    UnittestPlain,
    Pytest,
}

impl FrameworkTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameworkTag::UnittestDjango => "unittest-django",
            FrameworkTag::UnittestPlain => "unittest-plain",
            FrameworkTag::Pytest => "pytest",
        }
    }
}

/// Derived once per run. See SPEC_FULL.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPack {
    pub summary: String,
    pub symbols: Vec<String>,
    pub docstrings: Vec<String>,
    pub framework_hints: Vec<FrameworkTag>,
    pub code_src: String,
    pub parse_failed: bool,
}

impl ContextPack {
    /// The framework tag the Drafter/Refiner should target: the first
    /// inferred hint, or `unittest-plain` when mining produced none.
    pub fn primary_framework(&self) -> FrameworkTag {
        self.framework_hints
            .first()
            .copied()
            .unwrap_or(FrameworkTag::UnittestPlain)
    }

    /// A context pack usable for a run whose target failed to parse.
    /// Invariant (§3): `symbols=[]`, `docstrings=[]`, `parse_failed=true`,
    /// and the run proceeds regardless.
    pub fn parse_failed(code_src: String, framework_hints: Vec<FrameworkTag>) -> Self {
        Self {
            summary: "target source could not be parsed".to_string(),
            symbols: Vec::new(),
            docstrings: Vec::new(),
            framework_hints,
            code_src,
            parse_failed: true,
        }
    }
}

/// Truncates `text` to at most `max_chars` characters, preserving whole
/// lines (§4.2: "truncation must preserve whole lines").
pub fn truncate_preserving_lines(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let mut out = String::new();
    for line in text.lines() {
        let candidate_len = out.chars().count() + line.chars().count() + 1;
        if candidate_len > max_chars {
            break;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }
    out
}

/// Detects framework hints from repo path tokens and the raw source text.
/// A standalone function (rather than a method) because both the
/// tree-sitter miner and the parse-failure fallback need it without a
/// successfully parsed tree.
pub fn detect_framework_hints(repo_path: &Path, source: &str) -> Vec<FrameworkTag> {
    let mut hints = Vec::new();
    let path_str = repo_path.to_string_lossy().to_lowercase();

    let has_django = path_str.contains("django")
        || source.contains("from django")
        || source.contains("import django");
    let has_pytest = source.contains("import pytest") || source.contains("from pytest");
    let has_unittest = source.contains("import unittest") || source.contains("from unittest");

    if has_django {
        hints.push(FrameworkTag::UnittestDjango);
    }
    if has_pytest {
        hints.push(FrameworkTag::Pytest);
    }
    if has_unittest && !has_django {
        hints.push(FrameworkTag::UnittestPlain);
    }

    hints
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_keeps_whole_lines() {
        let text = "line one\nline two\nline three";
        let truncated = truncate_preserving_lines(text, 18);
        assert_eq!(truncated, "line one\nline two");
        assert!(!truncated.contains("line three"));
    }

    #[test]
    fn truncation_noop_when_under_budget() {
        let text = "short";
        assert_eq!(truncate_preserving_lines(text, 100), "short");
    }

    #[test]
    fn parse_failed_pack_has_empty_symbols() {
        let pack = ContextPack::parse_failed("def broken(".to_string(), vec![]);
        assert!(pack.parse_failed);
        assert!(pack.symbols.is_empty());
        assert!(pack.docstrings.is_empty());
    }

    #[test]
    fn primary_framework_defaults_to_unittest_plain() {
        let pack = ContextPack::parse_failed(String::new(), vec![]);
        assert_eq!(pack.primary_framework(), FrameworkTag::UnittestPlain);
    }

    #[test]
    fn detects_pytest_import() {
        let hints = detect_framework_hints(Path::new("repo/tests.py"), "import pytest\n");
        assert_eq!(hints, vec![FrameworkTag::Pytest]);
    }

    #[test]
    fn detects_django_from_path() {
        let hints = detect_framework_hints(Path::new("repo/django_app/models.py"), "");
        assert_eq!(hints, vec![FrameworkTag::UnittestDjango]);
    }
}
