//! Optional external linter/type-checker subprocesses (§4.3, §6).
//!
//! Each configured tool is invoked with a single argument (the path to the
//! test file) inside a temporary working directory, with a bounded
//! timeout. Unavailable tools are probed with a `which`-style PATH scan
//! and skipped — never fatal.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

/// Per-linter record (§3 `StaticReport.linters`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinterRecord {
    pub name: String,
    pub available: bool,
    pub issue_count: u32,
    pub exit_code: Option<i32>,
    pub output_excerpt: String,
}

/// A tool this build knows how to invoke and how to count issues in its
/// output. `ruff` and `mypy` are the two linters/type-checkers the spec's
/// worked examples assume; additional tools can be added here without
/// touching call sites.
struct ToolSpec {
    name: &'static str,
    binary: &'static str,
    args: &'static [&'static str],
}

const KNOWN_TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "ruff",
        binary: "ruff",
        args: &["check", "--output-format=concise"],
    },
    ToolSpec {
        name: "mypy",
        binary: "mypy",
        args: &["--no-error-summary"],
    },
];

const EXCERPT_MAX_CHARS: usize = 2_000;

/// Probes each known tool on `PATH` and, for those present, runs it
/// against `test_file` with `timeout_seconds`. Never returns an error —
/// a missing binary or a failed spawn both degrade to `available=false`.
pub async fn probe_and_run_linters(test_file: &Path, timeout_seconds: u64) -> Vec<LinterRecord> {
    let mut out = Vec::with_capacity(KNOWN_TOOLS.len());
    for tool in KNOWN_TOOLS {
        out.push(run_one(tool, test_file, timeout_seconds).await);
    }
    out
}

async fn run_one(tool: &ToolSpec, test_file: &Path, timeout_seconds: u64) -> LinterRecord {
    if !binary_on_path(tool.binary) {
        return LinterRecord {
            name: tool.name.to_string(),
            available: false,
            issue_count: 0,
            exit_code: None,
            output_excerpt: String::new(),
        };
    }

    let mut cmd = Command::new(tool.binary);
    cmd.args(tool.args).arg(test_file);
    if let Some(dir) = test_file.parent() {
        cmd.current_dir(dir);
    }

    let run = async { cmd.output().await };
    let result = tokio::time::timeout(Duration::from_secs(timeout_seconds), run).await;

    match result {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let combined = format!("{stdout}{stderr}");
            LinterRecord {
                name: tool.name.to_string(),
                available: true,
                issue_count: count_issue_lines(&combined),
                exit_code: output.status.code(),
                output_excerpt: excerpt(&combined),
            }
        }
        // Spawn failure or timeout: informational, not fatal (§7 ToolUnavailable).
        Ok(Err(_)) | Err(_) => LinterRecord {
            name: tool.name.to_string(),
            available: false,
            issue_count: 0,
            exit_code: None,
            output_excerpt: String::new(),
        },
    }
}

/// One issue per non-empty output line is a reasonable proxy across
/// ruff's and mypy's concise, one-finding-per-line output formats.
fn count_issue_lines(output: &str) -> u32 {
    output.lines().filter(|l| !l.trim().is_empty()).count() as u32
}

fn excerpt(output: &str) -> String {
    if output.len() <= EXCERPT_MAX_CHARS {
        output.to_string()
    } else {
        output.chars().take(EXCERPT_MAX_CHARS).collect()
    }
}

/// A minimal `which`-style probe: scans `PATH` for an executable file
/// named `binary`. Avoids pulling in a dedicated crate for one lookup.
fn binary_on_path(binary: &str) -> bool {
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };

    std::env::split_paths(&path_var).any(|dir| {
        let candidate = dir.join(binary);
        candidate.is_file()
    })
}
