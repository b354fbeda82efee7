//! Per-run and per-attempt artifact persistence (§4.9, §6 "Persisted state
//! layout").
//!
//! Every write here is synchronous-to-disk before the orchestrator's state
//! machine advances to the next phase, so a crash mid-run always leaves the
//! previous-attempt tree coherent (§5 Ordering guarantees).

use crate::error::{QuestError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;

/// One `runs/<run_id>/` directory.
pub struct RunDir {
    root: PathBuf,
}

impl RunDir {
    pub async fn create(runs_dir: &Path, run_id: &str) -> Result<Self> {
        let root = runs_dir.join(run_id);
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Writes a pretty-printed JSON artifact, once per run (`context.json`,
    /// `run_summary.json`) or per attempt (`attempt_<k>.<name>.json`).
    pub async fn write_json<T: Serialize>(&self, filename: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(|e| QuestError::ParseFailure(e.to_string()))?;
        tokio::fs::write(self.root.join(filename), json).await?;
        Ok(())
    }

    pub async fn write_text(&self, filename: &str, text: &str) -> Result<()> {
        tokio::fs::write(self.root.join(filename), text).await?;
        Ok(())
    }

    /// Appends one line to `events.log` (§6). Opened in append mode so
    /// concurrent writers across phases never clobber earlier lines.
    pub async fn append_event(&self, line: &str) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join("events.log"))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }
}

/// Builds one `events.log` line (§6): `t=<unix_ms> run=<id> attempt=<k>
/// state=<name> status=<ok|err> cov=<number> mut=<number>`.
pub fn format_event(run_id: &str, attempt: u32, state: &str, ok: bool, coverage: f64, mutation: f64) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!(
        "t={millis} run={run_id} attempt={attempt} state={state} status={} cov={coverage:.1} mut={mutation:.1}",
        if ok { "ok" } else { "err" }
    )
}

/// The final `events.log` line written on every termination path (§7
/// "always produce a run_summary.json and events.log even on fatal
/// termination, with a final event `finish reason=<...>`"). `iter` is the
/// zero-based index of the last attempt that ran, matching the worked
/// scenarios in SPEC_FULL.md §8 (e.g. `finish reason=targets-met iter=0`).
pub fn format_finish_event(run_id: &str, iter: u32, reason: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("t={millis} run={run_id} finish reason={reason} iter={iter}")
}

/// Deterministic per-attempt filename prefix (§4.9).
pub fn attempt_prefix(attempt_index: u32) -> String {
    format!("attempt_{attempt_index}")
}
