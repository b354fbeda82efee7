//! Configuration management
//!
//! Handles loading, parsing, and managing quest's run configuration from a
//! single keyed object, the way it is described in §6: defaults, overlaid by
//! an optional TOML file, overlaid by environment variables (notably API
//! credentials, which are never written to the TOML file).
//!
//! # Examples
//!
//! ```
//! use quest::config::QuestConfig;
//!
//! let config = QuestConfig::default();
//! assert_eq!(config.max_iterations, 5);
//! assert_eq!(config.targets.coverage, 80.0);
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestConfig {
    pub runner_url: String,
    pub runner_code_url: Option<String>,
    pub runner_timeout_seconds: u64,

    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub targets: TargetsConfig,
    #[serde(default)]
    pub static_analysis: StaticAnalysisConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub reliability: ReliabilityConfig,

    pub max_iterations: u32,
    pub max_total_cost: Option<f64>,
    pub max_total_wall_seconds: Option<u64>,
}

impl Default for QuestConfig {
    fn default() -> Self {
        Self {
            runner_url: "http://127.0.0.1:8081/runner".to_string(),
            runner_code_url: None,
            runner_timeout_seconds: 300,
            llm: LlmConfig::default(),
            targets: TargetsConfig::default(),
            static_analysis: StaticAnalysisConfig::default(),
            supervisor: SupervisorConfig::default(),
            runner: RunnerConfig::default(),
            reliability: ReliabilityConfig::default(),
            max_iterations: 5,
            max_total_cost: None,
            max_total_wall_seconds: None,
        }
    }
}

impl QuestConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: QuestConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// Save configuration to a TOML file. The LLM API key is never
    /// serialized — it only ever lives in the environment.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Default configuration file path: `~/.config/quest/config.toml` (or
    /// `%APPDATA%\quest\config.toml` on Windows).
    pub fn default_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("quest").join("config.toml")
    }

    /// Load from the default path, falling back to `Self::default()` when
    /// the file is absent or the standalone case (env overrides only).
    pub fn load_or_default() -> Self {
        let path = Self::default_path();

        let mut config = if path.exists() {
            Self::load(&path).unwrap_or_default()
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config
    }

    /// Overlay `QUEST_*` environment variables onto already-loaded values.
    /// Credentials are intentionally environment-only.
    fn apply_env_overrides(&mut self) {
        if let Ok(api_key) = std::env::var("QUEST_LLM_API_KEY") {
            self.llm.api_key = Some(api_key);
        }
        if let Ok(url) = std::env::var("QUEST_RUNNER_URL") {
            self.runner_url = url;
        }
        if let Ok(dry) = std::env::var("QUEST_DRY_LLM") {
            self.llm.dry = dry == "1" || dry.eq_ignore_ascii_case("true");
        }
    }
}

/// Model gateway configuration (§6 `llm.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub decoding: DecodingConfig,
    pub timeout_seconds: u64,
    pub collect_logprobs: bool,
    pub dry: bool,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            decoding: DecodingConfig::default(),
            timeout_seconds: 60,
            collect_logprobs: true,
            dry: false,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodingConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for DecodingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            top_p: 0.95,
            max_tokens: 4096,
        }
    }
}

/// Coverage/mutation targets (§6 `targets.*`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TargetsConfig {
    pub coverage: f64,
    pub mutation: f64,
}

impl Default for TargetsConfig {
    fn default() -> Self {
        Self {
            coverage: 80.0,
            mutation: 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticAnalysisConfig {
    pub enable: bool,
    pub timeout_seconds: u64,
}

impl Default for StaticAnalysisConfig {
    fn default() -> Self {
        Self {
            enable: true,
            timeout_seconds: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Enables the Critic's optional model-assisted suggestions (§4.6.4).
    pub use_llm: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self { use_llm: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Informational only; the runner collaborator honors it.
    pub skip_mutation: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            skip_mutation: false,
        }
    }
}

/// Reliability predictor thresholds (§4.4). These are configuration, not
/// invariants — see SPEC_FULL.md §9 Open Questions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    pub entropy_high: f64,
    pub entropy_medium: f64,
    pub lint_downgrade_threshold: u32,
    pub complexity_ceiling: u32,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            entropy_high: 0.15,
            entropy_medium: 0.45,
            lint_downgrade_threshold: 5,
            complexity_ceiling: 10,
        }
    }
}
