use crate::error::ConfigError;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ── Top-level config ──────────────────────────────────────────────

/// Runtime configuration for an orchestration session.
///
/// Every sub-struct carries serde defaults so a partial TOML file (or none at
/// all) yields a fully usable configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverseerConfig {
    #[serde(default)]
    pub guard: GuardConfig,

    #[serde(default)]
    pub spawner: SpawnerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub completion: CompletionContract,
}

impl OverseerConfig {
    /// Default config file location (`<config dir>/overseer/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "overseer").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Parse a TOML document into a validated config.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file path, falling back to defaults when absent.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.guard.max_total_calls == 0 {
            return Err(ConfigError::Validation(
                "guard.max_total_calls must be at least 1".into(),
            ));
        }
        if self.guard.repeat_cap == 0 {
            return Err(ConfigError::Validation(
                "guard.repeat_cap must be at least 1".into(),
            ));
        }
        if self.guard.repeat_window < self.guard.repeat_cap as usize {
            return Err(ConfigError::Validation(format!(
                "guard.repeat_window ({}) must cover guard.repeat_cap ({})",
                self.guard.repeat_window, self.guard.repeat_cap
            )));
        }
        if self.spawner.max_parallel == 0 {
            return Err(ConfigError::Validation(
                "spawner.max_parallel must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ── Run Guard limits ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Hard cap on tool calls across the whole run.
    #[serde(default = "default_max_total_calls")]
    pub max_total_calls: u32,

    /// Hard cap on calls to any single tool.
    #[serde(default = "default_max_calls_per_tool")]
    pub max_calls_per_tool: u32,

    /// Size of the sliding window of recent (tool, fingerprint) pairs.
    #[serde(default = "default_repeat_window")]
    pub repeat_window: usize,

    /// Consecutive identical-input calls allowed before denial.
    #[serde(default = "default_repeat_cap")]
    pub repeat_cap: u32,

    /// Consecutive failed calls allowed before denial.
    #[serde(default = "default_max_failure_streak")]
    pub max_failure_streak: u32,

    /// Maximum subagent nesting depth.
    #[serde(default = "default_max_subagent_depth")]
    pub max_subagent_depth: u32,

    /// Maximum subagents running concurrently under one guard.
    #[serde(default = "default_max_parallel_subagents")]
    pub max_parallel_subagents: u32,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_total_calls: default_max_total_calls(),
            max_calls_per_tool: default_max_calls_per_tool(),
            repeat_window: default_repeat_window(),
            repeat_cap: default_repeat_cap(),
            max_failure_streak: default_max_failure_streak(),
            max_subagent_depth: default_max_subagent_depth(),
            max_parallel_subagents: default_max_parallel_subagents(),
        }
    }
}

fn default_max_total_calls() -> u32 {
    200
}

fn default_max_calls_per_tool() -> u32 {
    50
}

fn default_repeat_window() -> usize {
    10
}

fn default_repeat_cap() -> u32 {
    3
}

fn default_max_failure_streak() -> u32 {
    5
}

fn default_max_subagent_depth() -> u32 {
    2
}

fn default_max_parallel_subagents() -> u32 {
    4
}

// ── Subagent spawner limits ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnerConfig {
    /// Concurrency bound: children running at once. Excess tasks queue FIFO.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Total subagents allowed per session, independent of the per-batch bound.
    #[serde(default = "default_max_total_subagents")]
    pub max_total_subagents: u32,
}

impl Default for SpawnerConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            max_total_subagents: default_max_total_subagents(),
        }
    }
}

fn default_max_parallel() -> usize {
    4
}

fn default_max_total_subagents() -> u32 {
    16
}

// ── Retry policy ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first (1 = no retries).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff delay; doubles per attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any single backoff delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    5_000
}

// ── Completion contract ───────────────────────────────────────────

/// What the run must have produced before it may declare itself finished.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionContract {
    /// When true, the guard must have observed verification evidence
    /// (a test run, a diff check) before completion is allowed.
    #[serde(default)]
    pub require_verification_evidence: bool,

    /// Output path patterns that must each match at least one produced
    /// output. `*` matches any run of characters.
    #[serde(default)]
    pub required_outputs: Vec<String>,
}
