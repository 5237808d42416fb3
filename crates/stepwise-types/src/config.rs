//! Engine configuration for Stepwise.
//!
//! `EngineConfig` represents the top-level `config.toml` that controls retry
//! ceilings, timeouts, remedy thresholds, and history sizing.

use serde::{Deserialize, Serialize};

/// Tunables for the workflow engine.
///
/// Loaded from `~/.stepwise/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Total attempts per step (first try included). Step-level budgets are
    /// clamped to this ceiling.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// A remedy is applied only when its confidence is strictly above this.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Tool call timeout when a step does not set its own.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    #[serde(default = "default_oracle_timeout_secs")]
    pub oracle_timeout_secs: u64,

    /// Number of finished runs kept in the history ring buffer.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Byte budget for each prior-step digest sent to the oracle.
    #[serde(default = "default_summary_byte_budget")]
    pub summary_byte_budget: usize,

    /// Fields kept first when a digest must be truncated.
    #[serde(default = "default_summary_priority_fields")]
    pub summary_priority_fields: Vec<String>,

    /// Fail a step instead of guessing when list disambiguation finds no match.
    #[serde(default)]
    pub strict_disambiguation: bool,

    /// Save successful ad-hoc runs as auto-generated templates.
    #[serde(default)]
    pub auto_promote: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_confidence_threshold() -> f64 {
    0.6
}

fn default_step_timeout_secs() -> u64 {
    60
}

fn default_oracle_timeout_secs() -> u64 {
    30
}

fn default_history_capacity() -> usize {
    100
}

fn default_summary_byte_budget() -> usize {
    2048
}

fn default_summary_priority_fields() -> Vec<String> {
    ["id", "name", "title", "status", "url", "error", "message"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            confidence_threshold: default_confidence_threshold(),
            step_timeout_secs: default_step_timeout_secs(),
            oracle_timeout_secs: default_oracle_timeout_secs(),
            history_capacity: default_history_capacity(),
            summary_byte_budget: default_summary_byte_budget(),
            summary_priority_fields: default_summary_priority_fields(),
            strict_disambiguation: false,
            auto_promote: false,
        }
    }
}
