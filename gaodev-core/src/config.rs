//! Project-level configuration (§4.11, ambient stack).
//!
//! Numeric constants named throughout §3/§4 are overridable per project via
//! `.gao-dev/config.toml`; defaults match the spec exactly when the file is
//! absent, following the teacher's `SwarmConfig::default()` convention of
//! env/file-overridable constants with spec-accurate fallbacks.

use crate::error::{GaoError, GaoResult};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// §4.5: max ceremonies per epic.
    pub max_ceremonies_per_epic: u32,
    /// §4.5: cooldown hours between two same-type ceremonies.
    pub planning_cooldown_hours: i64,
    pub standup_cooldown_hours: i64,
    pub retrospective_cooldown_hours: i64,
    /// §4.5: per-ceremony execution timeout, minutes.
    pub ceremony_timeout_minutes: i64,
    /// §4.5: consecutive failures before the circuit opens.
    pub circuit_failure_threshold: u32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_ceremonies_per_epic: 10,
            planning_cooldown_hours: 24,
            standup_cooldown_hours: 12,
            retrospective_cooldown_hours: 24,
            ceremony_timeout_minutes: 10,
            circuit_failure_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// §4.6: top-K learnings considered by the WorkflowSelector.
    pub top_k: usize,
    /// §4.6: learnings scoring below this are discarded.
    pub score_threshold: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            score_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// §5: default deadline for a ceremony AgentRunner call, minutes.
    pub ceremony_deadline_minutes: u64,
    /// §5: default deadline for a workflow-step AgentRunner call, minutes.
    pub step_deadline_minutes: u64,
    /// §5: grace period after a timeout before the call is abandoned, seconds.
    pub abandon_grace_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            ceremony_deadline_minutes: 10,
            step_deadline_minutes: 30,
            abandon_grace_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GaoConfig {
    pub safety: SafetyConfig,
    pub learning: LearningConfig,
    pub timeouts: TimeoutConfig,
    /// §4.8: bounded retries for retryable step failures.
    pub max_step_retries: u32,
    /// §3: days before an open, low-priority action item expires.
    pub action_item_expiry_days: i64,
}

impl Default for GaoConfig {
    fn default() -> Self {
        Self {
            safety: SafetyConfig::default(),
            learning: LearningConfig::default(),
            timeouts: TimeoutConfig::default(),
            max_step_retries: 2,
            action_item_expiry_days: crate::domain::ACTION_ITEM_EXPIRY_DAYS,
        }
    }
}

impl GaoConfig {
    /// Load `.gao-dev/config.toml` relative to `project_root`, falling back
    /// to spec defaults when the file is absent.
    pub fn load(project_root: &Path) -> GaoResult<Self> {
        let path = project_root.join(".gao-dev").join("config.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        toml::from_str(&raw).map_err(|e| GaoError::Config {
            message: format!("{}: {e}", path.display()),
        })
    }
}
