//! Core entity types shared by the Store, StateCoordinator, and every
//! component that consumes read-only snapshots of project state.
//!
//! The StateCoordinator is the only component allowed to mutate these
//! entities; everyone else receives owned copies produced here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Scale level classifying the size of a unit of work, 0 (chore) through
/// 4 (vision-level feature).
pub type ScaleLevel = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpicStatus {
    Planned,
    Active,
    Completed,
    Abandoned,
}

impl EpicStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "planned" => Self::Planned,
            "active" => Self::Active,
            "completed" => Self::Completed,
            "abandoned" => Self::Abandoned,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epic {
    pub epic_num: i64,
    pub feature_name: String,
    pub scale_level: ScaleLevel,
    pub status: EpicStatus,
    pub total_stories: u32,
    pub stories_completed: u32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Epic {
    /// §3 invariant: `0 <= stories_completed <= total_stories`; `status =
    /// completed` implies `stories_completed = total_stories` and a
    /// non-empty `completed_at`.
    pub fn check_invariant(&self) -> Result<(), String> {
        if self.stories_completed > self.total_stories {
            return Err(format!(
                "epic {}: stories_completed ({}) > total_stories ({})",
                self.epic_num, self.stories_completed, self.total_stories
            ));
        }
        if self.status == EpicStatus::Completed {
            if self.stories_completed != self.total_stories {
                return Err(format!(
                    "epic {}: completed but stories_completed ({}) != total_stories ({})",
                    self.epic_num, self.stories_completed, self.total_stories
                ));
            }
            if self.completed_at.is_none() {
                return Err(format!("epic {}: completed but completed_at is empty", self.epic_num));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    Draft,
    Ready,
    InProgress,
    Review,
    Done,
    Failed,
}

impl StoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "draft" => Self::Draft,
            "ready" => Self::Ready,
            "in_progress" => Self::InProgress,
            "review" => Self::Review,
            "done" => Self::Done,
            "failed" => Self::Failed,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityGates {
    Unknown,
    Passed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    pub epic_num: i64,
    pub story_num: i64,
    pub title: String,
    pub status: StoryStatus,
    pub cycle_time_seconds: Option<i64>,
    pub rework_count: u32,
    pub quality_gates_passed: QualityGates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CeremonyType {
    Planning,
    Standup,
    Retrospective,
}

impl CeremonyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Standup => "standup",
            Self::Retrospective => "retrospective",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "planning" => Self::Planning,
            "standup" => Self::Standup,
            "retrospective" => Self::Retrospective,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CeremonyOutcome {
    Success,
    Partial,
    Failed,
}

impl CeremonyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ceremony {
    pub id: i64,
    pub epic_num: i64,
    pub story_num: Option<i64>,
    pub ceremony_type: CeremonyType,
    pub held_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub participants: BTreeSet<String>,
    pub transcript: String,
    pub summary: String,
    pub outcome: CeremonyOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            "critical" => Self::Critical,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Open Question decision: auto-promotion to a story applies to high OR
    /// critical priority items (the more permissive of the two readings in
    /// the distilled spec).
    pub fn auto_promotes(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionItemStatus {
    Open,
    InProgress,
    Done,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionItem {
    pub id: i64,
    pub ceremony_id: i64,
    pub priority: Priority,
    pub description: String,
    pub status: ActionItemStatus,
    pub auto_promote_to_story: bool,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

pub const ACTION_ITEM_EXPIRY_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningCategory {
    Quality,
    Process,
    Architectural,
    Operational,
}

impl LearningCategory {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "quality" => Self::Quality,
            "process" => Self::Process,
            "architectural" => Self::Architectural,
            "operational" => Self::Operational,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Process => "process",
            Self::Architectural => "architectural",
            Self::Operational => "operational",
        }
    }

    /// §4.6 similarity term: quality/architectural/process are
    /// "category-universal" and earn a flat bonus regardless of project
    /// match.
    pub fn is_universal(&self) -> bool {
        matches!(self, Self::Quality | Self::Architectural | Self::Process)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    pub id: i64,
    pub category: LearningCategory,
    pub text: String,
    pub tags: BTreeSet<String>,
    pub scale_level: ScaleLevel,
    pub project_type: String,
    pub base_relevance: f64,
    pub application_count: u32,
    pub success_rate: f64,
    pub confidence_score: f64,
    pub indexed_at: DateTime<Utc>,
    pub superseded_by: Option<i64>,
}

impl Learning {
    /// §3 invariant: `confidence_score = 0.5 + 0.4*(1 - e^(-n/10))`,
    /// multiplied by `success_rate` when `success_rate < 0.5`.
    pub fn compute_confidence(application_count: u32, success_rate: f64) -> f64 {
        let n = application_count as f64;
        let base = 0.5 + 0.4 * (1.0 - (-n / 10.0).exp());
        if success_rate < 0.5 {
            base * success_rate
        } else {
            base
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationOutcome {
    Success,
    Partial,
    Failure,
}

impl ApplicationOutcome {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "success" => Self::Success,
            "partial" => Self::Partial,
            "failure" => Self::Failure,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failure => "failure",
        }
    }

    /// §4.6: partial counts as 0.5 of a success when recomputing
    /// `success_rate`.
    pub fn success_weight(&self) -> f64 {
        match self {
            Self::Success => 1.0,
            Self::Partial => 0.5,
            Self::Failure => 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningApplication {
    pub id: i64,
    pub learning_id: i64,
    pub epic_num: i64,
    pub story_num: Option<i64>,
    pub outcome: ApplicationOutcome,
    pub applied_at: DateTime<Utc>,
    pub context: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Circuit {
    Closed,
    Open,
}

/// Per (epic, ceremony type) safety bookkeeping — §3 `SafetyState`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyState {
    pub epic_num: i64,
    pub ceremony_type: CeremonyType,
    pub last_held_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub circuit: Circuit,
    pub total_ceremonies_this_epic: u32,
}

impl SafetyState {
    pub fn new(epic_num: i64, ceremony_type: CeremonyType) -> Self {
        Self {
            epic_num,
            ceremony_type,
            last_held_at: None,
            consecutive_failures: 0,
            circuit: Circuit::Closed,
            total_ceremonies_this_epic: 0,
        }
    }
}
