//! TriggerEngine (C4, §4.4) — a pure function from `(TriggerContext,
//! SafetyState snapshots)` to the ordered set of ceremonies that must fire.
//! Grounded in the teacher's `escalation::engine` (a deterministic,
//! side-effect-free decision function over a context struct) but retargeted
//! from "should we escalate to a human" to "which ceremony fires now".

pub mod rules;

use crate::config::SafetyConfig;
use crate::domain::{CeremonyType, QualityGates, ScaleLevel};
use crate::safety::{self, Denial};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Analysis,
    Planning,
    Solutioning,
    Implementation,
    Retrospective,
}

/// Everything the pure decision rules need; the Orchestrator assembles this
/// from StateCoordinator snapshots before each evaluation point.
#[derive(Debug, Clone)]
pub struct TriggerContext {
    pub epic_num: i64,
    pub story_num: Option<i64>,
    pub scale_level: ScaleLevel,
    pub stories_completed: u32,
    pub total_stories: u32,
    pub quality_gates_passed: QualityGates,
    pub last_standup_at: Option<DateTime<Utc>>,
    pub consecutive_story_failures: u32,
    pub phase: Phase,
    pub project_type: String,
    pub now: DateTime<Utc>,
    pub request_planning: bool,
    pub has_planning_for_epic: bool,
    pub has_mid_retrospective_for_epic: bool,
    pub has_retrospective_for_phase: bool,
    pub story_just_completed: bool,
    /// True only on the evaluation immediately after `phase` changed from
    /// its previous value — the scale-4 phase-boundary retrospective rule
    /// fires on that transition, not on every evaluation while in a phase.
    pub phase_just_transitioned: bool,
}

/// Per-epic safety snapshot, one `SafetyState` row per ceremony type.
pub type SafetySnapshot = BTreeMap<CeremonyType, crate::domain::SafetyState>;

#[derive(Debug, Clone)]
pub struct Decision {
    pub fires: Vec<CeremonyType>,
    pub denied: Vec<(CeremonyType, Denial)>,
}

fn filter_by_safety(
    candidates: Vec<CeremonyType>,
    safety_snapshot: &SafetySnapshot,
    config: &SafetyConfig,
    now: DateTime<Utc>,
    manual: bool,
) -> Decision {
    let mut fires = Vec::new();
    let mut denied = Vec::new();
    for ceremony_type in candidates {
        let default_state;
        let state = match safety_snapshot.get(&ceremony_type) {
            Some(s) => s,
            None => {
                default_state = crate::domain::SafetyState::new(0, ceremony_type);
                &default_state
            }
        };
        match safety::can_hold(state, config, now, manual) {
            Ok(()) => fires.push(ceremony_type),
            Err(reason) => denied.push((ceremony_type, reason)),
        }
    }
    Decision { fires, denied }
}

/// Pre-step evaluation: planning only, since planning precedes any story
/// work and is the only ceremony type §4.4 anchors to epic start.
pub fn evaluate_pre(ctx: &TriggerContext, safety_snapshot: &SafetySnapshot, config: &SafetyConfig) -> Decision {
    let mut candidates = Vec::new();
    if rules::should_trigger_planning(ctx) {
        candidates.push(CeremonyType::Planning);
    }
    filter_by_safety(candidates, safety_snapshot, config, ctx.now, false)
}

/// Post-step evaluation: standup then retrospective, matching §4.4's fixed
/// ordering (planning → standup → retrospective) since planning was already
/// handled pre-step.
pub fn evaluate_post(ctx: &TriggerContext, safety_snapshot: &SafetySnapshot, config: &SafetyConfig) -> Decision {
    let mut candidates = Vec::new();
    if rules::should_trigger_standup(ctx) {
        candidates.push(CeremonyType::Standup);
    }
    if rules::should_trigger_retrospective(ctx) {
        candidates.push(CeremonyType::Retrospective);
    }
    filter_by_safety(candidates, safety_snapshot, config, ctx.now, false)
}

/// A manually requested ceremony (§6 `force-retrospective`/`hold-ceremony`
/// API) still runs the same safety filter, with `manual = true`.
pub fn evaluate_manual(
    ceremony_type: CeremonyType,
    safety_snapshot: &SafetySnapshot,
    config: &SafetyConfig,
    now: DateTime<Utc>,
) -> Decision {
    filter_by_safety(vec![ceremony_type], safety_snapshot, config, now, true)
}
