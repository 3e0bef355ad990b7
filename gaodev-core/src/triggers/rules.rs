//! §4.4 decision rules, one function per ceremony type. Each is exhaustive
//! over scale level and takes only the `TriggerContext` already gathered by
//! the caller — no store/clock access here.

use super::TriggerContext;
use crate::domain::QualityGates;

pub fn should_trigger_planning(ctx: &TriggerContext) -> bool {
    match ctx.scale_level {
        0 | 1 => false,
        2 => ctx.request_planning && !ctx.has_planning_for_epic,
        s if s >= 3 => !ctx.has_planning_for_epic,
        _ => false,
    }
}

pub fn should_trigger_standup(ctx: &TriggerContext) -> bool {
    if matches!(ctx.scale_level, 0 | 1) {
        return false;
    }
    if ctx.quality_gates_passed == QualityGates::Failed {
        return true;
    }
    match ctx.scale_level {
        2 => ctx.total_stories > 3 && ctx.stories_completed > 0 && ctx.stories_completed % 3 == 0,
        3 => ctx.stories_completed > 0 && ctx.stories_completed % 2 == 0,
        4 => {
            ctx.last_standup_at
                .map(|last| ctx.now.signed_duration_since(last).num_hours() >= 24)
                .unwrap_or(true)
                || ctx.story_just_completed
        }
        _ => false,
    }
}

pub fn should_trigger_retrospective(ctx: &TriggerContext) -> bool {
    if ctx.scale_level == 0 {
        return false;
    }
    if ctx.scale_level == 1 {
        return ctx.consecutive_story_failures >= 2;
    }

    // An epic with zero stories never reaches completion or a meaningful
    // mid-point; §8 boundary behavior keeps it permanently silent here.
    if ctx.total_stories == 0 {
        return ctx.scale_level == 4 && ctx.phase_just_transitioned && !ctx.has_retrospective_for_phase;
    }

    if ctx.stories_completed == ctx.total_stories {
        return true;
    }

    if ctx.scale_level >= 3 && !ctx.has_mid_retrospective_for_epic && mid_epic_boundary_reached(ctx.stories_completed, ctx.total_stories) {
        return true;
    }

    if ctx.scale_level == 4 && ctx.phase_just_transitioned && !ctx.has_retrospective_for_phase {
        return true;
    }

    false
}

/// §4.4 mid-epic rule: `stories_completed / total_stories` in `[0.48,
/// 0.52]`. Open Question resolution: if no whole-story boundary lands in
/// that window (small epics, e.g. 3 stories: 1/3=0.33, 2/3=0.67), skip the
/// mid-epic retrospective for that epic entirely rather than firing on a
/// rounded approximation.
fn mid_epic_boundary_reached(completed: u32, total: u32) -> bool {
    let ratio = completed as f64 / total as f64;
    (0.48..=0.52).contains(&ratio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triggers::Phase;
    use chrono::Utc;

    fn base_ctx() -> TriggerContext {
        TriggerContext {
            epic_num: 1,
            story_num: None,
            scale_level: 2,
            stories_completed: 0,
            total_stories: 5,
            quality_gates_passed: QualityGates::Unknown,
            last_standup_at: None,
            consecutive_story_failures: 0,
            phase: Phase::Implementation,
            project_type: "web".to_string(),
            now: Utc::now(),
            request_planning: false,
            has_planning_for_epic: false,
            has_mid_retrospective_for_epic: false,
            has_retrospective_for_phase: false,
            story_just_completed: false,
            phase_just_transitioned: false,
        }
    }

    #[test]
    fn scale2_standup_fires_after_third_story_of_five() {
        let mut ctx = base_ctx();
        ctx.stories_completed = 3;
        assert!(should_trigger_standup(&ctx));
        ctx.stories_completed = 2;
        assert!(!should_trigger_standup(&ctx));
    }

    #[test]
    fn scale2_never_triggers_planning_without_request() {
        let mut ctx = base_ctx();
        ctx.scale_level = 2;
        assert!(!should_trigger_planning(&ctx));
        ctx.request_planning = true;
        assert!(should_trigger_planning(&ctx));
        ctx.has_planning_for_epic = true;
        assert!(!should_trigger_planning(&ctx));
    }

    #[test]
    fn scale3_mid_epic_retro_at_half_of_eight() {
        let mut ctx = base_ctx();
        ctx.scale_level = 3;
        ctx.total_stories = 8;
        ctx.stories_completed = 4;
        assert!(should_trigger_retrospective(&ctx));
    }

    #[test]
    fn scale3_mid_epic_retro_is_skipped_when_unreachable_for_three_stories() {
        let mut ctx = base_ctx();
        ctx.scale_level = 3;
        ctx.total_stories = 3;
        // 1/3=0.33, 2/3=0.67 — neither lands in [0.48, 0.52], so the
        // mid-epic retrospective never fires for this epic.
        ctx.stories_completed = 1;
        assert!(!should_trigger_retrospective(&ctx));
        ctx.stories_completed = 2;
        assert!(!should_trigger_retrospective(&ctx));
    }

    #[test]
    fn zero_story_epic_never_triggers_mid_retro() {
        let mut ctx = base_ctx();
        ctx.scale_level = 3;
        ctx.total_stories = 0;
        ctx.stories_completed = 0;
        assert!(!should_trigger_retrospective(&ctx));
    }

    #[test]
    fn epic_completion_triggers_retrospective_at_scale_two() {
        let mut ctx = base_ctx();
        ctx.stories_completed = 5;
        ctx.total_stories = 5;
        assert!(should_trigger_retrospective(&ctx));
    }
}
