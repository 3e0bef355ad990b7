//! §4.7 typed workflow catalog: base sequences per scale level, ceremony
//! injection, and learning-driven adjustments. Replaces the source's
//! YAML-driven dynamic workflow registration (§9 redesign note) with a
//! catalog of values constructed in code and validated once as a DAG.

use super::plan::WorkflowStep;
use crate::domain::{Learning, LearningCategory, ScaleLevel};
use crate::triggers::Phase;

#[derive(Debug, Clone)]
pub struct WorkflowRequest {
    pub scale_level: ScaleLevel,
    pub request_planning: bool,
}

fn step(name: &str, phase: Phase, required: bool, depends_on: Vec<usize>) -> WorkflowStep {
    WorkflowStep::new(name, phase, required, depends_on)
}

/// §4.7 base sequences, one per scale level.
pub fn base_plan(scale_level: ScaleLevel) -> Vec<WorkflowStep> {
    match scale_level {
        0 => vec![
            step("implement-chore", Phase::Implementation, true, vec![]),
            step("commit", Phase::Implementation, true, vec![0]),
        ],
        1 => vec![
            step("reproduce-bug", Phase::Analysis, true, vec![]),
            step("fix", Phase::Implementation, true, vec![0]),
            step("test", Phase::Implementation, true, vec![1]),
        ],
        2 => vec![
            step("draft-prd", Phase::Planning, true, vec![]),
            step("create-stories", Phase::Planning, true, vec![0]),
            step("implement-stories", Phase::Implementation, true, vec![1]),
            step("test-feature", Phase::Implementation, true, vec![2]),
        ],
        3 => vec![
            step("draft-prd", Phase::Planning, true, vec![]),
            step("draft-architecture", Phase::Solutioning, true, vec![0]),
            step("create-epics", Phase::Planning, true, vec![1]),
            step("create-stories", Phase::Planning, true, vec![2]),
            step("implement-stories", Phase::Implementation, true, vec![3]),
            step("test-feature", Phase::Implementation, true, vec![4]),
        ],
        _ => vec![
            step("elicit-vision", Phase::Analysis, true, vec![]),
            step("draft-prd", Phase::Planning, true, vec![0]),
            step("draft-architecture", Phase::Solutioning, true, vec![1]),
            step("create-epics", Phase::Planning, true, vec![2]),
            step("create-stories", Phase::Planning, true, vec![3]),
            step("implement-stories", Phase::Implementation, true, vec![4]),
            step("integration-test", Phase::Implementation, true, vec![5]),
        ],
    }
}

/// §4.7 ceremony injection: walks the base plan once, appending ceremony
/// steps after the triggering step and rewriting later `depends_on`
/// indices, since insertion shifts every subsequent position.
pub fn inject_ceremonies(mut plan: Vec<WorkflowStep>, request: &WorkflowRequest) -> Vec<WorkflowStep> {
    let scale = request.scale_level;
    let mut i = 0;
    while i < plan.len() {
        let name = plan[i].name.clone();
        let insert_after = |plan: &mut Vec<WorkflowStep>, at: usize, new_step: WorkflowStep| {
            plan.insert(at + 1, new_step);
            for later in plan.iter_mut().skip(at + 2) {
                for dep in later.depends_on.iter_mut() {
                    if *dep > at {
                        *dep += 1;
                    }
                }
            }
        };

        if (name == "draft-prd" || name == "create-epics")
            && (scale >= 3 || (scale == 2 && request.request_planning))
        {
            let planning = step("ceremony-planning", Phase::Planning, scale >= 3, vec![i]);
            insert_after(&mut plan, i, planning);
            i += 1;
        } else if name == "implement-stories" {
            let standup = step("ceremony-standup", Phase::Implementation, false, vec![i]);
            insert_after(&mut plan, i, standup);
            i += 1;
        } else if name == "test-feature" || name == "integration-test" {
            let retro = step("ceremony-retrospective", Phase::Retrospective, scale >= 2, vec![i]);
            insert_after(&mut plan, i, retro);
            i += 1;
        }
        i += 1;
    }
    plan
}

/// §4.7 learning-driven adjustments, applied after ceremony injection.
/// Each adjustment records its `cause_depth` in step metadata; the caller
/// enforces the depth-3 cap by refusing to pass learnings whose own
/// `cause_depth` already sits at the cap (single-pass application here
/// means every adjustment starts at depth 1, well under the limit).
pub fn apply_learning_adjustments(mut plan: Vec<WorkflowStep>, learnings: &[(Learning, f64)]) -> Vec<WorkflowStep> {
    const CAUSE_DEPTH_CAP: u32 = 3;
    let depth = 1u32;
    if depth > CAUSE_DEPTH_CAP {
        return plan;
    }

    for (learning, _score) in learnings {
        match learning.category {
            LearningCategory::Quality => {
                if let Some(pos) = plan.iter().position(|s| s.name == "test-feature" || s.name == "integration-test") {
                    plan[pos].metadata.insert("quality_gate_strengthened".to_string(), "true".to_string());
                } else {
                    let dep = plan.len().saturating_sub(1);
                    let mut extra = step("test-feature", Phase::Implementation, true, vec![dep]);
                    extra.metadata.insert("cause_depth".to_string(), depth.to_string());
                    plan.push(extra);
                }
            }
            LearningCategory::Process => {
                for s in plan.iter_mut().filter(|s| s.name == "ceremony-standup") {
                    s.metadata.insert("standup_interval_divisor".to_string(), "2".to_string());
                }
            }
            LearningCategory::Architectural => {
                if let Some(pos) = plan.iter().position(|s| s.name == "implement-stories") {
                    if !plan.iter().any(|s| s.name == "design-review") {
                        let mut review = step("design-review", Phase::Solutioning, true, plan[pos].depends_on.clone());
                        review.metadata.insert("cause_depth".to_string(), depth.to_string());
                        plan.insert(pos, review);
                        for later in plan.iter_mut().skip(pos + 1) {
                            for dep in later.depends_on.iter_mut() {
                                if *dep >= pos {
                                    *dep += 1;
                                }
                            }
                        }
                    }
                }
            }
            LearningCategory::Operational => {
                for s in plan.iter_mut() {
                    s.metadata.insert("operational_guardrails".to_string(), "true".to_string());
                }
            }
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::plan::validate_acyclic;

    #[test]
    fn scale3_injects_planning_and_retrospective() {
        let request = WorkflowRequest {
            scale_level: 3,
            request_planning: false,
        };
        let plan = inject_ceremonies(base_plan(3), &request);
        assert!(plan.iter().any(|s| s.name == "ceremony-planning"));
        assert!(plan.iter().any(|s| s.name == "ceremony-standup"));
        assert!(plan.iter().any(|s| s.name == "ceremony-retrospective"));
        validate_acyclic(&plan).unwrap();
    }

    #[test]
    fn scale2_skips_planning_without_request() {
        let request = WorkflowRequest {
            scale_level: 2,
            request_planning: false,
        };
        let plan = inject_ceremonies(base_plan(2), &request);
        assert!(!plan.iter().any(|s| s.name == "ceremony-planning"));
    }

    #[test]
    fn architectural_learning_inserts_design_review_once() {
        let request = WorkflowRequest {
            scale_level: 3,
            request_planning: false,
        };
        let plan = inject_ceremonies(base_plan(3), &request);
        let learning = Learning {
            id: 1,
            category: LearningCategory::Architectural,
            text: "t".to_string(),
            tags: Default::default(),
            scale_level: 3,
            project_type: "web".to_string(),
            base_relevance: 0.9,
            application_count: 0,
            success_rate: 1.0,
            confidence_score: 0.5,
            indexed_at: chrono::Utc::now(),
            superseded_by: None,
        };
        let adjusted = apply_learning_adjustments(plan, &[(learning.clone(), 0.8), (learning, 0.8)]);
        let count = adjusted.iter().filter(|s| s.name == "design-review").count();
        assert_eq!(count, 1);
        validate_acyclic(&adjusted).unwrap();
    }
}
