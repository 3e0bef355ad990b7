//! WorkflowSelector (C7, §4.7) — maps `(scale level, context, relevant
//! learnings)` to an ordered, validated plan.

pub mod catalog;
pub mod plan;

use crate::error::GaoResult;
use crate::learning::scoring::ScoreRequest;
use crate::learning::LearningService;
use catalog::WorkflowRequest;
use plan::Plan;

pub struct WorkflowSelector<'a> {
    learning_service: &'a LearningService,
}

impl<'a> WorkflowSelector<'a> {
    pub fn new(learning_service: &'a LearningService) -> Self {
        Self { learning_service }
    }

    /// §4.7: base plan → ceremony injection → learning-driven adjustment →
    /// DAG validation.
    pub fn build_plan(&self, request: &WorkflowRequest, learning_request: &ScoreRequest) -> GaoResult<Plan> {
        let learnings = self.learning_service.select(learning_request, Some(5))?;
        let built = catalog::base_plan(request.scale_level);
        let built = catalog::inject_ceremonies(built, request);
        let built = catalog::apply_learning_adjustments(built, &learnings);
        plan::validate_acyclic(&built)?;
        Ok(built)
    }
}
