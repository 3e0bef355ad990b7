//! The plan representation (§4.7, §9 redesign note): a flat array of
//! `WorkflowStep` values indexed by position, `depends_on` are integer
//! indices into that same array rather than pointers — arena-and-index,
//! per the teacher's preference for `petgraph`-free flat graphs where the
//! graph is this simple.

use crate::error::{GaoError, GaoResult};
use crate::triggers::Phase;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct WorkflowStep {
    pub name: String,
    pub phase: Phase,
    pub required: bool,
    pub depends_on: Vec<usize>,
    pub metadata: BTreeMap<String, String>,
}

impl WorkflowStep {
    pub fn new(name: impl Into<String>, phase: Phase, required: bool, depends_on: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            phase,
            required,
            depends_on,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub type Plan = Vec<WorkflowStep>;

/// §4.7 / §8 invariant 7: the plan graph must be a DAG on `depends_on`.
/// Linear DFS with a recursion-stack marker, per the teacher's cycle
/// detection over small in-memory graphs.
pub fn validate_acyclic(plan: &Plan) -> GaoResult<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let mut marks = vec![Mark::Unvisited; plan.len()];

    fn visit(i: usize, plan: &Plan, marks: &mut [Mark]) -> GaoResult<()> {
        match marks[i] {
            Mark::Done => return Ok(()),
            Mark::InProgress => return Err(GaoError::PlanCycle),
            Mark::Unvisited => {}
        }
        marks[i] = Mark::InProgress;
        for &dep in &plan[i].depends_on {
            if dep >= plan.len() {
                return Err(GaoError::PlanCycle);
            }
            visit(dep, plan, marks)?;
        }
        marks[i] = Mark::Done;
        Ok(())
    }

    for i in 0..plan.len() {
        visit(i, plan, &mut marks)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acyclic_plan_passes() {
        let plan = vec![
            WorkflowStep::new("a", Phase::Implementation, true, vec![]),
            WorkflowStep::new("b", Phase::Implementation, true, vec![0]),
        ];
        assert!(validate_acyclic(&plan).is_ok());
    }

    #[test]
    fn direct_cycle_is_rejected() {
        let plan = vec![
            WorkflowStep::new("a", Phase::Implementation, true, vec![1]),
            WorkflowStep::new("b", Phase::Implementation, true, vec![0]),
        ];
        assert!(matches!(validate_acyclic(&plan), Err(GaoError::PlanCycle)));
    }
}
