//! Orchestrator (C8, §4.8) — the state machine driving a plan end to end.
//! Depends on `WorkflowSelector`, `CeremonyOrchestrator`, `TriggerEngine`,
//! and `StateCoordinator`; none of those depend back on it (§9 redesign
//! note: acyclic dependency graph, no callbacks).

use crate::agent_runner::{AgentRunner, Snapshot, StepOutcome};
use crate::ceremony::{CeremonyOrchestrator, CeremonyRunResult};
use crate::config::GaoConfig;
use crate::coordinator::{StagedArtifact, StateCoordinator};
use crate::domain::{CeremonyType, Epic, QualityGates, ScaleLevel, StoryStatus};
use crate::error::GaoResult;
use crate::events::{EventBus, GaoEvent, SharedEventBus};
use crate::learning::scoring::ScoreRequest;
use crate::learning::LearningService;
use crate::store::Store;
use crate::triggers::{self, Phase, SafetySnapshot, TriggerContext};
use crate::workflow::catalog::WorkflowRequest;
use crate::workflow::plan::{Plan, WorkflowStep};
use crate::workflow::WorkflowSelector;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct WorkRequest {
    pub feature_name: String,
    pub scale_level: ScaleLevel,
    pub project_type: String,
    pub tags: BTreeSet<String>,
    pub request_planning: bool,
    /// Simplification over the source system's dynamic story breakdown:
    /// the real system discovers story count from the `create-stories`
    /// step's own output; since `AgentRunner` is an external black box
    /// here, the caller supplies the expected count up front.
    pub total_stories: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanStatus {
    Completed,
    Aborted { reason: String },
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub epic_num: i64,
    pub status: PlanStatus,
}

pub struct Orchestrator {
    coordinator: Arc<StateCoordinator>,
    learning_service: Arc<LearningService>,
    ceremony_orchestrator: Arc<CeremonyOrchestrator>,
    agent_runner: Arc<dyn AgentRunner>,
    events: SharedEventBus,
    config: GaoConfig,
    consecutive_story_failures: AtomicU32,
}

impl Orchestrator {
    pub fn new(
        coordinator: Arc<StateCoordinator>,
        learning_service: Arc<LearningService>,
        ceremony_orchestrator: Arc<CeremonyOrchestrator>,
        agent_runner: Arc<dyn AgentRunner>,
        config: GaoConfig,
    ) -> Self {
        Self {
            coordinator,
            learning_service,
            ceremony_orchestrator,
            agent_runner,
            events: EventBus::shared(),
            config,
            consecutive_story_failures: AtomicU32::new(0),
        }
    }

    pub fn with_events(mut self, events: SharedEventBus) -> Self {
        self.events = events;
        self
    }

    fn safety_snapshot(&self, epic_num: i64) -> GaoResult<SafetySnapshot> {
        let mut snapshot = SafetySnapshot::new();
        for ceremony_type in [CeremonyType::Planning, CeremonyType::Standup, CeremonyType::Retrospective] {
            let state = self
                .coordinator
                .store()
                .read(|conn| Store::get_safety_state(conn, epic_num, ceremony_type))?;
            snapshot.insert(ceremony_type, state);
        }
        Ok(snapshot)
    }

    #[allow(clippy::too_many_arguments)]
    fn trigger_context(
        &self,
        epic: &Epic,
        phase: Phase,
        story_just_completed: bool,
        phase_just_transitioned: bool,
        quality_gates_passed: QualityGates,
        project_type: &str,
    ) -> GaoResult<TriggerContext> {
        let has_planning_for_epic = self
            .coordinator
            .store()
            .read(|conn| Store::has_planning_ceremony(conn, epic.epic_num))?;
        let has_mid_retrospective_for_epic = self
            .coordinator
            .store()
            .read(|conn| Store::has_mid_retrospective(conn, epic.epic_num))?;
        let phase_name = format!("{phase:?}").to_ascii_lowercase();
        let has_retrospective_for_phase = self
            .coordinator
            .store()
            .read(|conn| Store::has_retrospective_for_phase(conn, epic.epic_num, &phase_name))?;
        let last_standup = self
            .coordinator
            .store()
            .read(|conn| Store::last_ceremony_of_type(conn, epic.epic_num, CeremonyType::Standup))?;

        Ok(TriggerContext {
            epic_num: epic.epic_num,
            story_num: None,
            scale_level: epic.scale_level,
            stories_completed: epic.stories_completed,
            total_stories: epic.total_stories,
            quality_gates_passed,
            last_standup_at: last_standup.map(|c| c.held_at),
            consecutive_story_failures: self.consecutive_story_failures.load(Ordering::SeqCst),
            phase,
            project_type: project_type.to_string(),
            now: Utc::now(),
            request_planning: false,
            has_planning_for_epic,
            has_mid_retrospective_for_epic,
            has_retrospective_for_phase,
            story_just_completed,
            phase_just_transitioned,
        })
    }

    /// The most recently recorded story's quality-gate result for this
    /// epic, or `Unknown` before any story has been advanced — used to feed
    /// the §4.4 quality-gate standup rule.
    fn latest_quality_gates(&self, epic_num: i64) -> GaoResult<QualityGates> {
        let stories = self.coordinator.store().read(|conn| Store::list_stories(conn, epic_num))?;
        Ok(stories
            .into_iter()
            .max_by_key(|s| s.story_num)
            .map(|s| s.quality_gates_passed)
            .unwrap_or(QualityGates::Unknown))
    }

    /// Runs every ceremony a `Decision` says must fire, in order. Returns
    /// `Some(status)` the moment a planning ceremony aborts the plan.
    async fn run_ceremonies(
        &self,
        epic: &Epic,
        decision: &triggers::Decision,
        token: CancellationToken,
    ) -> GaoResult<Option<PlanStatus>> {
        for &ceremony_type in &decision.fires {
            let result = self
                .ceremony_orchestrator
                .run(ceremony_type, epic.epic_num, None, &BTreeSet::new(), false, token.clone())
                .await?;
            if let CeremonyRunResult::Aborted { reason } = result {
                return Ok(Some(PlanStatus::Aborted { reason }));
            }
        }
        Ok(None)
    }

    /// §4.8 `run`: builds the plan, executes it to completion, abort, or
    /// cancellation.
    pub async fn run(&self, request: WorkRequest, token: CancellationToken) -> GaoResult<PlanOutcome> {
        let epic = self.coordinator.create_epic(&request.feature_name, request.scale_level)?;
        self.coordinator.set_total_stories(epic.epic_num, request.total_stories)?;

        let learning_request = ScoreRequest {
            scale_level: request.scale_level,
            project_type: request.project_type.clone(),
            tags: request.tags.clone(),
        };
        let workflow_request = WorkflowRequest {
            scale_level: request.scale_level,
            request_planning: request.request_planning,
        };
        let selector = WorkflowSelector::new(&self.learning_service);
        let plan = selector.build_plan(&workflow_request, &learning_request)?;

        self.events.publish(GaoEvent::PlanStarted {
            epic_num: epic.epic_num,
            scale_level: request.scale_level,
            step_count: plan.len(),
            timestamp: Utc::now(),
        });

        let status = self.execute_plan(epic.epic_num, &plan, &request, token).await?;

        self.events.publish(GaoEvent::PlanFinished {
            epic_num: epic.epic_num,
            status: format!("{status:?}"),
            timestamp: Utc::now(),
        });

        Ok(PlanOutcome {
            epic_num: epic.epic_num,
            status,
        })
    }

    fn fetch_epic(&self, epic_num: i64) -> GaoResult<Epic> {
        self.coordinator
            .store()
            .read(|conn| Store::get_epic(conn, epic_num))?
            .ok_or_else(|| crate::error::GaoError::DataInvariant {
                message: format!("epic {epic_num} not found"),
            })
    }

    async fn execute_plan(
        &self,
        epic_num: i64,
        plan: &Plan,
        request: &WorkRequest,
        token: CancellationToken,
    ) -> GaoResult<PlanStatus> {
        let mut previous_phase: Option<Phase> = None;
        for step in plan {
            if token.is_cancelled() {
                return Ok(PlanStatus::Cancelled);
            }

            let phase_just_transitioned = previous_phase.map_or(false, |p| p != step.phase);
            previous_phase = Some(step.phase);

            // Re-fetch on every iteration: `advance_story` and
            // `complete_epic_if_done` mutate `stories_completed`/`status`
            // in the store as the loop runs, and the trigger rules need
            // the current counts, not the snapshot from plan start.
            let epic = self.fetch_epic(epic_num)?;
            let quality_gates_passed = self.latest_quality_gates(epic_num)?;

            let safety_snapshot = self.safety_snapshot(epic.epic_num)?;
            let pre_ctx = self.trigger_context(
                &epic,
                step.phase,
                false,
                phase_just_transitioned,
                quality_gates_passed,
                &request.project_type,
            )?;
            let pre_decision = triggers::evaluate_pre(&pre_ctx, &safety_snapshot, &self.config.safety);
            if let Some(status) = self.run_ceremonies(&epic, &pre_decision, token.clone()).await? {
                return Ok(status);
            }

            if let Some(ceremony_type) = ceremony_type_for_step(&step.name) {
                let result = self
                    .ceremony_orchestrator
                    .run(ceremony_type, epic.epic_num, None, &BTreeSet::new(), false, token.clone())
                    .await?;
                if let CeremonyRunResult::Aborted { reason } = result {
                    return Ok(PlanStatus::Aborted { reason });
                }
            } else if step.name == "implement-stories" {
                // Each story is its own completion event; ceremony triggers
                // (quality-gate standups, mid-epic retrospectives) are
                // evaluated per story below rather than once for the whole
                // batch, so `continue` past the single-step post-decision.
                if let Some(status) = self
                    .run_story_steps(epic_num, request, step.phase, phase_just_transitioned, token.clone())
                    .await?
                {
                    return Ok(status);
                }
                continue;
            } else {
                self.run_generic_step(&epic, step, token.clone()).await?;
            }

            self.coordinator.complete_epic_if_done(epic.epic_num)?;

            // Re-fetch again: the step just ran and the post-decision rules
            // need that up to date.
            let epic = self.fetch_epic(epic_num)?;
            let quality_gates_passed = self.latest_quality_gates(epic_num)?;
            let post_ctx = self.trigger_context(
                &epic,
                step.phase,
                false,
                phase_just_transitioned,
                quality_gates_passed,
                &request.project_type,
            )?;
            let safety_snapshot = self.safety_snapshot(epic.epic_num)?;
            let post_decision = triggers::evaluate_post(&post_ctx, &safety_snapshot, &self.config.safety);
            if let Some(status) = self.run_ceremonies(&epic, &post_decision, token.clone()).await? {
                return Ok(status);
            }
        }

        Ok(PlanStatus::Completed)
    }

    /// Runs every story in the epic, one at a time, evaluating ceremony
    /// triggers around each individual completion rather than once for the
    /// whole batch — §4.4's quality-gate standup rule and scale-2/3 standup
    /// cadences are keyed to a single story's outcome.
    async fn run_story_steps(
        &self,
        epic_num: i64,
        request: &WorkRequest,
        phase: Phase,
        phase_just_transitioned: bool,
        token: CancellationToken,
    ) -> GaoResult<Option<PlanStatus>> {
        for story_num in 1..=request.total_stories as i64 {
            if token.is_cancelled() {
                return Ok(Some(PlanStatus::Cancelled));
            }

            let epic = self.fetch_epic(epic_num)?;
            let quality_gates_passed = self.latest_quality_gates(epic_num)?;
            let safety_snapshot = self.safety_snapshot(epic_num)?;
            let pre_ctx = self.trigger_context(
                &epic,
                phase,
                false,
                phase_just_transitioned,
                quality_gates_passed,
                &request.project_type,
            )?;
            let pre_decision = triggers::evaluate_pre(&pre_ctx, &safety_snapshot, &self.config.safety);
            if let Some(status) = self.run_ceremonies(&epic, &pre_decision, token.clone()).await? {
                return Ok(Some(status));
            }

            let snapshot = Snapshot {
                epic_num,
                story_num: Some(story_num),
                feature_name: epic.feature_name.clone(),
                scale_level: epic.scale_level,
                recent_summary: String::new(),
            };
            let step = WorkflowStep::new("implement-stories", phase, true, vec![]);
            let step_name = format!("story-{epic_num}.{story_num}");
            let deadline = Duration::from_secs(self.config.timeouts.step_deadline_minutes * 60);

            self.events.publish(GaoEvent::StepStarted {
                epic_num,
                step_name: step_name.clone(),
                timestamp: Utc::now(),
            });

            let outcome = self.execute_with_retries(&step, &snapshot, deadline, token.clone()).await;

            let (status, quality_gates, artifacts) = match outcome {
                Ok(result) => {
                    let status = match result.outcome {
                        StepOutcome::Success => StoryStatus::Done,
                        StepOutcome::Partial => StoryStatus::Review,
                        StepOutcome::Failed => StoryStatus::Failed,
                    };
                    let quality_gates = match result.outcome {
                        StepOutcome::Success => QualityGates::Passed,
                        StepOutcome::Partial | StepOutcome::Failed => QualityGates::Failed,
                    };
                    (status, quality_gates, result.artifacts)
                }
                Err(_message) => (StoryStatus::Failed, QualityGates::Failed, vec![]),
            };

            if status == StoryStatus::Failed {
                self.consecutive_story_failures.fetch_add(1, Ordering::SeqCst);
            } else {
                self.consecutive_story_failures.store(0, Ordering::SeqCst);
            }

            let staged: Vec<StagedArtifact> = artifacts
                .into_iter()
                .map(|a| StagedArtifact {
                    relative_path: a.path,
                    bytes: a.bytes,
                })
                .collect();

            self.coordinator.advance_story(
                epic_num,
                story_num,
                &format!("story {story_num}"),
                status,
                quality_gates,
                &staged,
            )?;
            self.coordinator.complete_epic_if_done(epic_num)?;

            self.events.publish(GaoEvent::StepFinished {
                epic_num,
                step_name,
                outcome: format!("{status:?}"),
                timestamp: Utc::now(),
            });

            let epic = self.fetch_epic(epic_num)?;
            let safety_snapshot = self.safety_snapshot(epic_num)?;
            let post_ctx = self.trigger_context(
                &epic,
                phase,
                true,
                phase_just_transitioned,
                quality_gates,
                &request.project_type,
            )?;
            let post_decision = triggers::evaluate_post(&post_ctx, &safety_snapshot, &self.config.safety);
            if let Some(status) = self.run_ceremonies(&epic, &post_decision, token.clone()).await? {
                return Ok(Some(status));
            }
        }
        Ok(None)
    }

    async fn run_generic_step(&self, epic: &Epic, step: &WorkflowStep, token: CancellationToken) -> GaoResult<()> {
        let snapshot = Snapshot {
            epic_num: epic.epic_num,
            story_num: None,
            feature_name: epic.feature_name.clone(),
            scale_level: epic.scale_level,
            recent_summary: String::new(),
        };
        let deadline = Duration::from_secs(self.config.timeouts.step_deadline_minutes * 60);

        self.events.publish(GaoEvent::StepStarted {
            epic_num: epic.epic_num,
            step_name: step.name.clone(),
            timestamp: Utc::now(),
        });

        let result = self.execute_with_retries(step, &snapshot, deadline, token).await;
        let artifacts = result.map(|r| r.artifacts).unwrap_or_default();
        let staged: Vec<StagedArtifact> = artifacts
            .into_iter()
            .map(|a| StagedArtifact {
                relative_path: a.path,
                bytes: a.bytes,
            })
            .collect();

        let commit_type = if epic.scale_level == 1 { "fix" } else { "feat" };
        self.coordinator
            .commit_artifacts(commit_type, &epic.feature_name, &step.name, &staged)?;

        self.events.publish(GaoEvent::StepFinished {
            epic_num: epic.epic_num,
            step_name: step.name.clone(),
            outcome: "recorded".to_string(),
            timestamp: Utc::now(),
        });

        Ok(())
    }

    /// §4.8 retry policy: up to `max_step_retries` retries with exponential
    /// backoff. `AgentRunner::execute` reports failures as plain strings
    /// (§6) rather than a typed transient/fatal split, so every failure is
    /// treated as retryable up to the cap, same as a typed transient error
    /// would be.
    async fn execute_with_retries(
        &self,
        step: &WorkflowStep,
        snapshot: &Snapshot,
        deadline: Duration,
        token: CancellationToken,
    ) -> Result<crate::agent_runner::StepResult, String> {
        let mut attempt = 0;
        loop {
            match self.agent_runner.execute(step, snapshot, deadline, token.clone()).await {
                Ok(result) => return Ok(result),
                Err(message) => {
                    if attempt >= self.config.max_step_retries {
                        return Err(message);
                    }
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
                }
            }
        }
    }

    pub fn status(&self, epic_num: i64) -> GaoResult<Option<Epic>> {
        self.coordinator.store().read(|conn| Store::get_epic(conn, epic_num))
    }

    /// §4.8 `holdCeremony`: manual ceremony hold, still subject to
    /// SafetyGuard's cap and open-circuit rule (but not cooldown).
    pub async fn hold_ceremony(
        &self,
        ceremony_type: CeremonyType,
        epic_num: i64,
        story_num: Option<i64>,
        participants: BTreeSet<String>,
        token: CancellationToken,
    ) -> GaoResult<CeremonyRunResult> {
        self.ceremony_orchestrator
            .run(ceremony_type, epic_num, story_num, &participants, true, token)
            .await
    }
}

fn ceremony_type_for_step(name: &str) -> Option<CeremonyType> {
    match name {
        "ceremony-planning" => Some(CeremonyType::Planning),
        "ceremony-standup" => Some(CeremonyType::Standup),
        "ceremony-retrospective" => Some(CeremonyType::Retrospective),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_runner::NullAgentRunner;
    use crate::config::GaoConfig;
    use crate::git::GitGateway;
    use std::process::Command;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, Orchestrator) {
        let dir = tempdir().unwrap();
        for args in [
            vec!["init"],
            vec!["config", "user.email", "t@t.com"],
            vec!["config", "user.name", "T"],
        ] {
            Command::new("git").args(&args).current_dir(dir.path()).output().unwrap();
        }
        std::fs::write(dir.path().join("README.md"), "x").unwrap();
        Command::new("git").args(["add", "."]).current_dir(dir.path()).output().unwrap();
        Command::new("git")
            .args(["commit", "-m", "chore(init): seed"])
            .current_dir(dir.path())
            .output()
            .unwrap();

        let store = Store::open_in_memory().unwrap().shared();
        let git = GitGateway::new(dir.path()).unwrap();
        let coordinator = Arc::new(StateCoordinator::new(store.clone(), git, dir.path()));
        let config = GaoConfig::default();
        let learning_service = Arc::new(LearningService::new(
            store.clone(),
            coordinator.clone(),
            config.learning.clone(),
        ));
        let agent_runner: Arc<dyn AgentRunner> = Arc::new(NullAgentRunner::default());
        let ceremony_orchestrator = Arc::new(CeremonyOrchestrator::new(
            coordinator.clone(),
            learning_service.clone(),
            agent_runner.clone(),
            config.safety.clone(),
        ));
        let orchestrator = Orchestrator::new(coordinator, learning_service, ceremony_orchestrator, agent_runner, config);
        (dir, orchestrator)
    }

    #[tokio::test]
    async fn scale_zero_chore_completes_with_no_ceremonies() {
        let (_dir, orchestrator) = setup();
        let request = WorkRequest {
            feature_name: "typo-fix".to_string(),
            scale_level: 0,
            project_type: "web".to_string(),
            tags: BTreeSet::new(),
            request_planning: false,
            total_stories: 0,
        };
        let outcome = orchestrator.run(request, CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.status, PlanStatus::Completed);
    }

    #[tokio::test]
    async fn scale_two_epic_completes_and_advances_all_stories() {
        let (_dir, orchestrator) = setup();
        let request = WorkRequest {
            feature_name: "widgets".to_string(),
            scale_level: 2,
            project_type: "web".to_string(),
            tags: BTreeSet::new(),
            request_planning: false,
            total_stories: 3,
        };
        let outcome = orchestrator.run(request, CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.status, PlanStatus::Completed);
        let epic = orchestrator.status(outcome.epic_num).unwrap().unwrap();
        assert_eq!(epic.stories_completed, 3);
    }

    #[tokio::test]
    async fn cancellation_before_first_step_short_circuits_to_cancelled() {
        let (_dir, orchestrator) = setup();
        let token = CancellationToken::new();
        token.cancel();
        let request = WorkRequest {
            feature_name: "widgets".to_string(),
            scale_level: 2,
            project_type: "web".to_string(),
            tags: BTreeSet::new(),
            request_planning: false,
            total_stories: 3,
        };
        let outcome = orchestrator.run(request, token).await.unwrap();
        assert_eq!(outcome.status, PlanStatus::Cancelled);
    }
}
