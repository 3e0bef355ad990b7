//! End-to-end scenario tests (S1-S6) exercising the full
//! Store/StateCoordinator/CeremonyOrchestrator/Orchestrator stack against a
//! real temp git repo and an in-memory store, the way `coordinator/mod.rs`'s
//! own `#[cfg(test)]` module does for single-component tests.

use async_trait::async_trait;
use gaodev_core::agent_runner::{Artifact, CeremonyTranscript, StepOutcome, StepResult};
use gaodev_core::agent_runner::{AgentRunner, Snapshot};
use gaodev_core::ceremony::{CeremonyOrchestrator, CeremonyRunResult};
use gaodev_core::config::GaoConfig;
use gaodev_core::coordinator::StateCoordinator;
use gaodev_core::domain::{CeremonyOutcome, CeremonyType, Circuit, LearningCategory};
use gaodev_core::git::GitGateway;
use gaodev_core::learning::scoring::ScoreRequest;
use gaodev_core::learning::LearningService;
use gaodev_core::orchestrator::{Orchestrator, PlanStatus, WorkRequest};
use gaodev_core::store::Store;
use gaodev_core::workflow::catalog::WorkflowRequest;
use gaodev_core::workflow::plan::WorkflowStep;
use gaodev_core::domain::ApplicationOutcome;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Configurable `AgentRunner` test double. Unlike `NullAgentRunner` (which
/// always succeeds and always produces an artifact), this lets a scenario
/// script per-story outcomes and per-ceremony-type transcripts/failures, so
/// commit counts and circuit-breaker behavior can be driven precisely.
struct ScriptedRunner {
    story_outcomes: Mutex<HashMap<i64, StepOutcome>>,
    emit_generic_artifacts: bool,
    ceremony_scripts: Mutex<HashMap<CeremonyType, VecDeque<Result<String, String>>>>,
}

impl ScriptedRunner {
    fn new() -> Self {
        Self {
            story_outcomes: Mutex::new(HashMap::new()),
            emit_generic_artifacts: false,
            ceremony_scripts: Mutex::new(HashMap::new()),
        }
    }

    fn with_story_outcome(self, story_num: i64, outcome: StepOutcome) -> Self {
        self.story_outcomes.lock().unwrap().insert(story_num, outcome);
        self
    }

    fn queue_ceremony_result(&self, ceremony_type: CeremonyType, result: Result<String, String>) {
        self.ceremony_scripts
            .lock()
            .unwrap()
            .entry(ceremony_type)
            .or_default()
            .push_back(result);
    }
}

const WELL_FORMED_MARKDOWN: &str = "## Summary\nAll good.\n";

#[async_trait]
impl AgentRunner for ScriptedRunner {
    async fn execute(
        &self,
        step: &WorkflowStep,
        ctx: &Snapshot,
        _deadline: Duration,
        _token: CancellationToken,
    ) -> Result<StepResult, String> {
        let is_story = ctx.story_num.is_some();
        let outcome = if let Some(story_num) = ctx.story_num {
            self.story_outcomes
                .lock()
                .unwrap()
                .get(&story_num)
                .copied()
                .unwrap_or(StepOutcome::Success)
        } else {
            StepOutcome::Success
        };
        let artifacts = if is_story || self.emit_generic_artifacts {
            vec![Artifact {
                path: format!("docs/features/{}/{}.md", ctx.feature_name, step.name),
                bytes: b"stub".to_vec(),
            }]
        } else {
            vec![]
        };
        Ok(StepResult {
            artifacts,
            outcome,
            diagnostics: String::new(),
        })
    }

    async fn execute_ceremony(
        &self,
        ceremony_type: CeremonyType,
        _ctx: &Snapshot,
        _deadline: Duration,
        _token: CancellationToken,
    ) -> Result<CeremonyTranscript, String> {
        let scripted = self
            .ceremony_scripts
            .lock()
            .unwrap()
            .get_mut(&ceremony_type)
            .and_then(|q| q.pop_front());
        match scripted {
            Some(Ok(markdown)) => Ok(CeremonyTranscript { transcript_markdown: markdown }),
            Some(Err(message)) => Err(message),
            None => Ok(CeremonyTranscript {
                transcript_markdown: WELL_FORMED_MARKDOWN.to_string(),
            }),
        }
    }
}

fn init_repo(dir: &std::path::Path) {
    for args in [
        vec!["init"],
        vec!["config", "user.email", "t@t.com"],
        vec!["config", "user.name", "T"],
    ] {
        Command::new("git").args(&args).current_dir(dir).output().unwrap();
    }
    std::fs::write(dir.join("README.md"), "x").unwrap();
    Command::new("git").args(["add", "."]).current_dir(dir).output().unwrap();
    Command::new("git")
        .args(["commit", "-m", "chore(init): seed"])
        .current_dir(dir)
        .output()
        .unwrap();
}

fn commit_count(dir: &std::path::Path) -> usize {
    let output = Command::new("git")
        .args(["rev-list", "--count", "HEAD"])
        .current_dir(dir)
        .output()
        .unwrap();
    String::from_utf8_lossy(&output.stdout).trim().parse().unwrap()
}

fn harness(runner: Arc<dyn AgentRunner>) -> (tempfile::TempDir, Orchestrator, Arc<StateCoordinator>) {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    let store = Store::open_in_memory().unwrap().shared();
    let git = GitGateway::new(dir.path()).unwrap();
    let coordinator = Arc::new(StateCoordinator::new(store.clone(), git, dir.path()));
    let config = GaoConfig::default();
    let learning_service = Arc::new(LearningService::new(store, coordinator.clone(), config.learning.clone()));
    let ceremony_orchestrator = Arc::new(CeremonyOrchestrator::new(
        coordinator.clone(),
        learning_service.clone(),
        runner.clone(),
        config.safety.clone(),
    ));
    let orchestrator = Orchestrator::new(coordinator.clone(), learning_service, ceremony_orchestrator, runner, config);
    (dir, orchestrator, coordinator)
}

fn ceremony_count_of_type(coordinator: &StateCoordinator, epic_num: i64, ceremony_type: CeremonyType) -> i64 {
    coordinator
        .store()
        .read(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM ceremonies WHERE epic_num = ?1 AND ceremony_type = ?2",
                rusqlite::params![epic_num, ceremony_type.as_str()],
                |r| r.get(0),
            )
            .map_err(gaodev_core::error::GaoError::from)
        })
        .unwrap()
}

/// S1: scale=2, 5 stories, all succeed. Expect exactly one standup (fired
/// by the story-3 cadence checkpoint, with the plan's own trailing
/// `ceremony-standup` step denied by cooldown) and exactly one retrospective
/// (epic completion), for 8 total commits on top of the seed commit.
#[tokio::test]
async fn s1_scale_two_five_stories_fires_one_standup_one_retrospective() {
    let runner = Arc::new(ScriptedRunner::new());
    let (dir, orchestrator, coordinator) = harness(runner);
    let request = WorkRequest {
        feature_name: "widgets".to_string(),
        scale_level: 2,
        project_type: "web".to_string(),
        tags: BTreeSet::new(),
        request_planning: false,
        total_stories: 5,
    };
    let outcome = orchestrator.run(request, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.status, PlanStatus::Completed);

    let epic = orchestrator.status(outcome.epic_num).unwrap().unwrap();
    assert_eq!(epic.stories_completed, 5);
    assert_eq!(epic.status, gaodev_core::domain::EpicStatus::Completed);

    assert_eq!(ceremony_count_of_type(&coordinator, outcome.epic_num, CeremonyType::Standup), 1);
    assert_eq!(ceremony_count_of_type(&coordinator, outcome.epic_num, CeremonyType::Retrospective), 1);
    assert_eq!(ceremony_count_of_type(&coordinator, outcome.epic_num, CeremonyType::Planning), 0);

    // seed commit + epic-init + 5 stories + 1 standup + 1 retrospective
    assert_eq!(commit_count(dir.path()), 9);
}

/// S2: scale=3, 8 stories. The mid-epic retrospective only fires once a
/// whole-story boundary lands in the `[0.48, 0.52]` completion window
/// (4/8 = 0.5), and the standup cadence checkpoint that precedes it must
/// have already been recorded by then.
#[tokio::test]
async fn s2_scale_three_mid_epic_checkpoint_ordering() {
    let runner = Arc::new(ScriptedRunner::new());
    let (_dir, orchestrator, coordinator) = harness(runner);
    let request = WorkRequest {
        feature_name: "platform".to_string(),
        scale_level: 3,
        project_type: "web".to_string(),
        tags: BTreeSet::new(),
        request_planning: false,
        total_stories: 8,
    };
    let outcome = orchestrator.run(request, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.status, PlanStatus::Completed);

    assert!(ceremony_count_of_type(&coordinator, outcome.epic_num, CeremonyType::Standup) >= 1);
    assert_eq!(ceremony_count_of_type(&coordinator, outcome.epic_num, CeremonyType::Retrospective), 1);

    let standup_at = coordinator
        .store()
        .read(|conn| Store::last_ceremony_of_type(conn, outcome.epic_num, CeremonyType::Standup))
        .unwrap()
        .unwrap()
        .held_at;
    let retro_at = coordinator
        .store()
        .read(|conn| Store::last_ceremony_of_type(conn, outcome.epic_num, CeremonyType::Retrospective))
        .unwrap()
        .unwrap()
        .held_at;
    assert!(standup_at <= retro_at, "standup must land before the mid-epic retrospective");
}

/// S3: a single story whose quality gate fails must trigger a standup
/// regardless of cadence — with `total_stories=1` the normal scale-2 cadence
/// rule (`total_stories > 3`) can never fire on its own, isolating the
/// quality-gate override wired up from `run_story_steps`.
#[tokio::test]
async fn s3_quality_gate_failure_forces_standup_outside_cadence() {
    let runner = Arc::new(ScriptedRunner::new().with_story_outcome(1, StepOutcome::Partial));
    let (_dir, orchestrator, coordinator) = harness(runner);
    let request = WorkRequest {
        feature_name: "widgets".to_string(),
        scale_level: 2,
        project_type: "web".to_string(),
        tags: BTreeSet::new(),
        request_planning: false,
        total_stories: 1,
    };
    let outcome = orchestrator.run(request, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.status, PlanStatus::Completed);

    let story = coordinator
        .store()
        .read(|conn| Store::get_story(conn, outcome.epic_num, 1))
        .unwrap()
        .unwrap();
    assert_eq!(story.quality_gates_passed, gaodev_core::domain::QualityGates::Failed);
    assert_eq!(ceremony_count_of_type(&coordinator, outcome.epic_num, CeremonyType::Standup), 1);
}

/// S4: three consecutive failed retrospective holds trip the circuit
/// breaker on the third; a fourth hold (even manual, bypassing cooldown)
/// is then denied until a success resets it.
#[tokio::test]
async fn s4_circuit_breaker_opens_on_third_consecutive_failure() {
    let runner = Arc::new(ScriptedRunner::new());
    // Retrospective failures are retried once before the final outcome is
    // recorded (§4.9), so each of the 3 holds below needs two queued
    // failures: the initial attempt and its retry.
    for _ in 0..6 {
        runner.queue_ceremony_result(CeremonyType::Retrospective, Err("agent unavailable".to_string()));
    }
    let (_dir, orchestrator, coordinator) = harness(runner);
    let epic = coordinator.create_epic("widgets", 3).unwrap();

    for i in 0..3 {
        let result = orchestrator
            .hold_ceremony(CeremonyType::Retrospective, epic.epic_num, None, BTreeSet::new(), CancellationToken::new())
            .await
            .unwrap();
        assert!(
            matches!(result, CeremonyRunResult::Recorded { outcome: CeremonyOutcome::Failed, .. }),
            "attempt {i} expected a recorded failure, got {result:?}"
        );
    }

    let state = coordinator
        .store()
        .read(|conn| Store::get_safety_state(conn, epic.epic_num, CeremonyType::Retrospective))
        .unwrap();
    assert_eq!(state.circuit, Circuit::Open);
    assert_eq!(state.consecutive_failures, 3);

    let denied = orchestrator
        .hold_ceremony(CeremonyType::Retrospective, epic.epic_num, None, BTreeSet::new(), CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(denied, CeremonyRunResult::Skipped { .. }));
}

/// S5: a learning below the score threshold is never applied to the plan;
/// the same learning, scored with better tag/project overlap, crosses the
/// threshold and the plan picks up its adjustment.
#[tokio::test]
async fn s5_cross_project_learning_threshold_crossing() {
    let (_dir, _orchestrator, coordinator) = harness(Arc::new(ScriptedRunner::new()));
    let store = coordinator.store();
    let learning = store
        .transaction(|tx| {
            Store::insert_learning(
                tx,
                LearningCategory::Quality,
                "write integration tests for auth flows",
                &["auth", "api"].into_iter().map(String::from).collect(),
                3,
                "backend",
                0.9,
            )
        })
        .unwrap();

    let learning_service = Arc::new(LearningService::new(
        store.clone(),
        coordinator.clone(),
        gaodev_core::config::LearningConfig::default(),
    ));
    // One successful application brings confidence to ~0.54, matching the
    // base_relevance * success_rate * confidence portion of the score.
    learning_service
        .record_application(learning.id, 1, None, ApplicationOutcome::Success, "first use")
        .unwrap();

    let low_overlap = ScoreRequest {
        scale_level: 3,
        project_type: "frontend".to_string(),
        tags: ["auth", "other"].into_iter().map(String::from).collect(),
    };
    let high_overlap = ScoreRequest {
        scale_level: 3,
        project_type: "backend".to_string(),
        tags: ["auth", "api"].into_iter().map(String::from).collect(),
    };

    let low_selected = learning_service.select(&low_overlap, Some(5)).unwrap();
    assert!(low_selected.is_empty(), "below-threshold learning must not be selected");

    let high_selected = learning_service.select(&high_overlap, Some(5)).unwrap();
    assert_eq!(high_selected.len(), 1);

    let selector = gaodev_core::workflow::WorkflowSelector::new(&learning_service);
    let workflow_request = WorkflowRequest {
        scale_level: 3,
        request_planning: false,
    };
    let plan = selector.build_plan(&workflow_request, &high_overlap).unwrap();
    let test_step = plan.iter().find(|s| s.name == "test-feature").unwrap();
    assert_eq!(test_step.metadata.get("quality_gate_strengthened").map(String::as_str), Some("true"));

    let plan_unapplied = selector.build_plan(&workflow_request, &low_overlap).unwrap();
    let test_step_unapplied = plan_unapplied.iter().find(|s| s.name == "test-feature").unwrap();
    assert!(test_step_unapplied.metadata.get("quality_gate_strengthened").is_none());
}

/// S6: a ceremony row committed to SQL but never matched with a git commit
/// (simulating a crash between the two) is detected and rolled back by
/// startup recovery, after which the ceremony can be re-run cleanly.
#[tokio::test]
async fn s6_crash_between_sql_and_git_commit_recovers_cleanly() {
    let (_dir, _orchestrator, coordinator) = harness(Arc::new(ScriptedRunner::new()));
    let epic = coordinator.create_epic("widgets", 2).unwrap();

    // Simulate the SQL half of `record_ceremony` completing and the process
    // crashing before the git commit / `set_ceremony_commit_sha` step.
    coordinator
        .store()
        .transaction(|tx| {
            Store::record_ceremony(
                tx,
                epic.epic_num,
                None,
                CeremonyType::Standup,
                CeremonyOutcome::Success,
                "## Summary\norphaned",
                "orphaned",
                0,
                &BTreeSet::new(),
                "standup:orphan:1",
            )
        })
        .unwrap();

    let missing_before = coordinator
        .store()
        .read(|conn| Store::ceremonies_missing_commit(conn, epic.epic_num))
        .unwrap();
    assert_eq!(missing_before.len(), 1);

    let recovered = coordinator.recover_uncommitted_ceremonies(epic.epic_num).unwrap();
    assert_eq!(recovered, 1);

    let missing_after = coordinator
        .store()
        .read(|conn| Store::ceremonies_missing_commit(conn, epic.epic_num))
        .unwrap();
    assert!(missing_after.is_empty());

    // The ceremony can now be held again cleanly, through the full
    // orchestrator-level idempotent path.
    let result = coordinator
        .record_ceremony(
            epic.epic_num,
            None,
            CeremonyType::Standup,
            CeremonyOutcome::Success,
            "## Summary\nre-run cleanly",
            "re-run cleanly",
            0,
            &BTreeSet::new(),
            &[],
            &[],
            "standup:rerun:1",
        )
        .unwrap();
    assert_eq!(result.outcome, CeremonyOutcome::Success);
}
