//! gaodev-core: scale-adaptive workflow selection, ceremony triggering,
//! learning feedback, and git-integrated state for autonomous software
//! delivery.
//!
//! This crate is the engine; it depends on nothing that knows how to talk
//! to an LLM. Callers supply an `AgentRunner` (see `gaodev-runner` for a
//! concrete `rig-core`-backed implementation) and drive the engine through
//! [`GaoDev`].

pub mod agent_runner;
pub mod ceremony;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod events;
pub mod git;
pub mod learning;
pub mod lock;
pub mod orchestrator;
pub mod safety;
pub mod store;
pub mod triggers;
pub mod workflow;

use agent_runner::AgentRunner;
use ceremony::CeremonyOrchestrator;
use config::GaoConfig;
use coordinator::StateCoordinator;
use error::GaoResult;
use events::SharedEventBus;
use git::GitGateway;
use learning::LearningService;
use lock::InstanceLock;
use orchestrator::{Orchestrator, PlanOutcome, WorkRequest};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use store::Store;
use tokio_util::sync::CancellationToken;

/// Top-level facade wiring Store, GitGateway, StateCoordinator,
/// LearningService, CeremonyOrchestrator, and Orchestrator together for one
/// project working tree. Holds the instance lock for its own lifetime.
pub struct GaoDev {
    orchestrator: Orchestrator,
    coordinator: Arc<StateCoordinator>,
    events: SharedEventBus,
    _lock: InstanceLock,
}

impl GaoDev {
    /// Opens (or initializes) `<project_root>/.gao-dev`, acquiring the
    /// instance lock and running startup crash recovery (§8 S6) before
    /// returning — by the time this call succeeds, the store has no
    /// ceremony rows dangling without a matching commit.
    pub fn open(project_root: impl Into<PathBuf>, agent_runner: Arc<dyn AgentRunner>) -> GaoResult<Self> {
        let project_root = project_root.into();
        let lock = InstanceLock::acquire(&project_root)?;

        let git = GitGateway::new(&project_root)?;
        let db_path = project_root.join(".gao-dev").join("state.db");
        let store = Store::open(&db_path, Some(&git))?.shared();
        let config = GaoConfig::load(&project_root)?;
        let events = events::EventBus::shared();

        let coordinator = Arc::new(StateCoordinator::new(store.clone(), git, &project_root).with_events(events.clone()));
        let learning_service = Arc::new(LearningService::new(store.clone(), coordinator.clone(), config.learning.clone()));
        let ceremony_orchestrator = Arc::new(CeremonyOrchestrator::new(
            coordinator.clone(),
            learning_service.clone(),
            agent_runner.clone(),
            config.safety.clone(),
        ));
        let orchestrator = Orchestrator::new(
            coordinator.clone(),
            learning_service,
            ceremony_orchestrator,
            agent_runner,
            config,
        )
        .with_events(events.clone());

        Ok(Self {
            orchestrator,
            coordinator,
            events,
            _lock: lock,
        })
    }

    /// Subscribes to the plan/step/ceremony event stream shared by the
    /// Orchestrator and StateCoordinator (§6 UI interface).
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<events::GaoEvent> {
        self.events.subscribe()
    }

    /// Recovers any ceremony left uncommitted by a crash between the SQL
    /// write and the git commit (§8 S6). Safe to call repeatedly; a no-op
    /// once the store is clean.
    pub fn recover(&self, epic_num: i64) -> GaoResult<u64> {
        self.coordinator.recover_uncommitted_ceremonies(epic_num)
    }

    pub async fn run(&self, request: WorkRequest, token: CancellationToken) -> GaoResult<PlanOutcome> {
        self.orchestrator.run(request, token).await
    }

    pub async fn hold_ceremony(
        &self,
        ceremony_type: domain::CeremonyType,
        epic_num: i64,
        story_num: Option<i64>,
        participants: std::collections::BTreeSet<String>,
        token: CancellationToken,
    ) -> GaoResult<ceremony::CeremonyRunResult> {
        self.orchestrator
            .hold_ceremony(ceremony_type, epic_num, story_num, participants, token)
            .await
    }

    pub fn status(&self, epic_num: i64) -> GaoResult<Option<domain::Epic>> {
        self.orchestrator.status(epic_num)
    }

    pub fn expire_stale_action_items(&self) -> GaoResult<u64> {
        self.coordinator.expire_stale_action_items()
    }
}

/// §4.0 precondition check: refuse to run from inside the GAO-Dev source
/// tree itself (§7 `E001`). The source tree is identified by the presence
/// of this crate's own manifest marker at the candidate root.
pub fn guard_against_source_tree(project_root: &Path) -> GaoResult<()> {
    if project_root.join("gaodev-core").join("Cargo.toml").exists() && project_root.join("SPEC_FULL.md").exists() {
        return Err(error::GaoError::SourceTreeDetected {
            path: project_root.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_runner::NullAgentRunner;
    use std::process::Command;
    use tempfile::tempdir;

    fn init_repo(dir: &Path) {
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

    #[tokio::test]
    async fn open_then_run_a_chore_end_to_end() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let runner: Arc<dyn AgentRunner> = Arc::new(NullAgentRunner::default());
        let gao = GaoDev::open(dir.path(), runner).unwrap();

        let request = WorkRequest {
            feature_name: "typo-fix".to_string(),
            scale_level: 0,
            project_type: "web".to_string(),
            tags: Default::default(),
            request_planning: false,
            total_stories: 0,
        };
        let outcome = gao.run(request, CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.status, orchestrator::PlanStatus::Completed);
    }

    #[test]
    fn second_open_is_refused_while_first_holds_the_lock() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let runner: Arc<dyn AgentRunner> = Arc::new(NullAgentRunner::default());
        let _gao = GaoDev::open(dir.path(), runner.clone()).unwrap();
        let err = GaoDev::open(dir.path(), runner).unwrap_err();
        assert!(matches!(err, error::GaoError::InstanceLocked { .. }));
    }

    #[test]
    fn guard_refuses_the_gaodev_source_tree_itself() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("gaodev-core")).unwrap();
        std::fs::write(dir.path().join("gaodev-core").join("Cargo.toml"), "").unwrap();
        std::fs::write(dir.path().join("SPEC_FULL.md"), "").unwrap();
        assert!(guard_against_source_tree(dir.path()).is_err());
    }
}
