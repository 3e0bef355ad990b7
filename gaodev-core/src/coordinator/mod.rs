//! StateCoordinator (C3, §4.3) — the only component allowed to mutate
//! epics, stories, ceremonies, action items, and learnings. Every mutation
//! that touches the working tree is paired 1:1 with a git commit.
//!
//! Generalizes the teacher's harness session/checkpoint coordination (which
//! pairs a `StateStore` put with a `GitManager` commit) to the full §4.3
//! operation set, following the write-order the spec pins down in §5:
//! the SQL transaction commits first, then the git commit follows outside
//! it. A crash between the two leaves a ceremony row with no `commit_sha`,
//! which `recover_uncommitted_ceremonies` detects and rolls back on the
//! next startup (§8 S6).

use crate::domain::*;
use crate::error::{GaoError, GaoResult};
use crate::events::{EventBus, GaoEvent, SharedEventBus};
use crate::git::GitGateway;
use crate::store::{self, SharedStore, Store};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A learning captured during a ceremony, not yet persisted.
#[derive(Debug, Clone)]
pub struct LearningDraft {
    pub category: LearningCategory,
    pub text: String,
    pub tags: std::collections::BTreeSet<String>,
    pub scale_level: ScaleLevel,
    pub project_type: String,
    pub base_relevance: f64,
}

/// An action item captured during a ceremony, not yet persisted.
#[derive(Debug, Clone)]
pub struct ActionItemDraft {
    pub priority: Priority,
    pub description: String,
}

/// A file an `AgentRunner` step produced, to be staged alongside a commit.
#[derive(Debug, Clone)]
pub struct StagedArtifact {
    pub relative_path: String,
    pub bytes: Vec<u8>,
}

pub struct StateCoordinator {
    store: SharedStore,
    git: GitGateway,
    events: SharedEventBus,
    project_root: PathBuf,
}

impl StateCoordinator {
    pub fn new(store: SharedStore, git: GitGateway, project_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            git,
            events: EventBus::shared(),
            project_root: project_root.into(),
        }
    }

    pub fn with_events(mut self, events: SharedEventBus) -> Self {
        self.events = events;
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    fn write_artifact(&self, relative_path: &str, bytes: &[u8]) -> GaoResult<()> {
        let full = self.project_root.join(relative_path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(full, bytes)?;
        Ok(())
    }

    /// §4.3 `createEpic`: inserts the epic row, writes a PRD skeleton, and
    /// commits it as `docs(<feature>): initialize epic <n> (Level <k>)`.
    pub fn create_epic(&self, feature_name: &str, scale_level: ScaleLevel) -> GaoResult<Epic> {
        let epic = self
            .store
            .transaction(|tx| Store::create_epic(tx, feature_name, scale_level))?;

        let relative = format!("docs/features/{feature_name}/PRD.md");
        let skeleton = format!(
            "# {feature_name}\n\nEpic {epic_num} — Scale Level {scale_level}\n\n## Summary\n\nTBD.\n",
            epic_num = epic.epic_num
        );
        self.write_artifact(&relative, skeleton.as_bytes())?;
        self.git.stage(&[&relative])?;
        self.git.commit(
            &format!(
                "docs({feature_name}): initialize epic {} (Level {scale_level})",
                epic.epic_num
            ),
            None,
            &[],
        )?;

        Ok(epic)
    }

    /// §4.3 `advanceStory`: writes the new status, stages any produced
    /// artifacts, and commits `feat(<scope>): story <e>.<s> - <title>`
    /// (or `fix` at scale level 1, per the teacher's scale-aware commit
    /// typing).
    pub fn advance_story(
        &self,
        epic_num: i64,
        story_num: i64,
        title: &str,
        new_status: StoryStatus,
        quality_gates_passed: QualityGates,
        artifacts: &[StagedArtifact],
    ) -> GaoResult<Story> {
        let (story, scale_level) = self.store.transaction(|tx| {
            let mut epic = Store::get_epic(tx, epic_num)?.ok_or_else(|| GaoError::DataInvariant {
                message: format!("epic {epic_num} not found"),
            })?;

            let mut story = Store::get_story(tx, epic_num, story_num)?.unwrap_or(Story {
                epic_num,
                story_num,
                title: title.to_string(),
                status: StoryStatus::Draft,
                cycle_time_seconds: None,
                rework_count: 0,
                quality_gates_passed: QualityGates::Unknown,
            });
            let was_terminal = story.status.is_terminal();
            story.title = title.to_string();
            story.status = new_status;
            story.quality_gates_passed = quality_gates_passed;
            Store::upsert_story(tx, &story)?;

            if new_status == StoryStatus::Done && !was_terminal {
                epic.stories_completed += 1;
            }
            if epic.status == EpicStatus::Planned {
                epic.status = EpicStatus::Active;
            }
            Store::update_epic(tx, &epic)?;

            Ok((story, epic.scale_level))
        })?;

        for artifact in artifacts {
            self.write_artifact(&artifact.relative_path, &artifact.bytes)?;
        }
        if !artifacts.is_empty() {
            self.git.stage_all()?;
            let commit_type = if scale_level == 1 { "fix" } else { "feat" };
            let sha = self.git.commit(
                &format!("{commit_type}(epic-{epic_num}): story {epic_num}.{story_num} - {title}"),
                None,
                &[],
            )?;
            self.events.publish(GaoEvent::ArtifactCommitted {
                epic_num,
                path: artifacts[0].relative_path.clone(),
                sha,
                timestamp: Utc::now(),
            });
        }

        Ok(story)
    }

    /// §4.3 `recordCeremony`: idempotent on `idempotency_key` (timestamp +
    /// type + epic, §8). A repeat call with the same key short-circuits
    /// before touching the Store or the working tree at all.
    #[allow(clippy::too_many_arguments)]
    pub fn record_ceremony(
        &self,
        epic_num: i64,
        story_num: Option<i64>,
        ceremony_type: CeremonyType,
        outcome: CeremonyOutcome,
        transcript: &str,
        summary: &str,
        duration_ms: i64,
        participants: &std::collections::BTreeSet<String>,
        action_items: &[ActionItemDraft],
        learnings: &[LearningDraft],
        idempotency_key: &str,
    ) -> GaoResult<Ceremony> {
        if let Some(existing) = self
            .store
            .read(|conn| store::get_ceremony_by_idempotency_key(conn, idempotency_key))?
        {
            return Ok(existing);
        }

        let feature_name = self
            .store
            .read(|conn| Store::get_epic(conn, epic_num))?
            .map(|e| e.feature_name)
            .ok_or_else(|| GaoError::DataInvariant {
                message: format!("epic {epic_num} not found"),
            })?;

        let ceremony = self.store.transaction(|tx| {
            let ceremony = Store::record_ceremony(
                tx,
                epic_num,
                story_num,
                ceremony_type,
                outcome,
                transcript,
                summary,
                duration_ms,
                participants,
                idempotency_key,
            )?;
            for item in action_items {
                Store::create_action_item(tx, ceremony.id, item.priority, &item.description)?;
            }
            for learning in learnings {
                Store::insert_learning(
                    tx,
                    learning.category,
                    &learning.text,
                    &learning.tags,
                    learning.scale_level,
                    &learning.project_type,
                    learning.base_relevance,
                )?;
            }
            Ok(ceremony)
        })?;

        let relative = format!(
            "docs/features/{feature_name}/ceremonies/{}-{}.md",
            ceremony_type.as_str(),
            ceremony.held_at.format("%Y%m%dT%H%M%SZ")
        );
        self.write_artifact(&relative, transcript.as_bytes())?;
        self.git.stage(&[&relative])?;
        let sha = self.git.commit(
            &format!(
                "docs({feature_name}): record {} for epic {epic_num}",
                ceremony_type.as_str()
            ),
            None,
            &[],
        )?;
        self.store
            .transaction(|tx| Store::set_ceremony_commit_sha(tx, ceremony.id, &sha))?;

        self.events.publish(GaoEvent::CeremonyHeld {
            epic_num,
            ceremony_type: ceremony_type.as_str().to_string(),
            outcome: outcome.as_str().to_string(),
            timestamp: ceremony.held_at,
        });

        Ok(ceremony)
    }

    /// Not named in §4.3's operation list directly, but required to keep
    /// `Epic.total_stories` accurate once a `create-stories` step resolves
    /// the actual breakdown — without this the §3 `stories_completed ≤
    /// total_stories` invariant has nothing to check against.
    pub fn set_total_stories(&self, epic_num: i64, total_stories: u32) -> GaoResult<()> {
        self.store.transaction(|tx| {
            let mut epic = Store::get_epic(tx, epic_num)?.ok_or_else(|| GaoError::DataInvariant {
                message: format!("epic {epic_num} not found"),
            })?;
            epic.total_stories = total_stories;
            Store::update_epic(tx, &epic)
        })
    }

    /// Marks the epic `completed` once every story is terminal-done; a
    /// no-op (returns `false`) otherwise, and for the zero-story epic that
    /// §8 says must never auto-complete.
    pub fn complete_epic_if_done(&self, epic_num: i64) -> GaoResult<bool> {
        self.store.transaction(|tx| {
            let mut epic = Store::get_epic(tx, epic_num)?.ok_or_else(|| GaoError::DataInvariant {
                message: format!("epic {epic_num} not found"),
            })?;
            if epic.total_stories > 0
                && epic.stories_completed == epic.total_stories
                && epic.status != EpicStatus::Completed
            {
                epic.status = EpicStatus::Completed;
                epic.completed_at = Some(Utc::now());
                Store::update_epic(tx, &epic)?;
                Ok(true)
            } else {
                Ok(false)
            }
        })
    }

    /// A generic artifact commit for non-story workflow steps (e.g.
    /// `draft-prd`, `draft-architecture`) that don't carry story identity.
    /// Returns `None` when the step produced nothing to stage.
    pub fn commit_artifacts(
        &self,
        commit_type: &str,
        scope: &str,
        description: &str,
        artifacts: &[StagedArtifact],
    ) -> GaoResult<Option<String>> {
        if artifacts.is_empty() {
            return Ok(None);
        }
        for artifact in artifacts {
            self.write_artifact(&artifact.relative_path, &artifact.bytes)?;
        }
        self.git.stage_all()?;
        let sha = self
            .git
            .commit(&format!("{commit_type}({scope}): {description}"), None, &[])?;
        Ok(Some(sha))
    }

    /// §4.3 `applyLearning`: metadata-only, commits nothing.
    pub fn apply_learning(
        &self,
        learning_id: i64,
        epic_num: i64,
        story_num: Option<i64>,
        outcome: ApplicationOutcome,
        context: &str,
    ) -> GaoResult<LearningApplication> {
        self.store.transaction(|tx| {
            Store::record_learning_application(tx, learning_id, epic_num, story_num, outcome, context)
        })
    }

    pub fn expire_stale_action_items(&self) -> GaoResult<u64> {
        let now = Utc::now();
        self.store
            .read(|conn| Store::expire_stale_action_items(conn, now, ACTION_ITEM_EXPIRY_DAYS))
    }

    /// §8 S6: on startup, any ceremony row with no `commit_sha` means the
    /// process crashed between the SQL commit and the git commit. Roll the
    /// row back so the 1:1 SQL/git invariant holds again; the caller is
    /// expected to re-run the ceremony.
    pub fn recover_uncommitted_ceremonies(&self, epic_num: i64) -> GaoResult<u64> {
        let orphaned = self.store.read(|conn| Store::ceremonies_missing_commit(conn, epic_num))?;
        for id in &orphaned {
            self.store.transaction(|tx| Store::delete_ceremony(tx, *id))?;
        }
        Ok(orphaned.len() as u64)
    }
}

pub fn shared(store: SharedStore, git: GitGateway, project_root: impl Into<PathBuf>) -> Arc<StateCoordinator> {
    Arc::new(StateCoordinator::new(store, git, project_root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, StateCoordinator) {
        let dir = tempdir().unwrap();
        for args in [
            vec!["init"],
            vec!["config", "user.email", "test@test.com"],
            vec!["config", "user.name", "Test"],
        ] {
            Command::new("git").args(&args).current_dir(dir.path()).output().unwrap();
        }
        std::fs::write(dir.path().join("README.md"), "# test").unwrap();
        Command::new("git").args(["add", "."]).current_dir(dir.path()).output().unwrap();
        Command::new("git")
            .args(["commit", "-m", "chore(init): seed repo"])
            .current_dir(dir.path())
            .output()
            .unwrap();

        let store = Store::open_in_memory().unwrap().shared();
        let git = GitGateway::new(dir.path()).unwrap();
        let coordinator = StateCoordinator::new(store, git, dir.path());
        (dir, coordinator)
    }

    #[test]
    fn create_epic_writes_prd_and_commits() {
        let (dir, coordinator) = setup();
        let epic = coordinator.create_epic("widgets", 2).unwrap();
        assert_eq!(epic.epic_num, 1);
        assert!(dir.path().join("docs/features/widgets/PRD.md").exists());
        assert!(coordinator.git.is_clean().unwrap());
    }

    #[test]
    fn advance_story_marks_epic_active_and_increments_completed() {
        let (_dir, coordinator) = setup();
        coordinator.create_epic("widgets", 2).unwrap();
        let artifact = StagedArtifact {
            relative_path: "docs/features/widgets/story-1.1.md".to_string(),
            bytes: b"done".to_vec(),
        };
        coordinator
            .advance_story(1, 1, "first widget", StoryStatus::Done, QualityGates::Passed, &[artifact])
            .unwrap();
        let epic = coordinator.store.read(|conn| Store::get_epic(conn, 1)).unwrap().unwrap();
        assert_eq!(epic.status, EpicStatus::Active);
        assert_eq!(epic.stories_completed, 1);
    }

    #[test]
    fn record_ceremony_is_idempotent_on_key() {
        let (_dir, coordinator) = setup();
        coordinator.create_epic("widgets", 2).unwrap();
        let first = coordinator
            .record_ceremony(
                1,
                None,
                CeremonyType::Standup,
                CeremonyOutcome::Success,
                "## Standup\nAll good.",
                "all good",
                500,
                &Default::default(),
                &[],
                &[],
                "standup:1:2026-01-01",
            )
            .unwrap();
        let second = coordinator
            .record_ceremony(
                1,
                None,
                CeremonyType::Standup,
                CeremonyOutcome::Failed,
                "different",
                "different",
                999,
                &Default::default(),
                &[],
                &[],
                "standup:1:2026-01-01",
            )
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.outcome, CeremonyOutcome::Success);
    }

    #[test]
    fn recover_uncommitted_ceremonies_rolls_back_orphaned_row() {
        let (_dir, coordinator) = setup();
        coordinator.create_epic("widgets", 2).unwrap();
        coordinator
            .store
            .transaction(|tx| {
                Store::record_ceremony(
                    tx,
                    1,
                    None,
                    CeremonyType::Standup,
                    CeremonyOutcome::Success,
                    "t",
                    "s",
                    0,
                    &Default::default(),
                    "orphan-key",
                )
            })
            .unwrap();

        let removed = coordinator.recover_uncommitted_ceremonies(1).unwrap();
        assert_eq!(removed, 1);
        let count: i64 = coordinator
            .store
            .read(|conn| conn.query_row("SELECT COUNT(*) FROM ceremonies", [], |r| r.get(0)).map_err(GaoError::from))
            .unwrap();
        assert_eq!(count, 0);
    }
}
