//! LearningService (C6, §4.6) — indexes learnings, scores candidates
//! against a request context, and forwards outcome recording to the
//! StateCoordinator (the only component allowed to mutate a Learning row).

pub mod scoring;

use crate::config::LearningConfig;
use crate::coordinator::StateCoordinator;
use crate::domain::{ApplicationOutcome, Learning, LearningApplication};
use crate::error::GaoResult;
use crate::store::{SharedStore, Store};
use scoring::ScoreRequest;
use std::sync::Arc;

pub struct LearningService {
    store: SharedStore,
    coordinator: Arc<StateCoordinator>,
    config: LearningConfig,
}

impl LearningService {
    pub fn new(store: SharedStore, coordinator: Arc<StateCoordinator>, config: LearningConfig) -> Self {
        Self {
            store,
            coordinator,
            config,
        }
    }

    /// §4.6 selection: active learnings scored against `request`, sorted
    /// descending, thresholded, truncated to `limit` (default `top_k`).
    pub fn select(&self, request: &ScoreRequest, limit: Option<usize>) -> GaoResult<Vec<(Learning, f64)>> {
        let now = chrono::Utc::now();
        let learnings = self.store.read(Store::list_active_learnings)?;
        let mut scored: Vec<(Learning, f64)> = learnings
            .into_iter()
            .map(|learning| {
                let s = scoring::score(&learning, request, now);
                (learning, s)
            })
            .filter(|(_, s)| *s >= self.config.score_threshold)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit.unwrap_or(self.config.top_k));
        Ok(scored)
    }

    /// §4.6 `recordApplication`: delegates the write to StateCoordinator.
    pub fn record_application(
        &self,
        learning_id: i64,
        epic_num: i64,
        story_num: Option<i64>,
        outcome: ApplicationOutcome,
        context: &str,
    ) -> GaoResult<LearningApplication> {
        self.coordinator
            .apply_learning(learning_id, epic_num, story_num, outcome, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LearningCategory, ScaleLevel};
    use crate::git::GitGateway;
    use std::collections::BTreeSet;
    use std::process::Command;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, LearningService) {
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
        let service = LearningService::new(store, coordinator, LearningConfig::default());
        (dir, service)
    }

    #[test]
    fn select_excludes_below_threshold_and_sorts_descending() {
        let (_dir, service) = setup();
        service
            .store
            .transaction(|tx| {
                Store::insert_learning(
                    tx,
                    LearningCategory::Quality,
                    "strong match",
                    &["auth", "api"].into_iter().map(String::from).collect(),
                    3,
                    "backend",
                    0.9,
                )
            })
            .unwrap();
        service
            .store
            .transaction(|tx| {
                Store::insert_learning(
                    tx,
                    LearningCategory::Operational,
                    "weak match",
                    &BTreeSet::new(),
                    0,
                    "other",
                    0.2,
                )
            })
            .unwrap();

        let request = ScoreRequest {
            scale_level: 3 as ScaleLevel,
            project_type: "backend".to_string(),
            tags: ["auth", "api"].into_iter().map(String::from).collect(),
        };
        let results = service.select(&request, None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.text, "strong match");
    }

    #[test]
    fn record_application_updates_counters_via_coordinator() {
        let (_dir, service) = setup();
        let learning = service
            .store
            .transaction(|tx| {
                Store::insert_learning(
                    tx,
                    LearningCategory::Quality,
                    "text",
                    &BTreeSet::new(),
                    2,
                    "web",
                    0.8,
                )
            })
            .unwrap();
        service
            .store
            .transaction(|tx| Store::create_epic(tx, "widgets", 2))
            .unwrap();
        service
            .record_application(learning.id, 1, None, ApplicationOutcome::Success, "applied in epic 1")
            .unwrap();
        let updated = service.store.read(|conn| Store::get_learning(conn, learning.id)).unwrap().unwrap();
        assert_eq!(updated.application_count, 1);
    }
}
