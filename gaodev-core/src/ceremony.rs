//! CeremonyOrchestrator (C9, §4.9) — runs one ceremony end-to-end: safety
//! check, context gathering, the external `AgentRunner.executeCeremony`
//! call, transcript parsing, and a single atomic persist through
//! StateCoordinator.

use crate::agent_runner::{AgentRunner, Snapshot};
use crate::config::SafetyConfig;
use crate::coordinator::{ActionItemDraft, LearningDraft, StateCoordinator};
use crate::domain::{CeremonyOutcome, CeremonyType, Epic, Priority, SafetyState};
use crate::error::{GaoError, GaoResult};
use crate::learning::scoring::ScoreRequest;
use crate::learning::LearningService;
use crate::safety;
use crate::store::Store;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub enum CeremonyRunResult {
    /// SafetyGuard denied the hold; no state change.
    Skipped { reason: String },
    /// The ceremony ran and was persisted, with this final outcome.
    Recorded { ceremony_id: i64, outcome: CeremonyOutcome },
    /// A `planning` ceremony failed; per §4.9 the caller must abort the plan.
    Aborted { reason: String },
}

pub struct CeremonyOrchestrator {
    coordinator: Arc<StateCoordinator>,
    learning_service: Arc<LearningService>,
    agent_runner: Arc<dyn AgentRunner>,
    safety_config: SafetyConfig,
}

struct ParsedTranscript {
    summary: String,
    decisions: Vec<String>,
    action_items: Vec<ActionItemDraft>,
    learnings: Vec<LearningDraft>,
    well_formed: bool,
}

impl CeremonyOrchestrator {
    pub fn new(
        coordinator: Arc<StateCoordinator>,
        learning_service: Arc<LearningService>,
        agent_runner: Arc<dyn AgentRunner>,
        safety_config: SafetyConfig,
    ) -> Self {
        Self {
            coordinator,
            learning_service,
            agent_runner,
            safety_config,
        }
    }

    fn safety_state(&self, epic_num: i64, ceremony_type: CeremonyType) -> GaoResult<SafetyState> {
        self.coordinator
            .store()
            .read(|conn| Store::get_safety_state(conn, epic_num, ceremony_type))
    }

    fn persist_safety_state(&self, state: SafetyState) -> GaoResult<()> {
        self.coordinator.store().transaction(|tx| Store::put_safety_state(tx, &state))
    }

    /// §4.9 full run, including the retrospective retry-once-then-continue
    /// policy and planning's abort-on-failure policy.
    pub async fn run(
        &self,
        ceremony_type: CeremonyType,
        epic_num: i64,
        story_num: Option<i64>,
        participants: &BTreeSet<String>,
        manual: bool,
        token: CancellationToken,
    ) -> GaoResult<CeremonyRunResult> {
        let now = Utc::now();
        let state = self.safety_state(epic_num, ceremony_type)?;
        if let Err(denial) = safety::can_hold(&state, &self.safety_config, now, manual) {
            return Ok(CeremonyRunResult::Skipped { reason: denial.reason() });
        }

        let mut outcome = self.attempt_once(ceremony_type, epic_num, story_num, participants, token.clone()).await?;

        if ceremony_type == CeremonyType::Retrospective {
            if let CeremonyRunResult::Recorded {
                outcome: CeremonyOutcome::Failed,
                ..
            } = &outcome
            {
                outcome = self
                    .attempt_once(ceremony_type, epic_num, story_num, participants, token)
                    .await?;
            }
        }

        if let CeremonyRunResult::Recorded { outcome: final_outcome, .. } = &outcome {
            let updated = safety::record_outcome(state, &self.safety_config, *final_outcome, now);
            self.persist_safety_state(updated)?;

            if *final_outcome == CeremonyOutcome::Failed && ceremony_type == CeremonyType::Planning {
                return Ok(CeremonyRunResult::Aborted {
                    reason: "planning ceremony failed".to_string(),
                });
            }
        }

        Ok(outcome)
    }

    async fn attempt_once(
        &self,
        ceremony_type: CeremonyType,
        epic_num: i64,
        story_num: Option<i64>,
        participants: &BTreeSet<String>,
        token: CancellationToken,
    ) -> GaoResult<CeremonyRunResult> {
        let epic = self
            .coordinator
            .store()
            .read(|conn| Store::get_epic(conn, epic_num))?
            .ok_or_else(|| GaoError::DataInvariant {
                message: format!("epic {epic_num} not found"),
            })?;

        let snapshot = self.build_snapshot(&epic, story_num)?;
        let deadline = Duration::from_secs(self.safety_config.ceremony_timeout_minutes as u64 * 60);

        let started = Utc::now();
        let transcript = match self
            .agent_runner
            .execute_ceremony(ceremony_type, &snapshot, deadline, token)
            .await
        {
            Ok(t) => t,
            Err(message) => {
                return self
                    .persist(
                        epic_num,
                        story_num,
                        ceremony_type,
                        CeremonyOutcome::Failed,
                        &format!("agent call failed: {message}"),
                        "",
                        started,
                        participants,
                        &[],
                        &[],
                    )
                    .map(|ceremony_id| CeremonyRunResult::Recorded {
                        ceremony_id,
                        outcome: CeremonyOutcome::Failed,
                    });
            }
        };

        let parsed = parse_transcript(&transcript.transcript_markdown);
        let duration_ms = Utc::now().signed_duration_since(started).num_milliseconds();
        let outcome = if parsed.well_formed {
            CeremonyOutcome::Success
        } else {
            CeremonyOutcome::Partial
        };

        let ceremony_id = self.persist(
            epic_num,
            story_num,
            ceremony_type,
            outcome,
            &transcript.transcript_markdown,
            &parsed.summary,
            started,
            participants,
            &parsed.action_items,
            &parsed.learnings,
        )?;
        let _ = duration_ms;

        Ok(CeremonyRunResult::Recorded { ceremony_id, outcome })
    }

    #[allow(clippy::too_many_arguments)]
    fn persist(
        &self,
        epic_num: i64,
        story_num: Option<i64>,
        ceremony_type: CeremonyType,
        outcome: CeremonyOutcome,
        transcript: &str,
        summary: &str,
        started: chrono::DateTime<Utc>,
        participants: &BTreeSet<String>,
        action_items: &[ActionItemDraft],
        learnings: &[LearningDraft],
    ) -> GaoResult<i64> {
        let duration_ms = Utc::now().signed_duration_since(started).num_milliseconds();
        let idempotency_key = format!(
            "{}:{}:{}",
            ceremony_type.as_str(),
            epic_num,
            started.to_rfc3339()
        );
        let ceremony = self.coordinator.record_ceremony(
            epic_num,
            story_num,
            ceremony_type,
            outcome,
            transcript,
            summary,
            duration_ms,
            participants,
            action_items,
            learnings,
            &idempotency_key,
        )?;
        Ok(ceremony.id)
    }

    fn build_snapshot(&self, epic: &Epic, story_num: Option<i64>) -> GaoResult<Snapshot> {
        let request = ScoreRequest {
            scale_level: epic.scale_level,
            project_type: "default".to_string(),
            tags: BTreeSet::new(),
        };
        let learnings = self.learning_service.select(&request, Some(5))?;
        let recent_summary = learnings
            .iter()
            .map(|(l, _)| l.text.clone())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Snapshot {
            epic_num: epic.epic_num,
            story_num,
            feature_name: epic.feature_name.clone(),
            scale_level: epic.scale_level,
            recent_summary,
        })
    }
}

/// Minimal markdown transcript parser. Recognizes `## Summary`, `##
/// Decisions`, `## Action Items`, `## Learnings` sections with bullet
/// lines; downgrades to `partial` when a required section is missing or a
/// bullet fails the §4.9 minimum-quality checks.
fn parse_transcript(markdown: &str) -> ParsedTranscript {
    let mut summary = String::new();
    let mut decisions = Vec::new();
    let mut action_items = Vec::new();
    let mut learnings = Vec::new();
    let mut well_formed = true;

    let mut section = "";
    for line in markdown.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix("## ") {
            section = match heading.to_ascii_lowercase().as_str() {
                "summary" => "summary",
                "decisions" => "decisions",
                "action items" => "action_items",
                "learnings" => "learnings",
                _ => "",
            };
            continue;
        }
        let Some(bullet) = trimmed.strip_prefix("- ") else {
            if section == "summary" && !trimmed.is_empty() {
                if !summary.is_empty() {
                    summary.push(' ');
                }
                summary.push_str(trimmed);
            }
            continue;
        };

        match section {
            "decisions" => decisions.push(bullet.to_string()),
            "action_items" => match parse_action_item(bullet) {
                Some(item) => action_items.push(item),
                None => well_formed = false,
            },
            "learnings" => match parse_learning(bullet) {
                Some(draft) => learnings.push(draft),
                None => well_formed = false,
            },
            _ => {}
        }
    }

    if summary.trim().is_empty() {
        well_formed = false;
        summary = "no summary provided".to_string();
    }

    ParsedTranscript {
        summary,
        decisions,
        action_items,
        learnings,
        well_formed,
    }
}

/// Expects `[priority] description`, e.g. `[high] add rate limiting`.
fn parse_action_item(bullet: &str) -> Option<ActionItemDraft> {
    let bullet = bullet.trim();
    let rest = bullet.strip_prefix('[')?;
    let (priority_str, rest) = rest.split_once(']')?;
    let priority = Priority::parse(priority_str.trim())?;
    let description = rest.trim().trim_start_matches(':').trim().to_string();
    if description.is_empty() {
        return None;
    }
    Some(ActionItemDraft { priority, description })
}

/// Expects `[category] text (tags: a, b)`.
fn parse_learning(bullet: &str) -> Option<LearningDraft> {
    let bullet = bullet.trim();
    let rest = bullet.strip_prefix('[')?;
    let (category_str, rest) = rest.split_once(']')?;
    let category = crate::domain::LearningCategory::parse(category_str.trim())?;
    let rest = rest.trim().trim_start_matches(':').trim();
    let (text_part, tags_part) = match rest.rfind("(tags:") {
        Some(idx) => (rest[..idx].trim(), Some(&rest[idx..])),
        None => (rest, None),
    };
    if text_part.is_empty() {
        return None;
    }
    let tags: BTreeSet<String> = tags_part
        .and_then(|t| t.strip_prefix("(tags:"))
        .and_then(|t| t.strip_suffix(')'))
        .map(|t| t.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    if tags.is_empty() {
        return None;
    }
    Some(LearningDraft {
        category,
        text: text_part.to_string(),
        tags,
        scale_level: 0,
        project_type: String::new(),
        base_relevance: 0.6,
    })
}
