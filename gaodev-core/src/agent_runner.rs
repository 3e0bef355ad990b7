//! The `AgentRunner` boundary (§6) — the external collaborator that
//! actually invokes agents/LLMs. The core depends only on this trait;
//! concrete implementations (e.g. `gaodev-runner`, built on `rig-core`)
//! live outside the core crate.

use crate::domain::CeremonyType;
use crate::workflow::plan::WorkflowStep;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub artifacts: Vec<Artifact>,
    pub outcome: StepOutcome,
    pub diagnostics: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CeremonyTranscript {
    pub transcript_markdown: String,
}

/// Read-only snapshot handed to an `AgentRunner` call; it never sees the
/// live Store or git index directly (§6: "must not touch `.gao-dev/
/// state.db` or the git index directly").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub epic_num: i64,
    pub story_num: Option<i64>,
    pub feature_name: String,
    pub scale_level: u8,
    pub recent_summary: String,
}

/// The external agent-execution boundary. Every call is deadline-respecting
/// and cooperatively cancellable via `token`.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn execute(
        &self,
        step: &WorkflowStep,
        ctx: &Snapshot,
        deadline: Duration,
        token: CancellationToken,
    ) -> Result<StepResult, String>;

    async fn execute_ceremony(
        &self,
        ceremony_type: CeremonyType,
        ctx: &Snapshot,
        deadline: Duration,
        token: CancellationToken,
    ) -> Result<CeremonyTranscript, String>;
}

/// Test double used by `gaodev-core`'s own integration tests, so the core's
/// test suite carries no dependency on an external, LLM-backed crate —
/// mirrors the teacher's preference for hand-rolled test doubles at
/// external boundaries (`mockall`-based in the teacher, explicit here since
/// the trait surface is tiny).
pub struct NullAgentRunner {
    pub step_outcome: StepOutcome,
    pub ceremony_markdown: String,
}

impl Default for NullAgentRunner {
    fn default() -> Self {
        Self {
            step_outcome: StepOutcome::Success,
            ceremony_markdown: "## Summary\nNothing happened.\n".to_string(),
        }
    }
}

#[async_trait]
impl AgentRunner for NullAgentRunner {
    async fn execute(
        &self,
        step: &WorkflowStep,
        _ctx: &Snapshot,
        _deadline: Duration,
        _token: CancellationToken,
    ) -> Result<StepResult, String> {
        Ok(StepResult {
            artifacts: vec![Artifact {
                path: format!("docs/features/null/{}.md", step.name),
                bytes: b"stub artifact".to_vec(),
            }],
            outcome: self.step_outcome,
            diagnostics: String::new(),
        })
    }

    async fn execute_ceremony(
        &self,
        _ceremony_type: CeremonyType,
        _ctx: &Snapshot,
        _deadline: Duration,
        _token: CancellationToken,
    ) -> Result<CeremonyTranscript, String> {
        Ok(CeremonyTranscript {
            transcript_markdown: self.ceremony_markdown.clone(),
        })
    }
}
