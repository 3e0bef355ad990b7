//! `gaodev-runner`: a `gaodev_core::agent_runner::AgentRunner` backed by a
//! single `rig-core` OpenAI-compatible completion agent, the way the
//! teacher's `swarm-agents` wraps one `rig::agent::Agent` per tier behind a
//! small builder (`agents::coder`/`agents::reviewer`). Unlike the teacher's
//! multi-tier `AgentFactory`, this runner only ever needs one model: the
//! core engine treats every step and ceremony as an opaque prompt/response
//! round trip, so there's nothing here to route between tiers.

pub mod config;

use async_trait::async_trait;
use config::RunnerConfig;
use gaodev_core::agent_runner::{AgentRunner, Artifact, CeremonyTranscript, Snapshot, StepOutcome, StepResult};
use gaodev_core::domain::CeremonyType;
use gaodev_core::workflow::plan::WorkflowStep;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const STEP_PREAMBLE: &str = "You are an autonomous software delivery agent executing one workflow \
step at a time. Produce the work described, then finish your reply with a line of the exact form \
`STATUS: success`, `STATUS: partial`, or `STATUS: failed` — success means the step is fully done, \
partial means it's done but needs follow-up review, failed means you could not complete it.";

const CEREMONY_PREAMBLE: &str = "You are facilitating a team ceremony (standup, planning, or \
retrospective) for an autonomous delivery project. Reply in markdown with a `## Summary` section \
(required), and any of `## Decisions`, `## Action Items` (bullets shaped `- [priority] description`), \
and `## Learnings` (bullets shaped `- [category] text (tags: a, b)`) that apply.";

/// `AgentRunner` implementation wired to one `rig-core` completion agent.
pub struct RigAgentRunner {
    agent: rig::agent::Agent<openai::completion::CompletionModel>,
}

impl RigAgentRunner {
    pub fn new(config: &RunnerConfig) -> anyhow::Result<Self> {
        let client = openai::CompletionsClient::builder()
            .api_key(&config.api_key)
            .base_url(&config.base_url)
            .build()?;
        let agent = client
            .agent(&config.model)
            .name("gaodev-runner")
            .preamble(STEP_PREAMBLE)
            .temperature(0.2)
            .build();
        Ok(Self { agent })
    }

    fn step_prompt(step: &WorkflowStep, ctx: &Snapshot) -> String {
        format!(
            "# Step: {}\n\nFeature: {}\nScale level: {}\nEpic: {}{}\n\n## Recent context\n{}\n",
            step.name,
            ctx.feature_name,
            ctx.scale_level,
            ctx.epic_num,
            ctx.story_num.map(|n| format!("\nStory: {n}")).unwrap_or_default(),
            if ctx.recent_summary.is_empty() {
                "(none)"
            } else {
                &ctx.recent_summary
            },
        )
    }

    fn ceremony_prompt(ceremony_type: CeremonyType, ctx: &Snapshot) -> String {
        format!(
            "# {} for epic {}\n\nFeature: {}\nScale level: {}\n\n## Recent learnings\n{}\n",
            ceremony_type.as_str(),
            ctx.epic_num,
            ctx.feature_name,
            ctx.scale_level,
            if ctx.recent_summary.is_empty() {
                "(none)"
            } else {
                &ctx.recent_summary
            },
        )
    }
}

/// §6: "must not touch `.gao-dev/state.db` or the git index directly" —
/// parses a trailing `STATUS: ...` line without writing anything back to
/// the project tree itself; the Orchestrator stages the returned artifact.
fn parse_step_outcome(response: &str) -> StepOutcome {
    response
        .lines()
        .rev()
        .find_map(|line| {
            let lower = line.trim().to_ascii_lowercase();
            lower.strip_prefix("status:").map(|rest| match rest.trim() {
                "success" => StepOutcome::Success,
                "failed" => StepOutcome::Failed,
                _ => StepOutcome::Partial,
            })
        })
        .unwrap_or(StepOutcome::Partial)
}

#[async_trait]
impl AgentRunner for RigAgentRunner {
    async fn execute(
        &self,
        step: &WorkflowStep,
        ctx: &Snapshot,
        deadline: Duration,
        token: CancellationToken,
    ) -> Result<StepResult, String> {
        let prompt = Self::step_prompt(step, ctx);
        let response = tokio::select! {
            result = tokio::time::timeout(deadline, self.agent.prompt(&prompt)) => {
                result.map_err(|_| "agent call timed out".to_string())?
                    .map_err(|e| e.to_string())?
            }
            _ = token.cancelled() => return Err("cancelled".to_string()),
        };

        let outcome = parse_step_outcome(&response);
        let artifact_path = match ctx.story_num {
            Some(story_num) => format!("docs/features/{}/story-{}.{}.md", ctx.feature_name, ctx.epic_num, story_num),
            None => format!("docs/features/{}/{}.md", ctx.feature_name, step.name),
        };
        Ok(StepResult {
            artifacts: vec![Artifact {
                path: artifact_path,
                bytes: response.clone().into_bytes(),
            }],
            outcome,
            diagnostics: response,
        })
    }

    async fn execute_ceremony(
        &self,
        ceremony_type: CeremonyType,
        ctx: &Snapshot,
        deadline: Duration,
        token: CancellationToken,
    ) -> Result<CeremonyTranscript, String> {
        let prompt = format!("{CEREMONY_PREAMBLE}\n\n{}", Self::ceremony_prompt(ceremony_type, ctx));
        let response = tokio::select! {
            result = tokio::time::timeout(deadline, self.agent.prompt(&prompt)) => {
                result.map_err(|_| "agent call timed out".to_string())?
                    .map_err(|e| e.to_string())?
            }
            _ = token.cancelled() => return Err("cancelled".to_string()),
        };
        Ok(CeremonyTranscript {
            transcript_markdown: response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_line_case_insensitively() {
        assert_eq!(parse_step_outcome("did the thing\nSTATUS: success"), StepOutcome::Success);
        assert_eq!(parse_step_outcome("STATUS: Failed\n"), StepOutcome::Failed);
        assert_eq!(parse_step_outcome("no status line here"), StepOutcome::Partial);
    }
}
