//! CLI entry point wiring `RigAgentRunner` into `gaodev_core::GaoDev`, the
//! way the teacher's `swarm-agents` binary wires its `AgentFactory` into the
//! orchestrator loop — scaled down to one runner and a handful of
//! subcommands instead of a full swarm driver.

use clap::{Parser, Subcommand};
use gaodev_core::domain::CeremonyType;
use gaodev_core::orchestrator::WorkRequest;
use gaodev_core::GaoDev;
use gaodev_runner::config::RunnerConfig;
use gaodev_runner::RigAgentRunner;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "gaodev-runner", about = "Drives gaodev-core with a rig-core-backed agent")]
struct Cli {
    /// Project root containing (or to receive) `.gao-dev/`.
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a feature through the full scale-adaptive workflow.
    Run {
        feature_name: String,
        #[arg(long)]
        scale_level: u8,
        #[arg(long, default_value = "backend")]
        project_type: String,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long)]
        request_planning: bool,
        #[arg(long, default_value_t = 1)]
        total_stories: u32,
    },
    /// Manually hold a ceremony outside the normal trigger cadence.
    HoldCeremony {
        epic_num: i64,
        ceremony_type: String,
        #[arg(long)]
        story_num: Option<i64>,
        #[arg(long, value_delimiter = ',')]
        participants: Vec<String>,
    },
    /// Print an epic's current state.
    Status { epic_num: i64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    gaodev_core::guard_against_source_tree(&cli.project_root)?;

    let runner_config = RunnerConfig::default();
    let runner = Arc::new(RigAgentRunner::new(&runner_config)?);
    let gao = GaoDev::open(cli.project_root, runner)?;
    let token = CancellationToken::new();

    match cli.command {
        Command::Run {
            feature_name,
            scale_level,
            project_type,
            tags,
            request_planning,
            total_stories,
        } => {
            let outcome = gao
                .run(
                    WorkRequest {
                        feature_name,
                        scale_level,
                        project_type,
                        tags: tags.into_iter().collect::<BTreeSet<_>>(),
                        request_planning,
                        total_stories,
                    },
                    token,
                )
                .await?;
            println!("{outcome:?}");
        }
        Command::HoldCeremony {
            epic_num,
            ceremony_type,
            story_num,
            participants,
        } => {
            let ceremony_type = CeremonyType::parse(&ceremony_type)
                .ok_or_else(|| anyhow::anyhow!("unknown ceremony type: {ceremony_type}"))?;
            let result = gao
                .hold_ceremony(
                    ceremony_type,
                    epic_num,
                    story_num,
                    participants.into_iter().collect::<BTreeSet<_>>(),
                    token,
                )
                .await?;
            println!("{result:?}");
        }
        Command::Status { epic_num } => match gao.status(epic_num)? {
            Some(epic) => println!("{epic:?}"),
            None => println!("no such epic: {epic_num}"),
        },
    }

    Ok(())
}
