//! `codebox run`: execute one project read from stdin.

use anyhow::Context;
use clap::Args;
use tokio::io::AsyncReadExt;

use codebox::{ExecutionMode, ProjectCore};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run commands directly on the host instead of inside the jail.
    /// Only for trusted input.
    #[arg(long)]
    pub insecure: bool,

    /// Pretty-print the response JSON
    #[arg(long)]
    pub pretty: bool,
}

pub async fn execute(args: RunArgs) -> anyhow::Result<()> {
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("reading project from stdin")?;
    let project: ProjectCore = serde_json::from_str(&input).context("parsing project JSON")?;

    let mode = if args.insecure {
        if codebox::util::inside_container() {
            tracing::warn!("Running without the isolation envelope");
        } else {
            tracing::warn!(
                "Running without the isolation envelope OUTSIDE a container; \
                 submitted commands touch this machine directly"
            );
        }
        ExecutionMode::Unconfined
    } else {
        ExecutionMode::Isolated
    };

    let responses = codebox::run_project_with(mode, &project.sources, &project.commands).await;

    let rendered = if args.pretty {
        serde_json::to_string_pretty(&responses)?
    } else {
        serde_json::to_string(&responses)?
    };
    println!("{rendered}");
    Ok(())
}
