//! Command-line interface definitions.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "codebox", version, about = "Sandboxed project execution")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read a project (JSON) from stdin, run it, print the responses as JSON
    Run(crate::commands::run::RunArgs),
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Run(args) => crate::commands::run::execute(args).await,
        }
    }
}
