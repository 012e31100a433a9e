use clap::Parser;

mod cli;
mod commands;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    codebox::init_logging();
    cli::Cli::parse().run().await
}
