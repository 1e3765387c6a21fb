//! clashbuilder CLI: Clash configuration builder.
//!
//! Fetches a node subscription, splits it into region buckets and assembles
//! the final config from templates and rule fragments.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
