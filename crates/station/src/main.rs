//! AOI Station - Main Entry Point

use clap::Parser;
use station::{init_logging, run, Cli};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json)?;

    info!("=== AOI Station v{} ===", env!("CARGO_PKG_VERSION"));

    let report = run(&cli).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
