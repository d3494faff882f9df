use chrono::Local;
use clap::Parser;
use nexis_harvest::{config::Cli, info_time, logging::init_logging, process::run, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine, the environment and flags still apply.
    let _ = dotenvy::dotenv();
    init_logging();

    let config = Cli::parse().into_config()?;
    let start_time = Local::now();
    let summary = run(&config).await?;
    info_time!(start_time, "Full program time:");

    println!(
        "{} months searched, {} skipped, {} batches ({} articles) downloaded, {} already on disk, stop: {:?}",
        summary.months_searched,
        summary.months_skipped,
        summary.batches,
        summary.articles,
        summary.skipped_existing,
        summary.stop
    );
    Ok(())
}
