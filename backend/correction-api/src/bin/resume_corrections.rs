use std::io::{self, BufRead, Write};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::fmt::init;

use prologin_correction::{config::Config, services::AppState};

/// Queues again every attempt that was sent for correction but never got a
/// score, e.g. after the workers or the correctors went down.
#[derive(Debug, Parser)]
#[command(name = "resume_corrections", version)]
struct Args {
    /// Give every attempt a fresh correction task id before queueing it
    #[arg(long)]
    renew: bool,

    /// Do not ask for confirmation
    #[arg(long)]
    yes: bool,
}

fn confirm(count: usize) -> io::Result<bool> {
    print!("Resume {} pending correction(s)? [y/N] ", count);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();

    let config = Config::load().context("Failed to load configuration")?;
    let app_state = AppState::connect(config)
        .await
        .context("Failed to initialize app state")?;

    let pending = app_state.submissions.pending_attempts().await?;
    if pending.is_empty() {
        println!("No pending correction.");
        return Ok(());
    }

    for attempt in &pending {
        println!(
            "{}  {}  {:<10}  task {}",
            attempt.date_submitted.format("%Y-%m-%d %H:%M:%S"),
            attempt.id,
            attempt.language.as_str(),
            attempt.correction_task_id.as_deref().unwrap_or("-"),
        );
    }

    if !args.yes && !confirm(pending.len())? {
        println!("Aborted.");
        return Ok(());
    }

    let jobs = app_state.submissions.resume(args.renew).await?;
    println!("Queued {} correction(s).", jobs.len());

    Ok(())
}
