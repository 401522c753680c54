use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tracing::warn;

use fleetjobs::cli::{Cli, Command};
use fleetjobs::config::JobsConfig;
use fleetjobs::editor::JobEditor;
use fleetjobs::logging::init_logging;
use fleetjobs::orchestrator::JobOrchestrator;
use fleetjobs::submission::JobSubmission;
use fleetjobs::ui::JobProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.effective_log_level())?;

    let config = JobsConfig::load(&cli.config)
        .with_context(|| format!("cannot load {}", cli.config.display()))?;

    match cli.command {
        Command::Run { file, auto_confirm } => {
            let submission = read_submission(&file)?;
            let mut orchestrator = JobOrchestrator::from_config(&config)?;
            orchestrator.start_sweeper(&config);
            let job = run(&orchestrator, &submission, auto_confirm).await?;
            if cli.verbose {
                JobProgress::report_only().print_report(&job);
            }
            orchestrator.shutdown().await;
        }
        Command::Validate { file } => {
            let submission = read_submission(&file)?;
            let job = JobEditor::new().create_job(&submission, None)?;
            println!(
                "✓ {}: {} tasks, {} transitions, start task {}",
                job.job_name,
                job.task_count(),
                job.transitions().len(),
                job.start_task().map(|t| t.as_str()).unwrap_or("-"),
            );
        }
        Command::Sweep { file, timeout_secs } => {
            let submission = read_submission(&file)?;
            let orchestrator = JobOrchestrator::from_config(&config)?;
            run(&orchestrator, &submission, false).await?;

            let timeout = Duration::from_secs(timeout_secs.unwrap_or(config.task_timeout_secs));
            let cutoff = Utc::now()
                - chrono::Duration::from_std(timeout).context("timeout out of range")?;
            let expired = orchestrator.expire_overdue_tasks(cutoff)?;
            JobProgress::report_only().print_expired(&expired);
            orchestrator.shutdown().await;
        }
    }

    Ok(())
}

fn read_submission(file: &Path) -> Result<JobSubmission> {
    JobSubmission::from_path(file).with_context(|| format!("cannot read {}", file.display()))
}

/// Submits and runs one job, printing task progress as it happens.
async fn run(
    orchestrator: &JobOrchestrator,
    submission: &JobSubmission,
    auto_confirm: bool,
) -> Result<fleetjobs::model::Job> {
    let job_id = orchestrator.submit_job(submission, None)?;
    let progress = JobProgress::start(submission.job_name.as_str());

    let mut events = orchestrator.subscribe();
    let printer = progress.clone();
    let (stop, mut stopped) = oneshot::channel::<()>();
    let watcher = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                received = events.recv() => match received {
                    Ok(event) => printer.task_changed(&event),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "progress display fell behind"),
                    Err(RecvError::Closed) => break,
                },
                _ = &mut stopped => {
                    while let Ok(event) = events.try_recv() {
                        printer.task_changed(&event);
                    }
                    break;
                }
            }
        }
    });

    let result = orchestrator.run_job(&job_id, auto_confirm).await;
    let _ = stop.send(());
    let _ = watcher.await;
    let job = result?;
    progress.complete(&job);
    Ok(job)
}
