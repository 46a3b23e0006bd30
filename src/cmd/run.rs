//! Single local job: `topomap run <kind> <request.json>`.
//!
//! Every state the tracker delivers is printed to stdout as one JSON line.
//! Logs go to stderr.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use topomap::config::AppConfig;
use topomap::errors::{JobError, TrackerError};
use topomap::job::{JobKind, Origin, validate_request};
use topomap::limiter::ConcurrencyLimiter;
use topomap::progress::{ProgressTracker, RunState};
use topomap::server::ArtifactStore;

pub async fn cmd_run(config: &AppConfig, kind: JobKind, request: &Path) -> Result<()> {
    let body = std::fs::read(request)
        .with_context(|| format!("Failed to read request file {}", request.display()))?;
    let job = validate_request(kind, &body, config.storage(), Origin::Local)?;
    let run_id = job.run_id().to_string();

    let artifacts = ArtifactStore::new(&config.storage().temp_folder);
    artifacts.ensure_dirs().await?;

    let tracker = ProgressTracker::new(kind.as_str(), config.tracker_config());
    let limiter = ConcurrencyLimiter::new(Arc::new(config.toml.worker.runner()), 1);
    let handle = tracker.add_run(&run_id);
    info!(run_id = %run_id, kind = %kind, "Starting local run");

    let job_task = tokio::spawn(async move {
        let result = limiter.schedule(&job, &handle).await;
        if let Err(e) = &result
            && handle.snapshot().is_some_and(|s| s.error.is_none())
        {
            handle.set_error(e.user_message());
        }
        let final_state = handle.snapshot();
        handle.finish();
        (result, final_state)
    });

    let mut last_seen: Option<RunState> = None;
    loop {
        // Updates between two waits don't wake anyone, so ask for a snapshot.
        let since = match tracker.get_run(&run_id) {
            Some(current) if last_seen.as_ref() != Some(&current) => None,
            _ => last_seen.as_ref(),
        };
        match tracker.wait(&run_id, since).await {
            Ok(state) => {
                print_state(&state)?;
                last_seen = Some(state);
            }
            Err(TrackerError::WaitTimeout) => continue,
            Err(TrackerError::MissingRun) | Err(TrackerError::AlreadyWaiting) => break,
        }
        if !tracker.has_run(&run_id) {
            break;
        }
    }

    let (result, final_state) = job_task.await.context("Job task panicked")?;
    if let Some(state) = final_state
        && last_seen.as_ref() != Some(&state)
    {
        print_state(&state)?;
    }

    match result {
        Ok(()) => {
            let artifact = artifacts.path_for(kind, &run_id);
            info!(run_id = %run_id, artifact = %artifact.display(), "Run finished");
            println!(
                "{}",
                serde_json::json!({ "run_id": run_id, "artifact": artifact })
            );
            Ok(())
        }
        Err(e) => {
            error!(run_id = %run_id, error = %e, "Run failed");
            let message = match &e {
                JobError::JobFailed { message, .. } => message.clone(),
                other => other.to_string(),
            };
            anyhow::bail!("Run {} failed: {}", run_id, message)
        }
    }
}

fn print_state(state: &RunState) -> Result<()> {
    println!("{}", serde_json::to_string(state)?);
    Ok(())
}
