//! lookout-scheduler — runs the dispatch loop over jobs seeded from JSON.
//!
//! When `BACKUP_PATH` holds a snapshot, jobs, clusters and the queue (with
//! its pending markers) are restored from the newest one. Otherwise clusters
//! and jobs are loaded from the seed files and jobs whose stored status is
//! `RUNNING` are scheduled from the current time. The process then
//! dispatches due jobs until Ctrl-C.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use lookout_compute::{HttpDataSource, SigmaDetector};
use lookout_core::config::load_dotenv;
use lookout_core::{Cluster, Config, Job, JobId, JobStatus};
use lookout_notify::{EmailNotifier, LogMailer, ReportMailer};
use lookout_queue::MemoryJobQueue;
use lookout_scheduler::{restore_latest, Collaborators, SchedulerService, SystemClock};
use lookout_storage::MemoryStore;

// ── CLI ─────────────────────────────────────────────────────────────

/// Anomaly-detection job scheduler.
#[derive(Parser, Debug)]
#[command(name = "lookout-scheduler", version, about)]
struct Cli {
    /// JSON array of job records.
    #[arg(long, env = "LOOKOUT_JOBS_FILE", default_value = "config/jobs.json")]
    jobs: PathBuf,

    /// JSON array of clusters.
    #[arg(long, env = "LOOKOUT_CLUSTERS_FILE", default_value = "config/clusters.json")]
    clusters: PathBuf,
}

/// A missing seed file is an empty list.
fn read_seed<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    if !path.exists() {
        warn!(path = %path.display(), "Seed file not found, starting empty");
        return Ok(Vec::new());
    }
    let body = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&body).with_context(|| format!("parsing {}", path.display()))
}

fn build_mailer(config: &Config) -> anyhow::Result<Arc<dyn ReportMailer>> {
    if config.email.is_configured() {
        let notifier = EmailNotifier::from_email_config(&config.email)?;
        Ok(Arc::new(notifier))
    } else {
        info!("Email not configured, reports are logged only");
        Ok(Arc::new(LogMailer))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_summary();

    let restored = match &config.scheduler.backup_path {
        Some(dir) => restore_latest(dir).await?,
        None => None,
    };
    let (store, queue, to_launch) = match restored {
        Some(state) => {
            info!(taken_at = %state.taken_at, "Restored from snapshot; seed files ignored");
            (state.store, state.queue, Vec::new())
        }
        None => {
            let jobs: Vec<Job> = read_seed(&cli.jobs)?;
            let clusters: Vec<Cluster> = read_seed(&cli.clusters)?;
            let to_launch: Vec<JobId> = jobs
                .iter()
                .filter(|j| j.status == JobStatus::Running)
                .map(|j| j.job_id)
                .collect();
            info!(jobs = jobs.len(), clusters = clusters.len(), "Loaded seed data");
            (Arc::new(MemoryStore::seeded(jobs, clusters)), Arc::new(MemoryJobQueue::new()), to_launch)
        }
    };

    let source = HttpDataSource::new(Duration::from_secs(config.source.timeout_secs))?;
    let collab = Collaborators {
        jobs: store.clone(),
        reports: store.clone(),
        clusters: store,
        queue,
        source: Arc::new(source),
        detector: Arc::new(SigmaDetector::new()),
        mailer: build_mailer(&config)?,
    };
    let service = SchedulerService::new(collab, &config, Arc::new(SystemClock))?;

    for job_id in to_launch {
        if let Err(e) = service.launch_job(job_id).await {
            warn!(job_id, error = %e, "Failed to launch seeded job");
        }
    }

    service.start().await?;
    info!("lookout-scheduler running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    service.shutdown().await;

    let m = service.metrics();
    info!(
        ticks = m.ticks_run,
        skipped = m.ticks_skipped,
        executed = m.jobs_executed,
        backfilled = m.jobs_backfilled,
        zombies = m.zombies,
        failures = m.job_failures,
        "Final dispatch metrics"
    );
    Ok(())
}
