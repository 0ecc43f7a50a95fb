// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::app::adaptor::{Adaptor, AdaptorFactory};
use crate::app::errors::{AdaptorError, AdaptorErrorKind, AdaptorResult};
use crate::app::job::Job;
use crate::app::ports::clock::ClockPort;
use crate::app::ports::job_store::JobStorePort;
use crate::app::status::JobStatus;
use crate::app::types::RunDetails;

pub const RUN_DETAILS_FILE: &str = "job_run_details.json";

#[derive(Debug, Clone, Copy)]
pub struct DaemonSettings {
    pub poll_interval: Duration,
    pub max_retries: u32,
    pub concurrency: usize,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_retries: 5,
            concurrency: 4,
        }
    }
}

/// Polling daemon: each tick selects every job still owned by the queue and
/// advances it by exactly one operation. Jobs are processed in bounded
/// parallel, each by a task owning its own adaptor instance.
pub struct QueueDaemon {
    store: Arc<dyn JobStorePort>,
    factory: Arc<dyn AdaptorFactory>,
    clock: Arc<dyn ClockPort>,
    settings: DaemonSettings,
    limiter: Arc<Semaphore>,
    // Slugs currently being processed; a job is never double-dispatched.
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl QueueDaemon {
    pub fn new(
        store: Arc<dyn JobStorePort>,
        factory: Arc<dyn AdaptorFactory>,
        clock: Arc<dyn ClockPort>,
        settings: DaemonSettings,
    ) -> Self {
        Self {
            store,
            factory,
            clock,
            limiter: Arc::new(Semaphore::new(settings.concurrency.max(1))),
            settings,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Runs until the shutdown channel flips to true. In-flight operations
    /// finish; no new dispatches start after that.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            max_retries = self.settings.max_retries,
            concurrency = self.settings.concurrency,
            "queue daemon started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(0) => {}
                        Ok(count) => tracing::debug!(jobs = count, "tick finished"),
                        Err(err) => tracing::warn!("tick failed: {err}"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("queue daemon stopped");
    }

    /// One scheduling pass. Returns how many jobs were dispatched; all
    /// spawned tasks are awaited before the pass ends.
    pub async fn tick(&self) -> AdaptorResult<usize> {
        let jobs = self.store.list_pending_jobs().await?;
        let mut tasks = JoinSet::new();
        let mut dispatched = 0usize;
        for job in jobs {
            if !self.claim(job.slug()) {
                continue;
            }
            let Ok(permit) = Arc::clone(&self.limiter).acquire_owned().await else {
                self.release(job.slug());
                break;
            };
            dispatched += 1;
            let store = Arc::clone(&self.store);
            let factory = Arc::clone(&self.factory);
            let clock = Arc::clone(&self.clock);
            let in_flight = Arc::clone(&self.in_flight);
            let settings = self.settings;
            tasks.spawn(async move {
                let _permit = permit;
                let slug = job.slug().to_string();
                process_job(store.as_ref(), factory.as_ref(), clock.as_ref(), &settings, job).await;
                in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&slug);
            });
        }
        while tasks.join_next().await.is_some() {}
        Ok(dispatched)
    }

    fn claim(&self, slug: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(slug.to_string())
    }

    fn release(&self, slug: &str) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(slug);
    }
}

/// Advances one job by one operation and persists the outcome. No error
/// escapes: every failure becomes a status change or a logged note.
async fn process_job(
    store: &dyn JobStorePort,
    factory: &dyn AdaptorFactory,
    clock: &dyn ClockPort,
    settings: &DaemonSettings,
    mut job: Job,
) {
    let mut adaptor = match factory.load(&job.adaptor_config) {
        Ok(adaptor) => adaptor,
        Err(err) => {
            // A configuration gap will not heal by retrying.
            tracing::error!(slug = job.slug(), "cannot build adaptor: {err}");
            job.force_error(
                format!("backend configuration unusable: {err}"),
                &clock.now_rfc3339(),
            );
            persist(store, &job).await;
            return;
        }
    };

    let outcome = dispatch(adaptor.as_mut(), &mut job, clock).await;
    adaptor.disconnect().await;

    let now = clock.now_rfc3339();
    match outcome {
        Ok(()) => job.reset_retries(),
        Err(err) => match err.kind() {
            AdaptorErrorKind::Connect => {
                tracing::warn!(slug = job.slug(), "recoverable failure: {err}");
                job.register_retry(&err.to_string(), settings.max_retries, &now);
            }
            AdaptorErrorKind::InconsistentState => {
                tracing::error!(slug = job.slug(), "operation out of order: {err}");
                job.add_admin_note(format!("operation skipped: {err}"), &now);
            }
            _ => {
                tracing::error!(slug = job.slug(), "unrecoverable failure: {err}");
                job.force_error(err.to_string(), &now);
            }
        },
    }
    persist(store, &job).await;
}

/// Exactly one operation per pass, chosen by status. Cancellation intent
/// takes priority over the normal dispatch.
async fn dispatch(
    adaptor: &mut dyn Adaptor,
    job: &mut Job,
    clock: &dyn ClockPort,
) -> AdaptorResult<()> {
    adaptor.connect().await?;
    let now = clock.now_rfc3339();

    if job.cancel_requested {
        if job.remote_job_id().is_some() {
            if let Err(err) = adaptor.cancel(job).await {
                // Recorded, never blocking: the local state still moves on.
                tracing::warn!(slug = job.slug(), "backend cancellation failed: {err}");
                job.add_admin_note(format!("backend cancellation failed: {err}"), &now);
            }
        }
        job.cancel_requested = false;
        return job.set_status(JobStatus::Cancelled, "Job cancelled on request", &now);
    }

    match job.status() {
        JobStatus::Created => {
            adaptor.prepare(job).await?;
            job.set_status(JobStatus::Prepared, "Job workspace prepared", &now)
        }
        JobStatus::Prepared => {
            let remote_id = adaptor.run(job).await?;
            job.assign_remote_id(remote_id);
            job.set_status(JobStatus::Queued, "Job submitted to backend", &now)
        }
        JobStatus::Completed => {
            let results = adaptor.fetch_results(job).await?;
            job.apply_results(results, &now)?;
            let details = match adaptor.fetch_run_details(job).await {
                Ok(details) => details,
                Err(err) => {
                    tracing::debug!(slug = job.slug(), "run details unavailable: {err}");
                    job.default_run_details()
                }
            };
            cache_run_details(job, &details);
            Ok(())
        }
        _ => {
            let reported = adaptor.poll_status(job).await?;
            if reported == JobStatus::Undefined {
                // Treated as a transient backend outage; feeds the retry
                // counter rather than failing the job outright.
                return Err(AdaptorError::connect(format!(
                    "backend reported an unmapped state for job {}",
                    job.slug()
                )));
            }
            if reported != job.status() {
                job.set_status(reported, format!("Backend reports job {reported}"), &now)?;
            }
            Ok(())
        }
    }
}

async fn persist(store: &dyn JobStorePort, job: &Job) {
    if let Err(err) = store.save(job).await {
        tracing::error!(slug = job.slug(), "failed to persist job: {err}");
    }
}

/// Best-effort cache of the execution report next to the job outputs.
fn cache_run_details(job: &Job, details: &RunDetails) {
    let path = job.working_dir.join(RUN_DETAILS_FILE);
    match serde_json::to_vec_pretty(details) {
        Ok(bytes) => {
            if let Err(err) = std::fs::write(&path, bytes) {
                tracing::debug!(slug = job.slug(), "cannot cache run details: {err}");
            }
        }
        Err(err) => tracing::debug!(slug = job.slug(), "cannot encode run details: {err}"),
    }
}
