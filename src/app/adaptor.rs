// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AdaptorResult;
use crate::app::job::Job;
use crate::app::status::JobStatus;
use crate::app::types::{AdaptorConfig, FetchedResults, RunDetails};

/// Everything a backend must be able to do with a job. One instance is
/// owned by one daemon task for the duration of one operation; instances
/// are never shared.
///
/// All job operations require a successful `connect` first and validate the
/// job's status precondition before touching the backend.
#[async_trait]
pub trait Adaptor: Send {
    /// Backend identifier this instance was built from (e.g. `ssh.cluster`).
    fn name(&self) -> &str;

    /// Establishes the backend connection. Idempotent.
    async fn connect(&mut self) -> AdaptorResult<()>;

    /// Releases the connection. Idempotent, never fails.
    async fn disconnect(&mut self);

    fn connected(&self) -> bool;

    /// Stages the job workspace on the backend. Created -> Prepared.
    async fn prepare(&mut self, job: &Job) -> AdaptorResult<()>;

    /// Launches the job, returning the backend-assigned identifier.
    /// Prepared -> Queued.
    async fn run(&mut self, job: &Job) -> AdaptorResult<String>;

    /// Asks the backend to stop the job.
    async fn cancel(&mut self, job: &Job) -> AdaptorResult<()>;

    /// Maps the backend's native state to a JobStatus. States outside the
    /// backend's table come back as Undefined, never as a panic.
    async fn poll_status(&mut self, job: &Job) -> AdaptorResult<JobStatus>;

    /// Downloads output artifacts into the job working dir and reads the
    /// recorded exit code.
    async fn fetch_results(&mut self, job: &Job) -> AdaptorResult<FetchedResults>;

    /// Backend execution report; best-effort, callers fall back to
    /// `Job::default_run_details` on failure.
    async fn fetch_run_details(&mut self, job: &Job) -> AdaptorResult<RunDetails>;

    /// Round-trippable configuration, secrets still encrypted.
    fn serialize(&self) -> AdaptorConfig;
}

/// Builds adaptors from serialized configuration; the registry implements
/// this, tests substitute their own.
pub trait AdaptorFactory: Send + Sync {
    fn load(&self, config: &AdaptorConfig) -> AdaptorResult<Box<dyn Adaptor>>;
}
