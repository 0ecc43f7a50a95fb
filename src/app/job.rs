// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fs;
use std::path::{Path, PathBuf};

use crate::app::errors::{AdaptorError, AdaptorResult};
use crate::app::status::{JobStatus, transition_allowed};
use crate::app::types::{AdaptorConfig, FetchedResults, HistoryRecord, RunDetails};

/// A submitted job. Status only moves through `set_status`, which enforces
/// the transition table and appends exactly one history record per change.
#[derive(Debug, Clone)]
pub struct Job {
    slug: String,
    pub title: String,
    status: JobStatus,
    pub working_dir: PathBuf,
    pub adaptor_config: AdaptorConfig,
    pub command_line: String,
    remote_job_id: Option<String>,
    pub exit_code: Option<i32>,
    pub results_available: bool,
    pub nb_retry: u32,
    pub cancel_requested: bool,
    history: Vec<HistoryRecord>,
    pub created_at: String,
    pub updated_at: String,
}

impl Job {
    /// Creates a job in Created state with its working directory on disk.
    pub fn create(
        slug: impl Into<String>,
        title: impl Into<String>,
        command_line: impl Into<String>,
        adaptor_config: AdaptorConfig,
        data_root: &Path,
        now: &str,
    ) -> AdaptorResult<Self> {
        let slug = slug.into();
        if slug.is_empty() {
            return Err(AdaptorError::not_ready("job slug must not be empty"));
        }
        let working_dir = data_root.join(&slug);
        fs::create_dir_all(&working_dir).map_err(|err| {
            AdaptorError::internal(format!(
                "failed to create working directory {}: {err}",
                working_dir.display()
            ))
        })?;
        let mut job = Self {
            slug,
            title: title.into(),
            status: JobStatus::Created,
            working_dir,
            adaptor_config,
            command_line: command_line.into(),
            remote_job_id: None,
            exit_code: None,
            results_available: false,
            nb_retry: 0,
            cancel_requested: false,
            history: Vec::new(),
            created_at: now.to_string(),
            updated_at: now.to_string(),
        };
        job.append_history(JobStatus::Created, "Job created", false, now);
        Ok(job)
    }

    /// Rebuilds a job from storage without revalidating transitions.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        slug: String,
        title: String,
        status: JobStatus,
        working_dir: PathBuf,
        adaptor_config: AdaptorConfig,
        command_line: String,
        remote_job_id: Option<String>,
        exit_code: Option<i32>,
        results_available: bool,
        nb_retry: u32,
        cancel_requested: bool,
        history: Vec<HistoryRecord>,
        created_at: String,
        updated_at: String,
    ) -> Self {
        Self {
            slug,
            title,
            status,
            working_dir,
            adaptor_config,
            command_line,
            remote_job_id,
            exit_code,
            results_available,
            nb_retry,
            cancel_requested,
            history,
            created_at,
            updated_at,
        }
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn remote_job_id(&self) -> Option<&str> {
        self.remote_job_id.as_deref()
    }

    pub fn history(&self) -> &[HistoryRecord] {
        &self.history
    }

    /// Applies a status change, rejecting illegal edges without touching
    /// the current status. Same-state assignments are silent no-ops.
    pub fn set_status(
        &mut self,
        status: JobStatus,
        message: impl Into<String>,
        now: &str,
    ) -> AdaptorResult<()> {
        if status == self.status {
            return Ok(());
        }
        if !transition_allowed(self.status, status) {
            return Err(AdaptorError::inconsistent_state(format!(
                "job {} cannot move from {} to {}",
                self.slug, self.status, status
            )));
        }
        self.status = status;
        self.append_history(status, message, false, now);
        Ok(())
    }

    pub fn ensure_exact(&self, expected: JobStatus) -> AdaptorResult<()> {
        if self.status != expected {
            return Err(AdaptorError::inconsistent_state(format!(
                "job {} is {}, expected {}",
                self.slug, self.status, expected
            )));
        }
        Ok(())
    }

    /// Records the backend-assigned identifier. Set exactly once, by `run`.
    pub fn assign_remote_id(&mut self, id: impl Into<String>) {
        self.remote_job_id = Some(id.into());
    }

    /// Marks operator intent to cancel; the daemon consumes the flag on its
    /// next pass. Rejected loudly once the backend has finished.
    pub fn request_cancel(&mut self) -> AdaptorResult<()> {
        if !self.status.allows_cancel() {
            return Err(AdaptorError::inconsistent_state(format!(
                "job {} is {} and can no longer be cancelled",
                self.slug, self.status
            )));
        }
        self.cancel_requested = true;
        Ok(())
    }

    /// Counts a recoverable failure. Below the bound this appends an
    /// operational note; at the bound the job is forced into Error.
    pub fn register_retry(&mut self, reason: &str, max_retries: u32, now: &str) {
        self.nb_retry += 1;
        if self.nb_retry >= max_retries {
            self.force_error(
                format!("giving up after {} recoverable failures: {reason}", self.nb_retry),
                now,
            );
        } else {
            self.append_history(
                self.status,
                format!("[retry {}/{max_retries}] {reason}", self.nb_retry),
                true,
                now,
            );
        }
    }

    pub fn reset_retries(&mut self) {
        self.nb_retry = 0;
    }

    /// Unconditionally moves the job into Error. Used by the daemon when a
    /// failure cannot heal by retrying; final states stay untouched.
    pub fn force_error(&mut self, message: impl Into<String>, now: &str) {
        if self.status.is_final() {
            return;
        }
        self.status = JobStatus::Error;
        self.append_history(JobStatus::Error, message, false, now);
    }

    /// Appends an operational note without changing status.
    pub fn add_admin_note(&mut self, message: impl Into<String>, now: &str) {
        self.append_history(self.status, message, true, now);
    }

    /// Classifies fetched results: exit 0 with empty stderr is a clean
    /// finish, exit 0 with stderr output a warning, anything else an error.
    pub fn apply_results(&mut self, results: FetchedResults, now: &str) -> AdaptorResult<()> {
        self.ensure_exact(JobStatus::Completed)?;
        self.exit_code = Some(results.exit_code);
        self.results_available = true;
        let (status, message) = if results.exit_code != 0 {
            (
                JobStatus::Error,
                format!("Job ended with exit code {}", results.exit_code),
            )
        } else if results.stderr_empty {
            (JobStatus::Terminated, "Job finished".to_string())
        } else {
            (
                JobStatus::Warning,
                "Job finished with messages on standard error".to_string(),
            )
        };
        self.set_status(status, message, now)
    }

    /// Run details derived from history alone, used when the backend has
    /// nothing better to report.
    pub fn default_run_details(&self) -> RunDetails {
        let first_at = |status: JobStatus| {
            self.history
                .iter()
                .find(|rec| !rec.is_admin && rec.status == status)
                .map(|rec| rec.timestamp.clone())
        };
        RunDetails {
            slug: self.slug.clone(),
            title: self.title.clone(),
            remote_job_id: self.remote_job_id.clone(),
            exit_code: self.exit_code,
            created: first_at(JobStatus::Created).or_else(|| Some(self.created_at.clone())),
            started: first_at(JobStatus::Running).or_else(|| first_at(JobStatus::Queued)),
            finished: self
                .history
                .iter()
                .find(|rec| !rec.is_admin && rec.status >= JobStatus::Completed)
                .map(|rec| rec.timestamp.clone()),
            extra: None,
        }
    }

    /// Removes the working directory. Called when the job itself is deleted.
    pub fn delete_working_dir(&self) -> std::io::Result<()> {
        if self.working_dir.exists() {
            fs::remove_dir_all(&self.working_dir)?;
        }
        Ok(())
    }

    fn append_history(
        &mut self,
        status: JobStatus,
        message: impl Into<String>,
        is_admin: bool,
        now: &str,
    ) {
        let seq = self.history.len() as u32;
        self.history.push(HistoryRecord {
            seq,
            timestamp: now.to_string(),
            status,
            message: message.into(),
            is_admin,
        });
        self.updated_at = now.to_string();
    }
}
