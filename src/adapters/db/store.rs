// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::app::job::Job;
use crate::app::status::JobStatus;
use crate::app::types::{AdaptorConfig, HistoryRecord};

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("job {0} has an unknown status value {1}")]
    InvalidStatus(String, i64),
}

pub type Result<T> = std::result::Result<T, JobStoreError>;

/// Async sqlite store for jobs and their append-only history.
#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    /// Open (or create) a file-backed SQLite DB.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let url = format!("sqlite://{}", path.as_ref().to_string_lossy());
        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    /// Open an in-memory store (handy for tests).
    pub async fn open_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    async fn bootstrap(&self) -> Result<()> {
        // Improve concurrency for file DBs.
        let _ = sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
              slug TEXT PRIMARY KEY,
              title TEXT NOT NULL,
              status INTEGER NOT NULL,
              working_dir TEXT NOT NULL,
              adaptor_config TEXT NOT NULL,
              command_line TEXT NOT NULL DEFAULT '',
              remote_job_id TEXT,
              exit_code INTEGER,
              results_available INTEGER NOT NULL DEFAULT 0,
              nb_retry INTEGER NOT NULL DEFAULT 0,
              cancel_requested INTEGER NOT NULL DEFAULT 0,
              created_at TEXT NOT NULL,
              updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_history (
              job_slug TEXT NOT NULL REFERENCES jobs(slug) ON DELETE CASCADE,
              seq INTEGER NOT NULL,
              timestamp TEXT NOT NULL,
              status INTEGER NOT NULL,
              message TEXT NOT NULL,
              is_admin INTEGER NOT NULL DEFAULT 0,
              PRIMARY KEY (job_slug, seq)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Upserts the job row and appends history rows not yet stored. History
    /// rows are keyed by (slug, seq), so re-saving is idempotent.
    pub async fn save(&self, job: &Job) -> Result<()> {
        let adaptor_config = serde_json::to_string(&job.adaptor_config)?;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO jobs (
              slug, title, status, working_dir, adaptor_config, command_line,
              remote_job_id, exit_code, results_available, nb_retry,
              cancel_requested, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(slug) DO UPDATE SET
              title = excluded.title,
              status = excluded.status,
              working_dir = excluded.working_dir,
              adaptor_config = excluded.adaptor_config,
              command_line = excluded.command_line,
              remote_job_id = excluded.remote_job_id,
              exit_code = excluded.exit_code,
              results_available = excluded.results_available,
              nb_retry = excluded.nb_retry,
              cancel_requested = excluded.cancel_requested,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(job.slug())
        .bind(&job.title)
        .bind(job.status().as_i32())
        .bind(job.working_dir.to_string_lossy().into_owned())
        .bind(adaptor_config)
        .bind(&job.command_line)
        .bind(job.remote_job_id())
        .bind(job.exit_code)
        .bind(job.results_available)
        .bind(job.nb_retry as i64)
        .bind(job.cancel_requested)
        .bind(&job.created_at)
        .bind(&job.updated_at)
        .execute(&mut *tx)
        .await?;

        for record in job.history() {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO job_history
                  (job_slug, seq, timestamp, status, message, is_admin)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(job.slug())
            .bind(record.seq as i64)
            .bind(&record.timestamp)
            .bind(record.status.as_i32())
            .bind(&record.message)
            .bind(record.is_admin)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Jobs the daemon still owns, oldest first.
    pub async fn list_pending_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT slug FROM jobs WHERE status < ?1 ORDER BY created_at, slug")
            .bind(JobStatus::Terminated.as_i32())
            .fetch_all(&self.pool)
            .await?;
        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let slug: String = row.get("slug");
            if let Some(job) = self.get_by_slug(&slug).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Option<Job>> {
        let Some(row) = sqlx::query(
            r#"
            SELECT slug, title, status, working_dir, adaptor_config, command_line,
                   remote_job_id, exit_code, results_available, nb_retry,
                   cancel_requested, created_at, updated_at
            FROM jobs WHERE slug = ?1
            "#,
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let status_raw: i64 = row.get("status");
        let status = JobStatus::from_i32(status_raw as i32)
            .ok_or_else(|| JobStoreError::InvalidStatus(slug.to_string(), status_raw))?;
        let adaptor_config: AdaptorConfig =
            serde_json::from_str(&row.get::<String, _>("adaptor_config"))?;

        let history_rows = sqlx::query(
            "SELECT seq, timestamp, status, message, is_admin \
             FROM job_history WHERE job_slug = ?1 ORDER BY seq",
        )
        .bind(slug)
        .fetch_all(&self.pool)
        .await?;
        let mut history = Vec::with_capacity(history_rows.len());
        for hrow in history_rows {
            let hstatus_raw: i64 = hrow.get("status");
            let hstatus = JobStatus::from_i32(hstatus_raw as i32)
                .ok_or_else(|| JobStoreError::InvalidStatus(slug.to_string(), hstatus_raw))?;
            history.push(HistoryRecord {
                seq: hrow.get::<i64, _>("seq") as u32,
                timestamp: hrow.get("timestamp"),
                status: hstatus,
                message: hrow.get("message"),
                is_admin: hrow.get("is_admin"),
            });
        }

        Ok(Some(Job::restore(
            row.get("slug"),
            row.get("title"),
            status,
            PathBuf::from(row.get::<String, _>("working_dir")),
            adaptor_config,
            row.get("command_line"),
            row.get("remote_job_id"),
            row.get("exit_code"),
            row.get("results_available"),
            row.get::<i64, _>("nb_retry") as u32,
            row.get("cancel_requested"),
            history,
            row.get("created_at"),
            row.get("updated_at"),
        )))
    }

    /// Removes the job row (history rows cascade) and the job's working
    /// directory on disk.
    pub async fn delete(&self, slug: &str) -> Result<bool> {
        let job = self.get_by_slug(slug).await?;
        let result = sqlx::query("DELETE FROM jobs WHERE slug = ?1")
            .bind(slug)
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            if let Some(job) = job {
                if let Err(err) = job.delete_working_dir() {
                    tracing::warn!(slug, "failed to remove working directory: {err}");
                }
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const NOW: &str = "2026-02-11T10:00:00Z";

    fn sample_job(dir: &TempDir, slug: &str) -> Job {
        Job::create(
            slug,
            "stored job",
            "hello",
            AdaptorConfig::new("local.shell").with_param("command", "echo"),
            dir.path(),
            NOW,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn save_and_reload_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open_memory().await.unwrap();
        let mut job = sample_job(&dir, "db-job-1");
        job.set_status(JobStatus::Prepared, "Job prepared", NOW).unwrap();
        job.assign_remote_id("555");
        job.set_status(JobStatus::Queued, "Job queued", NOW).unwrap();
        store.save(&job).await.unwrap();

        let loaded = store.get_by_slug("db-job-1").await.unwrap().unwrap();
        assert_eq!(loaded.slug(), "db-job-1");
        assert_eq!(loaded.status(), JobStatus::Queued);
        assert_eq!(loaded.remote_job_id(), Some("555"));
        assert_eq!(loaded.adaptor_config, job.adaptor_config);
        assert_eq!(loaded.history().len(), 3);
        assert_eq!(loaded.history()[1].message, "Job prepared");
    }

    #[tokio::test]
    async fn resaving_does_not_duplicate_history() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open_memory().await.unwrap();
        let mut job = sample_job(&dir, "db-job-2");
        store.save(&job).await.unwrap();
        job.set_status(JobStatus::Prepared, "p", NOW).unwrap();
        store.save(&job).await.unwrap();
        store.save(&job).await.unwrap();

        let loaded = store.get_by_slug("db-job-2").await.unwrap().unwrap();
        assert_eq!(loaded.history().len(), 2);
    }

    #[tokio::test]
    async fn list_pending_excludes_final_states() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open_memory().await.unwrap();

        let pending = sample_job(&dir, "pending-job");
        store.save(&pending).await.unwrap();

        let mut done = sample_job(&dir, "done-job");
        done.set_status(JobStatus::Prepared, "p", NOW).unwrap();
        done.set_status(JobStatus::Queued, "q", NOW).unwrap();
        done.set_status(JobStatus::Completed, "c", NOW).unwrap();
        done.set_status(JobStatus::Terminated, "t", NOW).unwrap();
        store.save(&done).await.unwrap();

        let listed = store.list_pending_jobs().await.unwrap();
        let slugs: Vec<&str> = listed.iter().map(|j| j.slug()).collect();
        assert_eq!(slugs, vec!["pending-job"]);
    }

    #[tokio::test]
    async fn completed_jobs_are_still_pending() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open_memory().await.unwrap();
        let mut job = sample_job(&dir, "completed-job");
        job.set_status(JobStatus::Prepared, "p", NOW).unwrap();
        job.set_status(JobStatus::Queued, "q", NOW).unwrap();
        job.set_status(JobStatus::Completed, "c", NOW).unwrap();
        store.save(&job).await.unwrap();

        let listed = store.list_pending_jobs().await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_the_working_directory() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open_memory().await.unwrap();
        let job = sample_job(&dir, "db-job-4");
        assert!(job.working_dir.is_dir());
        store.save(&job).await.unwrap();

        assert!(store.delete("db-job-4").await.unwrap());
        assert!(!job.working_dir.exists());
    }

    #[tokio::test]
    async fn delete_removes_job_and_history() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open_memory().await.unwrap();
        let job = sample_job(&dir, "db-job-3");
        store.save(&job).await.unwrap();

        assert!(store.delete("db-job-3").await.unwrap());
        assert!(store.get_by_slug("db-job-3").await.unwrap().is_none());
        assert!(!store.delete("db-job-3").await.unwrap());
    }

    #[tokio::test]
    async fn open_creates_the_database_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("swelld.sqlite");
        let store = JobStore::open(&path).await.unwrap();
        let job = sample_job(&dir, "file-job");
        store.save(&job).await.unwrap();
        assert!(path.exists());
    }
}
