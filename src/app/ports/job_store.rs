// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AdaptorResult;
use crate::app::job::Job;

#[async_trait]
pub trait JobStorePort: Send + Sync {
    /// Jobs the daemon still owns, oldest first.
    async fn list_pending_jobs(&self) -> AdaptorResult<Vec<Job>>;

    /// Upserts the job row and appends history rows not yet persisted.
    async fn save(&self, job: &Job) -> AdaptorResult<()>;

    async fn get_by_slug(&self, slug: &str) -> AdaptorResult<Option<Job>>;

    /// Removes the job, its history and its working directory. Returns
    /// false when unknown.
    async fn delete(&self, slug: &str) -> AdaptorResult<bool>;
}
