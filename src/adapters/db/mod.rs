// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::{AdaptorError, AdaptorErrorKind, AdaptorResult, codes};
use crate::app::job::Job;
use crate::app::ports::job_store::JobStorePort;

mod store;

pub use store::{JobStore, JobStoreError};

fn map_store_error(err: JobStoreError) -> AdaptorError {
    AdaptorError::with_message(AdaptorErrorKind::Internal, codes::STORE_FAILURE, err.to_string())
}

/// sqlite-backed implementation of the job store port.
pub struct SqliteJobStore {
    store: JobStore,
}

impl SqliteJobStore {
    pub fn new(store: JobStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl JobStorePort for SqliteJobStore {
    async fn list_pending_jobs(&self) -> AdaptorResult<Vec<Job>> {
        self.store.list_pending_jobs().await.map_err(map_store_error)
    }

    async fn save(&self, job: &Job) -> AdaptorResult<()> {
        self.store.save(job).await.map_err(map_store_error)
    }

    async fn get_by_slug(&self, slug: &str) -> AdaptorResult<Option<Job>> {
        self.store.get_by_slug(slug).await.map_err(map_store_error)
    }

    async fn delete(&self, slug: &str) -> AdaptorResult<bool> {
        self.store.delete(slug).await.map_err(map_store_error)
    }
}
