// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;

use crate::app::errors::AdaptorResult;
use crate::app::types::ExecCapture;

/// Where a backend executes commands and stages files. The shell and
/// cluster adaptors are written against this seam so the same lifecycle
/// runs locally and over SSH.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establishes (or re-establishes) the underlying connection. Idempotent.
    async fn connect(&mut self) -> AdaptorResult<()>;

    /// Tears the connection down. Idempotent, never fails.
    async fn disconnect(&mut self);

    fn connected(&self) -> bool;

    /// Runs a command through the remote shell, capturing output and exit code.
    async fn exec_capture(&self, cmd: &str) -> AdaptorResult<ExecCapture>;

    /// Creates a directory, parents included.
    async fn make_dir(&self, remote_path: &str) -> AdaptorResult<()>;

    async fn upload_file(&self, local: &Path, remote_path: &str) -> AdaptorResult<()>;

    async fn download_file(&self, remote_path: &str, local: &Path) -> AdaptorResult<()>;

    /// Names of regular files directly under `remote_path`.
    async fn list_dir(&self, remote_path: &str) -> AdaptorResult<Vec<String>>;

    /// Root under which per-job workspaces are created.
    fn workspace_root(&self) -> &str;
}
