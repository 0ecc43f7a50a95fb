// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;

use crate::app::errors::AdaptorResult;
use crate::app::ports::transport::Transport;
use crate::app::types::ExecCapture;

mod session;

pub use session::{SessionManager, SshAuth, SshParams};

/// Transport backed by one SSH connection; job workspaces are created
/// under `basedir` on the remote host.
pub struct SshTransport {
    session: SessionManager,
    basedir: String,
}

impl SshTransport {
    pub fn new(params: SshParams, basedir: impl Into<String>) -> Self {
        Self {
            session: SessionManager::new(params),
            basedir: basedir.into(),
        }
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn connect(&mut self) -> AdaptorResult<()> {
        self.session.ensure_connected().await
    }

    async fn disconnect(&mut self) {
        self.session.shutdown().await;
    }

    fn connected(&self) -> bool {
        self.session.is_connected()
    }

    async fn exec_capture(&self, cmd: &str) -> AdaptorResult<ExecCapture> {
        self.session.exec_capture(cmd).await
    }

    async fn make_dir(&self, remote_path: &str) -> AdaptorResult<()> {
        self.session.ensure_remote_dir(remote_path).await
    }

    async fn upload_file(&self, local: &Path, remote_path: &str) -> AdaptorResult<()> {
        self.session.upload_file(local, remote_path).await
    }

    async fn download_file(&self, remote_path: &str, local: &Path) -> AdaptorResult<()> {
        self.session.download_file(remote_path, local).await
    }

    async fn list_dir(&self, remote_path: &str) -> AdaptorResult<Vec<String>> {
        self.session.list_dir(remote_path).await
    }

    fn workspace_root(&self) -> &str {
        &self.basedir
    }
}
