// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use walkdir::WalkDir;

use crate::app::errors::{AdaptorError, AdaptorResult};
use crate::app::ports::transport::Transport;
use crate::app::types::ExecCapture;

/// Transport that runs everything on the daemon host through `sh -c`.
/// Job workspaces live directly under `root`, so staging to and from the
/// workspace degenerates to local copies.
pub struct LocalTransport {
    root: String,
    connected: bool,
}

impl LocalTransport {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            connected: false,
        }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn connect(&mut self) -> AdaptorResult<()> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    fn connected(&self) -> bool {
        self.connected
    }

    async fn exec_capture(&self, cmd: &str) -> AdaptorResult<ExecCapture> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .output()
            .await
            .map_err(|err| AdaptorError::exec(format!("failed to spawn shell: {err}")))?;
        Ok(ExecCapture {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn make_dir(&self, remote_path: &str) -> AdaptorResult<()> {
        tokio::fs::create_dir_all(remote_path).await.map_err(|err| {
            AdaptorError::exec(format!("failed to create directory {remote_path}: {err}"))
        })
    }

    async fn upload_file(&self, local: &Path, remote_path: &str) -> AdaptorResult<()> {
        copy_unless_same(local, Path::new(remote_path)).await
    }

    async fn download_file(&self, remote_path: &str, local: &Path) -> AdaptorResult<()> {
        copy_unless_same(Path::new(remote_path), local).await
    }

    async fn list_dir(&self, remote_path: &str) -> AdaptorResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in WalkDir::new(remote_path).min_depth(1).max_depth(1) {
            let entry = entry
                .map_err(|err| AdaptorError::exec(format!("failed to list {remote_path}: {err}")))?;
            if entry.file_type().is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn workspace_root(&self) -> &str {
        &self.root
    }
}

async fn copy_unless_same(src: &Path, dst: &Path) -> AdaptorResult<()> {
    if src == dst {
        return Ok(());
    }
    tokio::fs::copy(src, dst).await.map_err(|err| {
        AdaptorError::exec(format!(
            "failed to copy {} to {}: {err}",
            src.display(),
            dst.display()
        ))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn connect_and_disconnect_are_idempotent() {
        let mut transport = LocalTransport::new("/tmp");
        assert!(!transport.connected());

        transport.connect().await.unwrap();
        transport.connect().await.unwrap();
        assert!(transport.connected());

        transport.disconnect().await;
        transport.disconnect().await;
        assert!(!transport.connected());

        // A fresh connect after disconnect works again.
        transport.connect().await.unwrap();
        assert!(transport.connected());
    }

    #[tokio::test]
    async fn exec_capture_reports_output_and_exit_code() {
        let mut transport = LocalTransport::new("/tmp");
        transport.connect().await.unwrap();
        let capture = transport
            .exec_capture("echo out; echo err >&2; exit 3")
            .await
            .unwrap();
        assert_eq!(capture.stdout_utf8().trim(), "out");
        assert_eq!(capture.stderr_utf8().trim(), "err");
        assert_eq!(capture.exit_code, 3);
    }

    #[tokio::test]
    async fn list_dir_names_regular_files_only() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let transport = LocalTransport::new(dir.path().to_string_lossy().into_owned());
        let names = transport
            .list_dir(&dir.path().to_string_lossy())
            .await
            .unwrap();
        assert_eq!(names, vec!["a.txt".to_string(), "b.txt".to_string()]);
    }

    #[tokio::test]
    async fn upload_to_same_path_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.txt");
        std::fs::write(&path, "content").unwrap();

        let transport = LocalTransport::new(dir.path().to_string_lossy().into_owned());
        transport
            .upload_file(&path, &path.to_string_lossy())
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "content");
    }
}
