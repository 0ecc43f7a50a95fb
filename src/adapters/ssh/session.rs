// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use russh::ChannelMsg;
use russh::client::{AuthResult, Config, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use russh::keys::known_hosts::learn_known_hosts;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::app::errors::{AdaptorError, AdaptorResult};
use crate::app::types::ExecCapture;

/// How the session authenticates once the TCP connection is up.
#[derive(Clone)]
pub enum SshAuth {
    Password(String),
    Key {
        path: String,
        passphrase: Option<String>,
    },
}

#[derive(Clone)]
pub struct SshParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,
}

/// Minimal russh client handler; server keys are checked against
/// known_hosts and learned on first contact.
#[derive(Clone, Debug)]
struct ClientHandler {
    host: String,
    addr: SocketAddr,
}

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        verify_server_key(&self.host, self.addr, server_public_key)
    }
}

fn verify_server_key(
    host: &str,
    addr: SocketAddr,
    key: &russh::keys::ssh_key::PublicKey,
) -> std::result::Result<bool, anyhow::Error> {
    let port = addr.port();
    match russh::keys::check_known_hosts(host, port, key) {
        Ok(true) => return Ok(true),
        Ok(false) => {}
        Err(err) => {
            tracing::warn!("server key validation failed for {host}:{port}: {err}");
            anyhow::bail!("server key validation failed for {host}:{port}: {err}");
        }
    }
    let ip_host = addr.ip().to_string();
    if ip_host != host {
        match russh::keys::check_known_hosts(&ip_host, port, key) {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!("server key validation failed for {host}:{port}: {err}");
                anyhow::bail!("server key validation failed for {host}:{port}: {err}");
            }
        }
    }
    tracing::info!("server key for {host}:{port} is not present in known_hosts; learning");
    learn_known_hosts(host, port, key)
        .map_err(|err| anyhow::anyhow!("failed to learn server key for {host}:{port}: {err}"))?;
    Ok(true)
}

fn handle_capture_message(
    msg: &ChannelMsg,
    out: &mut Vec<u8>,
    err: &mut Vec<u8>,
    code: &mut Option<i32>,
) -> bool {
    match msg {
        ChannelMsg::Data { data } => {
            out.extend_from_slice(data);
            false
        }
        ChannelMsg::ExtendedData { data, ext: 1 } => {
            err.extend_from_slice(data);
            false
        }
        ChannelMsg::ExitStatus { exit_status } => {
            *code = Some(*exit_status as i32);
            false
        }
        ChannelMsg::Close => true,
        _ => false,
    }
}

/// Owns one SSH connection; one manager serves one adaptor instance, so no
/// locking is needed around the handle.
pub struct SessionManager {
    params: SshParams,
    config: Arc<Config>,
    handle: Option<Handle<ClientHandler>>,
}

impl SessionManager {
    pub fn new(params: SshParams) -> Self {
        let cfg = Config {
            inactivity_timeout: Some(Duration::from_secs(30)),
            keepalive_interval: Some(Duration::from_secs(15)),
            ..Default::default()
        };
        Self {
            params,
            config: Arc::new(cfg),
            handle: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        match self.handle.as_ref() {
            None => false,
            Some(h) => !h.is_closed(),
        }
    }

    /// Connects and authenticates; reconnects when the old handle died.
    pub async fn ensure_connected(&mut self) -> AdaptorResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.handle = None;

        let endpoint = format!("{}:{}", self.params.host, self.params.port);
        let addr = tokio::net::lookup_host(&endpoint)
            .await
            .map_err(|err| AdaptorError::connect(format!("cannot resolve {endpoint}: {err}")))?
            .next()
            .ok_or_else(|| AdaptorError::connect(format!("no address found for {endpoint}")))?;

        tracing::debug!(
            "establishing connection with {}@{addr}",
            &self.params.username
        );
        let handler = ClientHandler {
            host: self.params.host.clone(),
            addr,
        };
        let mut handle = russh::client::connect(self.config.clone(), addr, handler)
            .await
            .map_err(|err| AdaptorError::connect(format!("SSH connect to {endpoint} failed: {err}")))?;

        let result = match &self.params.auth {
            SshAuth::Password(password) => handle
                .authenticate_password(self.params.username.clone(), password.clone())
                .await
                .map_err(|err| AdaptorError::connect(format!("password auth failed: {err}")))?,
            SshAuth::Key { path, passphrase } => {
                let key = russh::keys::load_secret_key(path, passphrase.as_deref())
                    .map_err(|err| {
                        AdaptorError::auth(format!("failed to load secret key at {path}: {err}"))
                    })?;
                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(|err| AdaptorError::connect(format!("rsa hash negotiation: {err}")))?
                    .flatten();
                let pk = PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg);
                handle
                    .authenticate_publickey(self.params.username.clone(), pk)
                    .await
                    .map_err(|err| AdaptorError::connect(format!("publickey auth failed: {err}")))?
            }
        };
        match result {
            AuthResult::Success => {}
            AuthResult::Failure { .. } => {
                return Err(AdaptorError::auth(format!(
                    "authentication rejected for {}@{endpoint}",
                    self.params.username
                )));
            }
        }

        self.handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await;
        }
    }

    fn handle(&self) -> AdaptorResult<&Handle<ClientHandler>> {
        self.handle
            .as_ref()
            .ok_or_else(|| AdaptorError::internal("SSH handle used before connect"))
    }

    /// Executes a command, capturing stdout, stderr and exit code.
    pub async fn exec_capture(&self, cmd: &str) -> AdaptorResult<ExecCapture> {
        let handle = self.handle()?;
        let mut chan = handle
            .channel_open_session()
            .await
            .map_err(|err| AdaptorError::connect(format!("open session failed: {err}")))?;
        tracing::debug!("executing '{cmd}'");
        chan.exec(true, cmd)
            .await
            .map_err(|err| AdaptorError::exec(format!("exec request failed: {err}")))?;
        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut code: Option<i32> = None;
        loop {
            let Some(msg) = chan.wait().await else {
                break;
            };
            if handle_capture_message(&msg, &mut out, &mut err, &mut code) {
                break;
            }
        }
        let _ = chan.close().await;
        // A channel torn down before the exit status arrives means the
        // connection dropped mid-command, not that the command succeeded.
        let exit_code = code.ok_or_else(|| {
            AdaptorError::connect(format!(
                "channel closed before reporting an exit status for '{cmd}'"
            ))
        })?;
        Ok(ExecCapture {
            stdout: out,
            stderr: err,
            exit_code,
        })
    }

    async fn sftp(&self) -> AdaptorResult<SftpSession> {
        let handle = self.handle()?;
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|err| AdaptorError::connect(format!("open sftp session failed: {err}")))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|err| AdaptorError::connect(format!("sftp subsystem request failed: {err}")))?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|err| AdaptorError::connect(format!("sftp handshake failed: {err}")))
    }

    /// Creates `remote_dir` and any missing parents over SFTP.
    pub async fn ensure_remote_dir(&self, remote_dir: &str) -> AdaptorResult<()> {
        let sftp = self.sftp().await?;
        for cur in remote_dir_paths(remote_dir) {
            match sftp.metadata(&cur).await {
                Ok(meta) => {
                    if !meta.is_dir() {
                        return Err(AdaptorError::exec(format!(
                            "remote path exists but is not a directory: {cur}"
                        )));
                    }
                }
                Err(_) => {
                    sftp.create_dir(&cur).await.map_err(|err| {
                        AdaptorError::exec(format!("creating remote path {cur}: {err}"))
                    })?;
                }
            }
        }
        Ok(())
    }

    pub async fn upload_file(&self, local: &Path, remote_path: &str) -> AdaptorResult<()> {
        let content = tokio::fs::read(local).await.map_err(|err| {
            AdaptorError::exec(format!("failed to read {}: {err}", local.display()))
        })?;
        let sftp = self.sftp().await?;
        let flags = OpenFlags::WRITE
            .union(OpenFlags::CREATE)
            .union(OpenFlags::TRUNCATE);
        let mut file = sftp
            .open_with_flags(remote_path, flags)
            .await
            .map_err(|err| AdaptorError::exec(format!("open remote {remote_path}: {err}")))?;
        file.write_all(&content)
            .await
            .map_err(|err| AdaptorError::exec(format!("write remote {remote_path}: {err}")))?;
        file.flush()
            .await
            .map_err(|err| AdaptorError::exec(format!("flush remote {remote_path}: {err}")))?;
        file.shutdown()
            .await
            .map_err(|err| AdaptorError::exec(format!("close remote {remote_path}: {err}")))?;
        Ok(())
    }

    pub async fn download_file(&self, remote_path: &str, local: &Path) -> AdaptorResult<()> {
        let sftp = self.sftp().await?;
        let mut file = sftp
            .open(remote_path)
            .await
            .map_err(|err| AdaptorError::exec(format!("open remote {remote_path}: {err}")))?;
        let mut content = Vec::new();
        file.read_to_end(&mut content)
            .await
            .map_err(|err| AdaptorError::exec(format!("read remote {remote_path}: {err}")))?;
        tokio::fs::write(local, content).await.map_err(|err| {
            AdaptorError::exec(format!("failed to write {}: {err}", local.display()))
        })
    }

    pub async fn list_dir(&self, remote_path: &str) -> AdaptorResult<Vec<String>> {
        let sftp = self.sftp().await?;
        let entries = sftp
            .read_dir(remote_path)
            .await
            .map_err(|err| AdaptorError::exec(format!("list remote {remote_path}: {err}")))?;
        let mut names = Vec::new();
        for entry in entries {
            if !entry.metadata().is_dir() {
                names.push(entry.file_name());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Intermediate directory paths for `mkdir -p` semantics, outermost first.
fn remote_dir_paths(remote_dir: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut cur = String::new();
    if remote_dir.starts_with('/') {
        cur.push('/');
    }
    for part in remote_dir.split('/').filter(|p| !p.is_empty()) {
        if !cur.is_empty() && !cur.ends_with('/') {
            cur.push('/');
        }
        cur.push_str(part);
        paths.push(cur.clone());
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::CryptoVec;

    #[test]
    fn capture_message_accumulates_output() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut code = None;

        let msg = ChannelMsg::Data {
            data: CryptoVec::from_slice(b"hi"),
        };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        assert_eq!(out, b"hi");

        let msg = ChannelMsg::ExtendedData {
            data: CryptoVec::from_slice(b"oops"),
            ext: 1,
        };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        assert_eq!(err, b"oops");

        let msg = ChannelMsg::ExitStatus { exit_status: 42 };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        assert_eq!(code, Some(42));

        assert!(handle_capture_message(&ChannelMsg::Close, &mut out, &mut err, &mut code));
    }

    #[test]
    fn close_without_exit_status_is_not_a_success() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut code = None;

        let msg = ChannelMsg::Data {
            data: CryptoVec::from_slice(b"partial"),
        };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        assert!(handle_capture_message(&ChannelMsg::Close, &mut out, &mut err, &mut code));
        // No exit status observed; the caller must treat this as a
        // connection failure rather than exit code 0.
        assert_eq!(code, None);
    }

    #[tokio::test]
    async fn shutdown_before_connect_is_a_no_op() {
        let mut manager = SessionManager::new(SshParams {
            host: "cluster.example".to_string(),
            port: 22,
            username: "worker".to_string(),
            auth: SshAuth::Password("pw".to_string()),
        });
        assert!(!manager.is_connected());
        manager.shutdown().await;
        manager.shutdown().await;
        assert!(!manager.is_connected());
    }

    #[test]
    fn remote_dir_paths_builds_prefixes() {
        assert_eq!(
            remote_dir_paths("/home/user/jobs"),
            vec!["/home", "/home/user", "/home/user/jobs"]
        );
        assert_eq!(remote_dir_paths("relative/dir"), vec!["relative", "relative/dir"]);
    }
}
