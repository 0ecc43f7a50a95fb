// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::str::FromStr;

use crate::adapters::cluster::{ClusterAdaptor, ClusterFlavor};
use crate::adapters::local::LocalTransport;
use crate::adapters::secrets::{SecretCipher, is_encrypted, is_secret_param};
use crate::adapters::shell::ShellAdaptor;
use crate::adapters::ssh::{SshAuth, SshParams, SshTransport};
use crate::app::adaptor::{Adaptor, AdaptorFactory};
use crate::app::errors::{AdaptorError, AdaptorResult};
use crate::app::ports::transport::Transport;
use crate::app::types::AdaptorConfig;

const DEFAULT_SSH_PORT: u16 = 22;

pub struct BackendDescriptor {
    pub id: &'static str,
    pub required: &'static [&'static str],
}

/// Every backend the daemon can build, with the parameters each one
/// refuses to start without.
pub const BACKENDS: &[BackendDescriptor] = &[
    BackendDescriptor {
        id: "local.shell",
        required: &["command"],
    },
    BackendDescriptor {
        id: "ssh.shell",
        required: &["command", "host", "user_id", "password", "basedir"],
    },
    BackendDescriptor {
        id: "ssh.shell_key",
        required: &["command", "host", "user_id", "private_key", "basedir"],
    },
    BackendDescriptor {
        id: "local.cluster",
        required: &["command", "flavor"],
    },
    BackendDescriptor {
        id: "ssh.cluster",
        required: &["command", "host", "user_id", "password", "basedir", "flavor"],
    },
    BackendDescriptor {
        id: "ssh.cluster_key",
        required: &["command", "host", "user_id", "private_key", "basedir", "flavor"],
    },
];

/// Maps dotted backend identifiers to concrete adaptors. Unknown
/// identifiers and missing parameters fail before any backend is touched.
pub struct AdaptorRegistry {
    cipher: SecretCipher,
    data_root: String,
}

impl AdaptorRegistry {
    pub fn new(cipher: SecretCipher, data_root: impl Into<String>) -> Self {
        Self {
            cipher,
            data_root: data_root.into(),
        }
    }

    /// Encrypts password-class parameters in place; values already sealed
    /// are left alone. Submission flows call this before first save.
    pub fn seal_parameters(&self, config: &mut AdaptorConfig) -> AdaptorResult<()> {
        for (name, value) in config.parameters.iter_mut() {
            if is_secret_param(name) && !is_encrypted(value) {
                *value = self.cipher.encrypt(value)?;
            }
        }
        Ok(())
    }

    fn validate(&self, config: &AdaptorConfig) -> AdaptorResult<&'static BackendDescriptor> {
        let descriptor = BACKENDS
            .iter()
            .find(|d| d.id == config.backend_type)
            .ok_or_else(|| {
                AdaptorError::not_available(format!(
                    "unknown backend type '{}'",
                    config.backend_type
                ))
            })?;
        let missing: Vec<&str> = descriptor
            .required
            .iter()
            .filter(|name| config.param(name).map(str::trim).unwrap_or_default().is_empty())
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(AdaptorError::not_ready(format!(
                "backend '{}' is missing required parameters: {}",
                descriptor.id,
                missing.join(", ")
            )));
        }
        Ok(descriptor)
    }

    fn ssh_transport(&self, config: &AdaptorConfig, key_auth: bool) -> AdaptorResult<SshTransport> {
        let host = config.param("host").unwrap_or_default().to_string();
        let user = config.param("user_id").unwrap_or_default().to_string();
        let basedir = config.param("basedir").unwrap_or_default().to_string();
        let port = match config.param("port") {
            None => DEFAULT_SSH_PORT,
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
                AdaptorError::not_ready(format!("invalid ssh port '{raw}'"))
            })?,
        };
        let auth = if key_auth {
            let passphrase = match config.param("passphrase") {
                Some(value) if !value.is_empty() => Some(self.cipher.decrypt(value)?),
                _ => None,
            };
            SshAuth::Key {
                path: config.param("private_key").unwrap_or_default().to_string(),
                passphrase,
            }
        } else {
            SshAuth::Password(self.cipher.decrypt(config.param("password").unwrap_or_default())?)
        };
        Ok(SshTransport::new(
            SshParams {
                host,
                port,
                username: user,
                auth,
            },
            basedir,
        ))
    }

    fn flavor(&self, config: &AdaptorConfig) -> AdaptorResult<ClusterFlavor> {
        ClusterFlavor::from_str(config.param("flavor").unwrap_or_default())
    }
}

impl AdaptorFactory for AdaptorRegistry {
    fn load(&self, config: &AdaptorConfig) -> AdaptorResult<Box<dyn Adaptor>> {
        let descriptor = self.validate(config)?;
        let command = config.param("command").unwrap_or_default().to_string();
        let queue = config
            .param("queue")
            .filter(|q| !q.is_empty())
            .map(str::to_string);

        let adaptor: Box<dyn Adaptor> = match descriptor.id {
            "local.shell" => Box::new(ShellAdaptor::new(
                descriptor.id,
                Box::new(LocalTransport::new(self.data_root.clone())),
                command,
                config.clone(),
            )),
            "ssh.shell" | "ssh.shell_key" => {
                let key_auth = descriptor.id == "ssh.shell_key";
                let transport: Box<dyn Transport> =
                    Box::new(self.ssh_transport(config, key_auth)?);
                Box::new(ShellAdaptor::new(descriptor.id, transport, command, config.clone()))
            }
            "local.cluster" => Box::new(ClusterAdaptor::new(
                descriptor.id,
                Box::new(LocalTransport::new(self.data_root.clone())),
                self.flavor(config)?,
                command,
                queue,
                config.clone(),
            )),
            "ssh.cluster" | "ssh.cluster_key" => {
                let key_auth = descriptor.id == "ssh.cluster_key";
                let transport: Box<dyn Transport> =
                    Box::new(self.ssh_transport(config, key_auth)?);
                Box::new(ClusterAdaptor::new(
                    descriptor.id,
                    transport,
                    self.flavor(config)?,
                    command,
                    queue,
                    config.clone(),
                ))
            }
            // BACKENDS and this match are maintained together.
            other => {
                return Err(AdaptorError::internal(format!(
                    "descriptor '{other}' has no constructor"
                )));
            }
        };
        Ok(adaptor)
    }
}
