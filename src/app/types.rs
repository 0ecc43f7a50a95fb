// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::app::status::JobStatus;

/// Captured output of a single command execution on a backend.
#[derive(Debug, Clone, Default)]
pub struct ExecCapture {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl ExecCapture {
    pub fn stdout_utf8(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_utf8(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Serialized backend configuration attached to a job. Password-class
/// parameter values are stored encrypted (`ENC[...]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptorConfig {
    pub backend_type: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl AdaptorConfig {
    pub fn new(backend_type: impl Into<String>) -> Self {
        Self {
            backend_type: backend_type.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }
}

/// One append-only history row. `seq` is dense per job and doubles as the
/// storage idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub seq: u32,
    pub timestamp: String,
    pub status: JobStatus,
    pub message: String,
    /// Operational notes (retries, backend cancel failures); hidden from
    /// end-user notifications.
    #[serde(default)]
    pub is_admin: bool,
}

/// Post-run execution report, cached as `job_run_details.json` in the
/// job working directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDetails {
    pub slug: String,
    pub title: String,
    pub remote_job_id: Option<String>,
    pub exit_code: Option<i32>,
    pub created: Option<String>,
    pub started: Option<String>,
    pub finished: Option<String>,
    /// Free-form backend extras, typically the execution host.
    pub extra: Option<String>,
}

/// What `fetch_results` learned from the backend; drives the
/// Completed -> Terminated/Warning/Error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchedResults {
    pub exit_code: i32,
    pub stderr_empty: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adaptor_config_serializes_with_camel_case_tag() {
        let config = AdaptorConfig::new("local.shell").with_param("command", "/bin/echo");
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"backendType\":\"local.shell\""));
        assert!(json.contains("\"command\":\"/bin/echo\""));

        let back: AdaptorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn adaptor_config_parameters_default_to_empty() {
        let back: AdaptorConfig = serde_json::from_str("{\"backendType\":\"local.shell\"}").unwrap();
        assert!(back.parameters.is_empty());
    }
}
