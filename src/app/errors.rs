// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

pub mod codes {
    pub const NOT_READY: &str = "not_ready";
    pub const CONNECTION_FAILURE: &str = "connection_failure";
    pub const AUTHENTICATION_FAILURE: &str = "authentication_failure";
    pub const EXECUTION_FAILURE: &str = "execution_failure";
    pub const INCONSISTENT_STATE: &str = "inconsistent_state";
    pub const NOT_AVAILABLE: &str = "not_available";
    pub const STORE_FAILURE: &str = "store_failure";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// Failure classes of adaptor operations. Only `Connect` is retryable;
/// the daemon turns everything else into a terminal status or a logged skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptorErrorKind {
    /// Required runtime parameters are missing or unusable.
    NotReady,
    /// The backend could not be reached or authenticated against.
    Connect,
    /// The backend was reached but the operation failed there.
    Exec,
    /// An operation was requested in a job state that forbids it.
    InconsistentState,
    /// The requested backend type does not exist.
    NotAvailable,
    Internal,
}

#[derive(Debug, Clone)]
pub struct AdaptorError {
    kind: AdaptorErrorKind,
    code: &'static str,
    message: String,
    context: Option<String>,
}

impl AdaptorError {
    pub fn new(kind: AdaptorErrorKind, code: &'static str) -> Self {
        Self {
            kind,
            code,
            message: code.to_string(),
            context: None,
        }
    }

    pub fn with_message(
        kind: AdaptorErrorKind,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::with_message(AdaptorErrorKind::NotReady, codes::NOT_READY, message)
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::with_message(AdaptorErrorKind::Connect, codes::CONNECTION_FAILURE, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::with_message(
            AdaptorErrorKind::Connect,
            codes::AUTHENTICATION_FAILURE,
            message,
        )
    }

    pub fn exec(message: impl Into<String>) -> Self {
        Self::with_message(AdaptorErrorKind::Exec, codes::EXECUTION_FAILURE, message)
    }

    pub fn inconsistent_state(message: impl Into<String>) -> Self {
        Self::with_message(
            AdaptorErrorKind::InconsistentState,
            codes::INCONSISTENT_STATE,
            message,
        )
    }

    pub fn not_available(message: impl Into<String>) -> Self {
        Self::with_message(
            AdaptorErrorKind::NotAvailable,
            codes::NOT_AVAILABLE,
            message,
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_message(AdaptorErrorKind::Internal, codes::INTERNAL_ERROR, message)
    }

    pub fn kind(&self) -> AdaptorErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Connect-class failures are transient by assumption and feed the
    /// job's retry counter instead of failing it outright.
    pub fn is_retryable(&self) -> bool {
        self.kind == AdaptorErrorKind::Connect
    }
}

impl fmt::Display for AdaptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ctx) = &self.context {
            write!(f, "{} ({})", self.message, ctx)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for AdaptorError {}

pub type AdaptorResult<T> = Result<T, AdaptorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context_when_present() {
        let err = AdaptorError::connect("connection refused").with_context("host=cluster.example");
        assert_eq!(err.to_string(), "connection refused (host=cluster.example)");
        assert_eq!(err.code(), codes::CONNECTION_FAILURE);
    }

    #[test]
    fn only_connect_class_is_retryable() {
        assert!(AdaptorError::connect("x").is_retryable());
        assert!(AdaptorError::auth("x").is_retryable());
        assert!(!AdaptorError::exec("x").is_retryable());
        assert!(!AdaptorError::not_ready("x").is_retryable());
        assert!(!AdaptorError::inconsistent_state("x").is_retryable());
        assert!(!AdaptorError::not_available("x").is_retryable());
    }
}
