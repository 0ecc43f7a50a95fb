// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

/// Time source for history timestamps, injectable for tests.
pub trait ClockPort: Send + Sync {
    /// Current UTC instant as an RFC 3339 string.
    fn now_rfc3339(&self) -> String;
}
