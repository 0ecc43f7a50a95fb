// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod cluster;
pub mod db;
pub mod local;
pub mod registry;
pub mod secrets;
pub mod shell;
pub mod ssh;
pub mod time;
