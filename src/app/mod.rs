// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod adaptor;
pub mod daemon;
pub mod errors;
pub mod job;
pub mod ports;
pub mod status;
pub mod types;
