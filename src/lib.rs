// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Job execution core: a job state machine, backend adaptors (local shell,
//! SSH, batch schedulers) and the polling daemon that drives submitted jobs
//! from creation to their final state.

pub mod adapters;
pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
