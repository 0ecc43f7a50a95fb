// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use clap::Parser;

/// Command-line options. Flags override the config file, which overrides
/// built-in defaults.
#[derive(Parser, Debug)]
#[command(name = "swelld", version, about = "Job execution daemon")]
pub struct Opts {
    /// Path to the TOML config file (or set SWELLD_CONFIG_PATH)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// SQLite database location
    #[arg(long)]
    pub database_path: Option<PathBuf>,

    /// Root directory for per-job working directories
    #[arg(long)]
    pub data_root: Option<PathBuf>,

    /// Seconds between queue passes
    #[arg(long)]
    pub poll_interval_secs: Option<u64>,

    /// Recoverable failures tolerated per job before it is failed
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Jobs processed in parallel per pass
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

pub struct ParsedOpts {
    pub opts: Opts,
    /// Only set when the flag was actually given, so the config file value
    /// is not clobbered by the flag's default.
    pub verbose_override: Option<bool>,
}

pub fn parse_opts() -> ParsedOpts {
    let opts = Opts::parse();
    let verbose_override = opts.verbose.then_some(true);
    ParsedOpts {
        opts,
        verbose_override,
    }
}
