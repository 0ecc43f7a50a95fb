// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

const APP_DIR_NAME: &str = "swelld";
const CONFIG_FILE_NAME: &str = "swelld.toml";
const CONFIG_ENV_VAR: &str = "SWELLD_CONFIG_PATH";
const SECRET_ENV_VAR: &str = "SWELLD_SECRET_KEY";
const DATABASE_FILE_NAME: &str = "swelld.sqlite";
const JOB_DATA_DIR_NAME: &str = "jobs";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    database_path: Option<String>,
    data_root: Option<String>,
    poll_interval_secs: Option<u64>,
    max_retries: Option<u32>,
    concurrency: Option<usize>,
    secret_key: Option<String>,
    verbose: Option<bool>,
}

#[derive(Debug)]
pub struct Config {
    pub database_path: PathBuf,
    /// Root under which per-job working directories are created.
    pub data_root: PathBuf,
    pub poll_interval_secs: u64,
    pub max_retries: u32,
    pub concurrency: usize,
    /// Key material for sealing password-class adaptor parameters.
    pub secret_key: String,
    pub verbose: bool,
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub database_path: Option<PathBuf>,
    pub data_root: Option<PathBuf>,
    pub poll_interval_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub concurrency: Option<usize>,
    pub verbose: Option<bool>,
}

pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    let (config_path, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), true),
            None => (default_config_path().ok(), false),
        },
    };

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let config_dir = config_path.as_deref().and_then(|path| path.parent());

    let database_path = match overrides.database_path {
        Some(path) => expand_path(path),
        None => match file_config.database_path {
            Some(raw) => resolve_path(&raw, config_dir),
            None => default_database_path().with_context(|| {
                "failed to resolve default database path; specify --database-path or set database_path in the config file"
            })?,
        },
    };
    let data_root = match overrides.data_root {
        Some(path) => expand_path(path),
        None => match file_config.data_root {
            Some(raw) => resolve_path(&raw, config_dir),
            None => default_data_root().with_context(|| {
                "failed to resolve default data root; specify --data-root or set data_root in the config file"
            })?,
        },
    };

    let poll_interval_secs = overrides
        .poll_interval_secs
        .or(file_config.poll_interval_secs)
        .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
    if poll_interval_secs == 0 {
        anyhow::bail!("poll_interval_secs must be at least 1");
    }
    let max_retries = overrides
        .max_retries
        .or(file_config.max_retries)
        .unwrap_or(DEFAULT_MAX_RETRIES);
    if max_retries == 0 {
        anyhow::bail!("max_retries must be at least 1");
    }
    let concurrency = overrides
        .concurrency
        .or(file_config.concurrency)
        .unwrap_or(DEFAULT_CONCURRENCY);
    if concurrency == 0 {
        anyhow::bail!("concurrency must be at least 1");
    }

    let secret_key = secret_from_env()
        .or(file_config.secret_key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .with_context(|| {
            format!("secret_key must be set in the config file or via {SECRET_ENV_VAR}")
        })?;

    let verbose = overrides.verbose.or(file_config.verbose).unwrap_or(false);

    Ok(Config {
        database_path,
        data_root,
        poll_interval_secs,
        max_retries,
        concurrency,
        secret_key,
        verbose,
        config_path,
    })
}

/// Creates the database parent directory and the data root.
pub fn ensure_dirs(config: &Config) -> Result<()> {
    if let Some(parent) = config.database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }
    fs::create_dir_all(&config.data_root)
        .with_context(|| format!("failed to create data root {}", config.data_root.display()))?;
    Ok(())
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn secret_from_env() -> Option<String> {
    std::env::var(SECRET_ENV_VAR)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn default_database_path() -> Result<PathBuf> {
    Ok(default_data_dir()?.join(DATABASE_FILE_NAME))
}

fn default_data_root() -> Result<PathBuf> {
    Ok(default_data_dir()?.join(JOB_DATA_DIR_NAME))
}

fn default_data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("failed to resolve data directory")?;
    Ok(base.join(APP_DIR_NAME))
}
