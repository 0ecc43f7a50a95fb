// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use swelld::adapters::db::{JobStore, SqliteJobStore};
use swelld::adapters::registry::AdaptorRegistry;
use swelld::adapters::secrets::SecretCipher;
use swelld::adapters::time::SystemClock;
use swelld::app::daemon::{DaemonSettings, QueueDaemon};
use swelld::{cli, config, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = cli::parse_opts();
    let opts = parsed.opts;
    let config = config::load(
        opts.config,
        config::Overrides {
            database_path: opts.database_path,
            data_root: opts.data_root,
            poll_interval_secs: opts.poll_interval_secs,
            max_retries: opts.max_retries,
            concurrency: opts.concurrency,
            verbose: parsed.verbose_override,
        },
    )?;
    logging::init(config.verbose);
    tracing::info!(
        database_path = %config.database_path.display(),
        data_root = %config.data_root.display(),
        poll_interval_secs = config.poll_interval_secs,
        max_retries = config.max_retries,
        concurrency = config.concurrency,
        "configuration loaded"
    );
    config::ensure_dirs(&config)?;

    let db = JobStore::open(&config.database_path).await?;
    let store = Arc::new(SqliteJobStore::new(db));
    let registry = Arc::new(AdaptorRegistry::new(
        SecretCipher::new(&config.secret_key),
        config.data_root.to_string_lossy().into_owned(),
    ));
    let clock = Arc::new(SystemClock);

    let daemon = QueueDaemon::new(
        store,
        registry,
        clock,
        DaemonSettings {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            max_retries: config.max_retries,
            concurrency: config.concurrency,
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let daemon_task = tokio::spawn(async move { daemon.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested, finishing in-flight work");
    let _ = shutdown_tx.send(true);
    daemon_task.await?;
    Ok(())
}
