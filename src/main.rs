//! s3uploader-rs: ship finished video clips to S3 and reclaim the disk.
//!
//! Watches one directory for new clips, waits until each has stopped
//! growing, uploads it with exponential-backoff retries, confirms the stored
//! size matches, and only then deletes the local file. Files that cannot be
//! uploaded are left in place for the operator.

#![warn(clippy::all)]

mod cli;
mod config;
mod lock;
mod logging;
mod pipeline;
pub mod retry;
mod shutdown;
mod store;
mod systemd;
mod types;

use std::sync::Arc;

use clap::Parser;

use cli::Command;
use store::{ObjectStoreRemote, RemoteStore};

fn build_store(config: &config::Config) -> anyhow::Result<Arc<dyn RemoteStore>> {
    let store = ObjectStoreRemote::s3(
        &config.s3.bucket_name,
        &config.s3.region,
        config.s3.endpoint_url.as_deref(),
    )?
    .with_part_size(config.part_size_bytes());
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let config = config::Config::load(&cli.overrides)?;
    let _log_guard = logging::init(&config.logging)?;
    tracing::debug!(?config, "Configuration loaded");

    let store = build_store(&config)?;

    match cli.effective_command() {
        Command::Check => pipeline::check(&config, store.as_ref()).await,
        Command::Run => {
            let shutdown_token = shutdown::install_signal_handler()?;
            let notifier = systemd::SystemdNotifier::new(config.service.notify_systemd);
            pipeline::run(&config, store, shutdown_token, notifier).await?;
            Ok(())
        }
    }
}
