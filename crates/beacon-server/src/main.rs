// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Beacon flag serving daemon.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use beacon_server_config::{LogFormat, LoggingConfig, ServerConfig};
use beacon_server_flags::{
	FlagStore, FlagsService, HubConfig, InMemoryFlagStore, ServiceConfig, UsageConfig,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Beacon server - serves feature flag evaluations and change streams.
#[derive(Parser, Debug)]
#[command(name = "beacon-server", about = "Beacon feature flag server", version)]
struct Args {
	/// Path to a TOML config file (defaults to /etc/beacon/server.toml)
	#[arg(long, env = "BEACON_SERVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Validate configuration and the flag snapshot, then exit
	Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let config = match &args.config {
		Some(path) => beacon_server_config::load_config_with_file(path),
		None => beacon_server_config::load_config(),
	}
	.context("failed to load configuration")?;

	init_tracing(&config.logging);
	log_config(&config);

	let store = InMemoryFlagStore::from_snapshot_file(&config.store.snapshot_path)
		.with_context(|| {
			format!(
				"failed to load flag snapshot {}",
				config.store.snapshot_path.display()
			)
		})?;

	if let Some(Command::Check) = args.command {
		let scopes = store.list_scopes().await?;
		println!(
			"configuration ok, snapshot has {} scope(s)",
			scopes.len()
		);
		return Ok(());
	}

	let service = FlagsService::new(Arc::new(store), service_config(&config));

	service
		.load_all()
		.await
		.context("initial flag cache load failed")?;

	tracing::info!(
		scopes = service.cache().scope_count(),
		snapshot = %config.store.snapshot_path.display(),
		"beacon-server ready"
	);

	tokio::signal::ctrl_c()
		.await
		.context("failed to listen for shutdown signal")?;

	tracing::info!("Received shutdown signal");
	service.shutdown().await;
	tracing::info!("Server shutdown complete");
	Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
	let filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
	let registry = tracing_subscriber::registry().with(filter);

	match logging.format {
		LogFormat::Json => registry
			.with(tracing_subscriber::fmt::layer().json())
			.init(),
		LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
	}
}

fn log_config(config: &ServerConfig) {
	tracing::info!(
		subscriber_capacity = config.flags.subscriber_capacity,
		heartbeat_interval_secs = config.flags.heartbeat_interval_secs,
		snapshot_path = %config.store.snapshot_path.display(),
		log_format = %config.logging.format,
		"Server configuration loaded"
	);
}

fn service_config(config: &ServerConfig) -> ServiceConfig {
	ServiceConfig {
		hub: HubConfig {
			subscriber_capacity: config.flags.subscriber_capacity,
		},
		usage: UsageConfig {
			queue_capacity: config.flags.usage_queue_capacity,
			stale_after_days: config.flags.stale_after_days,
		},
		heartbeat_interval: config.flags.heartbeat_interval(),
	}
}
