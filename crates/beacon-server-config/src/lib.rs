// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Centralized configuration management for the Beacon flag server.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Type-safe configuration with validation
//! - Consistent environment variable naming (`BEACON_SERVER_*`)
//!
//! # Usage
//!
//! ```ignore
//! use beacon_server_config::load_config;
//!
//! let config = load_config()?;
//! println!("Serving snapshot {}", config.store.snapshot_path.display());
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::debug;

/// Fully resolved server configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerConfig {
	pub flags: FlagsConfig,
	pub store: StoreConfig,
	pub logging: LoggingConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`BEACON_SERVER_*`)
/// 2. Config file (`/etc/beacon/server.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

/// Merge the given sources in precedence order and resolve the result.
pub fn load_from_sources(
	mut sources: Vec<Box<dyn ConfigSource>>,
) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
///
/// Runs before logging is initialized, so the resolved values are logged by
/// the caller once a subscriber is installed.
pub fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let flags = layer.flags.unwrap_or_default().finalize();
	let store = layer.store.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();

	validate_config(&flags)?;

	Ok(ServerConfig {
		flags,
		store,
		logging,
	})
}

fn validate_config(flags: &FlagsConfig) -> Result<(), ConfigError> {
	let zero = [
		("flags.subscriber_capacity", flags.subscriber_capacity == 0),
		("flags.usage_queue_capacity", flags.usage_queue_capacity == 0),
		(
			"flags.heartbeat_interval_secs",
			flags.heartbeat_interval_secs == 0,
		),
	];

	if let Some((key, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
		return Err(ConfigError::Validation(format!(
			"{key} must be greater than zero"
		)));
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	struct FixedSource(ServerConfigLayer, Precedence);

	impl ConfigSource for FixedSource {
		fn name(&self) -> &'static str {
			"fixed"
		}

		fn precedence(&self) -> Precedence {
			self.1
		}

		fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
			Ok(self.0.clone())
		}
	}

	fn capacity_layer(capacity: usize) -> ServerConfigLayer {
		ServerConfigLayer {
			flags: Some(FlagsConfigLayer {
				subscriber_capacity: Some(capacity),
				..Default::default()
			}),
			..Default::default()
		}
	}

	#[test]
	fn test_defaults_resolve() {
		let config = finalize(ServerConfigLayer::default()).unwrap();
		assert_eq!(config, ServerConfig::default());
	}

	#[test]
	fn test_higher_precedence_wins_regardless_of_order() {
		let config = load_from_sources(vec![
			Box::new(FixedSource(capacity_layer(99), Precedence::Environment)),
			Box::new(FixedSource(capacity_layer(8), Precedence::ConfigFile)),
		])
		.unwrap();
		assert_eq!(config.flags.subscriber_capacity, 99);
	}

	#[test]
	fn test_zero_capacity_rejected() {
		let result = finalize(capacity_layer(0));
		let err = result.unwrap_err();
		assert!(err.to_string().contains("flags.subscriber_capacity"));
	}

	#[test]
	fn test_zero_heartbeat_rejected() {
		let layer = ServerConfigLayer {
			flags: Some(FlagsConfigLayer {
				heartbeat_interval_secs: Some(0),
				..Default::default()
			}),
			..Default::default()
		};
		assert!(matches!(finalize(layer), Err(ConfigError::Validation(_))));
	}

	#[test]
	fn test_file_overrides_defaults() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(
			file,
			"[store]\nsnapshot_path = \"/srv/flags.json\"\n[logging]\nformat = \"json\""
		)
		.unwrap();

		let config = load_from_sources(vec![
			Box::new(DefaultsSource),
			Box::new(TomlSource::new(file.path())),
		])
		.unwrap();

		assert_eq!(
			config.store.snapshot_path,
			std::path::PathBuf::from("/srv/flags.json")
		);
		assert_eq!(config.logging.format, LogFormat::Json);
		assert_eq!(config.flags, FlagsConfig::default());
	}
}
