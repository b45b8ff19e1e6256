// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Single entry point for the serving path.
//!
//! Mutating handlers call [`FlagsService::publish_change`], which refreshes
//! the affected scopes before broadcasting, so a subscriber that re-evaluates
//! on receipt always reads the new configuration.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use beacon_flags_core::{BulkEvaluation, EvaluationContext, EvaluationResult, FlagChangeEvent, ScopeKey};

use crate::cache::FlagCache;
use crate::error::{FlagsServerError, Result};
use crate::evaluation::{evaluate_all, evaluate_flag};
use crate::hub::{BroadcastOutcome, FlagsHub, HubConfig};
use crate::store::FlagStore;
use crate::stream::SubscriptionGuard;
use crate::usage::{NoopUsageSink, StaleFlag, UsageConfig, UsageSink, UsageTracker};

/// Default heartbeat interval for streaming connections.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ServiceConfig {
	pub hub: HubConfig,
	pub usage: UsageConfig,
	pub heartbeat_interval: Duration,
}

impl Default for ServiceConfig {
	fn default() -> Self {
		Self {
			hub: HubConfig::default(),
			usage: UsageConfig::default(),
			heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
		}
	}
}

/// Owns the cache, the hub and the usage tracker.
pub struct FlagsService {
	cache: Arc<FlagCache>,
	hub: Arc<FlagsHub>,
	usage: UsageTracker,
	heartbeat_interval: Duration,
}

impl FlagsService {
	/// Builds the service. Spawns the usage aggregator, so it must be called
	/// within a Tokio runtime.
	pub fn new(store: Arc<dyn FlagStore>, config: ServiceConfig) -> Self {
		Self::with_usage_sink(store, config, Arc::new(NoopUsageSink))
	}

	pub fn with_usage_sink(
		store: Arc<dyn FlagStore>,
		config: ServiceConfig,
		sink: Arc<dyn UsageSink>,
	) -> Self {
		Self {
			cache: Arc::new(FlagCache::new(store)),
			hub: Arc::new(FlagsHub::new(config.hub)),
			usage: UsageTracker::spawn(config.usage, sink),
			heartbeat_interval: config.heartbeat_interval,
		}
	}

	pub fn cache(&self) -> &Arc<FlagCache> {
		&self.cache
	}

	pub fn hub(&self) -> &Arc<FlagsHub> {
		&self.hub
	}

	pub fn usage(&self) -> &UsageTracker {
		&self.usage
	}

	pub fn heartbeat_interval(&self) -> Duration {
		self.heartbeat_interval
	}

	/// Populates the cache from the store. Failure is fatal at startup.
	pub async fn load_all(&self) -> Result<()> {
		self.cache.load_all().await
	}

	/// Evaluates one flag.
	pub fn evaluate(
		&self,
		scope: &ScopeKey,
		flag_key: &str,
		context: &EvaluationContext,
	) -> Result<EvaluationResult> {
		let entry = self
			.cache
			.get_flag(scope, flag_key)
			.ok_or_else(|| FlagsServerError::FlagNotFound {
				scope: scope.clone(),
				flag_key: flag_key.to_string(),
			})?;

		let result = evaluate_flag(&entry.flag, &entry.config, context);
		self.usage.record(scope, flag_key);

		debug!(
			scope = %scope,
			flag_key,
			variant = %result.variant,
			reason = result.reason.as_str(),
			"Evaluated flag"
		);
		Ok(result)
	}

	/// Evaluates every flag in a scope. Unknown scopes yield an empty map.
	pub fn evaluate_all(&self, scope: &ScopeKey, context: &EvaluationContext) -> BulkEvaluation {
		let flags = self.cache.get_flags(scope);
		let results = evaluate_all(
			flags.values().map(|entry| (&entry.flag, &entry.config)),
			context,
		);

		for flag_key in results.keys() {
			self.usage.record(scope, flag_key);
		}

		debug!(scope = %scope, flag_count = results.len(), "Evaluated all flags");
		results
	}

	/// Refreshes every affected scope, then broadcasts the event to each.
	///
	/// A failed refresh is logged and the previous snapshot keeps serving;
	/// the event is still broadcast so subscribers learn about the change.
	/// The first refresh error is returned after broadcasting.
	#[instrument(skip(self, scopes, event), fields(flag_key = %event.flag_key, event_type = event.event_type()))]
	pub async fn publish_change(
		&self,
		scopes: &[ScopeKey],
		event: FlagChangeEvent,
	) -> Result<BroadcastOutcome> {
		let mut first_error = None;
		for scope in scopes {
			if let Err(e) = self.cache.refresh(scope).await {
				first_error.get_or_insert(e);
			}
		}

		let mut total = BroadcastOutcome::default();
		for scope in scopes {
			let outcome = self.hub.broadcast(scope, event.clone());
			total.delivered += outcome.delivered;
			total.dropped += outcome.dropped;
		}

		match first_error {
			Some(e) => {
				warn!(error = %e, "Change broadcast after failed refresh");
				Err(e)
			}
			None => Ok(total),
		}
	}

	/// Opens a subscription for a streaming connection.
	pub fn open_stream(&self, scope: &ScopeKey) -> SubscriptionGuard {
		SubscriptionGuard::new(self.hub.clone(), self.hub.subscribe(scope))
	}

	/// Non-archived flags in a scope that have not been evaluated recently.
	pub fn stale_flags(&self, scope: &ScopeKey, now: DateTime<Utc>) -> Vec<StaleFlag> {
		let flags = self.cache.get_flags(scope);
		let keys = flags
			.values()
			.filter(|entry| !entry.flag.is_archived())
			.map(|entry| entry.flag.key.as_str());
		self.usage.stale_flags(scope, keys, now)
	}

	/// Closes every subscription and stops the usage tracker.
	pub async fn shutdown(&self) {
		self.hub.close();
		self.usage.shutdown().await;
		info!("Flags service shut down");
	}
}
