// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fire-and-forget evaluation usage tracking.
//!
//! Recording never blocks the evaluation path: events go into a bounded
//! queue and a background task aggregates them and forwards them to a
//! [`UsageSink`]. When the queue is full the event is counted and dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use beacon_flags_core::ScopeKey;

use crate::error::Result;

pub const DEFAULT_USAGE_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_STALE_AFTER_DAYS: u32 = 30;

#[derive(Debug, Clone)]
pub struct UsageConfig {
	pub queue_capacity: usize,
	/// A flag not evaluated for this many days is stale
	pub stale_after_days: u32,
}

impl Default for UsageConfig {
	fn default() -> Self {
		Self {
			queue_capacity: DEFAULT_USAGE_QUEUE_CAPACITY,
			stale_after_days: DEFAULT_STALE_AFTER_DAYS,
		}
	}
}

/// One flag evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
	pub scope: ScopeKey,
	pub flag_key: String,
	pub evaluated_at: DateTime<Utc>,
}

/// Aggregated evaluation statistics for one flag in one scope.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlagUsage {
	pub evaluations: u64,
	pub last_evaluated_at: DateTime<Utc>,
}

/// A flag that has not been evaluated recently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaleFlag {
	pub flag_key: String,
	/// `None` if never evaluated
	pub last_evaluated_at: Option<DateTime<Utc>>,
}

/// Downstream consumer of usage events, e.g. an analytics pipeline.
#[async_trait]
pub trait UsageSink: Send + Sync {
	async fn record(&self, event: &UsageEvent) -> Result<()>;
}

/// Discards usage events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
	async fn record(&self, _event: &UsageEvent) -> Result<()> {
		Ok(())
	}
}

type UsageMap = HashMap<ScopeKey, HashMap<String, FlagUsage>>;

pub struct UsageTracker {
	sender: mpsc::Sender<UsageEvent>,
	usage: Arc<RwLock<UsageMap>>,
	dropped: AtomicU64,
	stale_after: Duration,
	cancel: CancellationToken,
	task: Mutex<Option<JoinHandle<()>>>,
}

impl UsageTracker {
	/// Starts the background aggregation task. Must be called within a Tokio
	/// runtime.
	pub fn spawn(config: UsageConfig, sink: Arc<dyn UsageSink>) -> Self {
		let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
		let usage = Arc::new(RwLock::new(UsageMap::new()));
		let cancel = CancellationToken::new();

		let task = tokio::spawn(run_aggregator(
			receiver,
			usage.clone(),
			sink,
			cancel.clone(),
		));

		Self {
			sender,
			usage,
			dropped: AtomicU64::new(0),
			stale_after: Duration::days(i64::from(config.stale_after_days)),
			cancel,
			task: Mutex::new(Some(task)),
		}
	}

	/// Records one evaluation without waiting.
	pub fn record(&self, scope: &ScopeKey, flag_key: &str) {
		let event = UsageEvent {
			scope: scope.clone(),
			flag_key: flag_key.to_string(),
			evaluated_at: Utc::now(),
		};

		if self.sender.try_send(event).is_err() {
			self.dropped.fetch_add(1, Ordering::Relaxed);
			trace!(scope = %scope, flag_key, "Usage queue full, dropping event");
		}
	}

	pub fn usage(&self, scope: &ScopeKey, flag_key: &str) -> Option<FlagUsage> {
		self.usage.read().get(scope)?.get(flag_key).copied()
	}

	/// Flags among `flag_keys` never evaluated or last evaluated before the
	/// stale threshold. Never-evaluated flags sort first, then oldest, then
	/// by key.
	pub fn stale_flags<'a, I>(&self, scope: &ScopeKey, flag_keys: I, now: DateTime<Utc>) -> Vec<StaleFlag>
	where
		I: IntoIterator<Item = &'a str>,
	{
		let threshold = now - self.stale_after;
		let usage = self.usage.read();
		let scope_usage = usage.get(scope);

		let mut stale: Vec<StaleFlag> = flag_keys
			.into_iter()
			.filter_map(|key| {
				let last = scope_usage
					.and_then(|flags| flags.get(key))
					.map(|u| u.last_evaluated_at);
				match last {
					Some(at) if at >= threshold => None,
					_ => Some(StaleFlag {
						flag_key: key.to_string(),
						last_evaluated_at: last,
					}),
				}
			})
			.collect();

		stale.sort_by(|a, b| {
			a.last_evaluated_at
				.cmp(&b.last_evaluated_at)
				.then_with(|| a.flag_key.cmp(&b.flag_key))
		});
		stale
	}

	pub fn dropped_events(&self) -> u64 {
		self.dropped.load(Ordering::Relaxed)
	}

	/// Stops the background task after draining queued events.
	pub async fn shutdown(&self) {
		self.cancel.cancel();
		let task = self.task.lock().take();
		if let Some(task) = task {
			if let Err(e) = task.await {
				warn!(error = %e, "Usage aggregator task failed");
			}
		}
	}
}

impl Drop for UsageTracker {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

async fn run_aggregator(
	mut receiver: mpsc::Receiver<UsageEvent>,
	usage: Arc<RwLock<UsageMap>>,
	sink: Arc<dyn UsageSink>,
	cancel: CancellationToken,
) {
	debug!("Usage aggregator started");

	loop {
		tokio::select! {
			biased;
			event = receiver.recv() => match event {
				Some(event) => apply(&usage, sink.as_ref(), event).await,
				None => break,
			},
			_ = cancel.cancelled() => {
				receiver.close();
				while let Some(event) = receiver.recv().await {
					apply(&usage, sink.as_ref(), event).await;
				}
				break;
			}
		}
	}

	info!("Usage aggregator stopped");
}

async fn apply(usage: &RwLock<UsageMap>, sink: &dyn UsageSink, event: UsageEvent) {
	{
		let mut usage = usage.write();
		let entry = usage
			.entry(event.scope.clone())
			.or_default()
			.entry(event.flag_key.clone())
			.or_insert(FlagUsage {
				evaluations: 0,
				last_evaluated_at: event.evaluated_at,
			});
		entry.evaluations += 1;
		entry.last_evaluated_at = entry.last_evaluated_at.max(event.evaluated_at);
	}

	if let Err(e) = sink.record(&event).await {
		warn!(
			scope = %event.scope,
			flag_key = %event.flag_key,
			error = %e,
			"Usage sink rejected event"
		);
	}
}
