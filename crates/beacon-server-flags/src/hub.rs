// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Change notification hub for live flag subscribers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            FlagsHub                              │
//! │  scopes: RwLock<HashMap<ScopeKey, Arc<Mutex<ScopeChannels>>>>    │
//! └────────────────────────────────┬────────────────────────────────┘
//!                                  │
//!    ┌─────────────────────────────┼─────────────────────────────┐
//!    ▼                             ▼                             ▼
//! ┌──────────────┐         ┌──────────────┐              ┌──────────────┐
//! │ projA:prod   │         │ projA:dev    │              │ projB:prod   │
//! │ id -> Sender │         │ id -> Sender │              │ id -> Sender │
//! └──────────────┘         └──────────────┘              └──────────────┘
//! ```
//!
//! Each subscriber owns a bounded queue. Broadcasting uses `try_send`, so a
//! slow subscriber loses events instead of stalling the writer or other
//! subscribers.
//!
//! Lock order is always the registry lock, then a scope mutex. Neither is
//! held across an await.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, trace};

use beacon_flags_core::{FlagChangeEvent, ScopeKey};

/// Default queue capacity per subscriber.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 16;

/// Configuration for the hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
	/// Events buffered per subscriber before new ones are dropped.
	pub subscriber_capacity: usize,
}

impl Default for HubConfig {
	fn default() -> Self {
		Self {
			subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
		}
	}
}

/// Identifies one subscription within the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "sub-{}", self.0)
	}
}

/// A live registration for one scope's change events.
#[derive(Debug)]
pub struct Subscription {
	id: SubscriptionId,
	scope: ScopeKey,
	receiver: mpsc::Receiver<FlagChangeEvent>,
}

impl Subscription {
	pub fn id(&self) -> SubscriptionId {
		self.id
	}

	pub fn scope(&self) -> &ScopeKey {
		&self.scope
	}

	/// Next event, or `None` once the subscription is closed and drained.
	pub async fn recv(&mut self) -> Option<FlagChangeEvent> {
		self.receiver.recv().await
	}

	pub fn try_recv(&mut self) -> Option<FlagChangeEvent> {
		self.receiver.try_recv().ok()
	}

	/// Whether the hub side has gone away.
	pub fn is_closed(&self) -> bool {
		self.receiver.is_closed()
	}
}

/// Result of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastOutcome {
	pub delivered: usize,
	pub dropped: usize,
}

/// Hub statistics for monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubStats {
	pub scope_count: usize,
	pub subscriber_count: usize,
	pub events_broadcast: u64,
	pub events_dropped: u64,
	pub total_subscriptions: u64,
}

#[derive(Default)]
struct ScopeChannels {
	senders: HashMap<SubscriptionId, mpsc::Sender<FlagChangeEvent>>,
	/// Set when the entry has been unlinked from the registry
	retired: bool,
}

/// Scoped publish/subscribe registry for flag change events.
pub struct FlagsHub {
	config: HubConfig,
	scopes: RwLock<HashMap<ScopeKey, Arc<Mutex<ScopeChannels>>>>,
	closed: AtomicBool,
	next_id: AtomicU64,
	events_broadcast: AtomicU64,
	events_dropped: AtomicU64,
	total_subscriptions: AtomicU64,
}

impl FlagsHub {
	pub fn new(config: HubConfig) -> Self {
		Self {
			config,
			scopes: RwLock::new(HashMap::new()),
			closed: AtomicBool::new(false),
			next_id: AtomicU64::new(1),
			events_broadcast: AtomicU64::new(0),
			events_dropped: AtomicU64::new(0),
			total_subscriptions: AtomicU64::new(0),
		}
	}

	pub fn with_defaults() -> Self {
		Self::new(HubConfig::default())
	}

	/// Registers a new subscriber for a scope.
	///
	/// After [`close`](Self::close) this returns a subscription that is
	/// already closed.
	pub fn subscribe(&self, scope: &ScopeKey) -> Subscription {
		let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
		let (sender, receiver) = mpsc::channel(self.config.subscriber_capacity.max(1));
		let subscription = Subscription {
			id,
			scope: scope.clone(),
			receiver,
		};

		loop {
			let Some(entry) = self.entry_or_create(scope) else {
				debug!(scope = %scope, "Hub closed, returning closed subscription");
				return subscription;
			};

			let mut channels = entry.lock();
			if channels.retired {
				// Pruned between lookup and lock; retry on a fresh entry
				continue;
			}

			channels.senders.insert(id, sender);
			self.total_subscriptions.fetch_add(1, Ordering::Relaxed);
			debug!(
				scope = %scope,
				subscription_id = %id,
				subscriber_count = channels.senders.len(),
				"Subscriber registered"
			);
			return subscription;
		}
	}

	/// Deregisters and closes a subscription. Idempotent.
	pub fn unsubscribe(&self, subscription: &mut Subscription) {
		subscription.receiver.close();

		let Some(entry) = self.scopes.read().get(&subscription.scope).cloned() else {
			return;
		};

		let now_empty = {
			let mut channels = entry.lock();
			if channels.senders.remove(&subscription.id).is_none() {
				return;
			}
			debug!(
				scope = %subscription.scope,
				subscription_id = %subscription.id,
				"Subscriber removed"
			);
			channels.senders.is_empty()
		};

		if now_empty {
			self.prune(&subscription.scope);
		}
	}

	/// Sends an event to every subscriber of one scope without waiting.
	///
	/// Subscribers whose queues are full miss this event.
	pub fn broadcast(&self, scope: &ScopeKey, event: FlagChangeEvent) -> BroadcastOutcome {
		self.events_broadcast.fetch_add(1, Ordering::Relaxed);

		let Some(entry) = self.scopes.read().get(scope).cloned() else {
			debug!(
				scope = %scope,
				event_type = event.event_type(),
				"No subscribers for scope"
			);
			return BroadcastOutcome::default();
		};

		let mut outcome = BroadcastOutcome::default();
		let now_empty = {
			let mut channels = entry.lock();
			let mut gone = Vec::new();

			for (id, sender) in channels.senders.iter() {
				match sender.try_send(event.clone()) {
					Ok(()) => outcome.delivered += 1,
					Err(TrySendError::Full(_)) => {
						outcome.dropped += 1;
						trace!(
							scope = %scope,
							subscription_id = %id,
							flag_key = %event.flag_key,
							"Subscriber queue full, dropping event"
						);
					}
					Err(TrySendError::Closed(_)) => gone.push(*id),
				}
			}

			// Receivers dropped without unsubscribing
			for id in gone {
				channels.senders.remove(&id);
			}
			channels.senders.is_empty()
		};

		if now_empty {
			self.prune(scope);
		}

		self
			.events_dropped
			.fetch_add(outcome.dropped as u64, Ordering::Relaxed);
		debug!(
			scope = %scope,
			event_type = event.event_type(),
			flag_key = %event.flag_key,
			delivered = outcome.delivered,
			dropped = outcome.dropped,
			"Broadcast change event"
		);
		outcome
	}

	pub fn subscriber_count(&self, scope: &ScopeKey) -> usize {
		self
			.scopes
			.read()
			.get(scope)
			.map(|entry| entry.lock().senders.len())
			.unwrap_or(0)
	}

	/// Closes every subscription and refuses new ones.
	pub fn close(&self) {
		self.closed.store(true, Ordering::Release);

		let mut scopes = self.scopes.write();
		let mut closed = 0;
		for entry in scopes.values() {
			let mut channels = entry.lock();
			closed += channels.senders.len();
			channels.senders.clear();
			channels.retired = true;
		}
		let scope_count = scopes.len();
		scopes.clear();

		info!(
			scope_count,
			subscriptions = closed,
			"Closed change notification hub"
		);
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}

	pub fn scope_count(&self) -> usize {
		self.scopes.read().len()
	}

	pub fn stats(&self) -> HubStats {
		let scopes = self.scopes.read();
		HubStats {
			scope_count: scopes.len(),
			subscriber_count: scopes.values().map(|entry| entry.lock().senders.len()).sum(),
			events_broadcast: self.events_broadcast.load(Ordering::Relaxed),
			events_dropped: self.events_dropped.load(Ordering::Relaxed),
			total_subscriptions: self.total_subscriptions.load(Ordering::Relaxed),
		}
	}

	/// Existing entry for a scope, or a new one. `None` once closed.
	fn entry_or_create(&self, scope: &ScopeKey) -> Option<Arc<Mutex<ScopeChannels>>> {
		if self.is_closed() {
			return None;
		}

		if let Some(entry) = self.scopes.read().get(scope) {
			return Some(entry.clone());
		}

		let mut scopes = self.scopes.write();
		if self.is_closed() {
			return None;
		}

		let entry = scopes.entry(scope.clone()).or_insert_with(|| {
			info!(scope = %scope, "Created subscriber set for scope");
			Arc::new(Mutex::new(ScopeChannels::default()))
		});
		Some(entry.clone())
	}

	/// Unlinks a scope entry if it is still empty.
	fn prune(&self, scope: &ScopeKey) {
		let mut scopes = self.scopes.write();
		let Some(entry) = scopes.get(scope).cloned() else {
			return;
		};

		let mut channels = entry.lock();
		if channels.senders.is_empty() && !channels.retired {
			channels.retired = true;
			drop(channels);
			scopes.remove(scope);
			debug!(scope = %scope, "Pruned empty subscriber set");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use beacon_flags_core::FlagValue;
	use std::time::Duration;
	use tokio::time::timeout;

	fn update(key: &str) -> FlagChangeEvent {
		FlagChangeEvent::updated(key, FlagValue::Boolean(true), Some("on".to_string()))
	}

	#[tokio::test]
	async fn test_subscribe_and_broadcast() {
		let hub = FlagsHub::with_defaults();
		let scope = ScopeKey::new("projA", "prod");

		let mut sub = hub.subscribe(&scope);
		assert_eq!(hub.subscriber_count(&scope), 1);

		let outcome = hub.broadcast(&scope, update("dark-mode"));
		assert_eq!(outcome, BroadcastOutcome { delivered: 1, dropped: 0 });

		let received = timeout(Duration::from_millis(100), sub.recv())
			.await
			.unwrap()
			.unwrap();
		assert_eq!(received.flag_key, "dark-mode");
	}

	#[tokio::test]
	async fn test_scope_isolation() {
		let hub = FlagsHub::with_defaults();
		let prod = ScopeKey::new("projA", "prod");
		let dev = ScopeKey::new("projA", "dev");

		let mut prod_sub = hub.subscribe(&prod);
		let mut dev_sub = hub.subscribe(&dev);

		hub.broadcast(&prod, update("dark-mode"));

		assert!(prod_sub.try_recv().is_some());
		assert!(dev_sub.try_recv().is_none());
	}

	#[test]
	fn test_broadcast_without_subscribers() {
		let hub = FlagsHub::with_defaults();
		let outcome = hub.broadcast(&ScopeKey::new("projA", "prod"), update("dark-mode"));
		assert_eq!(outcome, BroadcastOutcome::default());
	}

	#[test]
	fn test_full_queue_drops_events() {
		let hub = FlagsHub::new(HubConfig {
			subscriber_capacity: 2,
		});
		let scope = ScopeKey::new("projA", "prod");
		let mut slow = hub.subscribe(&scope);
		let mut fast = hub.subscribe(&scope);

		let mut total = BroadcastOutcome::default();
		for i in 0..5 {
			let outcome = hub.broadcast(&scope, update(&format!("flag-{i}")));
			// fast keeps up, slow never reads
			assert!(fast.try_recv().is_some());
			total.delivered += outcome.delivered;
			total.dropped += outcome.dropped;
		}

		assert_eq!(total, BroadcastOutcome { delivered: 7, dropped: 3 });
		assert_eq!(slow.try_recv().unwrap().flag_key, "flag-0");
		assert_eq!(slow.try_recv().unwrap().flag_key, "flag-1");
		assert!(slow.try_recv().is_none());
		assert_eq!(hub.stats().events_dropped, 3);
	}

	#[tokio::test]
	async fn test_unsubscribe_is_idempotent_and_prunes() {
		let hub = FlagsHub::with_defaults();
		let scope = ScopeKey::new("projA", "prod");

		let mut sub = hub.subscribe(&scope);
		assert_eq!(hub.scope_count(), 1);

		hub.unsubscribe(&mut sub);
		hub.unsubscribe(&mut sub);

		assert_eq!(hub.subscriber_count(&scope), 0);
		assert_eq!(hub.scope_count(), 0);
		assert!(sub.recv().await.is_none());
		assert_eq!(hub.broadcast(&scope, update("dark-mode")).delivered, 0);
	}

	#[test]
	fn test_unsubscribe_keeps_other_subscribers() {
		let hub = FlagsHub::with_defaults();
		let scope = ScopeKey::new("projA", "prod");

		let mut first = hub.subscribe(&scope);
		let mut second = hub.subscribe(&scope);
		hub.unsubscribe(&mut first);

		assert_eq!(hub.subscriber_count(&scope), 1);
		assert_eq!(hub.broadcast(&scope, update("dark-mode")).delivered, 1);
		assert!(second.try_recv().is_some());
	}

	#[test]
	fn test_dropped_subscription_is_cleaned_up_on_broadcast() {
		let hub = FlagsHub::with_defaults();
		let scope = ScopeKey::new("projA", "prod");

		drop(hub.subscribe(&scope));
		let outcome = hub.broadcast(&scope, update("dark-mode"));

		assert_eq!(outcome, BroadcastOutcome::default());
		assert_eq!(hub.scope_count(), 0);
	}

	#[tokio::test]
	async fn test_close_terminates_subscriptions() {
		let hub = FlagsHub::with_defaults();
		let mut a = hub.subscribe(&ScopeKey::new("projA", "prod"));
		let mut b = hub.subscribe(&ScopeKey::new("projB", "prod"));

		hub.broadcast(&ScopeKey::new("projA", "prod"), update("dark-mode"));
		hub.close();

		// Buffered events drain before the close is observed
		assert!(a.recv().await.is_some());
		assert!(a.recv().await.is_none());
		assert!(b.recv().await.is_none());
		assert_eq!(hub.scope_count(), 0);
	}

	#[test]
	fn test_subscribe_after_close_is_closed() {
		let hub = FlagsHub::with_defaults();
		hub.close();

		let scope = ScopeKey::new("projA", "prod");
		let mut sub = hub.subscribe(&scope);

		assert!(tokio_test::block_on(sub.recv()).is_none());
		assert_eq!(hub.subscriber_count(&scope), 0);
		hub.unsubscribe(&mut sub);
	}

	#[test]
	fn test_stats() {
		let hub = FlagsHub::with_defaults();
		let scope = ScopeKey::new("projA", "prod");

		let mut sub = hub.subscribe(&scope);
		let _other = hub.subscribe(&ScopeKey::new("projB", "prod"));
		hub.broadcast(&scope, update("dark-mode"));
		hub.unsubscribe(&mut sub);

		let stats = hub.stats();
		assert_eq!(stats.scope_count, 1);
		assert_eq!(stats.subscriber_count, 1);
		assert_eq!(stats.events_broadcast, 1);
		assert_eq!(stats.events_dropped, 0);
		assert_eq!(stats.total_subscriptions, 2);
	}

	#[test]
	fn test_resubscribe_after_prune() {
		let hub = FlagsHub::with_defaults();
		let scope = ScopeKey::new("projA", "prod");

		let mut first = hub.subscribe(&scope);
		hub.unsubscribe(&mut first);

		let mut second = hub.subscribe(&scope);
		assert_eq!(hub.broadcast(&scope, update("dark-mode")).delivered, 1);
		assert!(second.try_recv().is_some());
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn test_concurrent_subscribe_unsubscribe() {
		let hub = Arc::new(FlagsHub::with_defaults());
		let scope = ScopeKey::new("projA", "prod");

		let tasks: Vec<_> = (0..8)
			.map(|_| {
				let hub = hub.clone();
				let scope = scope.clone();
				tokio::spawn(async move {
					for _ in 0..200 {
						let mut sub = hub.subscribe(&scope);
						hub.broadcast(&scope, update("dark-mode"));
						hub.unsubscribe(&mut sub);
						tokio::task::yield_now().await;
					}
				})
			})
			.collect();

		for task in tasks {
			task.await.unwrap();
		}

		assert_eq!(hub.subscriber_count(&scope), 0);
		assert_eq!(hub.scope_count(), 0);
		assert_eq!(hub.stats().total_subscriptions, 1600);
	}
}
