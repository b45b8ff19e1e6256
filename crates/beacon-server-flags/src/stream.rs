// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Streaming connection plumbing.
//!
//! A streaming handler owns exactly one [`SubscriptionGuard`]. Dropping the
//! guard deregisters the subscription, so every exit path of the handler
//! (completion, error, cancellation, panic unwind) cleans up.
//!
//! # Messages
//!
//! ```json
//! {"event": "change", "data": {"type": "update", "flag_key": "dark-mode", "value": true, "variant": "on"}}
//! {"event": "heartbeat", "data": {"timestamp": "2025-01-01T00:00:00Z"}}
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use beacon_flags_core::{FlagChangeEvent, ScopeKey};

use crate::error::{FlagsServerError, Result};
use crate::hub::{FlagsHub, Subscription, SubscriptionId};

/// Owns a subscription and unsubscribes it when dropped.
pub struct SubscriptionGuard {
	hub: Arc<FlagsHub>,
	subscription: Subscription,
}

impl SubscriptionGuard {
	pub fn new(hub: Arc<FlagsHub>, subscription: Subscription) -> Self {
		Self { hub, subscription }
	}

	pub fn id(&self) -> SubscriptionId {
		self.subscription.id()
	}

	pub fn scope(&self) -> &ScopeKey {
		self.subscription.scope()
	}

	pub async fn recv(&mut self) -> Option<FlagChangeEvent> {
		self.subscription.recv().await
	}
}

impl Drop for SubscriptionGuard {
	fn drop(&mut self) {
		self.hub.unsubscribe(&mut self.subscription);
	}
}

/// A message written to a streaming client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StreamMessage {
	Change(FlagChangeEvent),
	Heartbeat(HeartbeatData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatData {
	pub timestamp: DateTime<Utc>,
}

impl StreamMessage {
	pub fn heartbeat() -> Self {
		StreamMessage::Heartbeat(HeartbeatData {
			timestamp: Utc::now(),
		})
	}
}

/// Destination of a streaming connection, e.g. an SSE or WebSocket writer.
#[async_trait]
pub trait EventSink: Send {
	async fn send(&mut self, message: StreamMessage) -> Result<()>;
}

#[async_trait]
impl EventSink for mpsc::Sender<StreamMessage> {
	async fn send(&mut self, message: StreamMessage) -> Result<()> {
		mpsc::Sender::send(self, message)
			.await
			.map_err(|_| FlagsServerError::StreamClosed)
	}
}

/// Why a stream stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
	Cancelled,
	HubClosed,
}

/// Pumps change events and heartbeats into a sink until cancelled, the hub
/// closes, or the sink fails. The guard is consumed and dropped on return.
///
/// Cancellation also interrupts a send that is blocked on a full sink.
#[instrument(skip_all, fields(scope = %guard.scope(), subscription_id = %guard.id()))]
pub async fn run_stream<S>(
	mut guard: SubscriptionGuard,
	sink: &mut S,
	heartbeat: Duration,
	cancel: CancellationToken,
) -> Result<StreamEnd>
where
	S: EventSink + ?Sized,
{
	let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

	debug!("Stream started");

	let end = loop {
		let message = tokio::select! {
			_ = cancel.cancelled() => break StreamEnd::Cancelled,
			_ = ticker.tick() => StreamMessage::heartbeat(),
			event = guard.recv() => match event {
				Some(event) => StreamMessage::Change(event),
				None => break StreamEnd::HubClosed,
			},
		};

		tokio::select! {
			_ = cancel.cancelled() => break StreamEnd::Cancelled,
			result = sink.send(message) => result?,
		}
	};

	debug!(reason = ?end, "Stream ended");
	Ok(end)
}
