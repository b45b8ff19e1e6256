// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flag serving configuration section.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 16;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_USAGE_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_STALE_AFTER_DAYS: u32 = 30;

/// Flag serving configuration (runtime, fully resolved).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagsConfig {
	/// Events buffered per streaming subscriber
	pub subscriber_capacity: usize,
	pub heartbeat_interval_secs: u64,
	pub usage_queue_capacity: usize,
	pub stale_after_days: u32,
}

impl FlagsConfig {
	pub fn heartbeat_interval(&self) -> Duration {
		Duration::from_secs(self.heartbeat_interval_secs)
	}
}

impl Default for FlagsConfig {
	fn default() -> Self {
		Self {
			subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
			heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
			usage_queue_capacity: DEFAULT_USAGE_QUEUE_CAPACITY,
			stale_after_days: DEFAULT_STALE_AFTER_DAYS,
		}
	}
}

/// Flag serving configuration layer (partial, for merging).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlagsConfigLayer {
	#[serde(default)]
	pub subscriber_capacity: Option<usize>,
	#[serde(default)]
	pub heartbeat_interval_secs: Option<u64>,
	#[serde(default)]
	pub usage_queue_capacity: Option<usize>,
	#[serde(default)]
	pub stale_after_days: Option<u32>,
}

impl FlagsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.subscriber_capacity.is_some() {
			self.subscriber_capacity = other.subscriber_capacity;
		}
		if other.heartbeat_interval_secs.is_some() {
			self.heartbeat_interval_secs = other.heartbeat_interval_secs;
		}
		if other.usage_queue_capacity.is_some() {
			self.usage_queue_capacity = other.usage_queue_capacity;
		}
		if other.stale_after_days.is_some() {
			self.stale_after_days = other.stale_after_days;
		}
	}

	pub fn finalize(self) -> FlagsConfig {
		FlagsConfig {
			subscriber_capacity: self
				.subscriber_capacity
				.unwrap_or(DEFAULT_SUBSCRIBER_CAPACITY),
			heartbeat_interval_secs: self
				.heartbeat_interval_secs
				.unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS),
			usage_queue_capacity: self
				.usage_queue_capacity
				.unwrap_or(DEFAULT_USAGE_QUEUE_CAPACITY),
			stale_after_days: self.stale_after_days.unwrap_or(DEFAULT_STALE_AFTER_DAYS),
		}
	}
}
