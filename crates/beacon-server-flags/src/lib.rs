// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Feature flag serving path for Beacon.
//!
//! This crate keeps flag configuration in memory, evaluates flags against
//! request contexts and pushes configuration changes to live subscribers.
//!
//! # Architecture
//!
//! - `store` - Read interface to persisted configuration, plus an in-memory store
//! - `cache` - Scope-partitioned configuration snapshots
//! - `evaluation` - Pure flag evaluation engine
//! - `hub` - Scoped change notification fan-out
//! - `stream` - Streaming connection guard and pump
//! - `usage` - Fire-and-forget evaluation tracking
//! - `service` - Facade tying the above together
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use beacon_server_flags::{FlagsService, InMemoryFlagStore, ServiceConfig};
//! use beacon_flags_core::{EvaluationContext, ScopeKey};
//!
//! let store = Arc::new(InMemoryFlagStore::from_snapshot_file("flags.json")?);
//! let service = FlagsService::new(store, ServiceConfig::default());
//! service.load_all().await?;
//!
//! let scope = ScopeKey::new("projA", "prod");
//! let context = EvaluationContext::new().with_user_id("user123");
//! let result = service.evaluate(&scope, "dark-mode", &context)?;
//! ```

pub mod cache;
pub mod error;
pub mod evaluation;
pub mod hub;
pub mod service;
pub mod store;
pub mod stream;
pub mod usage;

pub use cache::{CachedFlag, FlagCache, ScopeFlags, ScopeStats};
pub use error::{FlagsServerError, Result};
pub use evaluation::{bucket_for, evaluate_all, evaluate_flag};
pub use hub::{BroadcastOutcome, FlagsHub, HubConfig, HubStats, Subscription, SubscriptionId};
pub use service::{FlagsService, ServiceConfig};
pub use store::{FlagStore, InMemoryFlagStore, ScopeData, Snapshot, SnapshotFlag, SnapshotScope};
pub use stream::{run_stream, EventSink, StreamEnd, StreamMessage, SubscriptionGuard};
pub use usage::{FlagUsage, NoopUsageSink, StaleFlag, UsageConfig, UsageEvent, UsageSink, UsageTracker};

// Re-export core types for convenience
pub use beacon_flags_core::*;
