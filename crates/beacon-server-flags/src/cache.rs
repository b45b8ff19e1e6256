// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory configuration cache for the serving path.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          FlagCache                            │
//! │  scopes: RwLock<HashMap<ScopeKey, Arc<ScopeSlot>>>            │
//! │            (held only to find or create a slot)               │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │
//!      ┌─────────────────────────┼─────────────────────────┐
//!      ▼                         ▼                         ▼
//! ┌───────────────┐      ┌───────────────┐      ┌───────────────┐
//! │ projA:prod    │      │ projA:staging │      │ projB:prod    │
//! │ RwLock<Arc<   │      │ RwLock<Arc<   │      │ RwLock<Arc<   │
//! │  Snapshot>>   │      │  Snapshot>>   │      │  Snapshot>>   │
//! └───────────────┘      └───────────────┘      └───────────────┘
//! ```
//!
//! A refresh reads the store with no lock held, builds a complete new
//! snapshot and swaps the pointer. Readers clone the `Arc` and never see a
//! partially replaced scope. Each refresh takes a generation number before
//! reading; a read that finishes after a newer one is discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use beacon_flags_core::{EnvironmentConfig, Flag, ScopeKey};

use crate::error::Result;
use crate::store::FlagStore;

/// Immutable cache entry for one flag in one scope.
#[derive(Debug, Clone)]
pub struct CachedFlag {
	pub flag: Flag,
	pub config: EnvironmentConfig,
}

/// Every flag of one scope, keyed by flag key.
pub type ScopeFlags = Arc<HashMap<String, Arc<CachedFlag>>>;

/// Statistics for one cached scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeStats {
	pub flag_count: usize,
	pub loaded_at: DateTime<Utc>,
	pub generation: u64,
}

struct ScopeSnapshot {
	flags: ScopeFlags,
	loaded_at: DateTime<Utc>,
	generation: u64,
}

impl ScopeSnapshot {
	fn empty() -> Self {
		Self {
			flags: Arc::new(HashMap::new()),
			loaded_at: Utc::now(),
			generation: 0,
		}
	}
}

struct ScopeSlot {
	snapshot: RwLock<Arc<ScopeSnapshot>>,
	next_generation: AtomicU64,
	/// Store reads in flight. Incremented under the registry lock, and
	/// decremented under it when a read fails.
	pending: AtomicUsize,
}

impl ScopeSlot {
	fn new() -> Self {
		Self {
			snapshot: RwLock::new(Arc::new(ScopeSnapshot::empty())),
			next_generation: AtomicU64::new(0),
			pending: AtomicUsize::new(0),
		}
	}

	fn current(&self) -> Arc<ScopeSnapshot> {
		self.snapshot.read().clone()
	}
}

/// Scope-partitioned snapshot of flag configuration.
pub struct FlagCache {
	store: Arc<dyn FlagStore>,
	scopes: RwLock<HashMap<ScopeKey, Arc<ScopeSlot>>>,
	initialized: AtomicBool,
}

impl FlagCache {
	pub fn new(store: Arc<dyn FlagStore>) -> Self {
		Self {
			store,
			scopes: RwLock::new(HashMap::new()),
			initialized: AtomicBool::new(false),
		}
	}

	/// Loads every scope the store knows about.
	///
	/// Any store failure is returned; callers treat it as fatal at startup.
	#[instrument(skip(self))]
	pub async fn load_all(&self) -> Result<()> {
		let scopes = self.store.list_scopes().await?;
		let loaded = try_join_all(scopes.iter().map(|scope| self.load_into_slot(scope))).await?;

		let flag_count: usize = loaded.iter().sum();
		self.initialized.store(true, Ordering::Release);
		info!(scope_count = scopes.len(), flag_count, "Flag cache loaded");
		Ok(())
	}

	/// Re-reads one scope from the store and swaps it in.
	///
	/// On failure the previous snapshot stays in place, the error is logged
	/// and returned.
	#[instrument(skip(self), fields(scope = %scope))]
	pub async fn refresh(&self, scope: &ScopeKey) -> Result<()> {
		match self.load_into_slot(scope).await {
			Ok(flag_count) => {
				debug!(flag_count, "Refreshed scope");
				Ok(())
			}
			Err(e) => {
				warn!(error = %e, "Scope refresh failed, keeping previous snapshot");
				Err(e)
			}
		}
	}

	/// Full `flag_key -> entry` map for a scope. Unknown scopes are empty.
	pub fn get_flags(&self, scope: &ScopeKey) -> ScopeFlags {
		match self.slot(scope) {
			Some(slot) => slot.current().flags.clone(),
			None => Arc::new(HashMap::new()),
		}
	}

	/// Single entry lookup.
	pub fn get_flag(&self, scope: &ScopeKey, flag_key: &str) -> Option<Arc<CachedFlag>> {
		let slot = self.slot(scope)?;
		let snapshot = slot.current();
		snapshot.flags.get(flag_key).cloned()
	}

	/// Drops a scope, e.g. after its environment was deleted.
	pub fn remove_scope(&self, scope: &ScopeKey) -> bool {
		let removed = self.scopes.write().remove(scope).is_some();
		if removed {
			info!(scope = %scope, "Removed scope from flag cache");
		}
		removed
	}

	pub fn scope_stats(&self, scope: &ScopeKey) -> Option<ScopeStats> {
		let snapshot = self.slot(scope)?.current();
		Some(ScopeStats {
			flag_count: snapshot.flags.len(),
			loaded_at: snapshot.loaded_at,
			generation: snapshot.generation,
		})
	}

	pub fn scope_count(&self) -> usize {
		self.scopes.read().len()
	}

	/// Whether `load_all` has completed successfully.
	pub fn is_initialized(&self) -> bool {
		self.initialized.load(Ordering::Acquire)
	}

	fn slot(&self, scope: &ScopeKey) -> Option<Arc<ScopeSlot>> {
		self.scopes.read().get(scope).cloned()
	}

	/// Finds or creates the slot for a scope and registers a pending read on
	/// it while the registry lock is still held.
	fn acquire_slot(&self, scope: &ScopeKey) -> Arc<ScopeSlot> {
		{
			let scopes = self.scopes.read();
			if let Some(slot) = scopes.get(scope) {
				slot.pending.fetch_add(1, Ordering::AcqRel);
				return slot.clone();
			}
		}

		let mut scopes = self.scopes.write();
		let slot = scopes
			.entry(scope.clone())
			.or_insert_with(|| Arc::new(ScopeSlot::new()));
		slot.pending.fetch_add(1, Ordering::AcqRel);
		slot.clone()
	}

	/// Ends a failed read. A slot that never held a loaded snapshot and has
	/// no other read in flight is dropped so it does not count as a scope.
	fn release_failed(&self, scope: &ScopeKey, slot: &Arc<ScopeSlot>) {
		let mut scopes = self.scopes.write();
		let last = slot.pending.fetch_sub(1, Ordering::AcqRel) == 1;
		let registered = scopes
			.get(scope)
			.is_some_and(|current| Arc::ptr_eq(current, slot));

		if last && registered && slot.current().generation == 0 {
			scopes.remove(scope);
			debug!(scope = %scope, "Dropped never-loaded scope after failed read");
		}
	}

	/// Reads a scope and installs it unless a newer read already landed.
	/// Returns the number of flags read.
	async fn load_into_slot(&self, scope: &ScopeKey) -> Result<usize> {
		let slot = self.acquire_slot(scope);
		let generation = slot.next_generation.fetch_add(1, Ordering::AcqRel) + 1;

		let data = match self.store.load_scope(scope).await {
			Ok(data) => data,
			Err(e) => {
				self.release_failed(scope, &slot);
				return Err(e);
			}
		};

		let flags: HashMap<String, Arc<CachedFlag>> = data
			.flags
			.into_iter()
			.map(|(flag, config)| (flag.key.clone(), Arc::new(CachedFlag { flag, config })))
			.collect();
		let flag_count = flags.len();

		let fresh = Arc::new(ScopeSnapshot {
			flags: Arc::new(flags),
			loaded_at: Utc::now(),
			generation,
		});

		{
			let mut current = slot.snapshot.write();
			if generation > current.generation {
				*current = fresh;
			} else {
				debug!(
					scope = %scope,
					generation,
					installed = current.generation,
					"Discarding stale scope read"
				);
			}
		}
		slot.pending.fetch_sub(1, Ordering::AcqRel);

		Ok(flag_count)
	}
}
