// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Read interface to the persistent flag store.
//!
//! The cache only needs a scoped, atomic read of every flag and its
//! environment config. [`InMemoryFlagStore`] implements it for tests and for
//! deployments that serve a JSON snapshot file.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use beacon_flags_core::{EnvironmentConfig, Flag, FlagsError, ScopeKey};

use crate::error::{FlagsServerError, Result};

/// Complete configuration of one scope as read from the store.
#[derive(Debug, Clone, Default)]
pub struct ScopeData {
	pub flags: Vec<(Flag, EnvironmentConfig)>,
}

/// Store trait consumed by the configuration cache.
#[async_trait]
pub trait FlagStore: Send + Sync {
	/// Every (project, environment) scope that currently has configuration.
	async fn list_scopes(&self) -> Result<Vec<ScopeKey>>;

	/// All flags and configs for one scope. An unknown scope yields no flags.
	async fn load_scope(&self, scope: &ScopeKey) -> Result<ScopeData>;
}

/// On-disk snapshot layout accepted by [`InMemoryFlagStore::from_snapshot_file`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
	#[serde(default)]
	pub scopes: Vec<SnapshotScope>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotScope {
	pub project: String,
	pub environment: String,
	#[serde(default)]
	pub flags: Vec<SnapshotFlag>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFlag {
	pub flag: Flag,
	pub config: EnvironmentConfig,
}

type ScopeFlags = BTreeMap<String, (Flag, EnvironmentConfig)>;

/// Flag store held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryFlagStore {
	scopes: RwLock<HashMap<ScopeKey, ScopeFlags>>,
}

impl InMemoryFlagStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Builds a store from a parsed snapshot, validating every entry.
	pub fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
		let store = Self::new();
		for scope in snapshot.scopes {
			let key = ScopeKey::new(scope.project, scope.environment);
			for entry in scope.flags {
				store.upsert(&key, entry.flag, entry.config)?;
			}
		}
		Ok(store)
	}

	/// Reads and validates a JSON snapshot file.
	#[instrument(skip_all, fields(path = %path.as_ref().display()))]
	pub fn from_snapshot_file(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let content = std::fs::read_to_string(path).map_err(|e| FlagsServerError::SnapshotRead {
			path: path.to_path_buf(),
			source: e,
		})?;
		let snapshot: Snapshot = serde_json::from_str(&content)?;
		let store = Self::from_snapshot(snapshot)?;
		info!(scopes = store.scopes.read().len(), "Loaded flag snapshot");
		Ok(store)
	}

	/// Inserts or replaces a flag and its config within a scope.
	///
	/// Rejects malformed keys, invalid configs, and a key already used by a
	/// different flag elsewhere in the same project.
	pub fn upsert(&self, scope: &ScopeKey, flag: Flag, config: EnvironmentConfig) -> Result<()> {
		if !Flag::validate_key(&flag.key) {
			return Err(FlagsError::InvalidFlagKey(flag.key).into());
		}
		config.validate(&flag)?;

		let mut scopes = self.scopes.write();

		let conflict = scopes
			.iter()
			.filter(|(key, _)| key.project == scope.project)
			.filter_map(|(_, flags)| flags.get(&flag.key))
			.any(|(existing, _)| existing.id != flag.id);
		if conflict {
			return Err(FlagsError::DuplicateFlagKey(flag.key).into());
		}

		debug!(scope = %scope, flag_key = %flag.key, "Upserting flag");
		scopes
			.entry(scope.clone())
			.or_default()
			.insert(flag.key.clone(), (flag, config));
		Ok(())
	}

	/// Removes a flag from one scope. Returns whether it existed.
	pub fn remove_flag(&self, scope: &ScopeKey, flag_key: &str) -> bool {
		let mut scopes = self.scopes.write();
		let Some(flags) = scopes.get_mut(scope) else {
			return false;
		};
		let removed = flags.remove(flag_key).is_some();
		if flags.is_empty() {
			scopes.remove(scope);
		}
		removed
	}

	/// Removes every flag in a scope. Returns whether the scope existed.
	pub fn remove_scope(&self, scope: &ScopeKey) -> bool {
		self.scopes.write().remove(scope).is_some()
	}
}

#[async_trait]
impl FlagStore for InMemoryFlagStore {
	async fn list_scopes(&self) -> Result<Vec<ScopeKey>> {
		let mut scopes: Vec<ScopeKey> = self.scopes.read().keys().cloned().collect();
		scopes.sort();
		Ok(scopes)
	}

	async fn load_scope(&self, scope: &ScopeKey) -> Result<ScopeData> {
		let scopes = self.scopes.read();
		let flags = scopes
			.get(scope)
			.map(|flags| flags.values().cloned().collect())
			.unwrap_or_default();
		Ok(ScopeData { flags })
	}
}
