// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flag store configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_snapshot_path() -> PathBuf {
	PathBuf::from("/var/lib/beacon/flags.json")
}

/// Flag store configuration (runtime, fully resolved).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
	/// JSON snapshot served by the in-memory store
	pub snapshot_path: PathBuf,
}

impl Default for StoreConfig {
	fn default() -> Self {
		Self {
			snapshot_path: default_snapshot_path(),
		}
	}
}

/// Flag store configuration layer (partial, for merging).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfigLayer {
	#[serde(default)]
	pub snapshot_path: Option<PathBuf>,
}

impl StoreConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.snapshot_path.is_some() {
			self.snapshot_path = other.snapshot_path;
		}
	}

	pub fn finalize(self) -> StoreConfig {
		StoreConfig {
			snapshot_path: self.snapshot_path.unwrap_or_else(default_snapshot_path),
		}
	}
}
