// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

use thiserror::Error;

use beacon_flags_core::ScopeKey;

/// Errors specific to the feature flags server.
#[derive(Debug, Error)]
pub enum FlagsServerError {
	#[error(transparent)]
	Core(#[from] beacon_flags_core::FlagsError),

	#[error("flag not found: {flag_key} in {scope}")]
	FlagNotFound { scope: ScopeKey, flag_key: String },

	#[error("store read failed for {scope}: {message}")]
	StoreRead { scope: String, message: String },

	#[error("failed to read snapshot {path}: {source}")]
	SnapshotRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("stream closed by peer")]
	StreamClosed,

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("internal error: {0}")]
	Internal(String),
}

pub type Result<T> = std::result::Result<T, FlagsServerError>;
