// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Errors that can occur in the feature flags domain.
#[derive(Debug, Error)]
pub enum FlagsError {
	#[error("flag not found: {0}")]
	FlagNotFound(String),

	#[error("invalid flag key: {0}")]
	InvalidFlagKey(String),

	#[error("duplicate flag key: {0}")]
	DuplicateFlagKey(String),

	#[error("duplicate variant key: {0}")]
	DuplicateVariantKey(String),

	#[error("variant not found: {0}")]
	VariantNotFound(String),

	#[error("variant {variant} does not match flag value type {expected}")]
	ValueTypeMismatch { variant: String, expected: String },

	#[error("flag default value does not match flag value type {expected}")]
	DefaultValueTypeMismatch { expected: String },

	#[error("percentage rollout must be between 0 and 100, got {0}")]
	InvalidRollout(u8),

	#[error("config belongs to flag {config_flag}, not {flag}")]
	ConfigFlagMismatch { flag: String, config_flag: String },

	#[error("invalid scope key: {0}")]
	InvalidScopeKey(String),

	#[error("serialization error: {0}")]
	Serialization(String),
}

impl From<serde_json::Error> for FlagsError {
	fn from(err: serde_json::Error) -> Self {
		FlagsError::Serialization(err.to_string())
	}
}

pub type Result<T> = std::result::Result<T, FlagsError>;
