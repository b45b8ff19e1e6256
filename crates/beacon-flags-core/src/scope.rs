// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FlagsError;

/// Partition key for cached configuration and change subscriptions.
///
/// A scope is one (project, environment) pair. It renders as
/// `"project_key:environment_key"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeKey {
	pub project: String,
	pub environment: String,
}

impl ScopeKey {
	pub fn new(project: impl Into<String>, environment: impl Into<String>) -> Self {
		Self {
			project: project.into(),
			environment: environment.into(),
		}
	}
}

impl fmt::Display for ScopeKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.project, self.environment)
	}
}

impl FromStr for ScopeKey {
	type Err = FlagsError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.split_once(':') {
			Some((project, environment)) if !project.is_empty() && !environment.is_empty() => {
				Ok(Self::new(project, environment))
			}
			_ => Err(FlagsError::InvalidScopeKey(s.to_string())),
		}
	}
}
