// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Change events streamed to connected subscribers.
//!
//! # Wire format
//!
//! ```json
//! {"type": "update", "flag_key": "dark-mode", "value": true, "variant": "on"}
//! {"type": "delete", "flag_key": "dark-mode"}
//! ```

use serde::{Deserialize, Serialize};

use crate::FlagValue;

/// Kind of configuration change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
	Update,
	Delete,
}

/// A flag configuration change within one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagChangeEvent {
	#[serde(rename = "type")]
	pub kind: ChangeKind,
	pub flag_key: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub value: Option<FlagValue>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub variant: Option<String>,
}

impl FlagChangeEvent {
	/// A flag or its environment config changed.
	pub fn updated(
		flag_key: impl Into<String>,
		value: FlagValue,
		variant: Option<String>,
	) -> Self {
		Self {
			kind: ChangeKind::Update,
			flag_key: flag_key.into(),
			value: Some(value),
			variant,
		}
	}

	/// A flag was deleted. Carries no value.
	pub fn deleted(flag_key: impl Into<String>) -> Self {
		Self {
			kind: ChangeKind::Delete,
			flag_key: flag_key.into(),
			value: None,
			variant: None,
		}
	}

	pub fn event_type(&self) -> &'static str {
		match self.kind {
			ChangeKind::Update => "update",
			ChangeKind::Delete => "delete",
		}
	}
}
