// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::FlagValue;

/// Request-time context passed by SDKs for flag evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationContext {
	/// Subject identity used for sticky percentage bucketing
	#[serde(default)]
	pub user_id: Option<String>,
	#[serde(default)]
	pub attributes: HashMap<String, serde_json::Value>,
}

impl EvaluationContext {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
		self.user_id = Some(user_id.into());
		self
	}

	pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
		self.attributes.insert(key.into(), value);
		self
	}

	/// Identity used for bucketing. Anonymous contexts bucket as `""`.
	pub fn subject(&self) -> &str {
		self.user_id.as_deref().unwrap_or("")
	}

	pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
		self.attributes.get(name)
	}
}

/// Result of evaluating a feature flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
	pub value: FlagValue,
	/// Empty when no variant was resolved
	pub variant: String,
	pub reason: EvaluationReason,
}

impl EvaluationResult {
	pub fn new(value: FlagValue, variant: impl Into<String>, reason: EvaluationReason) -> Self {
		Self {
			value,
			variant: variant.into(),
			reason,
		}
	}
}

/// Why an evaluation resolved the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationReason {
	/// Flag is archived; static default served
	Archived,
	/// Flag disabled in this environment
	Disabled,
	/// A targeting rule without rollout matched
	RuleMatch,
	/// A targeting rule matched and the subject fell inside its rollout
	RolloutMatch,
	/// No rule applied
	Default,
}

impl EvaluationReason {
	pub fn as_str(&self) -> &'static str {
		match self {
			EvaluationReason::Archived => "archived",
			EvaluationReason::Disabled => "disabled",
			EvaluationReason::RuleMatch => "rule_match",
			EvaluationReason::RolloutMatch => "rollout_match",
			EvaluationReason::Default => "default",
		}
	}
}

/// Bulk evaluation results keyed by flag key.
pub type BulkEvaluation = BTreeMap<String, EvaluationResult>;
