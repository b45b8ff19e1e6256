// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FlagsError, Result};
use crate::rule::TargetingRule;

/// Unique identifier for a feature flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlagId(pub Uuid);

impl FlagId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for FlagId {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Display for FlagId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::str::FromStr for FlagId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// Unique identifier for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub Uuid);

impl ProjectId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for ProjectId {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Display for ProjectId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Unique identifier for an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvironmentId(pub Uuid);

impl EnvironmentId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for EnvironmentId {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Display for EnvironmentId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Declared type of the values a flag serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagValueType {
	Boolean,
	String,
	Number,
	Json,
}

impl std::fmt::Display for FlagValueType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			FlagValueType::Boolean => "boolean",
			FlagValueType::String => "string",
			FlagValueType::Number => "number",
			FlagValueType::Json => "json",
		};
		f.write_str(name)
	}
}

/// Lifecycle status of a flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagStatus {
	#[default]
	Active,
	PotentiallyStale,
	Stale,
	Archived,
}

/// A value served by a flag.
///
/// Serialized as the bare JSON value. Deserialization tries boolean, number
/// and string before falling back to an arbitrary JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
	Boolean(bool),
	Number(f64),
	String(String),
	Json(serde_json::Value),
}

impl FlagValue {
	/// Returns the value as a boolean if it is one.
	pub fn as_bool(&self) -> Option<bool> {
		match self {
			FlagValue::Boolean(b) => Some(*b),
			_ => None,
		}
	}

	/// Returns the value as a string if it is one.
	pub fn as_str(&self) -> Option<&str> {
		match self {
			FlagValue::String(s) => Some(s),
			_ => None,
		}
	}

	/// Returns the value as a number if it is one.
	pub fn as_f64(&self) -> Option<f64> {
		match self {
			FlagValue::Number(n) => Some(*n),
			_ => None,
		}
	}

	/// Whether this value is acceptable for a flag of the given type.
	///
	/// JSON-typed flags accept any value, since a scalar is a valid document.
	pub fn matches_type(&self, value_type: FlagValueType) -> bool {
		matches!(
			(self, value_type),
			(FlagValue::Boolean(_), FlagValueType::Boolean)
				| (FlagValue::String(_), FlagValueType::String)
				| (FlagValue::Number(_), FlagValueType::Number)
				| (_, FlagValueType::Json)
		)
	}

	pub fn to_json(&self) -> serde_json::Value {
		match self {
			FlagValue::Boolean(b) => serde_json::Value::Bool(*b),
			FlagValue::Number(n) => serde_json::Number::from_f64(*n)
				.map(serde_json::Value::Number)
				.unwrap_or(serde_json::Value::Null),
			FlagValue::String(s) => serde_json::Value::String(s.clone()),
			FlagValue::Json(v) => v.clone(),
		}
	}
}

/// A feature flag. Per-environment behaviour lives in [`EnvironmentConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flag {
	pub id: FlagId,
	pub project_id: ProjectId,
	/// Unique within the project, e.g. "dark-mode" or "checkout.new_flow"
	pub key: String,
	pub name: String,
	#[serde(default)]
	pub description: Option<String>,
	pub value_type: FlagValueType,
	#[serde(default)]
	pub category: Option<String>,
	/// Served whenever nothing more specific applies
	pub default_value: FlagValue,
	#[serde(default)]
	pub tags: Vec<String>,
	#[serde(default)]
	pub status: FlagStatus,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Flag {
	/// Validates the flag key format.
	///
	/// Valid keys:
	/// - 1-100 characters, starting with a lowercase letter
	/// - Lowercase alphanumerics, `_`, `-` and `.`
	/// - No empty dot-separated segments
	pub fn validate_key(key: &str) -> bool {
		if key.is_empty() || key.len() > 100 {
			return false;
		}

		let mut chars = key.chars();

		match chars.next() {
			Some(c) if c.is_ascii_lowercase() => {}
			_ => return false,
		}

		let mut prev_was_dot = false;
		for c in chars {
			if c == '.' {
				if prev_was_dot {
					return false;
				}
				prev_was_dot = true;
			} else if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
				prev_was_dot = false;
			} else {
				return false;
			}
		}

		!prev_was_dot
	}

	pub fn is_archived(&self) -> bool {
		self.status == FlagStatus::Archived
	}
}

/// One named value a flag can serve in an environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
	pub key: String,
	pub value: FlagValue,
}

impl Variant {
	pub fn new(key: impl Into<String>, value: FlagValue) -> Self {
		Self {
			key: key.into(),
			value,
		}
	}
}

/// Per-environment configuration for a flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
	pub flag_id: FlagId,
	pub environment_id: EnvironmentId,
	pub enabled: bool,
	/// Variant served when no rule applies; falls back to the flag default
	#[serde(default)]
	pub default_variant: Option<String>,
	#[serde(default)]
	pub variants: Vec<Variant>,
	/// Evaluated in order, first match wins
	#[serde(default)]
	pub targeting_rules: Vec<TargetingRule>,
	pub updated_at: DateTime<Utc>,
}

impl EnvironmentConfig {
	/// An enabled config with no variants or rules.
	pub fn new(flag_id: FlagId, environment_id: EnvironmentId, enabled: bool) -> Self {
		Self {
			flag_id,
			environment_id,
			enabled,
			default_variant: None,
			variants: Vec::new(),
			targeting_rules: Vec::new(),
			updated_at: Utc::now(),
		}
	}

	/// Gets a variant by key.
	pub fn variant(&self, key: &str) -> Option<&Variant> {
		self.variants.iter().find(|v| v.key == key)
	}

	/// Checks the config against the flag it belongs to.
	///
	/// The flag's static default and every variant value must match the
	/// flag's value type, variant keys must be unique, and every variant
	/// reference (default and rule targets) must resolve.
	pub fn validate(&self, flag: &Flag) -> Result<()> {
		if self.flag_id != flag.id {
			return Err(FlagsError::ConfigFlagMismatch {
				flag: flag.id.to_string(),
				config_flag: self.flag_id.to_string(),
			});
		}

		if !flag.default_value.matches_type(flag.value_type) {
			return Err(FlagsError::DefaultValueTypeMismatch {
				expected: flag.value_type.to_string(),
			});
		}

		let mut seen = HashSet::new();
		for variant in &self.variants {
			if !seen.insert(variant.key.as_str()) {
				return Err(FlagsError::DuplicateVariantKey(variant.key.clone()));
			}
			if !variant.value.matches_type(flag.value_type) {
				return Err(FlagsError::ValueTypeMismatch {
					variant: variant.key.clone(),
					expected: flag.value_type.to_string(),
				});
			}
		}

		if let Some(default_variant) = &self.default_variant {
			if !seen.contains(default_variant.as_str()) {
				return Err(FlagsError::VariantNotFound(default_variant.clone()));
			}
		}

		for rule in &self.targeting_rules {
			if !seen.contains(rule.variant.as_str()) {
				return Err(FlagsError::VariantNotFound(rule.variant.clone()));
			}
			if let Some(pct) = rule.percentage_rollout {
				if pct > 100 {
					return Err(FlagsError::InvalidRollout(pct));
				}
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::rule::{Condition, Operator};
	use proptest::prelude::*;

	fn boolean_flag() -> Flag {
		Flag {
			id: FlagId::new(),
			project_id: ProjectId::new(),
			key: "dark-mode".to_string(),
			name: "Dark mode".to_string(),
			description: None,
			value_type: FlagValueType::Boolean,
			category: None,
			default_value: FlagValue::Boolean(false),
			tags: vec![],
			status: FlagStatus::Active,
			created_at: Utc::now(),
			updated_at: Utc::now(),
		}
	}

	fn on_off_config(flag: &Flag) -> EnvironmentConfig {
		let mut config = EnvironmentConfig::new(flag.id, EnvironmentId::new(), true);
		config.variants = vec![
			Variant::new("on", FlagValue::Boolean(true)),
			Variant::new("off", FlagValue::Boolean(false)),
		];
		config.default_variant = Some("off".to_string());
		config
	}

	#[test]
	fn test_validate_flag_key_valid() {
		assert!(Flag::validate_key("dark-mode"));
		assert!(Flag::validate_key("checkout.new_flow"));
		assert!(Flag::validate_key("a"));
		assert!(Flag::validate_key("ai.model.v2"));
	}

	#[test]
	fn test_validate_flag_key_invalid() {
		assert!(!Flag::validate_key(""));
		assert!(!Flag::validate_key(".checkout"));
		assert!(!Flag::validate_key("checkout."));
		assert!(!Flag::validate_key("checkout..flow"));
		assert!(!Flag::validate_key("Checkout"));
		assert!(!Flag::validate_key("check out"));
		assert!(!Flag::validate_key("1checkout"));
		assert!(!Flag::validate_key(&"a".repeat(101)));
	}

	#[test]
	fn test_flag_value_serializes_bare() {
		assert_eq!(serde_json::to_string(&FlagValue::Boolean(true)).unwrap(), "true");
		assert_eq!(
			serde_json::to_string(&FlagValue::String("blue".to_string())).unwrap(),
			r#""blue""#
		);

		let parsed: FlagValue = serde_json::from_str("42").unwrap();
		assert_eq!(parsed, FlagValue::Number(42.0));

		let parsed: FlagValue = serde_json::from_str(r#"{"theme":"dark"}"#).unwrap();
		assert_eq!(
			parsed,
			FlagValue::Json(serde_json::json!({"theme": "dark"}))
		);
	}

	#[test]
	fn test_matches_type() {
		assert!(FlagValue::Boolean(true).matches_type(FlagValueType::Boolean));
		assert!(!FlagValue::Boolean(true).matches_type(FlagValueType::String));
		assert!(FlagValue::Number(1.5).matches_type(FlagValueType::Number));
		assert!(FlagValue::Boolean(true).matches_type(FlagValueType::Json));
	}

	#[test]
	fn test_config_validate_ok() {
		let flag = boolean_flag();
		let mut config = on_off_config(&flag);
		config.targeting_rules = vec![TargetingRule::new(
			vec![Condition::new("plan", Operator::Equals, "enterprise")],
			"on",
		)];
		assert!(config.validate(&flag).is_ok());
	}

	#[test]
	fn test_config_validate_duplicate_variant() {
		let flag = boolean_flag();
		let mut config = on_off_config(&flag);
		config
			.variants
			.push(Variant::new("on", FlagValue::Boolean(true)));
		assert!(matches!(
			config.validate(&flag),
			Err(FlagsError::DuplicateVariantKey(k)) if k == "on"
		));
	}

	#[test]
	fn test_config_validate_type_mismatch() {
		let flag = boolean_flag();
		let mut config = on_off_config(&flag);
		config.variants[0].value = FlagValue::String("yes".to_string());
		assert!(matches!(
			config.validate(&flag),
			Err(FlagsError::ValueTypeMismatch { .. })
		));
	}

	#[test]
	fn test_config_validate_default_value_type() {
		let mut flag = boolean_flag();
		flag.default_value = FlagValue::String("off".to_string());
		let config = on_off_config(&flag);
		assert!(matches!(
			config.validate(&flag),
			Err(FlagsError::DefaultValueTypeMismatch { expected }) if expected == "boolean"
		));
	}

	#[test]
	fn test_config_validate_dangling_references() {
		let flag = boolean_flag();
		let mut config = on_off_config(&flag);
		config.default_variant = Some("missing".to_string());
		assert!(matches!(
			config.validate(&flag),
			Err(FlagsError::VariantNotFound(_))
		));

		let mut config = on_off_config(&flag);
		config.targeting_rules = vec![TargetingRule::new(vec![], "missing")];
		assert!(matches!(
			config.validate(&flag),
			Err(FlagsError::VariantNotFound(_))
		));
	}

	#[test]
	fn test_config_validate_rollout_bounds() {
		let flag = boolean_flag();
		let mut config = on_off_config(&flag);
		config.targeting_rules = vec![TargetingRule::new(vec![], "on").with_rollout(101)];
		assert!(matches!(
			config.validate(&flag),
			Err(FlagsError::InvalidRollout(101))
		));
	}

	proptest! {
		#[test]
		fn prop_keys_with_uppercase_start_fail(key in "[A-Z][a-z0-9_-]{0,20}") {
			prop_assert!(!Flag::validate_key(&key));
		}

		#[test]
		fn prop_dashed_keys_pass(a in "[a-z][a-z0-9]{0,10}", b in "[a-z0-9]{1,10}") {
			let key = format!("{}-{}", a, b);
			prop_assert!(Flag::validate_key(&key));
		}
	}
}
