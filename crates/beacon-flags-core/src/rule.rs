// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper bound on compiled pattern size for `matches` conditions.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// An ordered, conditional override of the variant a flag resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetingRule {
	/// All conditions must match (AND); empty matches everyone
	#[serde(default)]
	pub conditions: Vec<Condition>,
	/// Variant key served when the rule applies
	pub variant: String,
	/// 0-100, applied after conditions
	#[serde(default)]
	pub percentage_rollout: Option<u8>,
}

impl TargetingRule {
	pub fn new(conditions: Vec<Condition>, variant: impl Into<String>) -> Self {
		Self {
			conditions,
			variant: variant.into(),
			percentage_rollout: None,
		}
	}

	pub fn with_rollout(mut self, percentage: u8) -> Self {
		self.percentage_rollout = Some(percentage);
		self
	}
}

/// A single attribute test within a targeting rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
	/// e.g., "plan", "country", "age"
	pub attribute: String,
	pub operator: Operator,
	#[serde(default)]
	pub value: Value,
	#[serde(skip)]
	pattern: CompiledPattern,
}

impl Condition {
	pub fn new(attribute: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
		Self {
			attribute: attribute.into(),
			operator,
			value: value.into(),
			pattern: CompiledPattern::default(),
		}
	}

	/// Evaluates the condition against an attribute read from the context.
	///
	/// Same semantics as [`Operator::evaluate`], except that a `matches`
	/// pattern is compiled once per condition and reused afterwards.
	pub fn evaluate(&self, actual: Option<&Value>) -> bool {
		if self.operator != Operator::Matches {
			return self.operator.evaluate(actual, &self.value);
		}

		let haystack = actual.filter(|v| !v.is_null()).and_then(scalar_string);
		match (haystack, self.pattern.get_or_compile(&self.value)) {
			(Some(haystack), Some(re)) => re.is_match(&haystack),
			_ => false,
		}
	}
}

/// Lazily compiled `matches` pattern. An invalid pattern is remembered as
/// `None` so it is not recompiled either.
///
/// Conditions are not mutated once they are cached; clones start empty so a
/// copy whose value is edited never reuses a stale pattern.
#[derive(Debug, Default)]
struct CompiledPattern(OnceLock<Option<Regex>>);

impl CompiledPattern {
	fn get_or_compile(&self, operand: &Value) -> Option<&Regex> {
		self.0
			.get_or_init(|| operand.as_str().and_then(compile_pattern))
			.as_ref()
	}
}

impl Clone for CompiledPattern {
	fn clone(&self) -> Self {
		Self::default()
	}
}

impl PartialEq for CompiledPattern {
	fn eq(&self, _other: &Self) -> bool {
		true
	}
}

/// Operators for attribute conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
	Equals,
	NotEquals,
	Contains,
	NotContains,
	StartsWith,
	EndsWith,
	GreaterThan,
	LessThan,
	#[serde(rename = "gte")]
	GreaterThanOrEquals,
	#[serde(rename = "lte")]
	LessThanOrEquals,
	In,
	NotIn,
	Matches,
	Exists,
	NotExists,
	/// Anything stored that this build does not recognise. Never matches.
	#[serde(other)]
	Unknown,
}

impl Operator {
	/// Evaluates this operator against an attribute read from the context.
	///
	/// `actual` is `None` when the attribute is absent; JSON `null` counts as
	/// absent. An absent attribute fails every operator except `not_exists`.
	/// Type mismatches, non-numeric comparisons and invalid patterns make the
	/// condition false rather than raising.
	pub fn evaluate(&self, actual: Option<&Value>, operand: &Value) -> bool {
		let actual = actual.filter(|v| !v.is_null());

		match self {
			Operator::Exists => actual.is_some(),
			Operator::NotExists => actual.is_none(),
			Operator::Unknown => false,
			_ => match actual {
				Some(actual) => self.compare(actual, operand),
				None => false,
			},
		}
	}

	fn compare(&self, actual: &Value, operand: &Value) -> bool {
		match self {
			Operator::Equals => scalar_eq(actual, operand) == Some(true),
			Operator::NotEquals => scalar_eq(actual, operand) == Some(false),
			Operator::Contains => contains(actual, operand) == Some(true),
			Operator::NotContains => contains(actual, operand) == Some(false),
			Operator::StartsWith => string_test(actual, operand, |a, b| a.starts_with(b)),
			Operator::EndsWith => string_test(actual, operand, |a, b| a.ends_with(b)),
			Operator::GreaterThan => compare_numbers(actual, operand, |a, b| a > b),
			Operator::LessThan => compare_numbers(actual, operand, |a, b| a < b),
			Operator::GreaterThanOrEquals => compare_numbers(actual, operand, |a, b| a >= b),
			Operator::LessThanOrEquals => compare_numbers(actual, operand, |a, b| a <= b),
			Operator::In => membership(actual, operand) == Some(true),
			Operator::NotIn => membership(actual, operand) == Some(false),
			Operator::Matches => regex_match(actual, operand),
			Operator::Exists | Operator::NotExists | Operator::Unknown => false,
		}
	}
}

/// String form of a scalar JSON value. Arrays, objects and null have none.
fn scalar_string(value: &Value) -> Option<String> {
	match value {
		Value::String(s) => Some(s.clone()),
		Value::Number(n) => Some(n.to_string()),
		Value::Bool(b) => Some(b.to_string()),
		_ => None,
	}
}

/// Numeric form of a number or a numeric string.
fn numeric(value: &Value) -> Option<f64> {
	match value {
		Value::Number(n) => n.as_f64(),
		Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
		_ => None,
	}
}

/// Equality after type normalization.
///
/// Numbers compare numerically when both sides are numeric; other scalars
/// compare by string form. Structured values only equal identical structures.
/// Returns `None` when the two sides cannot be compared at all.
fn scalar_eq(actual: &Value, operand: &Value) -> Option<bool> {
	if let (Some(a), Some(b)) = (numeric(actual), numeric(operand)) {
		return Some(a == b);
	}

	match (scalar_string(actual), scalar_string(operand)) {
		(Some(a), Some(b)) => Some(a == b),
		(None, None) => Some(actual == operand),
		_ => None,
	}
}

fn contains(actual: &Value, operand: &Value) -> Option<bool> {
	if let Value::Array(items) = actual {
		return Some(
			items
				.iter()
				.any(|item| scalar_eq(item, operand) == Some(true)),
		);
	}

	match (scalar_string(actual), scalar_string(operand)) {
		(Some(a), Some(b)) => Some(a.contains(&b)),
		_ => None,
	}
}

fn string_test<F>(actual: &Value, operand: &Value, test: F) -> bool
where
	F: Fn(&str, &str) -> bool,
{
	match (scalar_string(actual), scalar_string(operand)) {
		(Some(a), Some(b)) => test(&a, &b),
		_ => false,
	}
}

fn compare_numbers<F>(actual: &Value, operand: &Value, cmp: F) -> bool
where
	F: Fn(f64, f64) -> bool,
{
	match (numeric(actual), numeric(operand)) {
		(Some(a), Some(b)) => cmp(a, b),
		_ => false,
	}
}

/// Items of an `in` / `not_in` operand: a JSON array, or a comma-separated
/// string with surrounding whitespace trimmed from each item.
fn operand_list(operand: &Value) -> Option<Vec<Value>> {
	match operand {
		Value::Array(items) => Some(items.clone()),
		Value::String(s) => Some(
			s.split(',')
				.map(str::trim)
				.filter(|item| !item.is_empty())
				.map(|item| Value::String(item.to_string()))
				.collect(),
		),
		Value::Number(_) | Value::Bool(_) => Some(vec![operand.clone()]),
		_ => None,
	}
}

fn membership(actual: &Value, operand: &Value) -> Option<bool> {
	scalar_string(actual)?;
	let items = operand_list(operand)?;
	Some(
		items
			.iter()
			.any(|item| scalar_eq(actual, item) == Some(true)),
	)
}

fn regex_match(actual: &Value, operand: &Value) -> bool {
	let (Some(haystack), Some(pattern)) = (scalar_string(actual), operand.as_str()) else {
		return false;
	};

	compile_pattern(pattern).is_some_and(|re| re.is_match(&haystack))
}

fn compile_pattern(pattern: &str) -> Option<Regex> {
	RegexBuilder::new(pattern)
		.size_limit(REGEX_SIZE_LIMIT)
		.build()
		.ok()
}
