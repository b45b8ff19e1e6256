// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::io::Cursor;

use beacon_flags_core::{
	BulkEvaluation, Condition, EnvironmentConfig, EvaluationContext, EvaluationReason,
	EvaluationResult, Flag, Operator, TargetingRule,
};
use murmur3::murmur3_32;
use tracing::debug;

/// Evaluates a flag for a given context.
///
/// The evaluation order is:
/// 1. Archived flags serve their static default
/// 2. Disabled environment configs serve the static default
/// 3. Targeting rules in stored order; the first rule whose conditions all
///    match and whose rollout (if any) admits the subject wins
/// 4. Otherwise the config's default variant, or the static default
///
/// Never fails: a rule or default that names a missing variant resolves to
/// the static default with an empty variant.
pub fn evaluate_flag(
	flag: &Flag,
	config: &EnvironmentConfig,
	context: &EvaluationContext,
) -> EvaluationResult {
	if flag.is_archived() {
		return static_default(flag, EvaluationReason::Archived);
	}

	if !config.enabled {
		return static_default(flag, EvaluationReason::Disabled);
	}

	for (index, rule) in config.targeting_rules.iter().enumerate() {
		if !evaluate_conditions(&rule.conditions, context) {
			continue;
		}

		match rule.percentage_rollout {
			None => {
				return resolve_variant(flag, config, &rule.variant, EvaluationReason::RuleMatch);
			}
			Some(percentage) => {
				if evaluate_percentage(context.subject(), &flag.key, percentage) {
					return resolve_variant(
						flag,
						config,
						&rule.variant,
						EvaluationReason::RolloutMatch,
					);
				}
				debug!(
					flag_key = %flag.key,
					rule_index = index,
					percentage,
					"Subject outside rollout, trying next rule"
				);
			}
		}
	}

	match config.default_variant.as_deref() {
		Some(key) => resolve_variant(flag, config, key, EvaluationReason::Default),
		None => static_default(flag, EvaluationReason::Default),
	}
}

/// Evaluates every flag in a scope.
pub fn evaluate_all<'a, I>(entries: I, context: &EvaluationContext) -> BulkEvaluation
where
	I: IntoIterator<Item = (&'a Flag, &'a EnvironmentConfig)>,
{
	entries
		.into_iter()
		.map(|(flag, config)| (flag.key.clone(), evaluate_flag(flag, config, context)))
		.collect()
}

/// Whether every condition of a rule matches (AND logic).
pub fn rule_matches(rule: &TargetingRule, context: &EvaluationContext) -> bool {
	evaluate_conditions(&rule.conditions, context)
}

fn evaluate_conditions(conditions: &[Condition], context: &EvaluationContext) -> bool {
	conditions
		.iter()
		.all(|cond| evaluate_condition(cond, context))
}

fn evaluate_condition(condition: &Condition, context: &EvaluationContext) -> bool {
	if condition.operator == Operator::Unknown {
		debug!(
			attribute = %condition.attribute,
			"Unrecognised operator in condition, treating as no match"
		);
		return false;
	}

	condition.evaluate(context.attribute(&condition.attribute))
}

/// Bucket in `0..100` for a subject under a flag.
///
/// Stable across processes and restarts: murmur3 (32-bit, seed 0) over
/// `"{flag_key}.{subject}"`.
pub fn bucket_for(flag_key: &str, subject: &str) -> u32 {
	let input = format!("{}.{}", flag_key, subject);
	let hash = murmur3_32(&mut Cursor::new(input.as_bytes()), 0).unwrap_or(0);
	hash % 100
}

/// Evaluates percentage-based targeting using consistent hashing.
pub fn evaluate_percentage(subject: &str, flag_key: &str, percentage: u8) -> bool {
	bucket_for(flag_key, subject) < u32::from(percentage)
}

fn resolve_variant(
	flag: &Flag,
	config: &EnvironmentConfig,
	variant_key: &str,
	reason: EvaluationReason,
) -> EvaluationResult {
	match config.variant(variant_key) {
		Some(variant) => EvaluationResult::new(variant.value.clone(), &variant.key, reason),
		None => {
			debug!(
				flag_key = %flag.key,
				variant = variant_key,
				"Variant missing from config, serving flag default"
			);
			static_default(flag, reason)
		}
	}
}

fn static_default(flag: &Flag, reason: EvaluationReason) -> EvaluationResult {
	EvaluationResult::new(flag.default_value.clone(), "", reason)
}
