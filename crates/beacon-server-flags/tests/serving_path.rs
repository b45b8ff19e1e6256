// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! End-to-end tests of the serving path: store, cache, evaluation and hub
//! driven through `FlagsService`.

use std::sync::Arc;
use std::time::Duration;

use beacon_server_flags::{
	Condition, EnvironmentConfig, EnvironmentId, EvaluationContext, EvaluationReason, Flag,
	FlagChangeEvent, FlagId, FlagStatus, FlagValue, FlagValueType, FlagsServerError, FlagsService,
	HubConfig, InMemoryFlagStore, Operator, ProjectId, ScopeKey, ServiceConfig, TargetingRule,
	Variant,
};
use chrono::Utc;
use serde_json::json;
use tokio::time::timeout;

fn dark_mode_flag(project_id: ProjectId) -> Flag {
	Flag {
		id: FlagId::new(),
		project_id,
		key: "dark-mode".to_string(),
		name: "Dark Mode".to_string(),
		description: Some("Dark theme for the dashboard".to_string()),
		value_type: FlagValueType::Boolean,
		category: Some("ui".to_string()),
		default_value: FlagValue::Boolean(false),
		tags: vec!["frontend".to_string()],
		status: FlagStatus::Active,
		created_at: Utc::now(),
		updated_at: Utc::now(),
	}
}

fn dark_mode_config(flag: &Flag, rollout: Option<u8>) -> EnvironmentConfig {
	let mut config = EnvironmentConfig::new(flag.id, EnvironmentId::new(), true);
	config.variants = vec![
		Variant::new("on", FlagValue::Boolean(true)),
		Variant::new("off", FlagValue::Boolean(false)),
	];
	config.default_variant = Some("off".to_string());

	let mut rule = TargetingRule::new(
		vec![Condition::new("plan", Operator::Equals, "enterprise")],
		"on",
	);
	rule.percentage_rollout = rollout;
	config.targeting_rules = vec![rule];
	config
}

fn prod() -> ScopeKey {
	ScopeKey::new("projA", "prod")
}

fn staging() -> ScopeKey {
	ScopeKey::new("projA", "staging")
}

struct Fixture {
	store: Arc<InMemoryFlagStore>,
	service: FlagsService,
	flag: Flag,
}

async fn fixture(rollout: Option<u8>) -> Fixture {
	let store = Arc::new(InMemoryFlagStore::new());
	let flag = dark_mode_flag(ProjectId::new());
	store
		.upsert(&prod(), flag.clone(), dark_mode_config(&flag, rollout))
		.unwrap();
	store
		.upsert(&staging(), flag.clone(), dark_mode_config(&flag, rollout))
		.unwrap();

	let service = FlagsService::new(store.clone(), ServiceConfig::default());
	service.load_all().await.unwrap();
	Fixture {
		store,
		service,
		flag,
	}
}

fn enterprise(user: &str) -> EvaluationContext {
	EvaluationContext::new()
		.with_user_id(user)
		.with_attribute("plan", json!("enterprise"))
}

#[tokio::test]
async fn dark_mode_serves_enterprise_and_free_users() {
	let fx = fixture(None).await;

	let result = fx.service.evaluate(&prod(), "dark-mode", &enterprise("u1")).unwrap();
	assert_eq!(result.value, FlagValue::Boolean(true));
	assert_eq!(result.variant, "on");
	assert_eq!(result.reason, EvaluationReason::RuleMatch);

	let free = EvaluationContext::new()
		.with_user_id("u2")
		.with_attribute("plan", json!("free"));
	let result = fx.service.evaluate(&prod(), "dark-mode", &free).unwrap();
	assert_eq!(result.value, FlagValue::Boolean(false));
	assert_eq!(result.variant, "off");
	assert_eq!(result.reason, EvaluationReason::Default);

	let wire = serde_json::to_value(&result).unwrap();
	assert_eq!(wire, json!({"value": false, "variant": "off", "reason": "default"}));
}

#[tokio::test]
async fn zero_percent_rollout_always_falls_through() {
	let fx = fixture(Some(0)).await;

	for i in 0..200 {
		let result = fx
			.service
			.evaluate(&prod(), "dark-mode", &enterprise(&format!("user-{i}")))
			.unwrap();
		assert_eq!(result.variant, "off");
		assert_eq!(result.reason, EvaluationReason::Default);
	}
}

#[tokio::test]
async fn full_rollout_always_matches() {
	let fx = fixture(Some(100)).await;

	for i in 0..200 {
		let result = fx
			.service
			.evaluate(&prod(), "dark-mode", &enterprise(&format!("user-{i}")))
			.unwrap();
		assert_eq!(result.variant, "on");
		assert_eq!(result.reason, EvaluationReason::RolloutMatch);
	}
}

#[tokio::test]
async fn unknown_flag_is_not_found() {
	let fx = fixture(None).await;

	let result = fx.service.evaluate(&prod(), "missing", &EvaluationContext::new());
	assert!(matches!(result, Err(FlagsServerError::FlagNotFound { .. })));

	let result = fx
		.service
		.evaluate(&ScopeKey::new("projZ", "prod"), "dark-mode", &EvaluationContext::new());
	assert!(matches!(result, Err(FlagsServerError::FlagNotFound { .. })));
}

#[tokio::test]
async fn bulk_evaluation_covers_scope() {
	let fx = fixture(None).await;

	let results = fx.service.evaluate_all(&prod(), &enterprise("u1"));
	assert_eq!(results.len(), 1);
	assert_eq!(results["dark-mode"].variant, "on");

	assert!(fx
		.service
		.evaluate_all(&ScopeKey::new("projZ", "prod"), &enterprise("u1"))
		.is_empty());
}

#[tokio::test]
async fn refresh_of_one_scope_leaves_others_untouched() {
	let fx = fixture(None).await;
	let prod_before = fx.service.cache().get_flags(&prod());

	let mut disabled = dark_mode_config(&fx.flag, None);
	disabled.enabled = false;
	fx.store.upsert(&staging(), fx.flag.clone(), disabled).unwrap();
	fx.service.cache().refresh(&staging()).await.unwrap();

	let prod_after = fx.service.cache().get_flags(&prod());
	assert!(Arc::ptr_eq(&prod_before, &prod_after));

	let result = fx.service.evaluate(&staging(), "dark-mode", &enterprise("u1")).unwrap();
	assert_eq!(result.reason, EvaluationReason::Disabled);
	let result = fx.service.evaluate(&prod(), "dark-mode", &enterprise("u1")).unwrap();
	assert_eq!(result.reason, EvaluationReason::RuleMatch);
}

#[tokio::test]
async fn subscriber_sees_new_config_when_notified() {
	let fx = fixture(None).await;
	let mut guard = fx.service.open_stream(&prod());

	let mut disabled = dark_mode_config(&fx.flag, None);
	disabled.enabled = false;
	fx.store.upsert(&prod(), fx.flag.clone(), disabled).unwrap();

	let event = FlagChangeEvent::updated("dark-mode", FlagValue::Boolean(false), None);
	let outcome = fx.service.publish_change(&[prod()], event).await.unwrap();
	assert_eq!(outcome.delivered, 1);

	let received = timeout(Duration::from_millis(100), guard.recv())
		.await
		.unwrap()
		.unwrap();
	assert_eq!(received.flag_key, "dark-mode");

	// Refresh happened before the broadcast
	let result = fx.service.evaluate(&prod(), "dark-mode", &enterprise("u1")).unwrap();
	assert_eq!(result.reason, EvaluationReason::Disabled);
}

#[tokio::test]
async fn deleted_flag_disappears_before_subscribers_hear() {
	let fx = fixture(None).await;
	let mut guard = fx.service.open_stream(&prod());

	fx.store.remove_flag(&prod(), "dark-mode");
	fx.service
		.publish_change(&[prod()], FlagChangeEvent::deleted("dark-mode"))
		.await
		.unwrap();

	let received = guard.recv().await.unwrap();
	assert_eq!(received.event_type(), "delete");
	assert!(fx.service.cache().get_flag(&prod(), "dark-mode").is_none());
}

#[tokio::test]
async fn broadcast_reaches_only_its_scope() {
	let fx = fixture(None).await;
	let mut prod_guard = fx.service.open_stream(&prod());
	let mut staging_guard = fx.service.open_stream(&staging());
	let mut other_guard = fx.service.open_stream(&ScopeKey::new("projB", "staging"));

	fx.service
		.publish_change(
			&[staging()],
			FlagChangeEvent::updated("dark-mode", FlagValue::Boolean(true), None),
		)
		.await
		.unwrap();

	assert!(timeout(Duration::from_millis(100), staging_guard.recv())
		.await
		.unwrap()
		.is_some());
	assert!(timeout(Duration::from_millis(50), prod_guard.recv()).await.is_err());
	assert!(timeout(Duration::from_millis(50), other_guard.recv()).await.is_err());
}

#[tokio::test]
async fn overflowing_subscriber_keeps_first_sixteen() {
	let fx = fixture(None).await;
	let mut guard = fx.service.open_stream(&prod());

	for i in 0..17 {
		let outcome = fx
			.service
			.hub()
			.broadcast(&prod(), FlagChangeEvent::updated(format!("flag-{i}"), FlagValue::Boolean(true), None));
		if i < 16 {
			assert_eq!(outcome.delivered, 1);
		} else {
			assert_eq!(outcome.dropped, 1);
		}
	}

	for i in 0..16 {
		let event = guard.recv().await.unwrap();
		assert_eq!(event.flag_key, format!("flag-{i}"));
	}
	assert!(timeout(Duration::from_millis(50), guard.recv()).await.is_err());
}

#[tokio::test]
async fn dropping_stream_guard_unsubscribes() {
	let fx = fixture(None).await;

	let guard = fx.service.open_stream(&prod());
	let _other = fx.service.open_stream(&prod());
	assert_eq!(fx.service.hub().subscriber_count(&prod()), 2);

	drop(guard);
	assert_eq!(fx.service.hub().subscriber_count(&prod()), 1);
}

#[tokio::test]
async fn shutdown_closes_streams() {
	let fx = fixture(None).await;
	let mut guard = fx.service.open_stream(&prod());

	fx.service.shutdown().await;

	assert!(guard.recv().await.is_none());
	let mut late = fx.service.open_stream(&prod());
	assert!(late.recv().await.is_none());
}

#[tokio::test]
async fn evaluations_feed_stale_flag_report() {
	let store = Arc::new(InMemoryFlagStore::new());
	let project_id = ProjectId::new();
	let used = dark_mode_flag(project_id);
	let mut unused = dark_mode_flag(project_id);
	unused.key = "legacy-banner".to_string();
	let mut archived = dark_mode_flag(project_id);
	archived.key = "old-checkout".to_string();
	archived.status = FlagStatus::Archived;

	for flag in [&used, &unused, &archived] {
		store
			.upsert(&prod(), flag.clone(), dark_mode_config(flag, None))
			.unwrap();
	}

	let service = FlagsService::new(
		store,
		ServiceConfig {
			hub: HubConfig::default(),
			..ServiceConfig::default()
		},
	);
	service.load_all().await.unwrap();

	service
		.evaluate(&prod(), "dark-mode", &enterprise("u1"))
		.unwrap();
	service.shutdown().await;

	let stale = service.stale_flags(&prod(), Utc::now());
	let keys: Vec<_> = stale.iter().map(|s| s.flag_key.as_str()).collect();
	assert_eq!(keys, vec!["legacy-banner"]);
	assert_eq!(
		service.usage().usage(&prod(), "dark-mode").unwrap().evaluations,
		1
	);
}
