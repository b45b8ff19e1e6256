// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Beacon feature flags system.
//!
//! This crate provides the shared domain model: flags, per-environment
//! configs, targeting rules and their operators, evaluation context and
//! results, scope keys and change events. The serving engine lives in
//! `beacon-server-flags`.
//!
//! # Example
//!
//! ```
//! use beacon_flags_core::{Condition, EvaluationContext, Operator};
//!
//! let ctx = EvaluationContext::new()
//!     .with_user_id("user123")
//!     .with_attribute("plan", serde_json::json!("enterprise"));
//!
//! let condition = Condition::new("plan", Operator::Equals, "enterprise");
//! assert!(condition.evaluate(ctx.attribute(&condition.attribute)));
//! ```

pub mod error;
pub mod evaluation;
pub mod event;
pub mod flag;
pub mod rule;
pub mod scope;

pub use error::{FlagsError, Result};
pub use evaluation::{BulkEvaluation, EvaluationContext, EvaluationReason, EvaluationResult};
pub use event::{ChangeKind, FlagChangeEvent};
pub use flag::{
	EnvironmentConfig, EnvironmentId, Flag, FlagId, FlagStatus, FlagValue, FlagValueType, ProjectId,
	Variant,
};
pub use rule::{Condition, Operator, TargetingRule};
pub use scope::ScopeKey;
