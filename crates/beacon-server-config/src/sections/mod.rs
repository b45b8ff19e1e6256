// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections for beacon-server.

pub mod flags;
pub mod logging;
pub mod store;

pub use flags::{FlagsConfig, FlagsConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use store::{StoreConfig, StoreConfigLayer};
