/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod bus;
pub mod cache;
pub mod clock;
pub mod config;
pub mod counters;
pub mod error;
pub mod feed;
pub mod memory_store;
pub mod metrics;
pub mod model;
pub mod personalization;
pub mod runtime;
pub mod score;
pub mod service;
pub mod sqlite_store;
pub mod store;
pub mod trending;

pub use error::{FeedError, FeedResult};
pub use runtime::FeedRuntime;

pub fn buddy_core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
