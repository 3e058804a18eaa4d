/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct FeedMetrics {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub cache_errors: AtomicU64,

    pub feeds_composed: AtomicU64,
    pub partial_feeds: AtomicU64,
    pub tier_failures: AtomicU64,

    pub counter_commits: AtomicU64,
    pub counter_retries: AtomicU64,
    pub counter_conflicts: AtomicU64,

    pub events_published: AtomicU64,
    pub events_unobserved: AtomicU64,
    pub subscriber_errors: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedMetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_errors: u64,
    pub feeds_composed: u64,
    pub partial_feeds: u64,
    pub tier_failures: u64,
    pub counter_commits: u64,
    pub counter_retries: u64,
    pub counter_conflicts: u64,
    pub events_published: u64,
    pub events_unobserved: u64,
    pub subscriber_errors: u64,
}

fn bump(c: &AtomicU64) {
    c.fetch_add(1, Ordering::Relaxed);
}

impl FeedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_hit(&self) {
        bump(&self.cache_hits);
    }

    pub fn cache_miss(&self) {
        bump(&self.cache_misses);
    }

    pub fn cache_error(&self) {
        bump(&self.cache_errors);
    }

    pub fn feed_composed(&self, partial: bool) {
        bump(&self.feeds_composed);
        if partial {
            bump(&self.partial_feeds);
        }
    }

    pub fn tier_failure(&self) {
        bump(&self.tier_failures);
    }

    pub fn counter_commit(&self) {
        bump(&self.counter_commits);
    }

    pub fn counter_retry(&self) {
        bump(&self.counter_retries);
    }

    pub fn counter_conflict(&self) {
        bump(&self.counter_conflicts);
    }

    pub fn event_published(&self) {
        bump(&self.events_published);
    }

    pub fn event_unobserved(&self) {
        bump(&self.events_unobserved);
    }

    pub fn subscriber_error(&self) {
        bump(&self.subscriber_errors);
    }

    pub fn snapshot(&self) -> FeedMetricsSnapshot {
        let r = |c: &AtomicU64| c.load(Ordering::Relaxed);
        FeedMetricsSnapshot {
            cache_hits: r(&self.cache_hits),
            cache_misses: r(&self.cache_misses),
            cache_errors: r(&self.cache_errors),
            feeds_composed: r(&self.feeds_composed),
            partial_feeds: r(&self.partial_feeds),
            tier_failures: r(&self.tier_failures),
            counter_commits: r(&self.counter_commits),
            counter_retries: r(&self.counter_retries),
            counter_conflicts: r(&self.counter_conflicts),
            events_published: r(&self.events_published),
            events_unobserved: r(&self.events_unobserved),
            subscriber_errors: r(&self.subscriber_errors),
        }
    }
}
