/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::score::ScoreWeights;
use crate::store::MAX_MEMBERSHIP_VALUES;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct CoreConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub tier_limit: u32,
    pub membership_chunk: usize,
    pub tier_timeout: Duration,
    pub txn_timeout: Duration,
    pub max_txn_attempts: u32,
    pub retry_backoff_base: Duration,
    pub retry_backoff_max: Duration,
    pub candidate_pool: u32,
    pub personalized_head: usize,
    pub personalized_ttl_secs: u64,
    pub cache_prefix: String,
    pub trending_cap: usize,
    pub comment_page_size: u32,
    pub weights: ScoreWeights,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            default_page_size: 30,
            max_page_size: 50,
            tier_limit: 10,
            membership_chunk: MAX_MEMBERSHIP_VALUES,
            tier_timeout: Duration::from_secs(2),
            txn_timeout: Duration::from_secs(2),
            max_txn_attempts: 5,
            retry_backoff_base: Duration::from_millis(10),
            retry_backoff_max: Duration::from_millis(200),
            candidate_pool: 50,
            personalized_head: 30,
            personalized_ttl_secs: 60,
            cache_prefix: "buddy".to_string(),
            trending_cap: 100,
            comment_page_size: 50,
            weights: ScoreWeights::default(),
        }
    }
}

fn parse_clamped<T>(raw: Option<String>, default: T, min: T, max: T) -> T
where
    T: std::str::FromStr + PartialOrd,
{
    let v = raw
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default);
    if v < min {
        min
    } else if v > max {
        max
    } else {
        v
    }
}

impl CoreConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|k| std::env::var(k).ok())
    }

    /// Builds the config from a variable lookup; unset or unparsable values
    /// keep their defaults and everything is clamped to a sane range.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let max_page_size = parse_clamped(var("BUDDY_MAX_PAGE_SIZE"), d.max_page_size, 1, 200);
        let default_page_size = parse_clamped(
            var("BUDDY_PAGE_SIZE"),
            d.default_page_size,
            1,
            max_page_size,
        );
        let tier_limit = parse_clamped(var("BUDDY_TIER_LIMIT"), d.tier_limit, 1, 100);
        let membership_chunk = parse_clamped(
            var("BUDDY_MEMBERSHIP_CHUNK"),
            d.membership_chunk,
            1,
            MAX_MEMBERSHIP_VALUES,
        );
        let tier_timeout_ms = parse_clamped(var("BUDDY_TIER_TIMEOUT_MS"), 2_000u64, 50, 30_000);
        let txn_timeout_ms = parse_clamped(var("BUDDY_TXN_TIMEOUT_MS"), 2_000u64, 50, 30_000);
        let max_txn_attempts =
            parse_clamped(var("BUDDY_TXN_MAX_ATTEMPTS"), d.max_txn_attempts, 1, 20);
        let backoff_base_ms = parse_clamped(var("BUDDY_RETRY_BACKOFF_MS"), 10u64, 1, 1_000);
        let backoff_max_ms = parse_clamped(
            var("BUDDY_RETRY_BACKOFF_MAX_MS"),
            200u64,
            backoff_base_ms,
            10_000,
        );
        let candidate_pool = parse_clamped(var("BUDDY_CANDIDATE_POOL"), d.candidate_pool, 1, 500);
        let personalized_head = parse_clamped(
            var("BUDDY_PERSONALIZED_HEAD"),
            d.personalized_head,
            1,
            candidate_pool as usize,
        );
        let personalized_ttl_secs =
            parse_clamped(var("BUDDY_PERSONALIZED_TTL_SECS"), d.personalized_ttl_secs, 1, 3_600);
        let cache_prefix = var("BUDDY_CACHE_PREFIX")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(d.cache_prefix);
        let trending_cap = parse_clamped(var("BUDDY_TRENDING_CAP"), d.trending_cap, 1, 10_000);
        let comment_page_size =
            parse_clamped(var("BUDDY_COMMENT_PAGE_SIZE"), d.comment_page_size, 1, 500);

        Self {
            default_page_size,
            max_page_size,
            tier_limit,
            membership_chunk,
            tier_timeout: Duration::from_millis(tier_timeout_ms),
            txn_timeout: Duration::from_millis(txn_timeout_ms),
            max_txn_attempts,
            retry_backoff_base: Duration::from_millis(backoff_base_ms),
            retry_backoff_max: Duration::from_millis(backoff_max_ms),
            candidate_pool,
            personalized_head,
            personalized_ttl_secs,
            cache_prefix,
            trending_cap,
            comment_page_size,
            weights: d.weights,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(CoreConfig::from_vars(|_| None), CoreConfig::default());
    }

    #[test]
    fn values_are_clamped() {
        let cfg = CoreConfig::from_vars(lookup(&[
            ("BUDDY_MAX_PAGE_SIZE", "20"),
            ("BUDDY_PAGE_SIZE", "999"),
            ("BUDDY_MEMBERSHIP_CHUNK", "40"),
            ("BUDDY_TXN_MAX_ATTEMPTS", "0"),
            ("BUDDY_PERSONALIZED_TTL_SECS", "abc"),
            ("BUDDY_CACHE_PREFIX", "  "),
        ]));
        assert_eq!(cfg.max_page_size, 20);
        assert_eq!(cfg.default_page_size, 20);
        assert_eq!(cfg.membership_chunk, MAX_MEMBERSHIP_VALUES);
        assert_eq!(cfg.max_txn_attempts, 1);
        assert_eq!(cfg.personalized_ttl_secs, 60);
        assert_eq!(cfg.cache_prefix, "buddy");
    }
}
