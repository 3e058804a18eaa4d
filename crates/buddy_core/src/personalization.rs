/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Cache-aside personalized feed head.
//!
//! Entries are never invalidated on write; staleness is bounded by the TTL.
//! Degraded computations (a failed candidate pool, profile lookup or feed
//! tier) are served but not cached.

use crate::cache::KvCache;
use crate::clock::{local_hour, Clock};
use crate::config::CoreConfig;
use crate::error::{FeedError, FeedResult};
use crate::feed::{FeedComposer, FeedFilters};
use crate::metrics::FeedMetrics;
use crate::model::{Item, UserProfile};
use crate::score::{rank_order, Candidate, Mood, ScoreContext, ScoreEngine};
use crate::store::DocumentStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

const GLOBAL_SCOPE: &str = "global";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizedEntry {
    pub item: Item,
    pub score: f64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedSource {
    Cached,
    Computed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizedFeed {
    pub items: Vec<PersonalizedEntry>,
    pub source: FeedSource,
    pub partial: bool,
    pub computed_at_ms: i64,
    pub local_hour: u8,
}

/// What goes into the cache: always a complete, previously computed head.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedFeed {
    items: Vec<PersonalizedEntry>,
    computed_at_ms: i64,
    local_hour: u8,
}

#[derive(Debug, Clone)]
pub struct PersonalizationSettings {
    pub candidate_pool: u32,
    pub head_size: usize,
    pub ttl_secs: u64,
    pub key_prefix: String,
}

impl From<&CoreConfig> for PersonalizationSettings {
    fn from(cfg: &CoreConfig) -> Self {
        Self {
            candidate_pool: cfg.candidate_pool,
            head_size: cfg.personalized_head,
            ttl_secs: cfg.personalized_ttl_secs,
            key_prefix: cfg.cache_prefix.clone(),
        }
    }
}

pub struct PersonalizationCache {
    store: Arc<dyn DocumentStore>,
    cache: Arc<dyn KvCache>,
    composer: Arc<FeedComposer>,
    engine: ScoreEngine,
    clock: Arc<dyn Clock>,
    metrics: Arc<FeedMetrics>,
    settings: PersonalizationSettings,
}

impl PersonalizationCache {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: Arc<dyn KvCache>,
        composer: Arc<FeedComposer>,
        engine: ScoreEngine,
        clock: Arc<dyn Clock>,
        metrics: Arc<FeedMetrics>,
        settings: PersonalizationSettings,
    ) -> Self {
        Self {
            store,
            cache,
            composer,
            engine,
            clock,
            metrics,
            settings,
        }
    }

    pub fn cache_key(&self, viewer_id: &str, community_id: Option<&str>) -> String {
        format!(
            "{}:pfeed:{}:{}",
            self.settings.key_prefix,
            community_id.unwrap_or(GLOBAL_SCOPE),
            viewer_id
        )
    }

    pub async fn get_personalized_feed(
        &self,
        viewer_id: &str,
        community_id: Option<&str>,
        mood: Option<Mood>,
    ) -> FeedResult<PersonalizedFeed> {
        let community_id = match community_id.map(str::trim) {
            Some("") => return Err(FeedError::invalid("communityId must not be empty")),
            other => other,
        };
        let key = self.cache_key(viewer_id, community_id);

        if let Some(hit) = self.lookup(&key).await {
            self.metrics.cache_hit();
            debug!(key = %key, "personalized feed served from cache");
            return Ok(PersonalizedFeed {
                items: hit.items,
                source: FeedSource::Cached,
                partial: false,
                computed_at_ms: hit.computed_at_ms,
                local_hour: hit.local_hour,
            });
        }
        self.metrics.cache_miss();

        let computed = self.compute(viewer_id, community_id, mood).await?;
        if !computed.partial {
            self.store_entry(&key, &computed).await;
        }
        Ok(computed)
    }

    /// Cache failures and undecodable entries count as misses.
    async fn lookup(&self, key: &str) -> Option<CachedFeed> {
        let bytes = match self.cache.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                self.metrics.cache_error();
                warn!(key, "cache get failed: {e:#}");
                return None;
            }
        };
        match serde_json::from_slice::<CachedFeed>(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(key, "discarding undecodable cache entry: {e}");
                None
            }
        }
    }

    async fn store_entry(&self, key: &str, feed: &PersonalizedFeed) {
        let entry = CachedFeed {
            items: feed.items.clone(),
            computed_at_ms: feed.computed_at_ms,
            local_hour: feed.local_hour,
        };
        let bytes = match serde_json::to_vec(&entry) {
            Ok(b) => b,
            Err(e) => {
                warn!(key, "encode cache entry failed: {e}");
                return;
            }
        };
        if let Err(e) = self.cache.set(key, &bytes, self.settings.ttl_secs).await {
            self.metrics.cache_error();
            warn!(key, "cache set failed: {e:#}");
        }
    }

    async fn compute(
        &self,
        viewer_id: &str,
        community_id: Option<&str>,
        mood: Option<Mood>,
    ) -> FeedResult<PersonalizedFeed> {
        let mut partial = false;
        let viewer = match self.store.get_profile(viewer_id).await {
            Ok(p) => p.unwrap_or_else(|| UserProfile::new(viewer_id)),
            Err(e) => {
                warn!(viewer = viewer_id, "viewer profile unavailable: {e:#}");
                partial = true;
                UserProfile::new(viewer_id)
            }
        };
        let now = self.clock.now_ms();
        let ctx = ScoreContext {
            local_hour: local_hour(now, viewer.utc_offset_minutes),
            mood,
        };

        let pool = match self
            .store
            .top_feed_scores(viewer_id, community_id, self.settings.candidate_pool)
            .await
        {
            Ok(pool) => pool,
            Err(e) => {
                warn!(viewer = viewer_id, "candidate pool unavailable: {e:#}");
                partial = true;
                Vec::new()
            }
        };

        // (item, base score, kind)
        let mut candidates: Vec<(Item, f64, String)> = Vec::new();
        let mut use_composed = pool.is_empty();
        if !pool.is_empty() {
            let ids: Vec<String> = pool.iter().map(|r| r.item_id.clone()).collect();
            match self.store.get_items(&ids).await {
                Ok(items) => {
                    let mut by_id: HashMap<String, Item> =
                        items.into_iter().map(|i| (i.id.clone(), i)).collect();
                    for rec in pool {
                        if let Some(item) = by_id.remove(&rec.item_id) {
                            candidates.push((item, rec.score, rec.kind));
                        }
                    }
                }
                Err(e) => {
                    warn!(viewer = viewer_id, "candidate items unavailable: {e:#}");
                    partial = true;
                    use_composed = true;
                }
            }
        }
        if use_composed {
            let page = self
                .composer
                .compose(
                    viewer_id,
                    &FeedFilters {
                        community_id: community_id.map(str::to_string),
                        cursor: None,
                    },
                    None,
                )
                .await?;
            partial |= page.partial;
            candidates.extend(page.items.into_iter().map(|i| (i, 0.0, "post".to_string())));
        }

        let authors: Vec<String> = candidates
            .iter()
            .map(|(i, _, _)| i.author_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let author_profiles: HashMap<String, UserProfile> =
            match self.store.get_profiles(&authors).await {
                Ok(list) => list.into_iter().map(|p| (p.user_id.clone(), p)).collect(),
                Err(e) => {
                    warn!(viewer = viewer_id, "author profiles unavailable: {e:#}");
                    partial = true;
                    HashMap::new()
                }
            };

        let mut scored: Vec<PersonalizedEntry> = candidates
            .into_iter()
            .map(|(item, base_score, kind)| {
                let mutual_connections = author_profiles
                    .get(&item.author_id)
                    .map(|a| viewer.mutual_connections(a))
                    .unwrap_or(0);
                let score = self.engine.score(
                    &viewer,
                    &Candidate {
                        item: &item,
                        base_score,
                        mutual_connections,
                    },
                    &ctx,
                );
                PersonalizedEntry { item, score, kind }
            })
            .collect();
        scored.sort_by(|a, b| rank_order(a.score, &a.item, b.score, &b.item));
        scored.truncate(self.settings.head_size);

        Ok(PersonalizedFeed {
            items: scored,
            source: FeedSource::Computed,
            partial,
            computed_at_ms: now,
            local_hour: ctx.local_hour,
        })
    }
}
