/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Three-tier feed fan-in: public, community and friend-authored items are
//! fetched independently, merged, de-duplicated and cut to one page.

use crate::config::CoreConfig;
use crate::error::{FeedError, FeedResult};
use crate::metrics::FeedMetrics;
use crate::model::Item;
use crate::store::{sort_newest_first, DocumentStore, ItemQuery};
pub use crate::store::FeedCursor;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Public,
    Community,
    Friends,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Community => "community",
            Self::Friends => "friends",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierFailure {
    pub tier: Tier,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedFilters {
    pub community_id: Option<String>,
    /// Only items sorting after this position are returned.
    pub cursor: Option<FeedCursor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    pub items: Vec<Item>,
    pub next_cursor: Option<String>,
    /// Set when at least one tier failed and the page is a best-effort union.
    pub partial: bool,
    pub failed_tiers: Vec<TierFailure>,
}

/// Parses a `{createdAtMs}:{id}` cursor as returned in `nextCursor`.
pub fn parse_cursor(raw: &str) -> FeedResult<FeedCursor> {
    let malformed = || FeedError::invalid(format!("malformed cursor: {raw:?}"));
    let (ms, id) = raw.trim().split_once(':').ok_or_else(malformed)?;
    let created_at_ms = ms.parse::<i64>().map_err(|_| malformed())?;
    if id.is_empty() {
        return Err(malformed());
    }
    Ok(FeedCursor {
        created_at_ms,
        id: id.to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub tier_limit: u32,
    pub membership_chunk: usize,
    pub tier_timeout: Duration,
}

impl From<&CoreConfig> for FeedSettings {
    fn from(cfg: &CoreConfig) -> Self {
        Self {
            default_page_size: cfg.default_page_size,
            max_page_size: cfg.max_page_size,
            tier_limit: cfg.tier_limit,
            membership_chunk: cfg.membership_chunk.max(1),
            tier_timeout: cfg.tier_timeout,
        }
    }
}

/// Accumulates tier results, dropping ids already seen.
struct Merge {
    seen: HashSet<String>,
    items: Vec<Item>,
    failures: Vec<TierFailure>,
}

impl Merge {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            items: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn absorb(&mut self, tier: Tier, result: Result<Vec<Item>, String>) {
        match result {
            Ok(items) => {
                for item in items {
                    if self.seen.insert(item.id.clone()) {
                        self.items.push(item);
                    }
                }
            }
            Err(detail) => self.fail(tier, detail),
        }
    }

    fn fail(&mut self, tier: Tier, detail: String) {
        warn!(tier = tier.as_str(), "feed tier failed: {detail}");
        self.failures.push(TierFailure { tier, detail });
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

pub struct FeedComposer {
    store: Arc<dyn DocumentStore>,
    metrics: Arc<FeedMetrics>,
    settings: FeedSettings,
}

impl FeedComposer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        metrics: Arc<FeedMetrics>,
        settings: FeedSettings,
    ) -> Self {
        Self {
            store,
            metrics,
            settings,
        }
    }

    pub fn settings(&self) -> &FeedSettings {
        &self.settings
    }

    pub async fn compose(
        &self,
        viewer_id: &str,
        filters: &FeedFilters,
        page_size: Option<u32>,
    ) -> FeedResult<FeedPage> {
        let page_size = match page_size {
            Some(0) => return Err(FeedError::invalid("pageSize must be positive")),
            Some(n) => n.min(self.settings.max_page_size),
            None => self.settings.default_page_size,
        };
        let community = match filters.community_id.as_deref().map(str::trim) {
            Some("") => return Err(FeedError::invalid("communityId must not be empty")),
            other => other,
        };
        let per_query = self.settings.tier_limit.min(page_size);
        let after = filters.cursor.as_ref();

        let public = self.run_query(ItemQuery::public(per_query, after));
        let scoped = async {
            match community {
                Some(c) => Some(self.run_query(ItemQuery::community(c, per_query, after)).await),
                None => None,
            }
        };
        let (public, scoped) = tokio::join!(public, scoped);

        let mut merge = Merge::new();
        merge.absorb(Tier::Public, public);
        if let Some(scoped) = scoped {
            merge.absorb(Tier::Community, scoped);
        }
        self.friends_tier(viewer_id, per_query, page_size as usize, after, &mut merge)
            .await;

        let Merge {
            mut items,
            failures,
            ..
        } = merge;
        sort_newest_first(&mut items);
        items.truncate(page_size as usize);
        let next_cursor = if items.len() == page_size as usize {
            items.last().map(|i| FeedCursor::at(i).to_string())
        } else {
            None
        };
        let partial = !failures.is_empty();
        for _ in &failures {
            self.metrics.tier_failure();
        }
        self.metrics.feed_composed(partial);
        debug!(
            viewer = viewer_id,
            items = items.len(),
            partial,
            "feed composed"
        );
        Ok(FeedPage {
            items,
            next_cursor,
            partial,
            failed_tiers: failures,
        })
    }

    /// Friend-authored items, one membership query per chunk of friend ids.
    /// Chunks stop once the merged total reaches the page size.
    async fn friends_tier(
        &self,
        viewer_id: &str,
        per_query: u32,
        page_size: usize,
        after: Option<&FeedCursor>,
        merge: &mut Merge,
    ) {
        let profile = match tokio::time::timeout(
            self.settings.tier_timeout,
            self.store.get_profile(viewer_id),
        )
        .await
        {
            Ok(Ok(p)) => p,
            Ok(Err(e)) => return merge.fail(Tier::Friends, format!("load friends: {e:#}")),
            Err(_) => return merge.fail(Tier::Friends, "load friends: timed out".to_string()),
        };
        let friends: Vec<String> = profile
            .map(|p| p.friends.into_iter().collect())
            .unwrap_or_default();
        if friends.is_empty() {
            return;
        }
        for chunk in friends.chunks(self.settings.membership_chunk) {
            if merge.len() >= page_size {
                break;
            }
            let result = self
                .run_query(ItemQuery::authored_by(chunk, per_query, after))
                .await;
            merge.absorb(Tier::Friends, result);
        }
    }

    async fn run_query(&self, query: ItemQuery) -> Result<Vec<Item>, String> {
        match tokio::time::timeout(self.settings.tier_timeout, self.store.query_items(&query)).await
        {
            Ok(Ok(items)) => Ok(items),
            Ok(Err(e)) => Err(format!("{} query: {e:#}", query.filter.kind())),
            Err(_) => Err(format!(
                "{} query timed out after {}ms",
                query.filter.kind(),
                self.settings.tier_timeout.as_millis()
            )),
        }
    }
}
