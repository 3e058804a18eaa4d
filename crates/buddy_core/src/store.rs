/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::model::{
    AggregateDoc, AggregateKey, Comment, CommitOutcome, FeedScoreRecord, Item, ItemCounters,
    ReactionType, UserProfile, Versioned,
};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::fmt;

/// Hard ceiling of the store's "value is one of N" membership filter.
pub const MAX_MEMBERSHIP_VALUES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemFilter {
    Public,
    Community(String),
    AuthorIn(Vec<String>),
}

impl ItemFilter {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Community(_) => "community",
            Self::AuthorIn(_) => "authors",
        }
    }
}

/// Position of an item in newest-first order: `created_at_ms` descending,
/// then `id` ascending. Rendered as `{created_at_ms}:{id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedCursor {
    pub created_at_ms: i64,
    pub id: String,
}

impl FeedCursor {
    pub fn at(item: &Item) -> Self {
        Self {
            created_at_ms: item.created_at_ms,
            id: item.id.clone(),
        }
    }

    /// True when `item` sorts strictly after this position.
    pub fn admits(&self, item: &Item) -> bool {
        item.created_at_ms < self.created_at_ms
            || (item.created_at_ms == self.created_at_ms && item.id > self.id)
    }
}

impl fmt::Display for FeedCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.created_at_ms, self.id)
    }
}

/// Ordered range scan over items, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemQuery {
    pub filter: ItemFilter,
    /// Only items sorting after this position are returned.
    pub after: Option<FeedCursor>,
    pub limit: u32,
}

impl ItemQuery {
    pub fn public(limit: u32, after: Option<&FeedCursor>) -> Self {
        Self {
            filter: ItemFilter::Public,
            after: after.cloned(),
            limit,
        }
    }

    pub fn community(community: &str, limit: u32, after: Option<&FeedCursor>) -> Self {
        Self {
            filter: ItemFilter::Community(community.to_string()),
            after: after.cloned(),
            limit,
        }
    }

    pub fn authored_by(authors: &[String], limit: u32, after: Option<&FeedCursor>) -> Self {
        Self {
            filter: ItemFilter::AuthorIn(authors.to_vec()),
            after: after.cloned(),
            limit,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let ItemFilter::AuthorIn(authors) = &self.filter {
            if authors.is_empty() {
                bail!("membership filter needs at least one value");
            }
            if authors.len() > MAX_MEMBERSHIP_VALUES {
                bail!(
                    "membership filter takes at most {MAX_MEMBERSHIP_VALUES} values, got {}",
                    authors.len()
                );
            }
        }
        Ok(())
    }
}

/// Counter document of one item, plus the caller's current reaction.
#[derive(Debug, Clone, PartialEq)]
pub struct EngagementDoc {
    pub version: u64,
    pub counters: ItemCounters,
    pub user_reaction: Option<ReactionType>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReactionWrite {
    Put {
        user_id: String,
        reaction: ReactionType,
        at_ms: i64,
    },
    Delete {
        user_id: String,
    },
}

/// Everything committed atomically against an item's counter document.
#[derive(Debug, Clone, PartialEq)]
pub struct EngagementWrite {
    pub counters: ItemCounters,
    pub reaction: Option<ReactionWrite>,
    pub comment: Option<Comment>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn health_check(&self) -> Result<()>;

    async fn insert_item(&self, item: &Item) -> Result<()>;
    async fn get_item(&self, item_id: &str) -> Result<Option<Item>>;
    /// Missing ids are skipped; order is unspecified.
    async fn get_items(&self, item_ids: &[String]) -> Result<Vec<Item>>;
    async fn delete_item(&self, item_id: &str) -> Result<bool>;
    async fn query_items(&self, query: &ItemQuery) -> Result<Vec<Item>>;

    async fn load_engagement(
        &self,
        item_id: &str,
        user_id: Option<&str>,
    ) -> Result<Option<EngagementDoc>>;
    /// Applies `write` only if the counter document is still at
    /// `expected_version`.
    async fn commit_engagement(
        &self,
        item_id: &str,
        expected_version: u64,
        write: &EngagementWrite,
    ) -> Result<CommitOutcome>;

    async fn get_comment(&self, item_id: &str, comment_id: &str) -> Result<Option<Comment>>;
    async fn list_comments(&self, item_id: &str, limit: u32) -> Result<Vec<Comment>>;

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>>;
    async fn get_profiles(&self, user_ids: &[String]) -> Result<Vec<UserProfile>>;
    async fn upsert_profile(&self, profile: &UserProfile) -> Result<()>;
    /// Adds each user to the other's friend list in one transaction.
    async fn link_friends(&self, a: &str, b: &str) -> Result<()>;
    async fn unlink_friends(&self, a: &str, b: &str) -> Result<()>;

    /// Highest-scored precomputed candidates for a viewer.
    async fn top_feed_scores(
        &self,
        user_id: &str,
        community_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<FeedScoreRecord>>;
    async fn upsert_feed_scores(&self, records: &[FeedScoreRecord]) -> Result<()>;

    /// Version 0 means the document does not exist yet.
    async fn load_aggregate(&self, key: &AggregateKey) -> Result<Versioned<AggregateDoc>>;
    async fn commit_aggregate(
        &self,
        key: &AggregateKey,
        expected_version: u64,
        doc: &AggregateDoc,
    ) -> Result<CommitOutcome>;
}

pub(crate) fn sort_newest_first(items: &mut [Item]) {
    items.sort_by(|a, b| {
        b.created_at_ms
            .cmp(&a.created_at_ms)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_filter_rejects_more_than_ten_values() {
        let ids: Vec<String> = (0..11).map(|i| format!("u{i}")).collect();
        assert!(ItemQuery::authored_by(&ids, 10, None).validate().is_err());
        assert!(ItemQuery::authored_by(&ids[..10], 10, None).validate().is_ok());
        assert!(ItemQuery::authored_by(&[], 10, None).validate().is_err());
        assert!(ItemQuery::public(10, None).validate().is_ok());
    }
}
