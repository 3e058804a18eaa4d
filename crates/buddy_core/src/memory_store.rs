/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! In-process [`DocumentStore`], used for local runs and as the test double.
//! [`MemoryFaults`] lets tests fail individual query kinds, force stale
//! commits or slow queries down, and [`MemoryStore::query_log`] records
//! every item query issued.

use crate::model::{
    AggregateDoc, AggregateKey, Comment, CommitOutcome, FeedScoreRecord, Item, ReactionType,
    UserProfile, Versioned, Visibility,
};
use crate::store::{
    sort_newest_first, DocumentStore, EngagementDoc, EngagementWrite, ItemFilter, ItemQuery,
    ReactionWrite,
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct MemoryFaults {
    pub fail_public: AtomicBool,
    pub fail_community: AtomicBool,
    pub fail_authors: AtomicBool,
    pub fail_profiles: AtomicBool,
    pub fail_scores: AtomicBool,
    pub fail_items: AtomicBool,
    /// Number of upcoming engagement/aggregate commits reported as stale.
    pub stale_commits: AtomicU32,
    pub query_delay_ms: AtomicU64,
}

impl MemoryFaults {
    fn take_stale(&self) -> bool {
        self.stale_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRecord {
    pub kind: &'static str,
    pub value_count: usize,
    pub limit: u32,
}

struct StoredItem {
    item: Item,
    version: u64,
}

#[derive(Default)]
struct Inner {
    items: HashMap<String, StoredItem>,
    reactions: HashMap<(String, String), ReactionType>,
    comments: HashMap<String, Vec<Comment>>,
    profiles: HashMap<String, UserProfile>,
    feed_scores: HashMap<(String, String), FeedScoreRecord>,
    aggregates: HashMap<AggregateKey, Versioned<AggregateDoc>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    log: Mutex<Vec<QueryRecord>>,
    pub faults: MemoryFaults,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query_log(&self) -> Vec<QueryRecord> {
        self.log.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn clear_query_log(&self) {
        if let Ok(mut g) = self.log.lock() {
            g.clear();
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("memory store poisoned"))
    }

    async fn maybe_delay(&self) {
        let ms = self.faults.query_delay_ms.load(Ordering::Relaxed);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn health_check(&self) -> Result<()> {
        self.lock().map(|_| ())
    }

    async fn insert_item(&self, item: &Item) -> Result<()> {
        let mut g = self.lock()?;
        if g.items.contains_key(&item.id) {
            bail!("item {} already exists", item.id);
        }
        g.items.insert(
            item.id.clone(),
            StoredItem {
                item: item.clone(),
                version: 1,
            },
        );
        Ok(())
    }

    async fn get_item(&self, item_id: &str) -> Result<Option<Item>> {
        let g = self.lock()?;
        Ok(g.items.get(item_id).map(|s| s.item.clone()))
    }

    async fn get_items(&self, item_ids: &[String]) -> Result<Vec<Item>> {
        if self.faults.fail_items.load(Ordering::Relaxed) {
            bail!("injected item batch failure");
        }
        let g = self.lock()?;
        Ok(item_ids
            .iter()
            .filter_map(|id| g.items.get(id).map(|s| s.item.clone()))
            .collect())
    }

    async fn delete_item(&self, item_id: &str) -> Result<bool> {
        let mut g = self.lock()?;
        let existed = g.items.remove(item_id).is_some();
        g.reactions.retain(|(item, _), _| item != item_id);
        g.comments.remove(item_id);
        g.feed_scores.retain(|(_, item), _| item != item_id);
        Ok(existed)
    }

    async fn query_items(&self, query: &ItemQuery) -> Result<Vec<Item>> {
        query.validate()?;
        let value_count = match &query.filter {
            ItemFilter::AuthorIn(a) => a.len(),
            _ => 1,
        };
        if let Ok(mut log) = self.log.lock() {
            log.push(QueryRecord {
                kind: query.filter.kind(),
                value_count,
                limit: query.limit,
            });
        }
        self.maybe_delay().await;
        let failing = match &query.filter {
            ItemFilter::Public => &self.faults.fail_public,
            ItemFilter::Community(_) => &self.faults.fail_community,
            ItemFilter::AuthorIn(_) => &self.faults.fail_authors,
        };
        if failing.load(Ordering::Relaxed) {
            bail!("injected {} query failure", query.filter.kind());
        }

        let g = self.lock()?;
        let mut out: Vec<Item> = g
            .items
            .values()
            .map(|s| &s.item)
            .filter(|item| query.after.as_ref().map_or(true, |c| c.admits(item)))
            .filter(|item| match &query.filter {
                ItemFilter::Public => item.visibility == Visibility::Public,
                ItemFilter::Community(c) => {
                    item.visibility == Visibility::Community
                        && item.community_tag.as_deref() == Some(c.as_str())
                }
                ItemFilter::AuthorIn(authors) => authors.contains(&item.author_id),
            })
            .cloned()
            .collect();
        sort_newest_first(&mut out);
        out.truncate(query.limit as usize);
        Ok(out)
    }

    async fn load_engagement(
        &self,
        item_id: &str,
        user_id: Option<&str>,
    ) -> Result<Option<EngagementDoc>> {
        let g = self.lock()?;
        let Some(stored) = g.items.get(item_id) else {
            return Ok(None);
        };
        let user_reaction = user_id.and_then(|u| {
            g.reactions
                .get(&(item_id.to_string(), u.to_string()))
                .copied()
        });
        Ok(Some(EngagementDoc {
            version: stored.version,
            counters: stored.item.counters.clone(),
            user_reaction,
        }))
    }

    async fn commit_engagement(
        &self,
        item_id: &str,
        expected_version: u64,
        write: &EngagementWrite,
    ) -> Result<CommitOutcome> {
        if self.faults.take_stale() {
            return Ok(CommitOutcome::Stale);
        }
        let mut g = self.lock()?;
        let Some(stored) = g.items.get_mut(item_id) else {
            bail!("item {item_id} vanished");
        };
        if stored.version != expected_version {
            return Ok(CommitOutcome::Stale);
        }
        stored.version += 1;
        stored.item.counters = write.counters.clone();
        match &write.reaction {
            Some(ReactionWrite::Put {
                user_id, reaction, ..
            }) => {
                g.reactions
                    .insert((item_id.to_string(), user_id.clone()), *reaction);
            }
            Some(ReactionWrite::Delete { user_id }) => {
                g.reactions.remove(&(item_id.to_string(), user_id.clone()));
            }
            None => {}
        }
        if let Some(comment) = &write.comment {
            g.comments
                .entry(item_id.to_string())
                .or_default()
                .push(comment.clone());
        }
        Ok(CommitOutcome::Committed)
    }

    async fn get_comment(&self, item_id: &str, comment_id: &str) -> Result<Option<Comment>> {
        let g = self.lock()?;
        Ok(g.comments
            .get(item_id)
            .and_then(|list| list.iter().find(|c| c.id == comment_id).cloned()))
    }

    async fn list_comments(&self, item_id: &str, limit: u32) -> Result<Vec<Comment>> {
        let g = self.lock()?;
        let mut list = g.comments.get(item_id).cloned().unwrap_or_default();
        list.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.id.cmp(&b.id))
        });
        list.truncate(limit as usize);
        Ok(list)
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        if self.faults.fail_profiles.load(Ordering::Relaxed) {
            bail!("injected profile failure");
        }
        let g = self.lock()?;
        Ok(g.profiles.get(user_id).cloned())
    }

    async fn get_profiles(&self, user_ids: &[String]) -> Result<Vec<UserProfile>> {
        if self.faults.fail_profiles.load(Ordering::Relaxed) {
            bail!("injected profile failure");
        }
        let g = self.lock()?;
        let wanted: BTreeSet<&String> = user_ids.iter().collect();
        Ok(wanted
            .into_iter()
            .filter_map(|id| g.profiles.get(id).cloned())
            .collect())
    }

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<()> {
        let mut g = self.lock()?;
        g.profiles.insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    async fn link_friends(&self, a: &str, b: &str) -> Result<()> {
        let mut g = self.lock()?;
        if !g.profiles.contains_key(a) || !g.profiles.contains_key(b) {
            bail!("profile missing for {a} or {b}");
        }
        if let Some(p) = g.profiles.get_mut(a) {
            p.friends.insert(b.to_string());
        }
        if let Some(p) = g.profiles.get_mut(b) {
            p.friends.insert(a.to_string());
        }
        Ok(())
    }

    async fn unlink_friends(&self, a: &str, b: &str) -> Result<()> {
        let mut g = self.lock()?;
        if let Some(p) = g.profiles.get_mut(a) {
            p.friends.remove(b);
        }
        if let Some(p) = g.profiles.get_mut(b) {
            p.friends.remove(a);
        }
        Ok(())
    }

    async fn top_feed_scores(
        &self,
        user_id: &str,
        community_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<FeedScoreRecord>> {
        self.maybe_delay().await;
        if self.faults.fail_scores.load(Ordering::Relaxed) {
            bail!("injected score provider failure");
        }
        let g = self.lock()?;
        let mut out: Vec<FeedScoreRecord> = g
            .feed_scores
            .values()
            .filter(|r| r.user_id == user_id)
            .filter(|r| community_id.is_none() || r.community_id.as_deref() == community_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        out.truncate(limit as usize);
        Ok(out)
    }

    async fn upsert_feed_scores(&self, records: &[FeedScoreRecord]) -> Result<()> {
        let mut g = self.lock()?;
        for r in records {
            g.feed_scores
                .insert((r.user_id.clone(), r.item_id.clone()), r.clone());
        }
        Ok(())
    }

    async fn load_aggregate(&self, key: &AggregateKey) -> Result<Versioned<AggregateDoc>> {
        let g = self.lock()?;
        Ok(g.aggregates.get(key).cloned().unwrap_or(Versioned {
            version: 0,
            value: AggregateDoc::default(),
        }))
    }

    async fn commit_aggregate(
        &self,
        key: &AggregateKey,
        expected_version: u64,
        doc: &AggregateDoc,
    ) -> Result<CommitOutcome> {
        if self.faults.take_stale() {
            return Ok(CommitOutcome::Stale);
        }
        let mut g = self.lock()?;
        let current = g.aggregates.get(key).map(|v| v.version).unwrap_or(0);
        if current != expected_version {
            return Ok(CommitOutcome::Stale);
        }
        g.aggregates.insert(
            key.clone(),
            Versioned {
                version: current + 1,
                value: *doc,
            },
        );
        Ok(CommitOutcome::Committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemCounters;

    fn item(id: &str, author: &str, vis: Visibility, at: i64) -> Item {
        Item {
            id: id.to_string(),
            author_id: author.to_string(),
            community_tag: None,
            visibility: vis,
            created_at_ms: at,
            tags: BTreeSet::new(),
            content: String::new(),
            counters: ItemCounters::default(),
        }
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let store = MemoryStore::new();
        store
            .insert_item(&item("p1", "a", Visibility::Public, 1))
            .await
            .unwrap();
        let doc = store.load_engagement("p1", None).await.unwrap().unwrap();
        let mut counters = doc.counters.clone();
        counters.share_count = 1;
        let write = EngagementWrite {
            counters,
            reaction: None,
            comment: None,
        };
        assert_eq!(
            store.commit_engagement("p1", doc.version, &write).await.unwrap(),
            CommitOutcome::Committed
        );
        assert_eq!(
            store.commit_engagement("p1", doc.version, &write).await.unwrap(),
            CommitOutcome::Stale
        );
    }

    #[tokio::test]
    async fn queries_are_logged_and_filtered() {
        let store = MemoryStore::new();
        store
            .insert_item(&item("p1", "a", Visibility::Public, 1))
            .await
            .unwrap();
        store
            .insert_item(&item("p2", "b", Visibility::Friends, 2))
            .await
            .unwrap();
        let public = store.query_items(&ItemQuery::public(10, None)).await.unwrap();
        assert_eq!(public.len(), 1);
        let by_b = store
            .query_items(&ItemQuery::authored_by(&["b".to_string()], 10, None))
            .await
            .unwrap();
        assert_eq!(by_b[0].id, "p2");
        let log = store.query_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].kind, "authors");
    }

    #[tokio::test]
    async fn link_friends_requires_both_profiles() {
        let store = MemoryStore::new();
        store.upsert_profile(&UserProfile::new("a")).await.unwrap();
        assert!(store.link_friends("a", "b").await.is_err());
        store.upsert_profile(&UserProfile::new("b")).await.unwrap();
        store.link_friends("a", "b").await.unwrap();
        let a = store.get_profile("a").await.unwrap().unwrap();
        let b = store.get_profile("b").await.unwrap().unwrap();
        assert!(a.friends.contains("b"));
        assert!(b.friends.contains("a"));
    }
}
