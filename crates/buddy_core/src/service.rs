/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Write path: validates the caller's request, commits it, updates counters
//! synchronously and publishes the matching domain event afterwards.

use crate::bus::EventBus;
use crate::clock::Clock;
use crate::counters::{derived_updates, Applied, CounterAggregator, CounterEvent};
use crate::error::{FeedError, FeedResult};
use crate::model::{
    AggregateDoc, AggregateKey, Comment, CounterField, Identity, Item, ItemCounters, ReactionType,
    Visibility,
};
use crate::store::DocumentStore;
use buddy_protocol::{BusEvent, EventPayload, EventType};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

const MAX_COMMENT_PAGE: u32 = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub content: String,
    pub tags: Vec<String>,
    pub visibility: Visibility,
    pub community_tag: Option<String>,
}

fn new_id() -> String {
    let mut b = [0u8; 12];
    OsRng.fill_bytes(&mut b);
    hex::encode(b)
}

fn non_blank(v: Option<&str>) -> Option<String> {
    v.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

pub struct SocialService {
    store: Arc<dyn DocumentStore>,
    aggregator: Arc<CounterAggregator>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    comment_page_size: u32,
}

impl SocialService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        aggregator: Arc<CounterAggregator>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        comment_page_size: u32,
    ) -> Self {
        Self {
            store,
            aggregator,
            bus,
            clock,
            comment_page_size: comment_page_size.clamp(1, MAX_COMMENT_PAGE),
        }
    }

    pub async fn health(&self) -> FeedResult<()> {
        Ok(self.store.health_check().await?)
    }

    async fn require_item(&self, item_id: &str) -> FeedResult<Item> {
        self.store
            .get_item(item_id)
            .await?
            .ok_or_else(|| FeedError::not_found(format!("post {item_id}")))
    }

    pub async fn create_post(&self, caller: &Identity, post: NewPost) -> FeedResult<Item> {
        let content = post.content.trim();
        if content.is_empty() {
            return Err(FeedError::invalid("content must not be empty"));
        }
        let community_tag = non_blank(post.community_tag.as_deref());
        if post.visibility == Visibility::Community && community_tag.is_none() {
            return Err(FeedError::invalid(
                "community visibility requires a community tag",
            ));
        }
        let tags: BTreeSet<String> = post
            .tags
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        let item = Item {
            id: new_id(),
            author_id: caller.user_id.clone(),
            community_tag,
            visibility: post.visibility,
            created_at_ms: self.clock.now_ms(),
            tags,
            content: content.to_string(),
            counters: ItemCounters::default(),
        };
        self.store.insert_item(&item).await?;
        info!(post_id = %item.id, author = %item.author_id, "post created");
        self.follow_up(
            BusEvent::new(EventType::PostCreated, &caller.user_id, item.created_at_ms)
                .with_item(&item.id)
                .with_community(item.community_tag.as_deref()),
        )
        .await;
        Ok(item)
    }

    /// Author or admin only.
    pub async fn delete_post(&self, caller: &Identity, item_id: &str) -> FeedResult<()> {
        let item = self.require_item(item_id).await?;
        if !caller.may_modify(&item.author_id) {
            return Err(FeedError::forbidden(format!(
                "only the author or an admin may delete post {item_id}"
            )));
        }
        self.store.delete_item(item_id).await?;
        info!(post_id = item_id, by = %caller.user_id, "post deleted");
        self.bus.publish(
            BusEvent::new(EventType::PostDeleted, &caller.user_id, self.clock.now_ms())
                .with_item(item_id)
                .with_community(item.community_tag.as_deref()),
        );
        Ok(())
    }

    pub async fn share_post(&self, caller: &Identity, item_id: &str) -> FeedResult<Applied> {
        let applied = self
            .aggregator
            .apply(&CounterEvent::FieldDelta {
                item_id: item_id.to_string(),
                field: CounterField::ShareCount,
                delta: 1,
            })
            .await?;
        self.bus.publish(
            BusEvent::new(EventType::PostShared, &caller.user_id, self.clock.now_ms())
                .with_item(item_id),
        );
        Ok(applied)
    }

    pub async fn react(
        &self,
        caller: &Identity,
        item_id: &str,
        reaction: &str,
    ) -> FeedResult<Applied> {
        let reaction = ReactionType::parse(reaction)
            .ok_or_else(|| FeedError::invalid(format!("unknown reaction type: {reaction:?}")))?;
        let applied = self
            .aggregator
            .apply(&CounterEvent::ReactionSet {
                item_id: item_id.to_string(),
                user_id: caller.user_id.clone(),
                reaction,
            })
            .await?;
        if applied.changed {
            let event_type = if applied.previous_reaction.is_some() {
                EventType::ReactionChanged
            } else {
                EventType::ReactionAdded
            };
            self.follow_up(
                BusEvent::new(event_type, &caller.user_id, self.clock.now_ms())
                    .with_item(item_id)
                    .with_payload(EventPayload::Reaction {
                        reaction: Some(reaction.as_str().to_string()),
                        previous: applied.previous_reaction.map(|r| r.as_str().to_string()),
                    }),
            )
            .await;
        }
        Ok(applied)
    }

    /// Removing a reaction that does not exist is a successful no-op.
    pub async fn unreact(&self, caller: &Identity, item_id: &str) -> FeedResult<Applied> {
        let applied = self
            .aggregator
            .apply(&CounterEvent::ReactionCleared {
                item_id: item_id.to_string(),
                user_id: caller.user_id.clone(),
            })
            .await?;
        if applied.changed {
            self.bus.publish(
                BusEvent::new(EventType::ReactionRemoved, &caller.user_id, self.clock.now_ms())
                    .with_item(item_id)
                    .with_payload(EventPayload::Reaction {
                        reaction: None,
                        previous: applied.previous_reaction.map(|r| r.as_str().to_string()),
                    }),
            );
        }
        Ok(applied)
    }

    pub async fn add_comment(
        &self,
        caller: &Identity,
        item_id: &str,
        text: &str,
        parent_id: Option<&str>,
    ) -> FeedResult<Comment> {
        let text = text.trim();
        if text.is_empty() {
            return Err(FeedError::invalid("comment text must not be empty"));
        }
        let item = self.require_item(item_id).await?;
        let parent_id = non_blank(parent_id);
        if let Some(pid) = parent_id.as_deref() {
            let parent = self
                .store
                .get_comment(item_id, pid)
                .await?
                .ok_or_else(|| FeedError::not_found(format!("comment {pid} on post {item_id}")))?;
            if parent.parent_id.is_some() {
                return Err(FeedError::invalid("replies cannot be nested"));
            }
        }
        let comment = Comment {
            id: new_id(),
            item_id: item_id.to_string(),
            parent_id,
            author_id: caller.user_id.clone(),
            text: text.to_string(),
            created_at_ms: self.clock.now_ms(),
        };
        self.aggregator
            .apply(&CounterEvent::CommentAdded {
                comment: comment.clone(),
            })
            .await?;
        self.bus.publish(
            BusEvent::new(EventType::CommentAdded, &caller.user_id, comment.created_at_ms)
                .with_item(item_id)
                .with_community(item.community_tag.as_deref()),
        );
        Ok(comment)
    }

    pub async fn list_comments(&self, item_id: &str, limit: Option<u32>) -> FeedResult<Vec<Comment>> {
        let limit = match limit {
            Some(0) => return Err(FeedError::invalid("limit must be positive")),
            Some(n) => n.min(MAX_COMMENT_PAGE),
            None => self.comment_page_size,
        };
        self.require_item(item_id).await?;
        Ok(self.store.list_comments(item_id, limit).await?)
    }

    /// Mirrors the friendship on both profiles. Returns false when the two
    /// users were already connected.
    pub async fn accept_connection(&self, caller: &Identity, peer_id: &str) -> FeedResult<bool> {
        let me = self.connection_pair(caller, peer_id).await?;
        if me.contains(peer_id) {
            return Ok(false);
        }
        self.store.link_friends(&caller.user_id, peer_id).await?;
        info!(user = %caller.user_id, peer = peer_id, "connection accepted");
        self.follow_up(
            BusEvent::new(EventType::ConnectionAccepted, &caller.user_id, self.clock.now_ms())
                .with_payload(EventPayload::Connection {
                    peer_id: peer_id.to_string(),
                }),
        )
        .await;
        Ok(true)
    }

    /// Returns false when the two users were not connected.
    pub async fn remove_connection(&self, caller: &Identity, peer_id: &str) -> FeedResult<bool> {
        let me = self.connection_pair(caller, peer_id).await?;
        if !me.contains(peer_id) {
            return Ok(false);
        }
        self.store.unlink_friends(&caller.user_id, peer_id).await?;
        info!(user = %caller.user_id, peer = peer_id, "connection removed");
        self.follow_up(
            BusEvent::new(EventType::ConnectionRemoved, &caller.user_id, self.clock.now_ms())
                .with_payload(EventPayload::Connection {
                    peer_id: peer_id.to_string(),
                }),
        )
        .await;
        Ok(true)
    }

    /// Checks both profiles exist and returns the caller's friend set.
    async fn connection_pair(&self, caller: &Identity, peer_id: &str) -> FeedResult<BTreeSet<String>> {
        let peer_id = peer_id.trim();
        if peer_id.is_empty() || peer_id == caller.user_id {
            return Err(FeedError::invalid("cannot connect a user with themselves"));
        }
        let me = self
            .store
            .get_profile(&caller.user_id)
            .await?
            .ok_or_else(|| FeedError::not_found(format!("profile {}", caller.user_id)))?;
        if self.store.get_profile(peer_id).await?.is_none() {
            return Err(FeedError::not_found(format!("profile {peer_id}")));
        }
        Ok(me.friends)
    }

    /// The attempt is folded into the quiz's running mean before this returns.
    pub async fn submit_quiz_attempt(
        &self,
        caller: &Identity,
        quiz_id: &str,
        score: f64,
    ) -> FeedResult<()> {
        let quiz_id = quiz_id.trim();
        if quiz_id.is_empty() {
            return Err(FeedError::invalid("quiz id must not be empty"));
        }
        if !score.is_finite() || score < 0.0 {
            return Err(FeedError::invalid("score must be a non-negative number"));
        }
        self.record(
            BusEvent::new(EventType::QuizAttemptSubmitted, &caller.user_id, self.clock.now_ms())
                .with_payload(EventPayload::QuizAttempt {
                    quiz_id: quiz_id.to_string(),
                    score,
                }),
        )
        .await
    }

    /// Analytics hook called by the messaging transport after delivery.
    pub async fn record_message_sent(
        &self,
        caller: &Identity,
        thread_id: Option<&str>,
    ) -> FeedResult<()> {
        self.record(
            BusEvent::new(EventType::MessageSent, &caller.user_id, self.clock.now_ms())
                .with_payload(EventPayload::Message {
                    thread_id: non_blank(thread_id),
                }),
        )
        .await
    }

    /// For events whose aggregates are the write itself: they must commit
    /// before the event is published.
    async fn record(&self, event: BusEvent) -> FeedResult<()> {
        self.aggregator.apply_all(&derived_updates(&event)).await?;
        self.bus.publish(event);
        Ok(())
    }

    /// For events following an entity write that already committed: the
    /// derived aggregates are applied in line, failures are logged only.
    async fn follow_up(&self, event: BusEvent) {
        if let Err(e) = self.aggregator.apply_all(&derived_updates(&event)).await {
            warn!(
                event_type = event.event_type.as_str(),
                "derived aggregates not updated: {e}"
            );
        }
        self.bus.publish(event);
    }

    /// Admin only; totals are increment-only.
    pub async fn award_points(
        &self,
        caller: &Identity,
        user_id: &str,
        points: i64,
    ) -> FeedResult<Applied> {
        if !caller.is_admin() {
            return Err(FeedError::forbidden("only admins may award points"));
        }
        if user_id.trim().is_empty() {
            return Err(FeedError::invalid("userId must not be empty"));
        }
        self.aggregator
            .apply(&CounterEvent::PointsAwarded {
                user_id: user_id.trim().to_string(),
                points,
            })
            .await
    }

    pub async fn points_total(&self, user_id: &str) -> FeedResult<i64> {
        Ok(self
            .aggregator
            .read_aggregate(&AggregateKey::points(user_id))
            .await?
            .count)
    }

    pub async fn quiz_stats(&self, quiz_id: &str) -> FeedResult<AggregateDoc> {
        self.aggregator.read_aggregate(&AggregateKey::quiz(quiz_id)).await
    }

    /// `day` is a UTC date, `YYYY-MM-DD`.
    pub async fn messages_on_day(&self, day: &str) -> FeedResult<i64> {
        chrono::NaiveDate::parse_from_str(day, "%Y-%m-%d")
            .map_err(|_| FeedError::invalid(format!("malformed day: {day:?}")))?;
        Ok(self
            .aggregator
            .read_aggregate(&AggregateKey::messages_per_day(day))
            .await?
            .count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::counters::RetrySettings;
    use crate::memory_store::MemoryStore;
    use crate::metrics::FeedMetrics;
    use crate::model::{Role, UserMetric, UserProfile};
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        bus: EventBus,
        svc: SocialService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let metrics = Arc::new(FeedMetrics::new());
        let aggregator = Arc::new(CounterAggregator::new(
            store.clone(),
            clock.clone(),
            metrics.clone(),
            RetrySettings {
                max_attempts: 5,
                txn_timeout: Duration::from_secs(2),
                backoff_base: Duration::from_millis(1),
                backoff_max: Duration::from_millis(4),
            },
        ));
        let bus = EventBus::new(64, metrics);
        let svc = SocialService::new(store.clone(), aggregator, bus.clone(), clock, 50);
        Fixture { store, bus, svc }
    }

    fn post(content: &str) -> NewPost {
        NewPost {
            content: content.to_string(),
            tags: vec![" rust ".to_string(), "".to_string()],
            visibility: Visibility::Public,
            community_tag: None,
        }
    }

    #[tokio::test]
    async fn create_post_validates_and_publishes() {
        let fx = fixture();
        let mut rx = fx.bus.subscribe();
        let me = Identity::user("a");
        assert!(matches!(
            fx.svc.create_post(&me, post("   ")).await,
            Err(FeedError::InvalidArgument(_))
        ));
        let mut scoped = post("hi");
        scoped.visibility = Visibility::Community;
        assert!(matches!(
            fx.svc.create_post(&me, scoped).await,
            Err(FeedError::InvalidArgument(_))
        ));

        let item = fx.svc.create_post(&me, post(" hello ")).await.unwrap();
        assert_eq!(item.content, "hello");
        assert_eq!(item.tags.len(), 1);
        assert_eq!(item.id.len(), 24);
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.event_type, EventType::PostCreated);
        assert_eq!(ev.item_id.as_deref(), Some(item.id.as_str()));
    }

    #[tokio::test]
    async fn only_author_or_admin_may_delete() {
        let fx = fixture();
        let item = fx
            .svc
            .create_post(&Identity::user("a"), post("x"))
            .await
            .unwrap();
        assert!(matches!(
            fx.svc.delete_post(&Identity::user("b"), &item.id).await,
            Err(FeedError::Forbidden(_))
        ));
        fx.svc
            .delete_post(&Identity::new("root", Role::Admin), &item.id)
            .await
            .unwrap();
        assert!(matches!(
            fx.svc.delete_post(&Identity::user("a"), &item.id).await,
            Err(FeedError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_reaction_is_rejected() {
        let fx = fixture();
        let item = fx
            .svc
            .create_post(&Identity::user("a"), post("x"))
            .await
            .unwrap();
        assert!(matches!(
            fx.svc.react(&Identity::user("b"), &item.id, "angry").await,
            Err(FeedError::InvalidArgument(_))
        ));
        let removed = fx.svc.unreact(&Identity::user("b"), &item.id).await.unwrap();
        assert!(!removed.changed);
    }

    #[tokio::test]
    async fn replies_nest_one_level_only() {
        let fx = fixture();
        let me = Identity::user("a");
        let item = fx.svc.create_post(&me, post("x")).await.unwrap();
        let top = fx.svc.add_comment(&me, &item.id, "first", None).await.unwrap();
        let reply = fx
            .svc
            .add_comment(&me, &item.id, "reply", Some(&top.id))
            .await
            .unwrap();
        assert!(matches!(
            fx.svc.add_comment(&me, &item.id, "deeper", Some(&reply.id)).await,
            Err(FeedError::InvalidArgument(_))
        ));
        assert!(matches!(
            fx.svc.add_comment(&me, &item.id, "orphan", Some("missing")).await,
            Err(FeedError::NotFound(_))
        ));
        assert!(matches!(
            fx.svc.add_comment(&me, &item.id, " ", None).await,
            Err(FeedError::InvalidArgument(_))
        ));
        let stored = fx.store.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.counters.comment_count, 2);
        let listed = fx.svc.list_comments(&item.id, None).await.unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn connections_are_mirrored_and_idempotent() {
        let fx = fixture();
        fx.store.upsert_profile(&UserProfile::new("a")).await.unwrap();
        fx.store.upsert_profile(&UserProfile::new("b")).await.unwrap();
        let a = Identity::user("a");
        assert!(fx.svc.accept_connection(&a, "b").await.unwrap());
        assert!(!fx.svc.accept_connection(&a, "b").await.unwrap());
        let b = fx.store.get_profile("b").await.unwrap().unwrap();
        assert!(b.friends.contains("a"));
        assert!(matches!(
            fx.svc.accept_connection(&a, "a").await,
            Err(FeedError::InvalidArgument(_))
        ));
        assert!(matches!(
            fx.svc.accept_connection(&a, "ghost").await,
            Err(FeedError::NotFound(_))
        ));
        assert!(fx.svc.remove_connection(&Identity::user("b"), "a").await.unwrap());
        let a_profile = fx.store.get_profile("a").await.unwrap().unwrap();
        assert!(a_profile.friends.is_empty());
    }

    #[tokio::test]
    async fn quiz_and_message_aggregates_commit_before_returning() {
        let fx = fixture();
        let me = Identity::user("a");
        let _rx = fx.bus.subscribe();
        for i in 0..200 {
            fx.svc
                .submit_quiz_attempt(&me, "q1", (i % 2 * 10) as f64)
                .await
                .unwrap();
            fx.svc.record_message_sent(&me, Some("t1")).await.unwrap();
        }
        let quiz = fx.svc.quiz_stats("q1").await.unwrap();
        assert_eq!(quiz.count, 200);
        assert!((quiz.mean - 5.0).abs() < 1e-9);
        assert_eq!(fx.svc.messages_on_day("1970-01-01").await.unwrap(), 200);
    }

    #[tokio::test]
    async fn failed_quiz_aggregate_is_reported_and_not_published() {
        let fx = fixture();
        let mut rx = fx.bus.subscribe();
        fx.store.faults.stale_commits.store(5, std::sync::atomic::Ordering::SeqCst);
        let err = fx
            .svc
            .submit_quiz_attempt(&Identity::user("a"), "q1", 4.0)
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::Conflict { .. }));
        assert!(rx.try_recv().is_err());
        assert_eq!(fx.svc.quiz_stats("q1").await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn graph_and_user_aggregates_follow_writes() {
        let fx = fixture();
        fx.store.upsert_profile(&UserProfile::new("a")).await.unwrap();
        fx.store.upsert_profile(&UserProfile::new("b")).await.unwrap();
        let a = Identity::user("a");
        let item = fx.svc.create_post(&a, post("x")).await.unwrap();
        fx.svc.react(&Identity::user("b"), &item.id, "like").await.unwrap();
        fx.svc.accept_connection(&a, "b").await.unwrap();

        let read = |key: AggregateKey| {
            let agg = fx.svc.aggregator.clone();
            async move { agg.read_aggregate(&key).await.unwrap().count }
        };
        assert_eq!(read(AggregateKey::user_metric("a", UserMetric::Posts)).await, 1);
        assert_eq!(read(AggregateKey::user_metric("b", UserMetric::Likes)).await, 1);
        assert_eq!(read(AggregateKey::social_graph_edges()).await, 1);
        fx.svc.remove_connection(&a, "b").await.unwrap();
        assert_eq!(read(AggregateKey::social_graph_edges()).await, 0);
    }

    #[tokio::test]
    async fn points_need_admin() {
        let fx = fixture();
        assert!(matches!(
            fx.svc.award_points(&Identity::user("a"), "b", 10).await,
            Err(FeedError::Forbidden(_))
        ));
        let admin = Identity::new("root", Role::Admin);
        fx.svc.award_points(&admin, "b", 10).await.unwrap();
        fx.svc.award_points(&admin, "b", 5).await.unwrap();
        assert_eq!(fx.svc.points_total("b").await.unwrap(), 15);
        assert!(matches!(
            fx.svc.messages_on_day("19-10-2026").await,
            Err(FeedError::InvalidArgument(_))
        ));
    }
}
