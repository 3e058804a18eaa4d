/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Race-safe maintenance of denormalized counters and rolling aggregates.
//!
//! Every update is an optimistic read-modify-write against one versioned
//! document. A stale commit retries the whole cycle with jittered backoff
//! until `max_attempts` is reached, then surfaces [`FeedError::Conflict`].

use crate::clock::{utc_day, Clock};
use crate::config::CoreConfig;
use crate::error::{FeedError, FeedResult};
use crate::metrics::FeedMetrics;
use crate::model::{
    AggregateDoc, AggregateKey, Comment, CommitOutcome, CounterField, ReactionType, UserMetric,
};
use crate::store::{DocumentStore, EngagementDoc, EngagementWrite, ReactionWrite};
use buddy_protocol::{BusEvent, EventPayload, EventType};
use rand::{thread_rng, Rng};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum CounterEvent {
    FieldDelta {
        item_id: String,
        field: CounterField,
        delta: i64,
    },
    /// Upserts the user's reaction, moving one unit between type buckets.
    ReactionSet {
        item_id: String,
        user_id: String,
        reaction: ReactionType,
    },
    ReactionCleared {
        item_id: String,
        user_id: String,
    },
    /// Stores the comment and bumps `commentCount` in the same commit.
    CommentAdded { comment: Comment },
    AggregateIncrement { key: AggregateKey, delta: i64 },
    AggregateSample { key: AggregateKey, value: f64 },
    PointsAwarded { user_id: String, points: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    /// False when the event was a no-op (same reaction again, nothing to clear).
    pub changed: bool,
    pub previous_reaction: Option<ReactionType>,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub txn_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl From<&CoreConfig> for RetrySettings {
    fn from(cfg: &CoreConfig) -> Self {
        Self {
            max_attempts: cfg.max_txn_attempts.max(1),
            txn_timeout: cfg.txn_timeout,
            backoff_base: cfg.retry_backoff_base,
            backoff_max: cfg.retry_backoff_max,
        }
    }
}

enum Step<T> {
    Done(T),
    Stale,
}

pub struct CounterAggregator {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<FeedMetrics>,
    retry: RetrySettings,
}

impl CounterAggregator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        metrics: Arc<FeedMetrics>,
        retry: RetrySettings,
    ) -> Self {
        Self {
            store,
            clock,
            metrics,
            retry,
        }
    }

    pub async fn apply(&self, event: &CounterEvent) -> FeedResult<Applied> {
        match event {
            CounterEvent::FieldDelta {
                item_id,
                field,
                delta,
            } => {
                let (field, delta) = (*field, *delta);
                self.apply_engagement(item_id, None, move |doc| {
                    let mut counters = doc.counters.clone();
                    if !counters.apply_delta(field, delta) {
                        warn!(item_id = %item_id, ?field, delta, "counter clamped");
                    }
                    Ok(Some(EngagementWrite {
                        counters,
                        reaction: None,
                        comment: None,
                    }))
                })
                .await
            }
            CounterEvent::ReactionSet {
                item_id,
                user_id,
                reaction,
            } => {
                let now = self.clock.now_ms();
                let reaction = *reaction;
                self.apply_engagement(item_id, Some(user_id.as_str()), move |doc| {
                    if doc.user_reaction == Some(reaction) {
                        return Ok(None);
                    }
                    let mut counters = doc.counters.clone();
                    if !counters.apply_reaction_change(doc.user_reaction, Some(reaction)) {
                        warn!(item_id = %item_id, "reaction counters clamped");
                    }
                    Ok(Some(EngagementWrite {
                        counters,
                        reaction: Some(ReactionWrite::Put {
                            user_id: user_id.clone(),
                            reaction,
                            at_ms: now,
                        }),
                        comment: None,
                    }))
                })
                .await
            }
            CounterEvent::ReactionCleared { item_id, user_id } => {
                self.apply_engagement(item_id, Some(user_id.as_str()), move |doc| {
                    let Some(prev) = doc.user_reaction else {
                        return Ok(None);
                    };
                    let mut counters = doc.counters.clone();
                    if !counters.apply_reaction_change(Some(prev), None) {
                        warn!(item_id = %item_id, "reaction counters clamped");
                    }
                    Ok(Some(EngagementWrite {
                        counters,
                        reaction: Some(ReactionWrite::Delete {
                            user_id: user_id.clone(),
                        }),
                        comment: None,
                    }))
                })
                .await
            }
            CounterEvent::CommentAdded { comment } => {
                self.apply_engagement(&comment.item_id, None, move |doc| {
                    let mut counters = doc.counters.clone();
                    counters.apply_delta(CounterField::CommentCount, 1);
                    Ok(Some(EngagementWrite {
                        counters,
                        reaction: None,
                        comment: Some(comment.clone()),
                    }))
                })
                .await
            }
            CounterEvent::AggregateIncrement { key, delta } => {
                let delta = *delta;
                self.apply_aggregate(key, move |doc| {
                    let next = doc.count.saturating_add(delta);
                    if next < 0 {
                        warn!(key = %key, delta, "aggregate clamped at zero");
                    }
                    doc.count = next.max(0);
                })
                .await
            }
            CounterEvent::AggregateSample { key, value } => {
                if !value.is_finite() {
                    return Err(FeedError::invalid("sample must be a finite number"));
                }
                let value = *value;
                self.apply_aggregate(key, move |doc| doc.add_sample(value))
                    .await
            }
            CounterEvent::PointsAwarded { user_id, points } => {
                if *points <= 0 {
                    return Err(FeedError::invalid("points must be positive"));
                }
                let points = *points;
                self.apply_aggregate(&AggregateKey::points(user_id), move |doc| {
                    doc.count = doc.count.saturating_add(points);
                })
                .await
            }
        }
    }

    /// Applies every update even when an earlier one fails. Each failure is
    /// logged; the first one is returned.
    pub async fn apply_all(&self, updates: &[CounterEvent]) -> FeedResult<()> {
        let mut first_err = None;
        for update in updates {
            if let Err(e) = self.apply(update).await {
                warn!(?update, "counter update failed: {e}");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub async fn read_aggregate(&self, key: &AggregateKey) -> FeedResult<AggregateDoc> {
        Ok(self.store.load_aggregate(key).await?.value)
    }

    async fn apply_engagement<F>(
        &self,
        item_id: &str,
        user_id: Option<&str>,
        plan: F,
    ) -> FeedResult<Applied>
    where
        F: Fn(&EngagementDoc) -> FeedResult<Option<EngagementWrite>> + Send + Sync,
    {
        let plan = &plan;
        let key = format!("item:{item_id}");
        let ((changed, previous_reaction), attempts) = self
            .retrying(&key, move || self.engagement_attempt(item_id, user_id, plan))
            .await?;
        Ok(Applied {
            changed,
            previous_reaction,
            attempts,
        })
    }

    async fn engagement_attempt<F>(
        &self,
        item_id: &str,
        user_id: Option<&str>,
        plan: &F,
    ) -> FeedResult<Step<(bool, Option<ReactionType>)>>
    where
        F: Fn(&EngagementDoc) -> FeedResult<Option<EngagementWrite>> + Send + Sync,
    {
        let doc = self
            .store
            .load_engagement(item_id, user_id)
            .await?
            .ok_or_else(|| FeedError::not_found(format!("post {item_id}")))?;
        let Some(write) = plan(&doc)? else {
            return Ok(Step::Done((false, doc.user_reaction)));
        };
        match self.store.commit_engagement(item_id, doc.version, &write).await? {
            CommitOutcome::Committed => Ok(Step::Done((true, doc.user_reaction))),
            CommitOutcome::Stale => Ok(Step::Stale),
        }
    }

    async fn apply_aggregate<F>(&self, key: &AggregateKey, update: F) -> FeedResult<Applied>
    where
        F: Fn(&mut AggregateDoc) + Send + Sync,
    {
        let update = &update;
        let ((), attempts) = self
            .retrying(key.as_str(), move || self.aggregate_attempt(key, update))
            .await?;
        Ok(Applied {
            changed: true,
            previous_reaction: None,
            attempts,
        })
    }

    async fn aggregate_attempt<F>(&self, key: &AggregateKey, update: &F) -> FeedResult<Step<()>>
    where
        F: Fn(&mut AggregateDoc) + Send + Sync,
    {
        let current = self.store.load_aggregate(key).await?;
        let mut doc = current.value;
        update(&mut doc);
        doc.updated_at_ms = self.clock.now_ms();
        match self.store.commit_aggregate(key, current.version, &doc).await? {
            CommitOutcome::Committed => Ok(Step::Done(())),
            CommitOutcome::Stale => Ok(Step::Stale),
        }
    }

    /// Runs `attempt` until it commits, fails terminally or exhausts the
    /// configured attempts. Each attempt is bounded by the transaction timeout.
    async fn retrying<T, F, Fut>(&self, key: &str, mut attempt: F) -> FeedResult<(T, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FeedResult<Step<T>>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut backoff = self.retry.backoff_base;
        for n in 1..=max_attempts {
            let outcome = tokio::time::timeout(self.retry.txn_timeout, attempt())
                .await
                .map_err(|_| FeedError::Unavailable(format!("transaction on {key} timed out")))??;
            match outcome {
                Step::Done(v) => {
                    self.metrics.counter_commit();
                    if n > 1 {
                        debug!(key, attempts = n, "committed after retry");
                    }
                    return Ok((v, n));
                }
                Step::Stale => {
                    self.metrics.counter_retry();
                    if n < max_attempts {
                        sleep_with_jitter(backoff).await;
                        backoff = backoff.saturating_mul(2).min(self.retry.backoff_max);
                    }
                }
            }
        }
        self.metrics.counter_conflict();
        warn!(key, attempts = max_attempts, "transaction retries exhausted");
        Err(FeedError::Conflict {
            key: key.to_string(),
            attempts: max_attempts,
        })
    }
}

async fn sleep_with_jitter(base: Duration) {
    let cap = base.as_millis().max(1) as u64;
    let jitter_ms: u64 = thread_rng().gen_range(0..=cap);
    tokio::time::sleep(base + Duration::from_millis(jitter_ms)).await;
}

/// Rolling aggregates implied by a domain event, applied by the write path
/// before the event is published.
pub fn derived_updates(event: &BusEvent) -> Vec<CounterEvent> {
    let actor = event.actor_id.as_str();
    let bump = |key: AggregateKey, delta: i64| CounterEvent::AggregateIncrement { key, delta };
    match event.event_type {
        EventType::PostCreated => vec![bump(AggregateKey::user_metric(actor, UserMetric::Posts), 1)],
        EventType::ReactionAdded => {
            vec![bump(AggregateKey::user_metric(actor, UserMetric::Likes), 1)]
        }
        EventType::MessageSent => vec![
            bump(AggregateKey::messages_per_day(&utc_day(event.occurred_at)), 1),
            bump(AggregateKey::user_metric(actor, UserMetric::Messages), 1),
        ],
        EventType::ConnectionAccepted => vec![bump(AggregateKey::social_graph_edges(), 1)],
        EventType::ConnectionRemoved => vec![bump(AggregateKey::social_graph_edges(), -1)],
        EventType::QuizAttemptSubmitted => match &event.payload {
            Some(EventPayload::QuizAttempt { quiz_id, score }) => vec![CounterEvent::AggregateSample {
                key: AggregateKey::quiz(quiz_id),
                value: *score,
            }],
            _ => {
                warn!("quiz attempt event without payload");
                Vec::new()
            }
        },
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory_store::MemoryStore;
    use crate::model::{Item, ItemCounters, Visibility};
    use std::sync::atomic::Ordering;

    fn settings() -> RetrySettings {
        RetrySettings {
            max_attempts: 5,
            txn_timeout: Duration::from_secs(2),
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(4),
        }
    }

    async fn setup() -> (Arc<MemoryStore>, CounterAggregator) {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_item(&Item {
                id: "p1".to_string(),
                author_id: "a".to_string(),
                community_tag: None,
                visibility: Visibility::Public,
                created_at_ms: 1,
                tags: Default::default(),
                content: "hello".to_string(),
                counters: ItemCounters::default(),
            })
            .await
            .unwrap();
        let agg = CounterAggregator::new(
            store.clone(),
            Arc::new(ManualClock::new(1_000)),
            Arc::new(FeedMetrics::new()),
            settings(),
        );
        (store, agg)
    }

    fn react(user: &str, r: ReactionType) -> CounterEvent {
        CounterEvent::ReactionSet {
            item_id: "p1".to_string(),
            user_id: user.to_string(),
            reaction: r,
        }
    }

    #[tokio::test]
    async fn same_reaction_twice_is_a_no_op() {
        let (store, agg) = setup().await;
        let first = agg.apply(&react("u1", ReactionType::Like)).await.unwrap();
        assert!(first.changed);
        let second = agg.apply(&react("u1", ReactionType::Like)).await.unwrap();
        assert!(!second.changed);
        assert_eq!(second.previous_reaction, Some(ReactionType::Like));
        let item = store.get_item("p1").await.unwrap().unwrap();
        assert_eq!(item.counters.like_count, 1);
    }

    #[tokio::test]
    async fn stale_commits_are_retried() {
        let (store, agg) = setup().await;
        store.faults.stale_commits.store(2, Ordering::SeqCst);
        let applied = agg
            .apply(&CounterEvent::FieldDelta {
                item_id: "p1".to_string(),
                field: CounterField::ShareCount,
                delta: 1,
            })
            .await
            .unwrap();
        assert_eq!(applied.attempts, 3);
        let item = store.get_item("p1").await.unwrap().unwrap();
        assert_eq!(item.counters.share_count, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_conflict() {
        let (store, agg) = setup().await;
        store.faults.stale_commits.store(10, Ordering::SeqCst);
        let err = agg.apply(&react("u1", ReactionType::Wow)).await.unwrap_err();
        assert!(matches!(err, FeedError::Conflict { attempts: 5, .. }));
        let item = store.get_item("p1").await.unwrap().unwrap();
        assert_eq!(item.counters.like_count, 0);
        assert!(item.counters.reaction_counts.is_empty());
    }

    #[tokio::test]
    async fn missing_item_is_not_found() {
        let (_store, agg) = setup().await;
        let err = agg
            .apply(&CounterEvent::ReactionCleared {
                item_id: "nope".to_string(),
                user_id: "u1".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::NotFound(_)));
    }

    #[tokio::test]
    async fn quiz_average_uses_incremental_mean() {
        let (_store, agg) = setup().await;
        let key = AggregateKey::quiz("q1");
        for v in [6.0, 9.0, 3.0] {
            agg.apply(&CounterEvent::AggregateSample {
                key: key.clone(),
                value: v,
            })
            .await
            .unwrap();
        }
        let doc = agg.read_aggregate(&key).await.unwrap();
        assert_eq!(doc.count, 3);
        assert!((doc.mean - 6.0).abs() < 1e-9);
        assert_eq!(doc.updated_at_ms, 1_000);
    }

    #[tokio::test]
    async fn points_are_increment_only() {
        let (_store, agg) = setup().await;
        let err = agg
            .apply(&CounterEvent::PointsAwarded {
                user_id: "u1".to_string(),
                points: -5,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::InvalidArgument(_)));
        agg.apply(&CounterEvent::PointsAwarded {
            user_id: "u1".to_string(),
            points: 15,
        })
        .await
        .unwrap();
        let doc = agg.read_aggregate(&AggregateKey::points("u1")).await.unwrap();
        assert_eq!(doc.count, 15);
    }

    #[tokio::test]
    async fn message_event_updates_day_and_user_buckets() {
        let (_store, agg) = setup().await;
        // 2026-10-19T17:30:00Z
        let at = 1_792_431_000_000;
        let msg = derived_updates(&BusEvent::new(EventType::MessageSent, "u1", at));
        agg.apply_all(&msg).await.unwrap();
        agg.apply_all(&msg).await.unwrap();
        agg.apply_all(&derived_updates(&BusEvent::new(
            EventType::ConnectionRemoved,
            "u1",
            at,
        )))
        .await
        .unwrap();

        let per_day = agg
            .read_aggregate(&AggregateKey::messages_per_day("2026-10-19"))
            .await
            .unwrap();
        assert_eq!(per_day.count, 2);
        let per_user = agg
            .read_aggregate(&AggregateKey::user_metric("u1", UserMetric::Messages))
            .await
            .unwrap();
        assert_eq!(per_user.count, 2);
        let edges = agg
            .read_aggregate(&AggregateKey::social_graph_edges())
            .await
            .unwrap();
        assert_eq!(edges.count, 0);
    }

    #[tokio::test]
    async fn failed_bucket_does_not_skip_the_rest() {
        let (store, agg) = setup().await;
        let at = 1_792_431_000_000;
        // Enough stale commits to exhaust the per-day bucket's attempts only.
        store.faults.stale_commits.store(5, Ordering::SeqCst);
        let err = agg
            .apply_all(&derived_updates(&BusEvent::new(EventType::MessageSent, "u1", at)))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::Conflict { .. }));

        let per_day = agg
            .read_aggregate(&AggregateKey::messages_per_day("2026-10-19"))
            .await
            .unwrap();
        assert_eq!(per_day.count, 0);
        let per_user = agg
            .read_aggregate(&AggregateKey::user_metric("u1", UserMetric::Messages))
            .await
            .unwrap();
        assert_eq!(per_user.count, 1);
    }
}
