/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionType {
    Like,
    Love,
    Clap,
    Wow,
}

impl ReactionType {
    pub const ALL: [ReactionType; 4] = [Self::Like, Self::Love, Self::Clap, Self::Wow];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Love => "love",
            Self::Clap => "clap",
            Self::Wow => "wow",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "like" => Some(Self::Like),
            "love" => Some(Self::Love),
            "clap" => Some(Self::Clap),
            "wow" => Some(Self::Wow),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Community,
    Friends,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Community => "community",
            Self::Friends => "friends",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "public" => Some(Self::Public),
            // older clients still send the campus-era name
            "community" | "college" => Some(Self::Community),
            "friends" => Some(Self::Friends),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CounterField {
    LikeCount,
    CommentCount,
    ShareCount,
}

/// Denormalized engagement counters stored on an item.
///
/// `like_count` is the total number of reactions across every type, so
/// switching a reaction moves one unit between buckets and leaves it alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCounters {
    pub like_count: u64,
    pub comment_count: u64,
    pub share_count: u64,
    #[serde(default)]
    pub reaction_counts: BTreeMap<ReactionType, u64>,
}

impl ItemCounters {
    pub fn reaction(&self, ty: ReactionType) -> u64 {
        self.reaction_counts.get(&ty).copied().unwrap_or(0)
    }

    /// Moves the counters from `previous` to `next`. Returns false when a
    /// decrement had to be clamped at zero.
    pub fn apply_reaction_change(
        &mut self,
        previous: Option<ReactionType>,
        next: Option<ReactionType>,
    ) -> bool {
        let mut in_range = true;
        if previous == next {
            return in_range;
        }
        if let Some(prev) = previous {
            let bucket = self.reaction_counts.entry(prev).or_insert(0);
            in_range &= step(bucket, -1);
            if *bucket == 0 {
                self.reaction_counts.remove(&prev);
            }
        }
        if let Some(next) = next {
            let bucket = self.reaction_counts.entry(next).or_insert(0);
            in_range &= step(bucket, 1);
        }
        match (previous, next) {
            (None, Some(_)) => in_range &= step(&mut self.like_count, 1),
            (Some(_), None) => in_range &= step(&mut self.like_count, -1),
            _ => {}
        }
        in_range
    }

    pub fn apply_delta(&mut self, field: CounterField, delta: i64) -> bool {
        let slot = match field {
            CounterField::LikeCount => &mut self.like_count,
            CounterField::CommentCount => &mut self.comment_count,
            CounterField::ShareCount => &mut self.share_count,
        };
        step(slot, delta)
    }
}

fn step(slot: &mut u64, delta: i64) -> bool {
    match slot.checked_add_signed(delta) {
        Some(v) => {
            *slot = v;
            true
        }
        None if delta < 0 => {
            *slot = 0;
            false
        }
        None => {
            *slot = u64::MAX;
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub author_id: String,
    #[serde(default)]
    pub community_tag: Option<String>,
    pub visibility: Visibility,
    pub created_at_ms: i64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub counters: ItemCounters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub item_id: String,
    pub user_id: String,
    pub reaction: ReactionType,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub item_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub author_id: String,
    pub text: String,
    pub created_at_ms: i64,
}

/// The slice of a member profile the feed pipeline needs. `friends` is the
/// denormalized, always-mirrored connection list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub skills: BTreeSet<String>,
    #[serde(default)]
    pub hobbies: BTreeSet<String>,
    #[serde(default)]
    pub friends: BTreeSet<String>,
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl UserProfile {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Self::default()
        }
    }

    pub fn mutual_connections(&self, other: &UserProfile) -> usize {
        self.friends.intersection(&other.friends).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedScoreRecord {
    pub user_id: String,
    pub item_id: String,
    #[serde(default)]
    pub community_id: Option<String>,
    pub score: f64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Admin,
    EventHost,
    QuizHost,
    User,
}

impl Role {
    pub fn parse(input: &str) -> Self {
        match input.trim().to_ascii_lowercase().as_str() {
            "admin" => Self::Admin,
            "event-host" | "event_host" => Self::EventHost,
            "quiz-host" | "quiz_host" => Self::QuizHost,
            _ => Self::User,
        }
    }
}

/// Caller identity as handed over by the identity provider. Trusted as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: &str, role: Role) -> Self {
        Self {
            user_id: user_id.to_string(),
            role,
        }
    }

    pub fn user(user_id: &str) -> Self {
        Self::new(user_id, Role::User)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn may_modify(&self, owner_id: &str) -> bool {
        self.user_id == owner_id || self.is_admin()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The document changed since it was read.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserMetric {
    Posts,
    Likes,
    Messages,
}

impl UserMetric {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Posts => "posts",
            Self::Likes => "likes",
            Self::Messages => "messages",
        }
    }
}

/// Identifier of one aggregate counter document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregateKey(String);

impl AggregateKey {
    pub fn messages_per_day(day: &str) -> Self {
        Self(format!("messages_per_day:{day}"))
    }

    pub fn quiz(quiz_id: &str) -> Self {
        Self(format!("quiz:{quiz_id}"))
    }

    pub fn user_metric(user_id: &str, metric: UserMetric) -> Self {
        Self(format!("user:{user_id}:{}", metric.as_str()))
    }

    pub fn points(user_id: &str) -> Self {
        Self(format!("points:{user_id}"))
    }

    pub fn social_graph_edges() -> Self {
        Self("social_graph:edges".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// `(count, runningMean)` pair. Plain counters leave `mean` at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateDoc {
    pub count: i64,
    pub mean: f64,
    pub updated_at_ms: i64,
}

impl AggregateDoc {
    pub fn add_sample(&mut self, value: f64) {
        self.count += 1;
        self.mean += (value - self.mean) / self.count as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switching_reaction_moves_one_unit() {
        let mut c = ItemCounters::default();
        c.apply_reaction_change(None, Some(ReactionType::Like));
        c.apply_reaction_change(None, Some(ReactionType::Like));
        assert_eq!(c.like_count, 2);
        assert_eq!(c.reaction(ReactionType::Like), 2);

        c.apply_reaction_change(Some(ReactionType::Like), Some(ReactionType::Love));
        assert_eq!(c.like_count, 2);
        assert_eq!(c.reaction(ReactionType::Like), 1);
        assert_eq!(c.reaction(ReactionType::Love), 1);
    }

    #[test]
    fn clearing_reaction_decrements_total() {
        let mut c = ItemCounters::default();
        c.apply_reaction_change(None, Some(ReactionType::Wow));
        c.apply_reaction_change(Some(ReactionType::Wow), None);
        assert_eq!(c.like_count, 0);
        assert!(c.reaction_counts.is_empty());
    }

    #[test]
    fn counters_never_go_negative() {
        let mut c = ItemCounters::default();
        assert!(!c.apply_delta(CounterField::CommentCount, -3));
        assert_eq!(c.comment_count, 0);
        assert!(!c.apply_reaction_change(Some(ReactionType::Clap), None));
        assert_eq!(c.like_count, 0);
        assert_eq!(c.reaction(ReactionType::Clap), 0);
    }

    #[test]
    fn reaction_counts_serialize_with_string_keys() {
        let mut c = ItemCounters::default();
        c.apply_reaction_change(None, Some(ReactionType::Love));
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["reactionCounts"]["love"], 1);
        assert_eq!(v["likeCount"], 1);
    }

    #[test]
    fn incremental_mean_matches_plain_average() {
        let mut doc = AggregateDoc::default();
        for v in [4.0, 8.0, 6.0, 10.0] {
            doc.add_sample(v);
        }
        assert_eq!(doc.count, 4);
        assert!((doc.mean - 7.0).abs() < 1e-9);
    }

    #[test]
    fn parse_helpers_accept_known_values() {
        assert_eq!(ReactionType::parse(" Love "), Some(ReactionType::Love));
        assert_eq!(ReactionType::parse("angry"), None);
        assert_eq!(Visibility::parse("college"), Some(Visibility::Community));
        assert_eq!(Role::parse("quiz-host"), Role::QuizHost);
        assert_eq!(Role::parse("whatever"), Role::User);
    }

    #[test]
    fn mutual_connections_counts_shared_friends() {
        let mut a = UserProfile::new("a");
        let mut b = UserProfile::new("b");
        a.friends.extend(["x".to_string(), "y".to_string(), "z".to_string()]);
        b.friends.extend(["y".to_string(), "z".to_string(), "w".to_string()]);
        assert_eq!(a.mutual_connections(&b), 2);
    }
}
