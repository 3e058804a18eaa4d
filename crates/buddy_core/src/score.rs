/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Ranking score for a (viewer, candidate) pair. Pure: no I/O, no clock.

use crate::model::{Item, UserProfile};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub mood_boost: f64,
    pub evening_boost: f64,
    /// First local hour of the evening window.
    pub evening_start_hour: u8,
    /// Local hour at which the evening window closes (exclusive). The window
    /// wraps past midnight when `evening_end_hour <= evening_start_hour`.
    pub evening_end_hour: u8,
    pub overlap_weight: f64,
    pub mutual_weight: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            mood_boost: 0.1,
            evening_boost: 0.05,
            evening_start_hour: 18,
            evening_end_hour: 6,
            overlap_weight: 0.03,
            mutual_weight: 0.02,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Excited,
    Calm,
    Neutral,
}

impl Mood {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "excited" => Some(Self::Excited),
            "calm" => Some(Self::Calm),
            "neutral" => Some(Self::Neutral),
            _ => None,
        }
    }

    pub fn is_heightened(&self) -> bool {
        matches!(self, Self::Excited)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreContext {
    /// Viewer-local hour of day, 0-23.
    pub local_hour: u8,
    pub mood: Option<Mood>,
}

#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub item: &'a Item,
    pub base_score: f64,
    pub mutual_connections: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ScoreEngine {
    weights: ScoreWeights,
}

impl ScoreEngine {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    pub fn is_evening(&self, local_hour: u8) -> bool {
        let (start, end) = (self.weights.evening_start_hour, self.weights.evening_end_hour);
        if start < end {
            local_hour >= start && local_hour < end
        } else {
            local_hour >= start || local_hour < end
        }
    }

    pub fn score(&self, viewer: &UserProfile, candidate: &Candidate<'_>, ctx: &ScoreContext) -> f64 {
        let w = &self.weights;
        let mut score = candidate.base_score;
        if ctx.mood.is_some_and(|m| m.is_heightened()) {
            score += w.mood_boost;
        }
        if self.is_evening(ctx.local_hour) {
            score += w.evening_boost;
        }
        let overlap = candidate
            .item
            .tags
            .iter()
            .filter(|t| viewer.skills.contains(*t) || viewer.hobbies.contains(*t))
            .count();
        score += w.overlap_weight * overlap as f64;
        score += w.mutual_weight * candidate.mutual_connections as f64;
        score
    }
}

/// Ranking order: score descending, then newer first, then id.
pub fn rank_order(a_score: f64, a: &Item, b_score: f64, b: &Item) -> Ordering {
    b_score
        .total_cmp(&a_score)
        .then_with(|| b.created_at_ms.cmp(&a.created_at_ms))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemCounters, Visibility};

    fn item(id: &str, at: i64, tags: &[&str]) -> Item {
        Item {
            id: id.to_string(),
            author_id: "author".to_string(),
            community_tag: None,
            visibility: Visibility::Public,
            created_at_ms: at,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            content: String::new(),
            counters: ItemCounters::default(),
        }
    }

    fn viewer() -> UserProfile {
        let mut v = UserProfile::new("v");
        v.skills.insert("rust".to_string());
        v.hobbies.insert("chess".to_string());
        v
    }

    #[test]
    fn boosts_add_up() {
        let engine = ScoreEngine::default();
        let it = item("i1", 1, &["rust", "chess", "golf"]);
        let c = Candidate {
            item: &it,
            base_score: 0.5,
            mutual_connections: 3,
        };
        let ctx = ScoreContext {
            local_hour: 20,
            mood: Some(Mood::Excited),
        };
        let s = engine.score(&viewer(), &c, &ctx);
        let expected = 0.5 + 0.1 + 0.05 + 0.03 * 2.0 + 0.02 * 3.0;
        assert!((s - expected).abs() < 1e-12);
    }

    #[test]
    fn score_is_deterministic() {
        let engine = ScoreEngine::default();
        let it = item("i1", 1, &["rust"]);
        let c = Candidate {
            item: &it,
            base_score: 0.25,
            mutual_connections: 1,
        };
        let ctx = ScoreContext {
            local_hour: 9,
            mood: Some(Mood::Calm),
        };
        let a = engine.score(&viewer(), &c, &ctx);
        let b = engine.score(&viewer(), &c, &ctx);
        assert_eq!(a.to_bits(), b.to_bits());
        assert!((a - (0.25 + 0.03 + 0.02)).abs() < 1e-12);
    }

    #[test]
    fn evening_window_wraps_midnight() {
        let engine = ScoreEngine::default();
        for h in [18, 21, 23, 0, 3, 5] {
            assert!(engine.is_evening(h), "hour {h}");
        }
        for h in [6, 9, 12, 17] {
            assert!(!engine.is_evening(h), "hour {h}");
        }
        let daytime = ScoreEngine::new(ScoreWeights {
            evening_start_hour: 9,
            evening_end_hour: 17,
            ..ScoreWeights::default()
        });
        assert!(daytime.is_evening(9));
        assert!(!daytime.is_evening(17));
    }

    #[test]
    fn ties_break_on_recency_then_id() {
        let old = item("b", 1, &[]);
        let new = item("c", 2, &[]);
        let twin = item("a", 2, &[]);
        let mut v = vec![(0.5, &old), (0.5, &new), (0.5, &twin), (0.9, &old)];
        v.sort_by(|x, y| rank_order(x.0, x.1, y.0, y.1));
        let ids: Vec<_> = v.iter().map(|(s, i)| (*s, i.id.as_str())).collect();
        assert_eq!(ids, vec![(0.9, "b"), (0.5, "a"), (0.5, "c"), (0.5, "b")]);
    }

    #[test]
    fn mood_parsing() {
        assert_eq!(Mood::parse("Excited"), Some(Mood::Excited));
        assert_eq!(Mood::parse("bored"), None);
        assert!(!Mood::Calm.is_heightened());
    }
}
