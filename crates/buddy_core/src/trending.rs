/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::bus::EventSubscriber;
use crate::clock::Clock;
use anyhow::Result;
use async_trait::async_trait;
use buddy_protocol::{BusEvent, EventType};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Bucket used for items created outside any community.
pub const GLOBAL_COMMUNITY: &str = "global";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendingEntry {
    pub item_id: String,
    pub inserted_at_ms: i64,
}

/// Capped most-recent-first list of created items per community.
pub struct TrendingTracker {
    cap: usize,
    clock: Arc<dyn Clock>,
    lists: RwLock<HashMap<String, VecDeque<TrendingEntry>>>,
}

impl TrendingTracker {
    pub fn new(cap: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            cap: cap.max(1),
            clock,
            lists: RwLock::new(HashMap::new()),
        }
    }

    pub async fn record(&self, community_id: &str, item_id: &str) {
        let entry = TrendingEntry {
            item_id: item_id.to_string(),
            inserted_at_ms: self.clock.now_ms(),
        };
        let mut lists = self.lists.write().await;
        let list = lists.entry(community_id.to_string()).or_default();
        list.push_front(entry);
        list.truncate(self.cap);
    }

    pub async fn get_trending(&self, community_id: &str) -> Vec<TrendingEntry> {
        self.lists
            .read()
            .await
            .get(community_id)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventSubscriber for TrendingTracker {
    fn name(&self) -> &'static str {
        "trending"
    }

    async fn on_event(&self, event: &BusEvent) -> Result<()> {
        if event.event_type != EventType::PostCreated {
            return Ok(());
        }
        let Some(item_id) = event.item_id.as_deref() else {
            return Ok(());
        };
        let community = event
            .community_id
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(GLOBAL_COMMUNITY);
        self.record(community, item_id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn list_never_exceeds_cap() {
        let clock = Arc::new(ManualClock::new(0));
        let tracker = TrendingTracker::new(100, clock.clone());
        for i in 0..150 {
            clock.advance_ms(1);
            tracker.record("mit", &format!("p{i}")).await;
        }
        let list = tracker.get_trending("mit").await;
        assert_eq!(list.len(), 100);
        assert_eq!(list[0].item_id, "p149");
        assert_eq!(list[99].item_id, "p50");
        assert!(list.windows(2).all(|w| w[0].inserted_at_ms > w[1].inserted_at_ms));
    }

    #[tokio::test]
    async fn only_created_events_are_tracked() {
        let tracker = TrendingTracker::new(10, Arc::new(ManualClock::new(5)));
        let created = BusEvent::new(EventType::PostCreated, "u1", 5)
            .with_item("p1")
            .with_community(Some("mit"));
        let shared = BusEvent::new(EventType::PostShared, "u1", 6).with_item("p2");
        let global = BusEvent::new(EventType::PostCreated, "u1", 7).with_item("p3");
        tracker.on_event(&created).await.unwrap();
        tracker.on_event(&shared).await.unwrap();
        tracker.on_event(&global).await.unwrap();
        assert_eq!(tracker.get_trending("mit").await.len(), 1);
        let g = tracker.get_trending(GLOBAL_COMMUNITY).await;
        assert_eq!(g.len(), 1);
        assert_eq!(g[0].item_id, "p3");
        assert!(tracker.get_trending("other").await.is_empty());
    }
}
