/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::bus::{spawn_subscriber, EventBus};
use crate::cache::KvCache;
use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::counters::{CounterAggregator, RetrySettings};
use crate::feed::{FeedComposer, FeedSettings};
use crate::metrics::FeedMetrics;
use crate::personalization::{PersonalizationCache, PersonalizationSettings};
use crate::score::ScoreEngine;
use crate::service::SocialService;
use crate::store::DocumentStore;
use crate::trending::TrendingTracker;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Every component wired once at process start and shared by reference.
#[derive(Clone)]
pub struct FeedRuntime {
    pub config: CoreConfig,
    pub store: Arc<dyn DocumentStore>,
    pub metrics: Arc<FeedMetrics>,
    pub bus: EventBus,
    pub aggregator: Arc<CounterAggregator>,
    pub composer: Arc<FeedComposer>,
    pub personalization: Arc<PersonalizationCache>,
    pub trending: Arc<TrendingTracker>,
    pub social: Arc<SocialService>,
}

impl FeedRuntime {
    pub fn new(
        config: CoreConfig,
        store: Arc<dyn DocumentStore>,
        cache: Arc<dyn KvCache>,
        clock: Arc<dyn Clock>,
        event_buffer: usize,
    ) -> Self {
        let metrics = Arc::new(FeedMetrics::new());
        let bus = EventBus::new(event_buffer, metrics.clone());
        let aggregator = Arc::new(CounterAggregator::new(
            store.clone(),
            clock.clone(),
            metrics.clone(),
            RetrySettings::from(&config),
        ));
        let composer = Arc::new(FeedComposer::new(
            store.clone(),
            metrics.clone(),
            FeedSettings::from(&config),
        ));
        let personalization = Arc::new(PersonalizationCache::new(
            store.clone(),
            cache,
            composer.clone(),
            ScoreEngine::new(config.weights),
            clock.clone(),
            metrics.clone(),
            PersonalizationSettings::from(&config),
        ));
        let trending = Arc::new(TrendingTracker::new(config.trending_cap, clock.clone()));
        let social = Arc::new(SocialService::new(
            store.clone(),
            aggregator.clone(),
            bus.clone(),
            clock,
            config.comment_page_size,
        ));
        Self {
            config,
            store,
            metrics,
            bus,
            aggregator,
            composer,
            personalization,
            trending,
            social,
        }
    }

    /// Subscribes the bus consumers. Counters and aggregates are applied on
    /// the write path, so only fan-out lives here.
    pub fn start_workers(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![spawn_subscriber(&self.bus, self.trending.clone(), shutdown)]
    }
}
