/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! In-process fan-out of domain events to background subscribers
//! (counter aggregation, trending).

use crate::metrics::FeedMetrics;
use anyhow::Result;
use async_trait::async_trait;
use buddy_protocol::BusEvent;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
    metrics: Arc<FeedMetrics>,
}

impl EventBus {
    pub fn new(buffer: usize, metrics: Arc<FeedMetrics>) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(16));
        Self { tx, metrics }
    }

    /// Best-effort: a write that already committed never fails because
    /// nobody is listening.
    pub fn publish(&self, event: BusEvent) {
        let event_type = event.event_type.as_str();
        match self.tx.send(event) {
            Ok(n) => {
                self.metrics.event_published();
                debug!(event_type, receivers = n, "event published");
            }
            Err(_) => {
                self.metrics.event_unobserved();
                debug!(event_type, "event published with no subscribers");
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
pub trait EventSubscriber: Send + Sync {
    fn name(&self) -> &'static str;
    async fn on_event(&self, event: &BusEvent) -> Result<()>;
}

/// Drives `subscriber` from the bus until shutdown flips, the shutdown sender
/// is dropped or the bus closes.
/// The receiver is created before the task starts, so nothing published after
/// this call returns is missed.
pub fn spawn_subscriber(
    bus: &EventBus,
    subscriber: Arc<dyn EventSubscriber>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    let metrics = bus.metrics.clone();
    tokio::spawn(async move {
        let name = subscriber.name();
        info!(subscriber = name, "event subscriber started");
        loop {
            let event = tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender means nobody can signal shutdown any more.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                ev = rx.recv() => ev,
            };
            match event {
                Ok(ev) => {
                    if let Err(e) = subscriber.on_event(&ev).await {
                        metrics.subscriber_error();
                        warn!(
                            subscriber = name,
                            event_type = ev.event_type.as_str(),
                            "event handling failed: {e:#}"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(subscriber = name, skipped = n, "event subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        info!(subscriber = name, "event subscriber stopped");
    })
}
