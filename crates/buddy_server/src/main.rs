/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

mod api;
mod config;

use anyhow::{Context, Result};
use buddy_core::cache::{KvCache, MemoryCache, RedisCache};
use buddy_core::clock::{Clock, SystemClock};
use buddy_core::memory_store::MemoryStore;
use buddy_core::sqlite_store::SqliteStore;
use buddy_core::store::DocumentStore;
use buddy_core::FeedRuntime;
use config::{load_config, StoreKind};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let cfg = load_config()?;
    let store: Arc<dyn DocumentStore> = match cfg.store {
        StoreKind::Sqlite => {
            info!("feed db: {}", cfg.db_path.display());
            Arc::new(SqliteStore::open(&cfg.db_path).context("db init")?)
        }
        StoreKind::Memory => {
            warn!("using in-memory store, data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache: Arc<dyn KvCache> = match cfg.redis_url.as_deref() {
        Some(url) => match RedisCache::connect(url, cfg.redis_pool_size).await {
            Ok(redis) => Arc::new(redis),
            Err(e) => {
                error!("redis init failed, using in-memory cache: {e:#}");
                Arc::new(MemoryCache::new(clock.clone(), cfg.cache_max_entries))
            }
        },
        None => Arc::new(MemoryCache::new(clock.clone(), cfg.cache_max_entries)),
    };

    let runtime = FeedRuntime::new(cfg.core.clone(), store, cache, clock, cfg.event_buffer);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = runtime.start_workers(shutdown_rx);

    let app = api::router(api::AppState { runtime });
    let listener = tokio::net::TcpListener::bind(cfg.bind)
        .await
        .with_context(|| format!("bind {}", cfg.bind))?;
    info!("buddy feed listening on http://{}", cfg.bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("ctrl-c handler failed: {e}");
            }
            info!("shutting down");
        })
        .await
        .context("serve")?;

    let _ = shutdown_tx.send(true);
    for w in workers {
        if let Err(e) = w.await {
            warn!("worker join failed: {e}");
        }
    }
    Ok(())
}
