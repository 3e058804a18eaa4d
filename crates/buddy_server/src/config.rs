/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{anyhow, Context, Result};
use buddy_core::config::CoreConfig;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub store: StoreKind,
    pub db_path: PathBuf,
    pub redis_url: Option<String>,
    pub redis_pool_size: usize,
    pub cache_max_entries: usize,
    pub event_buffer: usize,
    pub core: CoreConfig,
}

pub fn load_config() -> Result<ServerConfig> {
    let bind = std::env::var("BUDDY_BIND").unwrap_or_else(|_| "0.0.0.0:8790".to_string());
    let bind: SocketAddr = bind
        .parse()
        .with_context(|| format!("BUDDY_BIND invalid: {bind}"))?;
    let store = match std::env::var("BUDDY_STORE")
        .ok()
        .map(|v| v.trim().to_ascii_lowercase())
        .as_deref()
    {
        None | Some("") | Some("sqlite") => StoreKind::Sqlite,
        Some("memory") => StoreKind::Memory,
        Some(other) => return Err(anyhow!("BUDDY_STORE must be sqlite or memory, got {other}")),
    };
    let db_path = std::env::var("BUDDY_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("buddy_feed.db"));
    let redis_url = std::env::var("BUDDY_REDIS_URL")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    let redis_pool_size = std::env::var("BUDDY_REDIS_POOL_SIZE")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(4)
        .max(1)
        .min(64);
    let cache_max_entries = std::env::var("BUDDY_CACHE_MAX_ENTRIES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(10_000)
        .max(64)
        .min(1_000_000);
    let event_buffer = std::env::var("BUDDY_EVENT_BUFFER")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(1024)
        .max(16)
        .min(65_536);

    Ok(ServerConfig {
        bind,
        store,
        db_path,
        redis_url,
        redis_pool_size,
        cache_max_entries,
        event_buffer,
        core: CoreConfig::from_env(),
    })
}
