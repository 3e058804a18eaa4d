/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}

/// Hand-driven clock for TTL and time-of-day tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    pub fn set(&self, ms: i64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: i64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance_ms(secs.saturating_mul(1000));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

fn to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// `YYYY-MM-DD` of the UTC day containing `ms`.
pub fn utc_day(ms: i64) -> String {
    to_datetime(ms).format("%Y-%m-%d").to_string()
}

/// Hour of day (0-23) at `ms` shifted by `offset_minutes` from UTC.
pub fn local_hour(ms: i64, offset_minutes: i32) -> u8 {
    let shifted = to_datetime(ms) + ChronoDuration::minutes(offset_minutes as i64);
    shifted.hour() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2026-10-19T17:30:00Z
    const T0: i64 = 1_792_431_000_000;

    #[test]
    fn utc_day_formats_date() {
        assert_eq!(utc_day(T0), "2026-10-19");
        assert_eq!(utc_day(0), "1970-01-01");
    }

    #[test]
    fn local_hour_applies_offset() {
        assert_eq!(local_hour(T0, 0), 17);
        assert_eq!(local_hour(T0, 60), 18);
        assert_eq!(local_hour(T0, 330), 23);
        assert_eq!(local_hour(T0, -18 * 60), 23);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        clock.advance_secs(2);
        assert_eq!(clock.now_ms(), 3_000);
        clock.set(10);
        assert_eq!(clock.now_ms(), 10);
    }
}
