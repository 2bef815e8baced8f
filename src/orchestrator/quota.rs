//! Quota guard for rate-limited upstream dependencies
//!
//! Tracks per-minute and per-day call ceilings. Callers ask before each
//! upstream call; a denied call is rejected gracefully (skip this cycle)
//! rather than queued.

use crate::config::QuotaConfig;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone)]
struct QuotaWindows {
    minute_start: DateTime<Utc>,
    minute_count: u32,
    day_start: DateTime<Utc>,
    day_count: u32,
}

/// Per-minute / per-day call counters with graceful rejection
pub struct QuotaGuard {
    config: QuotaConfig,
    windows: Mutex<QuotaWindows>,
}

/// Snapshot of current quota consumption
#[derive(Debug, Clone)]
pub struct QuotaUsage {
    pub minute_used: u32,
    pub minute_limit: u32,
    pub day_used: u32,
    pub day_limit: u32,
}

impl QuotaGuard {
    pub fn new(config: QuotaConfig) -> Self {
        let now = Utc::now();
        Self {
            config,
            windows: Mutex::new(QuotaWindows {
                minute_start: now,
                minute_count: 0,
                day_start: now,
                day_count: 0,
            }),
        }
    }

    /// Reserve one upstream call. Returns false when either ceiling is
    /// hit; counters roll over when their window has elapsed.
    pub async fn try_acquire(&self, label: &str) -> bool {
        let now = Utc::now();
        let mut w = self.windows.lock().await;

        if now - w.minute_start >= Duration::minutes(1) {
            w.minute_start = now;
            w.minute_count = 0;
        }
        if now - w.day_start >= Duration::days(1) {
            w.day_start = now;
            w.day_count = 0;
        }

        if w.minute_count >= self.config.per_minute {
            warn!("[Quota] {} rejected: per-minute ceiling {}", label, self.config.per_minute);
            return false;
        }
        if w.day_count >= self.config.per_day {
            warn!("[Quota] {} rejected: per-day ceiling {}", label, self.config.per_day);
            return false;
        }

        w.minute_count += 1;
        w.day_count += 1;
        true
    }

    pub async fn usage(&self) -> QuotaUsage {
        let w = self.windows.lock().await;
        QuotaUsage {
            minute_used: w.minute_count,
            minute_limit: self.config.per_minute,
            day_used: w.day_count,
            day_limit: self.config.per_day,
        }
    }
}
