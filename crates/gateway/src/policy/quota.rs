//! In-memory quota gate with fixed hourly and daily windows.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

use super::{PolicyError, PolicyGate};

const HOUR: Duration = Duration::hours(1);
const DAY: Duration = Duration::days(1);

/// Query-count limits for one user. `None` = unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuotaLimits {
    pub queries_per_hour: Option<u64>,
    pub queries_per_day: Option<u64>,
}

/// The `[quota]` configuration table: default limits plus per-user overrides.
///
/// ```toml
/// [quota.defaults]
/// queries_per_hour = 100
///
/// [quota.users.alice]
/// queries_per_hour = 5
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuotaConfig {
    pub defaults: QuotaLimits,
    pub users: HashMap<String, QuotaLimits>,
}

/// A user's counters as of some instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub hourly_queries: u64,
    pub daily_queries: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub hourly_reset_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub daily_reset_at: OffsetDateTime,
}

/// One fixed counting window: (count, window start).
#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    started_at: OffsetDateTime,
}

impl Window {
    fn new(now: OffsetDateTime) -> Self {
        Self {
            count: 0,
            started_at: now,
        }
    }

    /// Reset the window if it has expired.
    fn roll(&mut self, now: OffsetDateTime, length: Duration) {
        if now - self.started_at >= length {
            self.count = 0;
            self.started_at = now;
        }
    }

    fn reset_at(&self, length: Duration) -> OffsetDateTime {
        self.started_at + length
    }
}

#[derive(Debug, Clone, Copy)]
struct UserUsage {
    hourly: Window,
    daily: Window,
}

impl UserUsage {
    fn new(now: OffsetDateTime) -> Self {
        Self {
            hourly: Window::new(now),
            daily: Window::new(now),
        }
    }

    fn roll(&mut self, now: OffsetDateTime) {
        self.hourly.roll(now, HOUR);
        self.daily.roll(now, DAY);
    }

    fn check(&self, limits: &QuotaLimits) -> Result<(), PolicyError> {
        let windows = [
            ("hourly_queries", limits.queries_per_hour, &self.hourly, HOUR),
            ("daily_queries", limits.queries_per_day, &self.daily, DAY),
        ];
        for (limit_type, limit, window, length) in windows {
            if let Some(limit) = limit {
                if window.count >= limit {
                    return Err(PolicyError::RateLimitExceeded {
                        limit_type: limit_type.to_string(),
                        limit,
                        current_usage: window.count,
                        reset_at: window.reset_at(length),
                    });
                }
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            hourly_queries: self.hourly.count,
            daily_queries: self.daily.count,
            hourly_reset_at: self.hourly.reset_at(HOUR),
            daily_reset_at: self.daily.reset_at(DAY),
        }
    }
}

/// Reference [`PolicyGate`] keeping per-user counters in process memory.
///
/// Check-and-increment happens under one lock, so concurrent requests for
/// the same user can never overspend the last slot.
pub struct QuotaPolicyGate {
    defaults: QuotaLimits,
    overrides: HashMap<String, QuotaLimits>,
    usage: Mutex<HashMap<String, UserUsage>>,
}

impl QuotaPolicyGate {
    pub fn new(defaults: QuotaLimits) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
            usage: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: QuotaConfig) -> Self {
        Self {
            defaults: config.defaults,
            overrides: config.users,
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// Override the default limits for one user.
    pub fn with_user_limits(mut self, user_id: impl Into<String>, limits: QuotaLimits) -> Self {
        self.overrides.insert(user_id.into(), limits);
        self
    }

    pub fn limits_for(&self, user_id: &str) -> QuotaLimits {
        self.overrides
            .get(user_id)
            .copied()
            .unwrap_or(self.defaults)
    }

    /// Current counters for `user_id`; zero for users never seen.
    pub async fn usage(&self, user_id: &str) -> UsageSnapshot {
        self.usage_at(user_id, OffsetDateTime::now_utc()).await
    }

    async fn usage_at(&self, user_id: &str, now: OffsetDateTime) -> UsageSnapshot {
        let usage = self.usage.lock().await;
        let mut current = usage
            .get(user_id)
            .copied()
            .unwrap_or_else(|| UserUsage::new(now));
        current.roll(now);
        current.snapshot()
    }

    async fn check_at(&self, user_id: &str, now: OffsetDateTime) -> Result<(), PolicyError> {
        let limits = self.limits_for(user_id);
        let mut usage = self.usage.lock().await;
        // Only charging creates counters.
        match usage.get_mut(user_id) {
            Some(entry) => {
                entry.roll(now);
                entry.check(&limits)
            }
            None => UserUsage::new(now).check(&limits),
        }
    }

    async fn charge_at(&self, user_id: &str, now: OffsetDateTime) -> Result<(), PolicyError> {
        let limits = self.limits_for(user_id);
        let mut usage = self.usage.lock().await;
        let entry = usage
            .entry(user_id.to_string())
            .or_insert_with(|| UserUsage::new(now));
        entry.roll(now);
        entry.check(&limits)?;
        entry.hourly.count += 1;
        entry.daily.count += 1;
        Ok(())
    }
}

#[async_trait]
impl PolicyGate for QuotaPolicyGate {
    async fn validate_execution(
        &self,
        user_id: &str,
        _sql: &str,
        _engine: &str,
    ) -> Result<(), PolicyError> {
        self.check_at(user_id, OffsetDateTime::now_utc()).await
    }

    async fn increment_usage(&self, user_id: &str) -> Result<(), PolicyError> {
        self.charge_at(user_id, OffsetDateTime::now_utc()).await
    }
}
