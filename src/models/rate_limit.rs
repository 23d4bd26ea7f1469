use serde::{Deserialize, Serialize};

use crate::constants::{MAX_CONSENTS_PER_DAY, MAX_CONSENTS_PER_HOUR};
use crate::error::{AppError, Result};

const HOUR_SECS: i64 = 3600;
const DAY_SECS: i64 = 86_400;

/// How many consent submissions one visitor may make per window.
/// Stored with the cookie banner settings so operators can tune it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentLimits {
    pub per_hour: u32,
    pub per_day: u32,
}

impl Default for ConsentLimits {
    fn default() -> Self {
        Self {
            per_hour: MAX_CONSENTS_PER_HOUR,
            per_day: MAX_CONSENTS_PER_DAY,
        }
    }
}

impl ConsentLimits {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.per_hour == 0 {
            return Err("Hourly consent limit must be at least 1".to_string());
        }
        if self.per_day < self.per_hour {
            return Err("Daily consent limit must not be below the hourly limit".to_string());
        }
        Ok(())
    }
}

/// Fixed window: `count` submissions seen until `resets_at`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowCounter {
    pub count: u32,
    /// Unix timestamp when the window closes
    pub resets_at: i64,
}

impl WindowCounter {
    fn open(now: i64, length: i64) -> Self {
        Self {
            count: 0,
            resets_at: now + length,
        }
    }

    /// Start a fresh window if the current one has closed
    fn roll(&mut self, now: i64, length: i64) {
        if now >= self.resets_at {
            *self = Self::open(now, length);
        }
    }
}

/// Per-visitor consent submission counters, keyed by visitor hash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub hourly: WindowCounter,
    pub daily: WindowCounter,
    /// Unix timestamp of the last accepted submission
    pub last_submission_at: Option<i64>,
}

impl RateLimitRecord {
    pub fn new(now: i64) -> Self {
        Self {
            hourly: WindowCounter::open(now, HOUR_SECS),
            daily: WindowCounter::open(now, DAY_SECS),
            last_submission_at: None,
        }
    }

    /// Count one submission if both windows have room.
    /// A rejected submission leaves the counters untouched.
    pub fn check_and_increment(&mut self, now: i64, limits: ConsentLimits) -> Result<()> {
        self.hourly.roll(now, HOUR_SECS);
        self.daily.roll(now, DAY_SECS);

        if self.hourly.count >= limits.per_hour {
            tracing::warn!(
                "Hourly consent limit reached: {}/{}",
                self.hourly.count,
                limits.per_hour
            );
            return Err(AppError::RateLimitExceeded);
        }

        if self.daily.count >= limits.per_day {
            tracing::warn!("Daily consent limit reached: {}/{}", self.daily.count, limits.per_day);
            return Err(AppError::RateLimitExceeded);
        }

        self.hourly.count += 1;
        self.daily.count += 1;
        self.last_submission_at = Some(now);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_000_000;

    #[test]
    fn test_new_record() {
        let record = RateLimitRecord::new(NOW);

        assert_eq!(record.hourly, WindowCounter { count: 0, resets_at: NOW + 3600 });
        assert_eq!(record.daily.resets_at, NOW + 86_400);
        assert!(record.last_submission_at.is_none());
    }

    #[test]
    fn test_check_and_increment_success() {
        let mut record = RateLimitRecord::new(NOW);

        assert!(record.check_and_increment(NOW, ConsentLimits::default()).is_ok());
        assert_eq!(record.hourly.count, 1);
        assert_eq!(record.daily.count, 1);
        assert_eq!(record.last_submission_at, Some(NOW));
    }

    #[test]
    fn test_custom_hourly_limit() {
        let limits = ConsentLimits { per_hour: 2, per_day: 10 };
        let mut record = RateLimitRecord::new(NOW);

        assert!(record.check_and_increment(NOW, limits).is_ok());
        assert!(record.check_and_increment(NOW + 1, limits).is_ok());
        assert!(matches!(
            record.check_and_increment(NOW + 2, limits),
            Err(AppError::RateLimitExceeded)
        ));
        // Rejected submissions are not counted
        assert_eq!(record.hourly.count, 2);
        assert_eq!(record.last_submission_at, Some(NOW + 1));

        // Next window
        assert!(record.check_and_increment(NOW + 3601, limits).is_ok());
        assert_eq!(record.hourly.count, 1);
        assert_eq!(record.daily.count, 3);
    }

    #[test]
    fn test_daily_limit_outlasts_hourly_reset() {
        let limits = ConsentLimits { per_hour: 3, per_day: 4 };
        let mut record = RateLimitRecord::new(NOW);

        for _ in 0..3 {
            assert!(record.check_and_increment(NOW, limits).is_ok());
        }
        assert!(record.check_and_increment(NOW + 3601, limits).is_ok());
        assert!(matches!(
            record.check_and_increment(NOW + 7300, limits),
            Err(AppError::RateLimitExceeded)
        ));

        assert!(record.check_and_increment(NOW + 86_401, limits).is_ok());
        assert_eq!(record.daily.count, 1);
    }

    #[test]
    fn test_limits_validation() {
        assert!(ConsentLimits::default().validate().is_ok());
        assert!(ConsentLimits { per_hour: 0, per_day: 5 }.validate().is_err());
        assert!(ConsentLimits { per_hour: 5, per_day: 4 }.validate().is_err());
    }
}
