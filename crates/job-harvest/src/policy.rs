//! Stop policies that bound the pagination walk of one combination.
//!
//! Each policy is a small state machine created fresh per combination.

use chrono::NaiveDateTime;
use std::time::Duration;
use tokio::time::Instant;

/// Consecutive result pages that produced no new listing ids.
#[derive(Debug, Clone)]
pub struct EmptyPageStreak {
    enabled: bool,
    limit: u32,
    streak: u32,
}

impl EmptyPageStreak {
    pub fn new(enabled: bool, limit: u32) -> Self {
        Self {
            enabled,
            limit: limit.max(1),
            streak: 0,
        }
    }

    /// Record one page. Returns `true` once the limit is reached.
    pub fn observe(&mut self, new_ids: usize) -> bool {
        if new_ids > 0 {
            self.streak = 0;
            return false;
        }
        self.streak += 1;
        self.enabled && self.streak >= self.limit
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

/// Consecutive appended records posted longer ago than a threshold.
#[derive(Debug, Clone)]
pub struct StaleStreak {
    enabled: bool,
    limit: u32,
    threshold_days: i64,
    streak: u32,
}

impl StaleStreak {
    pub fn new(enabled: bool, limit: u32, threshold_days: u32) -> Self {
        Self {
            enabled,
            limit: limit.max(1),
            threshold_days: i64::from(threshold_days),
            streak: 0,
        }
    }

    /// Record the posting time of one appended record.
    ///
    /// An unknown posting time leaves the streak as it is. Returns
    /// `true` once the limit is reached.
    pub fn observe(&mut self, posted_at: Option<NaiveDateTime>, now: NaiveDateTime) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(posted) = posted_at else {
            return false;
        };
        if (now - posted).num_days() > self.threshold_days {
            self.streak += 1;
        } else {
            self.streak = 0;
        }
        self.streak >= self.limit
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn threshold_days(&self) -> i64 {
        self.threshold_days
    }
}

/// Wall-clock budget of one combination.
#[derive(Debug, Clone, Copy)]
pub struct TimeBudget {
    started: Instant,
    budget: Duration,
}

impl TimeBudget {
    pub fn start(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.started.elapsed() >= self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 5, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .unwrap()
    }

    fn days_ago(days: i64) -> Option<NaiveDateTime> {
        Some(now() - chrono::Duration::days(days))
    }

    #[test]
    fn test_empty_pages_trigger_on_third() {
        let mut p = EmptyPageStreak::new(true, 3);
        assert!(!p.observe(0));
        assert!(!p.observe(0));
        assert!(p.observe(0));
    }

    #[test]
    fn test_empty_pages_reset_on_new_ids() {
        let mut p = EmptyPageStreak::new(true, 3);
        p.observe(0);
        p.observe(0);
        assert!(!p.observe(4));
        assert_eq!(p.streak(), 0);
        assert!(!p.observe(0));
    }

    #[test]
    fn test_empty_pages_disabled_never_triggers() {
        let mut p = EmptyPageStreak::new(false, 1);
        assert!(!p.observe(0));
        assert!(!p.observe(0));
        assert_eq!(p.streak(), 2);
    }

    #[test]
    fn test_stale_unknown_neither_increments_nor_resets() {
        let mut p = StaleStreak::new(true, 3, 30);
        let mut streaks = Vec::new();
        let mut fired = Vec::new();
        for posted in [days_ago(40), days_ago(40), None, days_ago(40)] {
            fired.push(p.observe(posted, now()));
            streaks.push(p.streak());
        }
        assert_eq!(streaks, vec![1, 2, 2, 3]);
        assert_eq!(fired, vec![false, false, false, true]);
    }

    #[test]
    fn test_stale_fresh_posting_resets() {
        let mut p = StaleStreak::new(true, 2, 7);
        assert!(!p.observe(days_ago(10), now()));
        assert!(!p.observe(days_ago(1), now()));
        assert_eq!(p.streak(), 0);
        // exactly at the threshold is not older
        assert!(!p.observe(days_ago(7), now()));
        assert_eq!(p.streak(), 0);
    }

    #[test]
    fn test_stale_disabled() {
        let mut p = StaleStreak::new(false, 1, 0);
        assert!(!p.observe(days_ago(100), now()));
    }

    #[tokio::test]
    async fn test_time_budget() {
        assert!(TimeBudget::start(Duration::ZERO).exhausted());
        assert!(!TimeBudget::start(Duration::from_secs(3600)).exhausted());
    }
}
