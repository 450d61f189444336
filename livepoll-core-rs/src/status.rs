//! Poll lifecycle status, derived purely from the voting window and an instant.
//!
//! Status is never persisted. Every evaluation reads one instant from a
//! [`Clock`] and maps it through [`status`]:
//!
//! ```text
//!   t < start          → NOT_STARTED
//!   start ≤ t < end    → IN_PROGRESS
//!   t ≥ end            → FINISHED
//! ```

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::PollWindow;

/// Lifecycle state of a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollStatus {
    NotStarted,
    InProgress,
    Finished,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStatus::NotStarted => "NOT_STARTED",
            PollStatus::InProgress => "IN_PROGRESS",
            PollStatus::Finished => "FINISHED",
        }
    }
}

impl std::fmt::Display for PollStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PollStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "NOT_STARTED" => Ok(PollStatus::NotStarted),
            "IN_PROGRESS" => Ok(PollStatus::InProgress),
            "FINISHED" => Ok(PollStatus::Finished),
            other => Err(format!("unknown poll status: {}", other)),
        }
    }
}

/// Map a window and an instant to a lifecycle state
pub fn status(window: &PollWindow, now: DateTime<Utc>) -> PollStatus {
    if now < window.starts_at {
        PollStatus::NotStarted
    } else if now < window.ends_at {
        PollStatus::InProgress
    } else {
        PollStatus::Finished
    }
}

/// Source of the authoritative instant for one evaluation
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock that never hands out an instant earlier than one it already returned
#[derive(Debug, Default)]
pub struct SystemClock {
    high_water_micros: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let micros = now.timestamp_micros();
        let previous = self.high_water_micros.fetch_max(micros, Ordering::AcqRel);

        if previous > micros {
            // OS clock stepped back; hold at the last instant we handed out
            DateTime::from_timestamp_micros(previous).unwrap_or(now)
        } else {
            now
        }
    }
}

/// Manually driven clock for tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock() = instant;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window() -> PollWindow {
        let start = Utc.with_ymd_and_hms(2030, 6, 1, 9, 0, 0).unwrap();
        PollWindow::new(start, start + Duration::hours(2))
    }

    #[test]
    fn test_status_boundaries() {
        let w = window();

        assert_eq!(status(&w, w.starts_at - Duration::nanoseconds(1)), PollStatus::NotStarted);
        assert_eq!(status(&w, w.starts_at), PollStatus::InProgress);
        assert_eq!(status(&w, w.ends_at - Duration::nanoseconds(1)), PollStatus::InProgress);
        // Half-open window: the end instant itself is already finished
        assert_eq!(status(&w, w.ends_at), PollStatus::Finished);
        assert_eq!(status(&w, w.ends_at + Duration::days(365)), PollStatus::Finished);
    }

    #[test]
    fn test_status_ordering_follows_lifecycle() {
        assert!(PollStatus::NotStarted < PollStatus::InProgress);
        assert!(PollStatus::InProgress < PollStatus::Finished);
    }

    #[test]
    fn test_status_parse_and_display() {
        assert_eq!("in_progress".parse::<PollStatus>(), Ok(PollStatus::InProgress));
        assert_eq!("not-started".parse::<PollStatus>(), Ok(PollStatus::NotStarted));
        assert_eq!("FINISHED".parse::<PollStatus>(), Ok(PollStatus::Finished));
        assert!("closed".parse::<PollStatus>().is_err());
        assert_eq!(PollStatus::InProgress.to_string(), "IN_PROGRESS");
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&PollStatus::NotStarted).unwrap();
        assert_eq!(json, "\"NOT_STARTED\"");
    }

    #[test]
    fn test_manual_clock_advance() {
        let w = window();
        let clock = ManualClock::new(w.starts_at - Duration::hours(1));
        assert_eq!(status(&w, clock.now()), PollStatus::NotStarted);

        clock.advance(Duration::hours(1));
        assert_eq!(status(&w, clock.now()), PollStatus::InProgress);

        clock.set(w.ends_at);
        assert_eq!(status(&w, clock.now()), PollStatus::Finished);
    }

    #[test]
    fn test_system_clock_never_goes_back() {
        let clock = SystemClock::new();
        // Pretend an earlier reading came from a clock that was ahead
        let ahead = Utc::now() + Duration::hours(1);
        clock
            .high_water_micros
            .store(ahead.timestamp_micros(), Ordering::SeqCst);

        let first = clock.now();
        let second = clock.now();
        assert!(first >= ahead - Duration::microseconds(1));
        assert!(second >= first);
    }
}
