//! Livepoll Property-Based Tests
//!
//! Standalone test suite using proptest for lifecycle and accounting invariants.
//!
//! # Usage
//!
//! ```bash
//! cargo test -p livepoll-property-tests
//! cargo test -p livepoll-property-tests status    # Only status properties
//! PROPTEST_CASES=1000 cargo test -p livepoll-property-tests
//! ```
//!
//! # Test Modules
//!
//! - `status`: window boundaries, no backward transitions
//! - `ledger`: N concurrent votes add exactly N, option floor
//! - `hub`: topic isolation, per-topic ordering

// Re-export for convenience in tests
pub use livepoll_core::*;

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Fixed origin so failing cases shrink to readable instants
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).single().unwrap_or_default()
}

/// Fresh engine on a manual clock set to [`epoch`]
pub fn manual_engine(subscriber_buffer: usize) -> (Arc<ManualClock>, PollEngine) {
    let clock = Arc::new(ManualClock::new(epoch()));
    let engine = PollEngine::new(Arc::new(MemoryRepository::new()), clock.clone(), subscriber_buffer);
    (clock, engine)
}

/// Poll with `options` generated option texts, open from [`epoch`] for one hour
pub fn running_poll(engine: &PollEngine, options: usize) -> Result<PollView, LedgerError> {
    engine.create_poll(NewPoll::new(
        "Property poll",
        epoch(),
        epoch() + Duration::hours(1),
        (0..options).map(|i| format!("option {}", i)),
    ))
}
