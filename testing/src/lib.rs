//! # Booking Pipeline Testing
//!
//! Testing utilities for the booking pipeline.
//!
//! This crate provides:
//! - In-memory implementations of every pipeline boundary (broker, projection
//!   store, dead-letter queue, outbox)
//! - A deterministic clock
//! - [`PipelineHarness`] for end-to-end publish/consume scenarios
//! - proptest strategies for pipeline types
//!
//! ## Example
//!
//! ```ignore
//! use booking_pipeline_testing::PipelineHarness;
//!
//! #[tokio::test]
//! async fn passenger_is_projected() {
//!     let harness = PipelineHarness::new();
//!     // start a consumer worker on harness.bus_handle() ...
//!
//!     harness.publish(&user_created).await.unwrap();
//!     assert!(harness.wait_for_consumed::<UserCreated>().await);
//! }
//! ```

use chrono::{DateTime, Utc};
use booking_pipeline_core::environment::Clock;

mod dead_letter;
mod event_bus;
pub mod harness;
mod projection_mocks;

/// Mock implementations of pipeline boundaries.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    pub use crate::dead_letter::{InMemoryDeadLetterQueue, InMemoryOutbox, OutboxState};
    pub use crate::event_bus::InMemoryEventBus;
    pub use crate::projection_mocks::InMemoryProjectionStore;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use booking_pipeline_testing::mocks::FixedClock;
    /// use booking_pipeline_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers.
pub mod helpers {
    /// Install a `tracing` subscriber that writes through the test harness.
    ///
    /// Safe to call from every test; only the first call installs anything.
    /// Honors `RUST_LOG`, defaulting to `info`.
    pub fn init_tracing() {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use booking_pipeline_core::event::CorrelationId;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Non-nil correlation ids.
    pub fn correlation_id() -> impl Strategy<Value = CorrelationId> {
        any::<u128>()
            .prop_filter("nil uuid", |n| *n != 0)
            .prop_map(|n| CorrelationId::from_uuid(Uuid::from_u128(n)))
    }

    /// Passport-number-like business keys.
    pub fn passport_number() -> impl Strategy<Value = String> {
        "[0-9]{9}"
    }

    /// Plausible passenger names.
    pub fn passenger_name() -> impl Strategy<Value = String> {
        "[A-Z][a-z]{1,15}"
    }
}

// Re-export commonly used items
pub use harness::PipelineHarness;
pub use mocks::{FixedClock, InMemoryEventBus, InMemoryProjectionStore, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }
}
