//! # Booking Pipeline Core
//!
//! Core traits and types for the event-driven consistency pipeline shared by
//! the booking platform's services.
//!
//! A command in one service commits to that service's write store and
//! publishes an integration event. Other services consume the event and
//! project it into their own read models. This crate defines the vocabulary
//! every part of that pipeline speaks.
//!
//! ## Core Concepts
//!
//! - **Envelope** ([`event::EventEnvelope`]): Immutable wrapper around an integration event
//! - **Event Bus** ([`event_bus::EventBus`]): Broker abstraction with explicit settlement
//! - **Projection Store** ([`projection::ProjectionStore`]): Read-side document storage
//! - **Completion Record** ([`completion::CompletionRecord`]): Proof an event was published
//!   or consumed
//! - **Dead Letters** ([`dead_letter::DeadLetterSink`]): Where poison messages end up
//! - **Outbox** ([`outbox::Outbox`]): Hook for transactional publication
//!
//! ## Pipeline
//!
//! ```text
//! Command Handler → Publisher → Broker → Consumer → Projection Store
//!                       │                   │
//!                       └──► Completion ◄───┘
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod completion;
pub mod dead_letter;
pub mod event;
pub mod event_bus;
pub mod outbox;
pub mod projection;

/// Environment module - Dependency injection traits
///
/// External dependencies of the pipeline are abstracted behind traits so tests
/// can substitute deterministic implementations.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
