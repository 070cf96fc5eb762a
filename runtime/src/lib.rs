//! # Booking Pipeline Runtime
//!
//! Runtime pieces of the event pipeline that sit around the broker.
//!
//! ## Core Components
//!
//! - **Outbound Publisher** ([`publisher::OutboundPublisher`]): Validates envelopes,
//!   retries broker failures, records `Completion(Published)`
//! - **Completion Tracker** ([`tracker::CompletionTracker`]): Answers "has this event
//!   reached this stage?" without polling the broker
//! - **Retry Coordinator** ([`retry::retry_until`]): Bounded re-evaluation of an
//!   async condition with linear or exponential backoff
//! - **Configuration** ([`config::PipelineConfig`]): Environment-driven settings
//! - **Metrics** ([`metrics::PipelineMetrics`]): Prometheus counters and histograms
//!
//! ## Example
//!
//! ```ignore
//! use booking_pipeline_runtime::{OutboundPublisher, CompletionTracker};
//! use booking_pipeline_core::completion::CompletionStage;
//!
//! let tracker = Arc::new(CompletionTracker::new());
//! let publisher = OutboundPublisher::new(bus, Arc::clone(&tracker));
//!
//! let receipt = publisher.publish_event(&user_created).await?;
//! tracker
//!     .await_stage("UserCreated", receipt.correlation_id, CompletionStage::Consumed, timeout)
//!     .await;
//! ```

/// Environment-driven configuration
pub mod config;

/// Prometheus metrics for observability
pub mod metrics;

/// Outbound publication of integration events
pub mod publisher;

/// Retry logic with backoff
pub mod retry;

/// Completion tracking
pub mod tracker;

pub use config::{ConfigError, PipelineConfig};
pub use publisher::{OutboundPublisher, PublishError, PublishReceipt};
pub use retry::{Backoff, RetryOutcome, RetryPolicy, WaitPolicy, retry_until, retry_with_backoff};
pub use tracker::CompletionTracker;
