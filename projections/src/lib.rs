//! Read-side of the booking pipeline.
//!
//! # Overview
//!
//! This crate turns integration events delivered by the broker into
//! read-model documents:
//! - **Handlers** ([`handler`]): typed projectors and the registry that routes
//!   envelopes to them by event type
//! - **Inbound Consumer** ([`consumer::InboundConsumer`]): idempotent apply with
//!   per-document locking, retry classification and dead-lettering
//! - **Consumer Worker** ([`worker::ConsumerWorker`]): subscription loop that
//!   settles every delivery with the broker
//!
//! # CQRS Separation
//!
//! ```text
//! Write Store (Service A) → Broker → Inbound Consumer → Projection Store (Service B)
//! ```
//!
//! # Building a Consumer
//!
//! ```ignore
//! use booking_pipeline_projections::{ConsumerWorker, HandlerRegistry, InboundConsumer};
//!
//! let registry = HandlerRegistry::new().with(PassengerProjector);
//! let consumer = InboundConsumer::new("passenger", store, registry, tracker)
//!     .with_dead_letters(dlq)
//!     .with_max_redeliveries(config.consumer.max_redeliveries);
//!
//! let handle = ConsumerWorker::new(Arc::new(consumer), bus).start().await?;
//! ```

pub mod consumer;
pub mod handler;
pub mod locks;
pub mod worker;

pub use consumer::{ConsumeOutcome, InboundConsumer};
pub use handler::{HandlerRegistry, PreparedProjection, Project, ProjectionHandler, TypedHandler};
pub use locks::KeyedLocks;
pub use worker::{ConsumerWorker, WorkerError, WorkerHandle};
