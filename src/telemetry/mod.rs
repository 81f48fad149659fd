//! Telemetry subsystem.
//!
//! # Data Flow
//! ```text
//! Completed RequestContext
//!     → emitter.rs (build RequestEvent, pick topic, try_send to queue)
//!     → [bounded mpsc queue]
//!     → EventPublisher task
//!     → bus.rs (EventBus::publish, partitioned by request id)
//!
//! Topics:
//!     ALLOWED        → api-requests
//!     BLOCKED        → api-blocked
//!     SECURITY_ALERT → security-alerts (other producers only)
//! ```
//!
//! # Design Decisions
//! - Publishing is off the request path; a full queue drops the event
//! - Failures are logged and counted, never retried synchronously
//! - One event per request, built after the final status is known

pub mod bus;
pub mod emitter;
pub mod event;

pub use bus::{EventBus, KafkaRestEventBus, MemoryEventBus, PublishError, PublishedEvent};
pub use emitter::{EventPublisher, TelemetryEmitter, TelemetrySnapshot, TelemetryStats};
pub use event::{EventType, RequestEvent};
