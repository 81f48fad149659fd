//! API gateway request-admission library.
//!
//! Every inbound request gets a caller identity, a rate limit decision
//! across five dimensions against a shared counter store, and exactly one
//! telemetry event on the event bus.

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod security;
pub mod store;
pub mod telemetry;

pub use config::schema::GatewayConfig;
pub use http::{GatewayPipeline, HttpServer};
pub use lifecycle::Shutdown;
