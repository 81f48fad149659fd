//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, timeout and body limits)
//!     → pipeline.rs (identity → admission → delegate | short-circuit)
//!     → upstream.rs (forward admitted requests to the router)
//!     → context.rs state reaches Completed → telemetry
//!     → Send to client
//! ```

pub mod context;
pub mod pipeline;
pub mod server;
pub mod upstream;

pub use context::{Identity, RequestContext, X_REQUEST_ID};
pub use pipeline::GatewayPipeline;
pub use server::HttpServer;
pub use upstream::{HttpUpstream, Upstream};
