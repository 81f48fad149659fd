//! Network layer subsystem.
//!
//! Plain TCP listeners are bound directly with tokio; TLS termination is
//! handled by axum-server with a rustls config loaded here.

pub mod tls;

pub use tls::load_tls_config;
