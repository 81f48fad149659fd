//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → identity.rs (bearer token and API key → Identity)
//!     → rate_limit.rs (per-dimension admission against the counter store)
//!     → Pass to upstream, or short-circuit with 429
//! ```
//!
//! # Design Decisions
//! - Identity never rejects; unauthenticated callers are anonymous
//! - Admission fails open when the counter store is unavailable

pub mod identity;
pub mod rate_limit;

pub use identity::{CredentialValidator, IdentityResolver, StaticTokenValidator, X_API_KEY};
pub use rate_limit::{Admission, AdmissionController, AdmissionSnapshot, RateLimitDimension};
