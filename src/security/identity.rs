//! Caller identity resolution.
//!
//! # Responsibilities
//! - Read the bearer credential and the pre-shared key headers
//! - Ask the auth backend to verify the bearer credential
//! - Produce an `Identity`, degrading to anonymous on any problem
//!
//! # Design Decisions
//! - Never rejects: unauthenticated requests pass through as anonymous
//! - The two credentials are independent and may both be present
//! - API keys are recorded verbatim; validity is checked further downstream

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{header, HeaderMap};

use crate::http::context::Identity;

/// Header carrying the pre-shared API key.
pub const X_API_KEY: &str = "x-api-key";

/// Contract exposed by the auth backend.
pub trait CredentialValidator: Send + Sync {
    /// Returns the stable subject id for a valid token.
    fn validate(&self, token: &str) -> Option<String>;
}

/// Validator backed by a fixed token table.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenValidator {
    tokens: HashMap<String, String>,
}

impl StaticTokenValidator {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

impl CredentialValidator for StaticTokenValidator {
    fn validate(&self, token: &str) -> Option<String> {
        self.tokens.get(token).cloned()
    }
}

/// First pipeline stage: turns request credentials into an `Identity`.
#[derive(Clone)]
pub struct IdentityResolver {
    validator: Arc<dyn CredentialValidator>,
}

impl IdentityResolver {
    pub fn new(validator: Arc<dyn CredentialValidator>) -> Self {
        Self { validator }
    }

    pub fn resolve(&self, headers: &HeaderMap) -> Identity {
        let user_id = bearer_token(headers).and_then(|token| self.validator.validate(token));

        let api_key = headers
            .get(X_API_KEY)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        Identity { user_id, api_key }
    }
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver").finish_non_exhaustive()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
