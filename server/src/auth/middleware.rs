//! Authentication middleware.
//!
//! Mutating routes require `Authorization: Bearer <TRIGGER_TOKEN>` when a
//! trigger token is configured. Without one, every request is accepted.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Proof that a request may trigger syncs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAuth {
    /// No trigger token is configured
    Open,
    /// The request carried the configured token
    Token,
}

impl FromRequestParts<AppState> for TriggerAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.trigger_token.as_deref() else {
            return Ok(TriggerAuth::Open);
        };

        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        match auth_header.and_then(|header| header.strip_prefix("Bearer ")) {
            Some(token) if tokens_match(token.trim(), expected) => Ok(TriggerAuth::Token),
            Some(_) => {
                tracing::warn!("Rejected trigger with invalid token");
                Err(AppError::Unauthorized)
            }
            None => Err(AppError::Unauthorized),
        }
    }
}

/// Compare without short-circuiting on the first differing byte.
fn tokens_match(given: &str, expected: &str) -> bool {
    given.len() == expected.len()
        && given
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
