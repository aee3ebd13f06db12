use crate::error::AppError;
use crate::state::AppState;
use axum::{extract::FromRequestParts, http::request::Parts};

pub const INTERNAL_TOKEN_HEADER: &str = "X-Internal-Token";

/// Order-processing caller of the `/internal` API.
///
/// When the gateway has no internal token configured every caller passes;
/// otherwise the `X-Internal-Token` header must match it.
pub struct InternalCaller;

impl FromRequestParts<AppState> for InternalCaller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.internal_token.as_deref() else {
            return Ok(InternalCaller);
        };

        let presented = parts
            .headers
            .get(INTERNAL_TOKEN_HEADER)
            .ok_or_else(|| AppError::Unauthorized("Missing internal token".to_string()))?
            .to_str()
            .map_err(|_| AppError::Unauthorized("Invalid header string".to_string()))?;

        if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            Ok(InternalCaller)
        } else {
            Err(AppError::Unauthorized("Invalid internal token".to_string()))
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"s3cret", b"s3cret"));
        assert!(!constant_time_eq(b"s3cret", b"s3creT"));
        assert!(!constant_time_eq(b"s3cret", b"s3cret!"));
    }
}
