use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::error::ApiError;

// ============================================================================
// Passwords
// ============================================================================

/// One-way salted hash for storage. Plaintext is never persisted.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;
    Ok(hash)
}

/// Constant-time comparison against a stored hash. Any bcrypt error
/// (e.g. a malformed hash) counts as a mismatch.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

// ============================================================================
// Tokens
// ============================================================================

/// JWT claims: the caller's internal identifier plus issue/expiry times.
/// The token carries no role; the role is resolved from the store per
/// request.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

pub fn issue_token(user_id: &str, secret: &str, expires_secs: i64) -> anyhow::Result<String> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now,
        exp: now + expires_secs,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    // Zero leeway so expiry behaves exactly as configured.
    let mut validation = Validation::default();
    validation.leeway = 0;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;

    Ok(data.claims)
}

// ============================================================================
// Extractor
// ============================================================================

/// Verified caller identity, extracted from the Authorization header.
/// Rejects with 401 before the handler body runs when the token is absent,
/// malformed, expired, or signed with the wrong key.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::AuthToken)?;

        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or(ApiError::AuthToken)?;

        let claims =
            decode_token(token, &state.config.jwt_secret).map_err(|_| ApiError::AuthToken)?;

        Ok(AuthUser {
            user_id: claims.sub,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::errors::ErrorKind;

    #[test]
    fn test_password_hash_roundtrip() {
        let hash = hash_password("hunter2").unwrap();

        assert_ne!(hash, "hunter2", "plaintext must never be stored");
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
    }

    #[test]
    fn test_verify_against_garbage_hash_is_mismatch() {
        assert!(!verify_password("hunter2", "not-a-bcrypt-hash"));
    }

    #[test]
    fn test_token_roundtrip_carries_user_id() {
        let token = issue_token("user-123", "secret", 3600).unwrap();
        let claims = decode_token(&token, "secret").unwrap();

        assert_eq!(claims.sub, "user-123");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = issue_token("user-123", "secret", -5).unwrap();
        let err = decode_token(&token, "secret").unwrap_err();

        assert!(matches!(err.kind(), ErrorKind::ExpiredSignature));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = issue_token("user-123", "secret", 3600).unwrap();

        assert!(decode_token(&token, "other-secret").is_err());
    }

    #[test]
    fn test_tampered_token_rejected() {
        let token = issue_token("user-123", "secret", 3600).unwrap();
        let tampered = format!("{}AA", token);

        assert!(decode_token(&tampered, "secret").is_err());
    }
}
