//! Bearer token verification for realtime connections.
//!
//! Tokens are HS256 JWTs minted by the session/identity service and
//! verified against the shared `AUTH_SECRET`. The subject claim carries the
//! user id.

use crate::error::{RealtimeError, RealtimeResult};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claims the gateway cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: String,
    /// Expiration time (unix seconds).
    pub exp: i64,
    /// Issued at (unix seconds).
    #[serde(default)]
    pub iat: i64,
}

#[derive(Clone)]
pub struct AuthVerifier {
    secret: String,
}

impl AuthVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Verify a bearer token and return the authenticated user id.
    pub fn verify(&self, token: &str) -> RealtimeResult<String> {
        let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| RealtimeError::Auth(e.to_string()))?;

        if data.claims.sub.trim().is_empty() {
            return Err(RealtimeError::Auth("token has no subject".to_string()));
        }
        Ok(data.claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn token_for(sub: &str, expires_in: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            exp: now + expires_in,
            iat: now,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token_yields_user_id() {
        let verifier = AuthVerifier::new(SECRET);
        let user = verifier.verify(&token_for("u1", 3600)).unwrap();
        assert_eq!(user, "u1");
    }

    #[test]
    fn test_expired_token_rejected() {
        let verifier = AuthVerifier::new(SECRET);
        let result = verifier.verify(&token_for("u1", -3600));
        assert!(matches!(result, Err(RealtimeError::Auth(_))));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let verifier = AuthVerifier::new("other-secret");
        let result = verifier.verify(&token_for("u1", 3600));
        assert!(matches!(result, Err(RealtimeError::Auth(_))));
    }

    #[test]
    fn test_garbage_token_rejected() {
        let verifier = AuthVerifier::new(SECRET);
        assert!(verifier.verify("not-a-token").is_err());
    }
}
