//! Bearer token verification
//!
//! Tokens are issued by the external identity service and signed with a
//! shared HS256 secret. Verification is a pure function of token + secret.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use murmur_shared::{AuthErrorKind, Identity};
use serde::{Deserialize, Serialize};

/// JWT claims presented by clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user identity)
    pub sub: String,
    /// Expiration
    pub exp: i64,
    /// Issued at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Token type; absent means access
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<TokenType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Validates bearer tokens and extracts the caller's identity
#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str, leeway_secs: u64) -> Self {
        // Explicit algorithm prevents algorithm confusion attacks
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway_secs;

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Validate and decode a token
    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(JwtError::Missing);
        }

        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidToken => JwtError::Invalid,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => JwtError::Invalid,
                jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => JwtError::Invalid,
                _ => JwtError::Validation(e.to_string()),
            })
    }

    /// Verify an access token and return the identity it was issued to
    pub fn verify(&self, token: &str) -> Result<Identity, JwtError> {
        let claims = self.validate_token(token)?;
        if claims.token_type == Some(TokenType::Refresh) {
            return Err(JwtError::WrongTokenType);
        }

        let identity = Identity::new(claims.sub);
        if identity.is_empty() {
            return Err(JwtError::MissingSubject);
        }
        Ok(identity)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("No token presented")]
    Missing,
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
    #[error("Wrong token type")]
    WrongTokenType,
    #[error("Token has no subject")]
    MissingSubject,
    #[error("Token validation failed: {0}")]
    Validation(String),
}

impl JwtError {
    /// Category reported to the client
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            JwtError::Missing => AuthErrorKind::MissingToken,
            JwtError::Expired => AuthErrorKind::ExpiredToken,
            JwtError::MissingSubject => AuthErrorKind::UnknownIdentity,
            JwtError::Invalid | JwtError::WrongTokenType | JwtError::Validation(_) => {
                AuthErrorKind::MalformedToken
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use time::Duration;

    fn verifier() -> TokenVerifier {
        TokenVerifier::new(TEST_SECRET, 0)
    }

    #[test]
    fn test_valid_token_yields_identity() {
        let identity = verifier().verify(&access_token("u1")).unwrap();
        assert_eq!(identity, Identity::from("u1"));
    }

    #[test]
    fn test_explicit_access_type_accepted() {
        let token = sign(TEST_SECRET, "u1", Duration::hours(1), Some(TokenType::Access));
        assert!(verifier().verify(&token).is_ok());
    }

    #[test]
    fn test_empty_token_is_missing() {
        let err = verifier().verify("   ").unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::MissingToken);
    }

    #[test]
    fn test_garbage_token_is_malformed() {
        let err = verifier().verify("not-a-jwt").unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::MalformedToken);
    }

    #[test]
    fn test_wrong_secret_is_malformed() {
        let token = sign(
            "another-secret-that-is-also-at-least-32-chars",
            "u1",
            Duration::hours(1),
            None,
        );
        let err = verifier().verify(&token).unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::MalformedToken);
    }

    #[test]
    fn test_expired_token() {
        let token = sign(TEST_SECRET, "u1", Duration::minutes(-10), None);
        let err = verifier().verify(&token).unwrap_err();
        assert!(matches!(err, JwtError::Expired));
        assert_eq!(err.kind(), AuthErrorKind::ExpiredToken);
    }

    #[test]
    fn test_leeway_tolerates_clock_skew() {
        let token = sign(TEST_SECRET, "u1", Duration::seconds(-30), None);
        assert!(TokenVerifier::new(TEST_SECRET, 60).verify(&token).is_ok());
    }

    #[test]
    fn test_refresh_token_rejected() {
        let token = sign(TEST_SECRET, "u1", Duration::hours(1), Some(TokenType::Refresh));
        let err = verifier().verify(&token).unwrap_err();
        assert!(matches!(err, JwtError::WrongTokenType));
        assert_eq!(err.kind(), AuthErrorKind::MalformedToken);
    }

    #[test]
    fn test_blank_subject_is_unknown_identity() {
        let token = sign(TEST_SECRET, " ", Duration::hours(1), None);
        let err = verifier().verify(&token).unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::UnknownIdentity);
    }
}
