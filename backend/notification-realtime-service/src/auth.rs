//! Short-lived WebSocket token verification
//!
//! Tokens are HS256 JWTs minted by the platform API's token issuance endpoint
//! with the shared `AUTH__SECRET`. They are scoped to one purpose
//! (`token_type == "ws"`) so a regular session token cannot open a socket.

use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::error::AuthError;

/// Required value of the `token_type` claim
pub const WS_TOKEN_TYPE: &str = "ws";

const LOG_PREFIX_LEN: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsClaims {
    /// User identity
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Verified identity of a connection
pub type UserId = String;

#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = config.leeway_secs;
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }

        Self {
            key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
        }
    }

    /// Verify a token taken from the upgrade query string
    pub fn verify(&self, token: Option<&str>) -> Result<UserId, AuthError> {
        let token = token.map(str::trim).filter(|t| !t.is_empty());
        let token = token.ok_or(AuthError::Missing)?;

        let data = decode::<WsClaims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
                _ => AuthError::Malformed,
            }
        })?;

        if data.claims.token_type != WS_TOKEN_TYPE {
            return Err(AuthError::WrongPurpose);
        }
        if data.claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidSubject);
        }

        Ok(data.claims.sub)
    }
}

/// First characters of a token, safe to put in logs
///
/// At most half of the token is ever shown.
pub fn token_prefix(token: Option<&str>) -> String {
    match token {
        Some(t) if !t.is_empty() => {
            let shown = LOG_PREFIX_LEN.min(t.chars().count() / 2);
            let prefix: String = t.chars().take(shown).collect();
            format!("{prefix}...")
        }
        _ => "<none>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "unit-test-secret";

    fn config() -> AuthConfig {
        AuthConfig {
            secret: SECRET.into(),
            issuer: None,
            leeway_secs: 0,
        }
    }

    fn mint(sub: &str, exp_offset: i64, token_type: &str, secret: &str, iss: Option<&str>) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = WsClaims {
            sub: sub.into(),
            exp: now + exp_offset,
            iat: now,
            token_type: token_type.into(),
            iss: iss.map(String::from),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token_returns_user() {
        let verifier = TokenVerifier::new(&config());
        let token = mint("user-42", 60, WS_TOKEN_TYPE, SECRET, None);
        assert_eq!(verifier.verify(Some(&token)).unwrap(), "user-42");
    }

    #[test]
    fn test_missing_and_blank_tokens() {
        let verifier = TokenVerifier::new(&config());
        assert_eq!(verifier.verify(None), Err(AuthError::Missing));
        assert_eq!(verifier.verify(Some("   ")), Err(AuthError::Missing));
    }

    #[test]
    fn test_malformed_token() {
        let verifier = TokenVerifier::new(&config());
        assert_eq!(verifier.verify(Some("header.payload")), Err(AuthError::Malformed));
        assert_eq!(verifier.verify(Some("garbage")), Err(AuthError::Malformed));
    }

    #[test]
    fn test_expired_token() {
        let verifier = TokenVerifier::new(&config());
        let token = mint("user-42", -120, WS_TOKEN_TYPE, SECRET, None);
        assert_eq!(verifier.verify(Some(&token)), Err(AuthError::Expired));
    }

    #[test]
    fn test_wrong_secret() {
        let verifier = TokenVerifier::new(&config());
        let token = mint("user-42", 60, WS_TOKEN_TYPE, "another-secret", None);
        assert_eq!(verifier.verify(Some(&token)), Err(AuthError::InvalidSignature));
    }

    #[test]
    fn test_session_token_cannot_open_socket() {
        let verifier = TokenVerifier::new(&config());
        let token = mint("user-42", 60, "access", SECRET, None);
        assert_eq!(verifier.verify(Some(&token)), Err(AuthError::WrongPurpose));
    }

    #[test]
    fn test_issuer_is_enforced_when_configured() {
        let verifier = TokenVerifier::new(&AuthConfig {
            issuer: Some("stories-api".into()),
            ..config()
        });

        let good = mint("user-42", 60, WS_TOKEN_TYPE, SECRET, Some("stories-api"));
        assert!(verifier.verify(Some(&good)).is_ok());

        let bad = mint("user-42", 60, WS_TOKEN_TYPE, SECRET, Some("elsewhere"));
        assert_eq!(verifier.verify(Some(&bad)), Err(AuthError::InvalidIssuer));
    }

    #[test]
    fn test_empty_subject() {
        let verifier = TokenVerifier::new(&config());
        let token = mint(" ", 60, WS_TOKEN_TYPE, SECRET, None);
        assert_eq!(verifier.verify(Some(&token)), Err(AuthError::InvalidSubject));
    }

    #[test]
    fn test_token_prefix_never_logs_whole_token() {
        assert_eq!(token_prefix(Some("abcdefghijklmnop")), "abcdefgh...");
        assert_eq!(token_prefix(Some("abcdefgh")), "abcd...");
        assert_eq!(token_prefix(Some("abc")), "a...");
        assert_eq!(token_prefix(Some("x")), "...");
        assert_eq!(token_prefix(Some("")), "<none>");
        assert_eq!(token_prefix(None), "<none>");
    }
}
