//! Credential contract (spec §6.3)
//!
//! The engine treats bearer strings as opaque; it does not parse or verify
//! tokens. Verification is delegated to an external collaborator
//! implementing [`TokenValidator`] (a JWT library, an OAuth introspection
//! call, a static allowlist for tests).

use async_trait::async_trait;

use crate::error::{HaipError, Result};

/// Claims recovered from a validated bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// The authenticated subject identifier.
    pub subject: String,
    /// Optional scope claims, opaque to the engine.
    pub scopes: Vec<String>,
}

/// External collaborator validating bearer credentials presented at connect
/// time (spec §6.3).
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validate `token`, returning the authenticated principal or
    /// [`HaipError::AuthenticationFailed`].
    async fn validate(&self, token: &str) -> Result<Principal>;
}

/// A validator that accepts a fixed allowlist of tokens, each mapped to a
/// principal. Useful for tests and local development; production
/// deployments should supply a real [`TokenValidator`] (e.g. backed by a
/// JWT verification crate).
#[derive(Debug, Clone, Default)]
pub struct StaticTokenValidator {
    allowed: Vec<(String, Principal)>,
}

impl StaticTokenValidator {
    /// Construct an empty validator; use [`Self::allow`] to populate it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token`, authenticating as `subject` with `scopes`.
    pub fn allow(mut self, token: impl Into<String>, subject: impl Into<String>, scopes: Vec<String>) -> Self {
        self.allowed.push((
            token.into(),
            Principal {
                subject: subject.into(),
                scopes,
            },
        ));
        self
    }
}

#[async_trait]
impl TokenValidator for StaticTokenValidator {
    async fn validate(&self, token: &str) -> Result<Principal> {
        self.allowed
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, p)| p.clone())
            .ok_or_else(|| HaipError::AuthenticationFailed("token not recognized".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn known_token_resolves_principal() {
        let validator = StaticTokenValidator::new().allow("tok-1", "alice", vec!["read".into()]);
        let principal = validator.validate("tok-1").await.unwrap();
        assert_eq!(principal.subject, "alice");
        assert_eq!(principal.scopes, vec!["read".to_string()]);
    }

    #[tokio::test]
    async fn unknown_token_fails_authentication() {
        let validator = StaticTokenValidator::new();
        let err = validator.validate("nope").await.unwrap_err();
        assert_eq!(err.code(), "AUTHENTICATION_FAILED");
        assert!(!err.recoverable());
    }
}
