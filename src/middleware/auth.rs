//! Caller authentication: bearer tokens mapped to owner identities

use crate::config::AuthSettings;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Owner used when authentication is disabled and no owner header is sent
pub const ANONYMOUS_OWNER: &str = "anonymous";

const BEARER_PREFIX: &str = "Bearer ";

/// Authenticated caller, inserted into request extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub owner_id: String,
}

impl CallerIdentity {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
        }
    }
}

/// Resolves bearer tokens to caller identities
///
/// Two token forms are accepted: configured static tokens, and signed tokens
/// of the form `owner_id.hex(hmac_sha256(secret, owner_id))`.
pub struct AuthMiddleware {
    enabled: bool,
    tokens: HashMap<String, String>,
    admins: HashSet<String>,
    signing_secret: Option<Secret<String>>,
}

impl AuthMiddleware {
    pub fn new(settings: &AuthSettings) -> Self {
        let tokens = settings
            .tokens
            .iter()
            .map(|binding| (binding.token.expose_secret().clone(), binding.owner_id.clone()))
            .collect();

        Self {
            enabled: settings.enabled,
            tokens,
            admins: settings.admin_owners.iter().cloned().collect(),
            signing_secret: settings
                .signing_secret
                .as_ref()
                .map(|s| Secret::new(s.expose_secret().clone())),
        }
    }

    /// Middleware that accepts every request
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            tokens: HashMap::new(),
            admins: HashSet::new(),
            signing_secret: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Allow `caller` to act on `owner_id`'s data: their own, or anyone's for admins
    pub fn authorize_owner(&self, caller: &CallerIdentity, owner_id: &str) -> Result<(), AuthError> {
        if caller.owner_id == owner_id || self.admins.contains(&caller.owner_id) {
            return Ok(());
        }
        warn!(caller = %caller.owner_id, target = %owner_id, "Rejected cross-owner operation");
        Err(AuthError::Forbidden)
    }

    /// Resolve the caller from the `Authorization` and `x-owner-id` header values
    pub fn authenticate(&self, authorization: Option<&str>, owner_header: Option<&str>) -> Result<CallerIdentity, AuthError> {
        if !self.enabled {
            let owner = owner_header
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .unwrap_or(ANONYMOUS_OWNER);
            return Ok(CallerIdentity::new(owner));
        }

        let raw = authorization.ok_or(AuthError::MissingToken)?;
        let token = raw.strip_prefix(BEARER_PREFIX).unwrap_or(raw).trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        if let Some(owner) = self.tokens.get(token) {
            debug!(owner_id = %owner, "Authenticated static token");
            return Ok(CallerIdentity::new(owner.clone()));
        }

        if let Some(owner) = self.verify_signed(token)? {
            debug!(owner_id = %owner, "Authenticated signed token");
            return Ok(CallerIdentity::new(owner));
        }

        warn!("Authentication failed: invalid token");
        Err(AuthError::InvalidToken)
    }

    fn mac(&self, owner_id: &str) -> Option<HmacSha256> {
        let secret = self.signing_secret.as_ref()?;
        let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes()).ok()?;
        mac.update(owner_id.as_bytes());
        Some(mac)
    }

    /// Owner of a valid signed token; `None` when signing is not configured
    fn verify_signed(&self, token: &str) -> Result<Option<String>, AuthError> {
        if self.signing_secret.is_none() {
            return Ok(None);
        }

        let (owner, signature) = token.rsplit_once('.').ok_or(AuthError::InvalidToken)?;
        if owner.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        let signature = hex::decode(signature).map_err(|_| AuthError::InvalidToken)?;

        let mac = self.mac(owner).ok_or(AuthError::InvalidToken)?;
        mac.verify_slice(&signature).map_err(|_| {
            warn!("Authentication failed: bad token signature");
            AuthError::InvalidSignature
        })?;

        Ok(Some(owner.to_string()))
    }

    /// Mint a signed token for an owner, if a signing secret is configured
    pub fn sign(&self, owner_id: &str) -> Option<String> {
        let mac = self.mac(owner_id)?;
        Some(format!("{}.{}", owner_id, hex::encode(mac.finalize().into_bytes())))
    }
}

/// Authentication errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid or missing authentication token")]
    InvalidToken,

    #[error("Authentication is required but no token provided")]
    MissingToken,

    #[error("Token signature does not match")]
    InvalidSignature,

    #[error("Caller may not act on another owner's data")]
    Forbidden,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenBinding;

    fn settings() -> AuthSettings {
        AuthSettings {
            enabled: true,
            tokens: vec![TokenBinding {
                token: Secret::new("test-token-123".to_string()),
                owner_id: "alice".to_string(),
            }],
            admin_owners: vec!["ops".to_string()],
            signing_secret: Some(Secret::new("signing-secret".to_string())),
        }
    }

    #[test]
    fn test_static_token_with_prefix() {
        let auth = AuthMiddleware::new(&settings());
        let caller = auth.authenticate(Some("Bearer test-token-123"), None).unwrap();
        assert_eq!(caller.owner_id, "alice");
        assert!(auth.authenticate(Some("test-token-123"), None).is_ok());
    }

    #[test]
    fn test_missing_and_invalid_tokens() {
        let auth = AuthMiddleware::new(&settings());
        assert!(matches!(auth.authenticate(None, Some("alice")), Err(AuthError::MissingToken)));
        assert!(matches!(auth.authenticate(Some("Bearer "), None), Err(AuthError::MissingToken)));
        assert!(auth.authenticate(Some("Bearer nope"), None).is_err());
    }

    #[test]
    fn test_signed_tokens() {
        let auth = AuthMiddleware::new(&settings());
        let token = auth.sign("bob").unwrap();
        assert!(token.starts_with("bob."));

        let caller = auth.authenticate(Some(format!("Bearer {}", token).as_str()), None).unwrap();
        assert_eq!(caller.owner_id, "bob");

        let forged = token.replacen("bob", "mallory", 1);
        assert!(matches!(
            auth.authenticate(Some(forged.as_str()), None),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn test_disabled_uses_owner_header() {
        let auth = AuthMiddleware::disabled();
        assert_eq!(auth.authenticate(None, Some("carol")).unwrap().owner_id, "carol");
        assert_eq!(auth.authenticate(None, None).unwrap().owner_id, ANONYMOUS_OWNER);
        assert!(auth.sign("carol").is_none());
    }

    #[test]
    fn test_authorize_owner() {
        let auth = AuthMiddleware::new(&settings());

        assert!(auth.authorize_owner(&CallerIdentity::new("alice"), "alice").is_ok());
        assert!(matches!(
            auth.authorize_owner(&CallerIdentity::new("alice"), "bob"),
            Err(AuthError::Forbidden)
        ));
        assert!(auth.authorize_owner(&CallerIdentity::new("ops"), "bob").is_ok());
    }
}
