//! Role-scoped bearer tokens.
//!
//! Tokens are HS256 JWTs. Each role has its own signing secret and expected
//! principal name; nothing is stored server-side, so a token is valid exactly
//! when its signature, issuer, expiry and `name` claim check out against the
//! configuration of the role it claims.
//!
//! Login never consults a credential store: whoever can name a configured
//! principal and sign with its secret is authenticated as that role.

use std::fmt;

use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use appmgr_core::Role;

use crate::config::{JwtConfig, PrincipalConfig};

/// Fixed `iss` claim of every token this service issues.
pub const ISSUER: &str = "appmgr-auth0";

/// Value of the `typ` claim.
pub const ACCESS_TYPE: &str = "access";

/// Token lifetime.
pub const TOKEN_TTL_MINUTES: i64 = 60;

const BEARER_PREFIX: &str = "Bearer ";

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub typ: String,
    pub iat: i64,
    pub exp: i64,
    pub name: String,
}

/// Only the claim needed to pick a role, read before verification.
#[derive(Debug, Deserialize)]
struct PeekClaims {
    name: Option<serde_json::Value>,
}

/// Errors raised while issuing or verifying tokens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TokenError {
    /// Username or secret missing when issuing a token.
    #[error("must provide name and password to generate token")]
    InvalidCredentials,

    /// The token is missing, malformed, forged, expired or for someone else.
    #[error("Access denied: {0}")]
    Authentication(String),

    /// The token names a principal outside the configured roles.
    #[error("Unsupported jwt claims format")]
    UnsupportedClaims,
}

impl TokenError {
    fn auth(reason: impl Into<String>) -> Self {
        Self::Authentication(reason.into())
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        let reason = match e.kind() {
            ErrorKind::InvalidSignature => "invalid token signature",
            ErrorKind::ExpiredSignature => "token expired",
            ErrorKind::InvalidIssuer => "token issuer mismatch",
            ErrorKind::MissingRequiredClaim(_) => "token missing required claim",
            ErrorKind::ImmatureSignature => "token not yet valid",
            _ => "malformed token",
        };
        Self::auth(reason)
    }
}

/// Issues and verifies tokens against the per-role configuration.
#[derive(Clone)]
pub struct TokenService {
    config: JwtConfig,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("enabled", &self.config.enabled)
            .field("admin", &self.config.admin.name)
            .field("user", &self.config.user.name)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    #[must_use]
    pub fn new(config: JwtConfig) -> Self {
        Self { config }
    }

    /// Whether tokens are checked at all.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn principal(&self, role: Role) -> &PrincipalConfig {
        match role {
            Role::User => &self.config.user,
            _ => &self.config.admin,
        }
    }

    /// Issue a token naming `username`, signed with `secret`.
    ///
    /// # Errors
    /// Returns [`TokenError::InvalidCredentials`] if either argument is empty.
    pub fn issue(&self, username: &str, secret: &str) -> Result<String, TokenError> {
        if username.is_empty() || secret.is_empty() {
            return Err(TokenError::InvalidCredentials);
        }
        let now = Utc::now();
        let claims = Claims {
            iss: ISSUER.to_owned(),
            typ: ACCESS_TYPE.to_owned(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(TOKEN_TTL_MINUTES)).timestamp(),
            name: username.to_owned(),
        };
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| TokenError::auth(format!("failed to sign token: {e}")))
    }

    /// Verify that `token` was issued for `role`'s principal and signed with
    /// `role`'s secret.
    ///
    /// # Errors
    /// Returns [`TokenError::Authentication`] if the token is empty,
    /// malformed, badly signed, from another issuer, expired, or names a
    /// different principal.
    pub fn verify_role(&self, role: Role, token: &str) -> Result<(), TokenError> {
        if !self.config.enabled {
            return Ok(());
        }
        if token.is_empty() {
            return Err(TokenError::auth("must have a token."));
        }
        let principal = self.principal(role);
        if principal.secret.is_empty() {
            return Err(TokenError::auth(format!("no signing secret configured for role {role}")));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.leeway = 0;
        let data = jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(principal.secret.as_bytes()),
            &validation,
        )?;

        if data.claims.typ != ACCESS_TYPE {
            return Err(TokenError::auth("token type mismatch"));
        }
        if data.claims.name != principal.name {
            return Err(TokenError::auth(format!("token is not valid for role {role}")));
        }
        Ok(())
    }

    /// Verify `token` against whichever role its `name` claim selects.
    ///
    /// # Errors
    /// Returns [`TokenError::UnsupportedClaims`] if the claim names neither
    /// configured principal, otherwise whatever [`TokenService::verify_role`]
    /// returns.
    pub fn verify_any_role(&self, token: &str) -> Result<Role, TokenError> {
        if !self.config.enabled {
            return Ok(Role::User);
        }
        let role = self.role_of(token)?;
        self.verify_role(role, token)?;
        Ok(role)
    }

    /// Read the `name` claim without checking the signature and map it to a
    /// role.
    fn role_of(&self, token: &str) -> Result<Role, TokenError> {
        if token.is_empty() {
            return Err(TokenError::auth("must have a token."));
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        let peek = jsonwebtoken::decode::<PeekClaims>(token, &DecodingKey::from_secret(&[]), &validation)?;

        match peek.claims.name.as_ref().and_then(serde_json::Value::as_str) {
            Some(name) if name == self.config.admin.name => Ok(Role::Admin),
            Some(name) if name == self.config.user.name => Ok(Role::User),
            _ => Err(TokenError::UnsupportedClaims),
        }
    }
}

/// Read the bearer token from the `Authorization` header.
///
/// Returns an empty string when the header is absent or not valid text.
#[must_use]
pub fn extract_bearer(headers: &HeaderMap) -> String {
    let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return String::new();
    };
    let value = value.trim();
    value.strip_prefix(BEARER_PREFIX).unwrap_or(value).trim().to_owned()
}
