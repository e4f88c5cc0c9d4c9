#![forbid(unsafe_code)]

//! **team-auth** – Capability-based security primitives for the team
//! runtime orchestrator.
//!
//! This crate defines the canonical `Claims` structure and the two key
//! traits – [`CapabilityToken`] and [`TokenValidator`] – used across the
//! workspace.  A simple HS256 JWT implementation (`JwtHs256Token` /
//! `JwtHs256Validator`) is bundled for v0.1.
//!
//! Future releases can provide additional algorithms (Biscuit, Paseto, …)
//! via crate features while reusing the same trait contracts.
//!
//! Capability tokens gate every deployment-service operation that touches a
//! workspace: minting one binds a subject to a vault (workspace) and an
//! explicit permission list, and [`TokenValidator::validate`] is the single
//! choke point every HTTP handler calls before acting on a request.

use serde::{Deserialize, Serialize};
use async_trait::async_trait;
// (Root level: keep dependency-agnostic; heavy imports live inside submodules)

/// Subject identifier / vault identifier / jti maximum length, in bytes.
pub const MAX_CLAIM_ID_LEN: usize = 256;
/// Maximum length of a single permission string.
pub const MAX_PERMISSION_LEN: usize = 64;
/// Maximum number of permissions a single token may carry.
pub const MAX_PERMISSIONS_COUNT: usize = 64;
/// Maximum token lifetime (`exp - iat`), in seconds: 24 hours.
pub const MAX_TOKEN_LIFETIME_SECS: u64 = 24 * 60 * 60;

/// Canonical claim set embedded in every capability token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject – usually the *user* or *agent* identifier.
    pub sub: String,
    /// Vault / workspace identifier the subject wishes to access.
    pub vault: String,
    /// Ordered list of permissions (e.g. `transfer`, `mint`).
    pub permissions: Vec<String>,
    /// Issued‐at timestamp (seconds since Unix epoch).
    pub iat: u64,
    /// Absolute expiry timestamp (seconds since Unix epoch).
    pub exp: u64,
    /// Unique token identifier (e.g. UUIDv4) for replay protection.
    pub jti: String,
}

impl Claims {
    /// Structural validation independent of signature/expiry checks performed
    /// at decode time: bounds every field so a malformed or adversarial claim
    /// set can never reach a [`CapabilityToken::mint`] call.
    pub fn validate(&self) -> Result<()> {
        let sub = self.sub.trim();
        if sub.is_empty() {
            return Err(Error::new("Subject identifier cannot be empty"));
        }
        if self.sub.len() > MAX_CLAIM_ID_LEN {
            return Err(Error::new("Subject identifier too long"));
        }
        if self.vault.is_empty() {
            return Err(Error::new("Vault identifier cannot be empty"));
        }
        if self.vault.len() > MAX_CLAIM_ID_LEN {
            return Err(Error::new("Vault identifier too long"));
        }
        if self.permissions.len() > MAX_PERMISSIONS_COUNT {
            return Err(Error::new("Too many permissions in token"));
        }
        for permission in &self.permissions {
            if permission.is_empty() {
                return Err(Error::new("Permission cannot be empty"));
            }
            if permission.len() > MAX_PERMISSION_LEN {
                return Err(Error::new("Permission name too long"));
            }
        }
        if self.exp <= self.iat {
            return Err(Error::new("Token expiry must be after issuance"));
        }
        if self.exp - self.iat > MAX_TOKEN_LIFETIME_SECS {
            return Err(Error::new("Token lifetime exceeds maximum allowed"));
        }
        if self.jti.is_empty() {
            return Err(Error::new("Token ID (jti) cannot be empty"));
        }
        if self.jti.len() > MAX_CLAIM_ID_LEN {
            return Err(Error::new("Token ID (jti) too long"));
        }
        Ok(())
    }

    /// Whether `exp` has already passed relative to the current wall clock.
    pub fn is_expired(&self) -> bool {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(u64::MAX);
        now >= self.exp
    }
}

/// Minimal in‐crate error type.
#[derive(Debug)]
pub struct Error {
    msg: String,
}

impl Error {
    pub fn new(msg: &str) -> Self { Self { msg: msg.into() } }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.msg.fmt(f)
    }
}

impl std::error::Error for Error {}

/// Crate result helper.
pub type Result<T> = std::result::Result<T, Error>;

//─────────────────────────────
//  Trait definitions
//─────────────────────────────

/// Abstract behaviour common to *all* capability token formats.
#[async_trait]
pub trait CapabilityToken: Sized + Send + Sync {
    /// Mint a new token from raw `claims` using the provided secret / key.
    async fn mint(claims: &Claims, key: &[u8]) -> Result<Self>;

    /// Return the serialized wire representation (e.g. JWT string).
    fn as_str(&self) -> &str;
}

/// Verifier trait used by the deployment service before executing an operation.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Verify authenticity + semantic correctness, returning the embedded [`Claims`].
    async fn validate(&self, raw: &str) -> Result<Claims>;
}

//─────────────────────────────
//  HS256 JWT implementation
//─────────────────────────────

pub mod hs256 {
    use super::{Claims, Result, Error, CapabilityToken, TokenValidator};
    use async_trait::async_trait;
    use jsonwebtoken::{encode, decode, Algorithm, Header, Validation, EncodingKey, DecodingKey, TokenData};
    use uuid::Uuid;
    use std::time::{SystemTime, UNIX_EPOCH};

    /// Concrete JWT (HS256) capability token implementation.
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct JwtHs256Token {
        token: String,
    }

    impl JwtHs256Token {
        /// Decode and validate the token, returning [`Claims`] (expiry enforced).
        pub fn claims(&self, secret: &str) -> Result<Claims> {
            Self::decode_internal(&self.token, secret)
                .map(|d| d.claims)
                .map_err(|e| Error::new(&e.to_string()))
        }

        /// Quick authenticity + expiry check.
        pub fn is_valid(&self, secret: &str) -> bool {
            let data = match Self::decode_internal(&self.token, secret) {
                Ok(d) => d,
                Err(_) => return false,
            };
            let now = match SystemTime::now().duration_since(UNIX_EPOCH) {
                Ok(d) => d.as_secs() as u64,
                Err(_) => return false,
            };
            now < data.claims.exp
        }

        fn decode_internal(token: &str, secret: &str) -> std::result::Result<TokenData<Claims>, jsonwebtoken::errors::Error> {
            let mut validation = Validation::new(Algorithm::HS256);
            validation.validate_exp = true;
            validation.leeway = 0;
            decode::<Claims>(
                token,
                &DecodingKey::from_secret(secret.as_bytes()),
                &validation,
            )
        }

        /// Convenience helper kept from legacy code – synchronous mint.
        pub fn new(subject: &str, vault: &str, permissions: Vec<String>, secret: &str, ttl_secs: u64) -> Result<Self> {
            let claims = build_claims(subject, vault, permissions, ttl_secs)?;
            let mut header = Header::new(Algorithm::HS256);
            header.typ = Some("team.cap+jwt".into());
            let jwt = encode(&header, &claims, &EncodingKey::from_secret(secret.as_bytes()))
                .map_err(|e| Error::new(&e.to_string()))?;
            Ok(Self { token: jwt })
        }
    }

    #[async_trait]
    impl CapabilityToken for JwtHs256Token {
        async fn mint(claims: &Claims, key: &[u8]) -> Result<Self> {
            let mut header = Header::new(Algorithm::HS256);
            header.typ = Some("team.cap+jwt".into());
            let jwt = encode(
                &header,
                claims,
                &EncodingKey::from_secret(key),
            ).map_err(|e| Error::new(&e.to_string()))?;
            Ok(Self { token: jwt })
        }

        fn as_str(&self) -> &str {
            &self.token
        }
    }

    /// Helper to construct standard claims with proper timestamps.
    pub fn build_claims(subject: &str, vault: &str, permissions: Vec<String>, ttl_secs: u64) -> Result<Claims> {
        let issued_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::new(&e.to_string()))?
            .as_secs();
        Ok(Claims {
            sub: subject.to_owned(),
            vault: vault.to_owned(),
            permissions,
            iat: issued_at,
            exp: issued_at + ttl_secs,
            jti: Uuid::new_v4().to_string(),
        })
    }

    /// HS256 JWT validator.
    #[derive(Clone, Debug)]
    pub struct JwtHs256Validator {
        secret: String,
        validation: Validation,
    }

    impl JwtHs256Validator {
        pub fn new(secret: impl Into<String>) -> Self {
            let mut validation = Validation::new(Algorithm::HS256);
            validation.validate_exp = true;
            Self {
                secret: secret.into(),
                validation,
            }
        }
    }

    #[async_trait]
    impl TokenValidator for JwtHs256Validator {
        async fn validate(&self, raw: &str) -> Result<Claims> {
            let data = decode::<Claims>(
                raw,
                &DecodingKey::from_secret(self.secret.as_bytes()),
                &self.validation,
            ).map_err(|e| Error::new(&e.to_string()))?;
            Ok(data.claims)
        }
    }

    /// Glob‐import helper.
    pub mod prelude {
        pub use super::{JwtHs256Token, JwtHs256Validator};
        pub use crate::{CapabilityToken, TokenValidator, Claims};
    }
}

/// Top-level convenience export re-exporting the HS256 implementation.
pub use hs256::prelude::*;

/// Single‐line glob import for downstream crates.
pub mod prelude {
    pub use super::{Claims, CapabilityToken, TokenValidator};
    pub use super::hs256::prelude::*;
}
