//! HS256 token issuance and verification.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;
use uuid::Uuid;

use libris_core::{RoleId, UserId};

use crate::claims::AccessClaims;
use crate::permissions::Permission;

/// Tokens live this long from issuance.
pub const TOKEN_TTL: Duration = Duration::hours(2);

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token encoding failed")]
    Encode(#[source] jsonwebtoken::errors::Error),

    #[error("token rejected")]
    Verify(#[source] jsonwebtoken::errors::Error),
}

/// Identity fields baked into a token.
#[derive(Debug, Clone)]
pub struct TokenSubject {
    pub user_id: UserId,
    pub email: String,
    pub role_id: RoleId,
    pub role: String,
}

/// A freshly minted token together with its decoded claims.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: AccessClaims,
}

/// Issues and verifies bearer tokens with a shared symmetric key.
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            audience: audience.into(),
            ttl: TOKEN_TTL,
        }
    }

    /// Override the default TTL. Tests shorten it; production keeps the
    /// two-hour default.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Mint a token for `subject` carrying `permissions` as a claims snapshot.
    ///
    /// Every call produces a distinct `jti`, so two otherwise identical tokens
    /// can be revoked independently. `nbf` equals `iat`; `exp` is `iat` plus
    /// the TTL. Permission names are trimmed and deduplicated
    /// case-insensitively before embedding.
    pub fn issue(
        &self,
        subject: &TokenSubject,
        permissions: &[Permission],
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let mut embedded: Vec<Permission> = Vec::with_capacity(permissions.len());
        for perm in permissions {
            let name = perm.as_str().trim();
            if name.is_empty() {
                continue;
            }
            if !embedded.iter().any(|p| p.matches(name)) {
                embedded.push(Permission::new(name.to_string()));
            }
        }

        let iat = now.timestamp();
        let claims = AccessClaims {
            sub: subject.user_id,
            email: subject.email.clone(),
            role_id: subject.role_id,
            role: subject.role.clone(),
            permissions: embedded,
            jti: Uuid::now_v7().to_string(),
            iat,
            nbf: iat,
            exp: (now + self.ttl).timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(TokenError::Encode)?;
        Ok(IssuedToken { token, claims })
    }

    /// Full verification: signature, issuer, audience, not-before and expiry,
    /// with zero clock leeway.
    pub fn verify(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.validate_nbf = true;
        validation.leeway = 0;

        let data = decode::<AccessClaims>(token, &self.decoding_key, &validation)
            .map_err(TokenError::Verify)?;
        Ok(data.claims)
    }

    /// Signature-only decode used by logout: recovers `jti` and expiry from a
    /// token that may already be expired, while still rejecting anything not
    /// signed by this issuer's key.
    pub fn decode_for_revocation(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();
        validation.leeway = 0;

        let data = decode::<AccessClaims>(token, &self.decoding_key, &validation)
            .map_err(TokenError::Verify)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(b"test-secret-key-0123456789", "libris", "libris-clients")
    }

    fn subject() -> TokenSubject {
        TokenSubject {
            user_id: UserId::new(),
            email: "reader@example.com".into(),
            role_id: RoleId::new(),
            role: "Member".into(),
        }
    }

    fn perms(names: &[&str]) -> Vec<Permission> {
        names.iter().map(|n| Permission::new(n.to_string())).collect()
    }

    #[test]
    fn fresh_token_round_trips_with_exact_permissions() {
        let issuer = issuer();
        let issued = issuer
            .issue(&subject(), &perms(&["book.read", "borrow.create"]), Utc::now())
            .unwrap();

        let claims = issuer.verify(&issued.token).unwrap();
        assert_eq!(claims.jti, issued.claims.jti);
        assert!(claims.has_permission("book.read"));
        assert!(claims.has_permission("borrow.create"));
        assert_eq!(claims.permissions.len(), 2);
        assert_eq!(claims.nbf, claims.iat);
        assert_eq!(claims.exp - claims.iat, TOKEN_TTL.num_seconds());
    }

    #[test]
    fn embedded_permissions_dedup_case_insensitively() {
        let issued = issuer()
            .issue(
                &subject(),
                &perms(&["Book.Read", "book.read", "  borrow.read ", ""]),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(issued.claims.permissions.len(), 2);
        assert!(issued.claims.has_permission("book.read"));
        assert!(issued.claims.has_permission("borrow.read"));
    }

    #[test]
    fn two_issuances_have_distinct_jti() {
        let issuer = issuer();
        let sub = subject();
        let now = Utc::now();
        let a = issuer.issue(&sub, &perms(&["book.read"]), now).unwrap();
        let b = issuer.issue(&sub, &perms(&["book.read"]), now).unwrap();
        assert_ne!(a.claims.jti, b.claims.jti);
    }

    #[test]
    fn expired_token_fails_verification() {
        let issuer = issuer();
        let stale = issuer
            .issue(&subject(), &[], Utc::now() - Duration::hours(3))
            .unwrap();
        assert!(issuer.verify(&stale.token).is_err());
    }

    #[test]
    fn future_token_fails_not_before() {
        let issuer = issuer();
        let early = issuer
            .issue(&subject(), &[], Utc::now() + Duration::hours(1))
            .unwrap();
        assert!(issuer.verify(&early.token).is_err());
    }

    #[test]
    fn wrong_key_fails_verification() {
        let issued = issuer().issue(&subject(), &[], Utc::now()).unwrap();
        let other = TokenIssuer::new(b"another-secret-entirely", "libris", "libris-clients");
        assert!(other.verify(&issued.token).is_err());
    }

    #[test]
    fn issuer_and_audience_must_match() {
        let issued = TokenIssuer::new(b"k", "someone-else", "libris-clients")
            .issue(&subject(), &[], Utc::now())
            .unwrap();
        assert!(TokenIssuer::new(b"k", "libris", "libris-clients")
            .verify(&issued.token)
            .is_err());

        let issued = TokenIssuer::new(b"k", "libris", "other-audience")
            .issue(&subject(), &[], Utc::now())
            .unwrap();
        assert!(TokenIssuer::new(b"k", "libris", "libris-clients")
            .verify(&issued.token)
            .is_err());
    }

    #[test]
    fn revocation_decode_accepts_expired_but_not_forged() {
        let issuer = issuer();
        let stale = issuer
            .issue(&subject(), &[], Utc::now() - Duration::hours(3))
            .unwrap();

        let claims = issuer.decode_for_revocation(&stale.token).unwrap();
        assert_eq!(claims.jti, stale.claims.jti);

        let forged = TokenIssuer::new(b"forgers-key", "libris", "libris-clients")
            .issue(&subject(), &[], Utc::now())
            .unwrap();
        assert!(issuer.decode_for_revocation(&forged.token).is_err());
    }
}
