use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use libris_core::{RoleId, UserId};

use crate::permissions::Permission;

/// Decoded access-token claims.
///
/// The permission list is a snapshot taken at issuance: a grant or denial made
/// mid-session is invisible until the user logs in again. That staleness
/// window is deliberate; it saves a permission-resolution query per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject: the user id.
    pub sub: UserId,

    /// Account email at issuance time.
    pub email: String,

    /// Role at issuance time.
    pub role_id: RoleId,
    pub role: String,

    /// Effective permission names at issuance time.
    pub permissions: Vec<Permission>,

    /// Unique token id; what the revocation store keys on.
    pub jti: String,

    /// Seconds since epoch.
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,

    pub iss: String,
    pub aud: String,
}

impl AccessClaims {
    pub fn has_permission(&self, name: &str) -> bool {
        self.permissions.iter().any(|p| p.matches(name))
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role.eq_ignore_ascii_case(role)
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.iat, 0).unwrap_or(DateTime::UNIX_EPOCH)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::UNIX_EPOCH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims_with(perms: &[&str]) -> AccessClaims {
        AccessClaims {
            sub: UserId::new(),
            email: "a@b.c".into(),
            role_id: RoleId::new(),
            role: "Employee".into(),
            permissions: perms.iter().map(|p| Permission::new(p.to_string())).collect(),
            jti: "t-1".into(),
            iat: 0,
            nbf: 0,
            exp: 7200,
            iss: "libris".into(),
            aud: "libris-clients".into(),
        }
    }

    #[test]
    fn permission_membership_is_case_insensitive() {
        let claims = claims_with(&["Book.Read"]);
        assert!(claims.has_permission("book.read"));
        assert!(!claims.has_permission("book.delete"));
    }

    #[test]
    fn role_check_is_case_insensitive() {
        let claims = claims_with(&[]);
        assert!(claims.has_role("employee"));
        assert!(!claims.has_role("Admin"));
    }
}
