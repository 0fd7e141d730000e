//! String-keyed authorization policies.
//!
//! Policies are registered at startup from whatever permission names the store
//! holds, so a new permission needs a row and a registration, not a code
//! change. The default registration maps each permission name to itself.

use std::collections::HashMap;

use libris_core::{DomainError, DomainResult};

use crate::claims::AccessClaims;
use crate::permissions::Permission;
use crate::roles::RoleName;

/// What a policy demands of the caller's claims snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessRequirement {
    /// Any verified, unrevoked token.
    Authenticated,
    /// The named permission must be in the token's permission set.
    Permission(Permission),
    /// The token's role must be one of these.
    AnyRole(Vec<RoleName>),
}

/// Evaluate a requirement against decoded claims. Pure; no I/O.
pub fn evaluate_requirement(req: &AccessRequirement, claims: &AccessClaims) -> DomainResult<()> {
    match req {
        AccessRequirement::Authenticated => Ok(()),
        AccessRequirement::Permission(perm) => {
            if claims.has_permission(perm.as_str()) {
                Ok(())
            } else {
                Err(DomainError::forbidden(format!(
                    "missing permission '{perm}'"
                )))
            }
        }
        AccessRequirement::AnyRole(roles) => {
            if roles.iter().any(|r| claims.has_role(r.as_str())) {
                Ok(())
            } else {
                Err(DomainError::forbidden("role not permitted"))
            }
        }
    }
}

/// Registry mapping policy names to requirements.
#[derive(Debug, Default, Clone)]
pub struct PolicyRegistry {
    policies: HashMap<String, AccessRequirement>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity registration: each permission name becomes a policy requiring
    /// that same permission.
    pub fn permission_policies<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        for name in names {
            let name = name.into();
            let requirement = AccessRequirement::Permission(Permission::new(name.clone()));
            registry.register(name, requirement);
        }
        registry
    }

    pub fn register(&mut self, policy: impl Into<String>, requirement: AccessRequirement) {
        self.policies.insert(policy.into(), requirement);
    }

    pub fn requirement(&self, policy: &str) -> Option<&AccessRequirement> {
        self.policies.get(policy)
    }

    /// Look a policy up and evaluate it. An unregistered policy denies.
    pub fn authorize(&self, policy: &str, claims: &AccessClaims) -> DomainResult<()> {
        match self.requirement(policy) {
            Some(req) => evaluate_requirement(req, claims),
            None => Err(DomainError::forbidden(format!(
                "no policy registered for '{policy}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use libris_core::{RoleId, UserId};

    use super::*;

    fn claims(role: &str, perms: &[&str]) -> AccessClaims {
        AccessClaims {
            sub: UserId::new(),
            email: "x@y.z".into(),
            role_id: RoleId::new(),
            role: role.into(),
            permissions: perms.iter().map(|p| Permission::new(p.to_string())).collect(),
            jti: "t".into(),
            iat: 0,
            nbf: 0,
            exp: 7200,
            iss: "libris".into(),
            aud: "libris-clients".into(),
        }
    }

    #[test]
    fn identity_policies_enforce_membership() {
        let registry = PolicyRegistry::permission_policies(["book.read", "book.delete"]);
        let caller = claims("Member", &["book.read"]);

        assert!(registry.authorize("book.read", &caller).is_ok());
        let err = registry.authorize("book.delete", &caller).unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }

    #[test]
    fn unregistered_policy_denies() {
        let registry = PolicyRegistry::permission_policies(["book.read"]);
        let caller = claims("Admin", &["book.read", "mystery.peek"]);
        assert!(registry.authorize("mystery.peek", &caller).is_err());
    }

    #[test]
    fn role_requirement_matches_case_insensitively() {
        let req = AccessRequirement::AnyRole(vec![
            RoleName::new("Admin"),
            RoleName::new("Employee"),
        ]);
        assert!(evaluate_requirement(&req, &claims("employee", &[])).is_ok());
        assert!(evaluate_requirement(&req, &claims("Member", &[])).is_err());
    }

    #[test]
    fn authenticated_requirement_accepts_any_claims() {
        assert!(evaluate_requirement(&AccessRequirement::Authenticated, &claims("Member", &[])).is_ok());
    }
}
