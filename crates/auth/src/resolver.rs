//! Effective permission set computation.
//!
//! Pure set algebra over grants the caller has already loaded: this module
//! performs no I/O and cannot fail.

use std::collections::{HashMap, HashSet};

use libris_core::PermissionId;

use crate::permissions::{Permission, PermissionGrant};

/// Everything resolution needs, loaded by the store in one round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSources {
    pub role_grants: Vec<PermissionGrant>,
    pub user_grants: Vec<PermissionGrant>,
    pub denials: Vec<PermissionId>,
}

impl PermissionSources {
    pub fn resolve(&self) -> Vec<Permission> {
        resolve_effective_permissions(&self.role_grants, &self.user_grants, &self.denials)
    }
}

/// Compute the permission names a user actually holds.
///
/// Union of role grants and direct user grants, joined by permission id (a
/// rename keeps its grants), minus every permission whose id appears in the
/// denial set. Denial wins over any grant. The projection to names trims
/// whitespace and deduplicates case-insensitively; output order is sorted for
/// determinism but carries no meaning.
pub fn resolve_effective_permissions(
    role_grants: &[PermissionGrant],
    user_grants: &[PermissionGrant],
    denials: &[PermissionId],
) -> Vec<Permission> {
    let denied: HashSet<PermissionId> = denials.iter().copied().collect();

    let mut granted: HashMap<PermissionId, &str> = HashMap::new();
    for grant in role_grants.iter().chain(user_grants) {
        granted.entry(grant.id).or_insert(grant.name.as_str());
    }

    let mut names: Vec<&str> = granted
        .into_iter()
        .filter(|(id, name)| !denied.contains(id) && !name.trim().is_empty())
        .map(|(_, name)| name.trim())
        .collect();

    names.sort_unstable_by(|a, b| {
        a.to_ascii_lowercase()
            .cmp(&b.to_ascii_lowercase())
            .then_with(|| a.cmp(b))
    });
    names.dedup_by(|a, b| a.eq_ignore_ascii_case(b));

    names
        .into_iter()
        .map(|name| Permission::new(name.to_string()))
        .collect()
}
