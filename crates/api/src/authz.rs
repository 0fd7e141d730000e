//! Handler-side authorization checks.
//!
//! Handlers call these at the top, before touching the store, so a caller
//! without access never triggers domain work. Both checks read only the
//! claims snapshot carried by the token; see [`libris_auth::claims`] for why
//! that snapshot may lag behind the stored grants.

use axum::response::Response;

use libris_auth::{AccessRequirement, RoleName, evaluate_requirement};

use crate::app::errors;
use crate::context::{AppContext, CurrentUser};

/// Requires the named policy (in practice, the permission of the same name).
pub fn require_permission(
    ctx: &AppContext,
    user: &CurrentUser,
    policy: &str,
) -> Result<(), Response> {
    ctx.policies
        .authorize(policy, &user.claims)
        .map_err(errors::domain_error_response)
}

/// Requires the caller's role to be one of `roles`, bypassing permissions.
/// Used for surfaces that are role-scoped rather than capability-scoped,
/// like user administration.
pub fn require_any_role(user: &CurrentUser, roles: &[&'static str]) -> Result<(), Response> {
    let requirement =
        AccessRequirement::AnyRole(roles.iter().map(|role| RoleName::new(*role)).collect());
    evaluate_requirement(&requirement, &user.claims).map_err(errors::domain_error_response)
}
