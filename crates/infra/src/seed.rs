//! First-run data: the role and permission matrix, plus a bootstrap
//! administrator when no Admin account exists yet.
//!
//! Backends seed the matrix themselves at startup (it needs raw inserts);
//! the admin bootstrap goes through [`IdentityStore`] and therefore works
//! against any backend.

use libris_auth::permissions::names;
use libris_auth::{NewAccount, UserAccount, roles};

use crate::store::{IdentityStore, StoreError, StoreResult};

/// Role names in seed order.
pub const ROLE_NAMES: [&str; 3] = [roles::ADMIN, roles::EMPLOYEE, roles::MEMBER];

const EMPLOYEE_GRANTS: &[&str] = &[
    names::BOOK_READ,
    names::BOOK_CREATE,
    names::BOOK_UPDATE,
    names::MEMBER_READ,
    names::MEMBER_ADD,
    names::MEMBER_UPDATE,
];

const MEMBER_GRANTS: &[&str] = &[names::BOOK_READ];

/// Permissions a role holds out of the box. Unknown roles get nothing.
pub fn grants_for(role: &str) -> &'static [&'static str] {
    if role.eq_ignore_ascii_case(roles::ADMIN) {
        &names::ALL
    } else if role.eq_ignore_ascii_case(roles::EMPLOYEE) {
        EMPLOYEE_GRANTS
    } else if role.eq_ignore_ascii_case(roles::MEMBER) {
        MEMBER_GRANTS
    } else {
        &[]
    }
}

/// Credentials for the account created when the store has no Admin yet.
#[derive(Debug, Clone)]
pub struct AdminBootstrap {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Creates the bootstrap administrator unless some Admin account already
/// exists. Returns the created account, or `None` when nothing was done.
pub async fn ensure_admin<S>(
    store: &S,
    boot: &AdminBootstrap,
    now: chrono::DateTime<chrono::Utc>,
) -> StoreResult<Option<UserAccount>>
where
    S: IdentityStore + ?Sized,
{
    let users = store.list_users().await?;
    if users
        .iter()
        .any(|u| u.role.eq_ignore_ascii_case(roles::ADMIN))
    {
        return Ok(None);
    }

    let role = store
        .role_by_name(roles::ADMIN)
        .await?
        .ok_or_else(|| StoreError::Backend("admin role missing from seed data".to_string()))?;
    let account = NewAccount::new(&boot.username, &boot.email, &boot.password, role.id)?;
    let created = store.create_user(account, now).await?;
    Ok(Some(created))
}
