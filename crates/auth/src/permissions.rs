use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use libris_core::PermissionId;

/// Permission name.
///
/// Permissions are modeled as opaque strings (e.g. "book.read"). The full set
/// lives in the store, not in an enum, so new capabilities are a data change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, name: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(name)
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A permission as granted somewhere (via a role or directly to a user).
///
/// Resolution works on identities, not names, so a renamed permission keeps
/// its grants and denials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionGrant {
    pub id: PermissionId,
    pub name: String,
}

impl PermissionGrant {
    pub fn new(id: PermissionId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// The capability names this system ships with. The store seeds them; nothing
/// in the code restricts permissions to this list.
pub mod names {
    pub const BOOK_READ: &str = "book.read";
    pub const BOOK_CREATE: &str = "book.create";
    pub const BOOK_UPDATE: &str = "book.update";
    pub const BOOK_DELETE: &str = "book.delete";
    pub const MEMBER_READ: &str = "member.read";
    pub const MEMBER_ADD: &str = "member.add";
    pub const MEMBER_UPDATE: &str = "member.update";
    pub const MEMBER_DELETE: &str = "member.delete";
    pub const BORROW_READ: &str = "borrow.read";
    pub const BORROW_CREATE: &str = "borrow.create";
    pub const BORROW_UPDATE: &str = "borrow.update";
    pub const BORROW_DELETE: &str = "borrow.delete";

    pub const ALL: [&str; 12] = [
        BOOK_READ,
        BOOK_CREATE,
        BOOK_UPDATE,
        BOOK_DELETE,
        MEMBER_READ,
        MEMBER_ADD,
        MEMBER_UPDATE,
        MEMBER_DELETE,
        BORROW_READ,
        BORROW_CREATE,
        BORROW_UPDATE,
        BORROW_DELETE,
    ];
}
