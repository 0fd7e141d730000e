//! Store traits shared by every persistence backend.
//!
//! Business-rule failures travel as [`DomainError`] inside
//! [`StoreError::Domain`] so callers can map them to client-fault responses;
//! [`StoreError::Backend`] is reserved for infrastructure faults the caller
//! cannot fix. Each backend owns the atomicity its operations promise: the
//! borrow admission check and insert are one atomic unit, and registration
//! writes the account and its profile together or not at all.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use libris_auth::{NewAccount, PermissionSources, Role, UserAccount};
use libris_catalog::{BookQuery, BookRecord, ValidBook};
use libris_circulation::{BorrowQuery, BorrowRecord};
use libris_core::{BookId, BorrowId, DomainError, MemberId, Page, RoleId, UserId};
use libris_members::{Member, MemberProfile, MemberQuery};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    /// The backend itself failed (lost connection, poisoned lock, corrupt row).
    #[error("storage failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A user row joined with its role name, for the administrative listing.
/// Deliberately not serializable: the account carries the password hash, so
/// the HTTP layer projects its own view.
#[derive(Debug, Clone)]
pub struct UserDetails {
    pub account: UserAccount,
    pub role: String,
}

/// A token id retained until the token itself has expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokedToken {
    pub jti: String,
    pub keep_until: DateTime<Utc>,
    pub revoked_at: DateTime<Utc>,
}

/// A borrow row joined with the names humans actually read lists by.
#[derive(Debug, Clone, Serialize)]
pub struct BorrowDetails {
    #[serde(flatten)]
    pub record: BorrowRecord,
    pub book_title: String,
    pub member_name: String,
}

/// Users, roles, and the permission sources the resolver feeds on.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Case-insensitive lookup; `email` is matched after normalization.
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserAccount>>;

    async fn find_user(&self, id: UserId) -> StoreResult<Option<UserAccount>>;

    /// All accounts with their role names, newest first.
    async fn list_users(&self) -> StoreResult<Vec<UserDetails>>;

    async fn list_roles(&self) -> StoreResult<Vec<Role>>;

    async fn role(&self, id: RoleId) -> StoreResult<Option<Role>>;

    async fn role_by_name(&self, name: &str) -> StoreResult<Option<Role>>;

    /// Loads role grants, direct grants and denials for one user in a single
    /// consistent read.
    async fn permission_sources(
        &self,
        user: UserId,
        role: RoleId,
    ) -> StoreResult<PermissionSources>;

    async fn create_user(&self, account: NewAccount, now: DateTime<Utc>)
    -> StoreResult<UserAccount>;

    /// Creates the account and its member profile as one atomic unit. The
    /// profile email starts out identical to the account email.
    async fn register_member(
        &self,
        account: NewAccount,
        profile: MemberProfile,
        now: DateTime<Utc>,
    ) -> StoreResult<(UserAccount, Member)>;

    /// Changes username and email; both already validated and normalized.
    async fn rename_user(
        &self,
        id: UserId,
        username: String,
        email: String,
    ) -> StoreResult<UserAccount>;

    async fn set_password(&self, id: UserId, password_hash: String) -> StoreResult<()>;

    async fn set_role(&self, id: UserId, role: RoleId) -> StoreResult<()>;

    /// Removes the account and, per the 1:1 ownership, its member profile.
    /// Fails with a has-borrow-history conflict when the profile owns any
    /// borrow records.
    async fn delete_user(&self, id: UserId) -> StoreResult<()>;
}

/// Revoked token ids, each kept until its token's own expiry.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Fails with an already-revoked conflict when the id is present.
    async fn revoke(
        &self,
        jti: &str,
        keep_until: DateTime<Utc>,
        revoked_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn is_revoked(&self, jti: &str) -> StoreResult<bool>;

    /// Drops entries whose retention window has passed; returns how many went.
    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn create_book(&self, book: ValidBook) -> StoreResult<BookRecord>;

    async fn update_book(&self, id: BookId, book: ValidBook) -> StoreResult<BookRecord>;

    async fn get_book(&self, id: BookId) -> StoreResult<Option<BookRecord>>;

    /// Fails with a has-borrow-history conflict when any borrow row, active
    /// or settled, references the book.
    async fn delete_book(&self, id: BookId) -> StoreResult<()>;

    async fn list_books(&self, query: &BookQuery) -> StoreResult<Page<BookRecord>>;

    /// The filtered rows without pagination, capped at
    /// [`libris_core::page::EXPORT_ROW_CAP`].
    async fn export_books(&self, query: &BookQuery) -> StoreResult<Vec<BookRecord>>;
}

#[async_trait]
pub trait MemberStore: Send + Sync {
    async fn get_member(&self, id: MemberId) -> StoreResult<Option<Member>>;

    async fn member_by_user(&self, user: UserId) -> StoreResult<Option<Member>>;

    async fn list_members(&self, query: &MemberQuery) -> StoreResult<Page<Member>>;

    async fn export_members(&self, query: &MemberQuery) -> StoreResult<Vec<Member>>;

    /// A changed email is synchronized onto the owning user atomically.
    async fn update_member(&self, id: MemberId, profile: MemberProfile) -> StoreResult<Member>;

    /// Same as [`update_member`](Self::update_member), addressed by the
    /// owning user (the "my profile" path).
    async fn update_member_by_user(
        &self,
        user: UserId,
        profile: MemberProfile,
    ) -> StoreResult<Member>;

    /// Fails with a has-borrow-history conflict when any borrow row
    /// references the member. The owning user account stays.
    async fn delete_member(&self, id: MemberId) -> StoreResult<()>;
}

#[async_trait]
pub trait CirculationStore: Send + Sync {
    /// Admission control (duration, existence, duplicate-active,
    /// availability) and the insert happen as one atomic unit with respect
    /// to concurrent creates for the same book.
    async fn create_borrow(
        &self,
        member: MemberId,
        book: BookId,
        now: DateTime<Utc>,
        duration_days: i64,
    ) -> StoreResult<BorrowRecord>;

    /// Re-validates duration and referenced entities only, then rebooks the
    /// record from `now`. The returned-at marker is left untouched.
    async fn update_borrow(
        &self,
        id: BorrowId,
        member: MemberId,
        book: BookId,
        now: DateTime<Utc>,
        duration_days: i64,
    ) -> StoreResult<BorrowRecord>;

    /// Fails with an already-returned conflict on a second call.
    async fn return_borrow(&self, id: BorrowId, now: DateTime<Utc>) -> StoreResult<BorrowRecord>;

    /// Unconditional removal; only a missing id fails.
    async fn delete_borrow(&self, id: BorrowId) -> StoreResult<()>;

    async fn get_borrow(&self, id: BorrowId) -> StoreResult<Option<BorrowDetails>>;

    async fn list_borrows(&self, query: &BorrowQuery) -> StoreResult<Page<BorrowDetails>>;

    async fn export_borrows(&self, query: &BorrowQuery) -> StoreResult<Vec<BorrowDetails>>;
}

/// The full persistence surface, for callers that hold one backend behind a
/// single trait object.
pub trait Store:
    IdentityStore + RevocationStore + CatalogStore + MemberStore + CirculationStore
{
}

impl<S> Store for S where
    S: IdentityStore + RevocationStore + CatalogStore + MemberStore + CirculationStore + ?Sized
{
}
