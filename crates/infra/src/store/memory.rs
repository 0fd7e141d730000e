//! In-memory backend.
//!
//! One mutex around the whole state keeps every operation linearizable,
//! which is exactly the arbiter the borrow admission rules need. Suited to
//! tests and small single-node deployments; nothing survives a restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use libris_auth::permissions::names;
use libris_auth::{NewAccount, PermissionGrant, PermissionSources, Role, UserAccount};
use libris_catalog::{Book, BookQuery, BookRecord, ValidBook};
use libris_circulation::{
    BookAvailability, BorrowFacts, BorrowQuery, BorrowRecord, validate_duration,
};
use libris_core::{
    BookId, BorrowId, ConflictKind, DomainError, EXPORT_ROW_CAP, MemberId, Page, PageParams,
    PermissionId, RoleId, UserId,
};
use libris_members::{Member, MemberProfile, MemberQuery};

use super::{
    BorrowDetails, CatalogStore, CirculationStore, IdentityStore, MemberStore, RevocationStore,
    RevokedToken, StoreError, StoreResult, UserDetails,
};
use crate::seed;

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, UserAccount>,
    roles: HashMap<RoleId, Role>,
    permissions: HashMap<PermissionId, String>,
    role_permissions: HashMap<RoleId, Vec<PermissionId>>,
    user_permissions: HashMap<UserId, Vec<PermissionId>>,
    user_denials: HashMap<UserId, Vec<PermissionId>>,
    revoked: HashMap<String, RevokedToken>,
    books: HashMap<BookId, Book>,
    members: HashMap<MemberId, Member>,
    borrows: HashMap<BorrowId, BorrowRecord>,
}

impl State {
    fn role_name(&self, id: RoleId) -> StoreResult<String> {
        self.roles
            .get(&id)
            .map(|r| r.name.clone())
            .ok_or_else(|| StoreError::Backend(format!("user references missing role {id}")))
    }

    fn require_role(&self, id: RoleId) -> StoreResult<()> {
        if self.roles.contains_key(&id) {
            Ok(())
        } else {
            Err(DomainError::validation("role does not exist").into())
        }
    }

    fn grants(&self, ids: Option<&Vec<PermissionId>>) -> Vec<PermissionGrant> {
        ids.map(|ids| {
            ids.iter()
                .filter_map(|id| {
                    self.permissions.get(id).map(|name| PermissionGrant {
                        id: *id,
                        name: name.clone(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
    }

    fn permission_id(&self, name: &str) -> StoreResult<PermissionId> {
        self.permissions
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(id, _)| *id)
            .ok_or_else(|| DomainError::validation("permission does not exist").into())
    }

    fn check_username_free(&self, username: &str, exclude: Option<UserId>) -> StoreResult<()> {
        let taken = self
            .users
            .values()
            .any(|u| Some(u.id) != exclude && u.username.eq_ignore_ascii_case(username));
        if taken {
            Err(DomainError::conflict(ConflictKind::DuplicateUsername).into())
        } else {
            Ok(())
        }
    }

    fn check_user_email_free(&self, email: &str, exclude: Option<UserId>) -> StoreResult<()> {
        let taken = self
            .users
            .values()
            .any(|u| Some(u.id) != exclude && u.email.eq_ignore_ascii_case(email));
        if taken {
            Err(DomainError::conflict(ConflictKind::DuplicateEmail).into())
        } else {
            Ok(())
        }
    }

    fn check_member_email_free(&self, email: &str, exclude: Option<MemberId>) -> StoreResult<()> {
        let taken = self
            .members
            .values()
            .any(|m| Some(m.id) != exclude && m.email.eq_ignore_ascii_case(email));
        if taken {
            Err(DomainError::conflict(ConflictKind::DuplicateEmail).into())
        } else {
            Ok(())
        }
    }

    fn check_isbn_free(&self, normalized: Option<&str>, exclude: Option<BookId>) -> StoreResult<()> {
        let Some(normalized) = normalized else {
            return Ok(());
        };
        let taken = self.books.values().any(|b| {
            Some(b.id) != exclude && b.normalized_isbn().as_deref() == Some(normalized)
        });
        if taken {
            Err(DomainError::conflict(ConflictKind::DuplicateIsbn).into())
        } else {
            Ok(())
        }
    }

    fn check_title_free(
        &self,
        title: &str,
        author: &str,
        year: i32,
        exclude: Option<BookId>,
    ) -> StoreResult<()> {
        let taken = self.books.values().any(|b| {
            Some(b.id) != exclude
                && b.year == year
                && b.title.eq_ignore_ascii_case(title)
                && b.author.eq_ignore_ascii_case(author)
        });
        if taken {
            Err(DomainError::conflict(ConflictKind::DuplicateTitle).into())
        } else {
            Ok(())
        }
    }

    fn active_count(&self, book: BookId) -> u32 {
        self.borrows
            .values()
            .filter(|r| r.book_id == book && r.is_active())
            .count() as u32
    }

    fn record(&self, book: &Book) -> BookRecord {
        BookRecord::new(book.clone(), self.active_count(book.id))
    }

    fn borrow_facts(&self, member: MemberId, book: BookId) -> BorrowFacts {
        BorrowFacts {
            book: self.books.get(&book).map(|b| BookAvailability {
                copies_count: b.copies_count,
                active_count: self.active_count(book),
            }),
            member_exists: self.members.contains_key(&member),
            duplicate_active: self
                .borrows
                .values()
                .any(|r| r.member_id == member && r.book_id == book && r.is_active()),
        }
    }

    fn book_has_history(&self, book: BookId) -> bool {
        self.borrows.values().any(|r| r.book_id == book)
    }

    fn member_has_history(&self, member: MemberId) -> bool {
        self.borrows.values().any(|r| r.member_id == member)
    }

    fn details(&self, record: &BorrowRecord) -> StoreResult<BorrowDetails> {
        let book_title = self
            .books
            .get(&record.book_id)
            .map(|b| b.title.clone())
            .ok_or_else(|| {
                StoreError::Backend(format!("borrow {} references a missing book", record.id))
            })?;
        let member_name = self
            .members
            .get(&record.member_id)
            .map(|m| m.name.clone())
            .ok_or_else(|| {
                StoreError::Backend(format!("borrow {} references a missing member", record.id))
            })?;
        Ok(BorrowDetails {
            record: record.clone(),
            book_title,
            member_name,
        })
    }

    fn apply_member_update(&mut self, id: MemberId, profile: MemberProfile) -> StoreResult<Member> {
        let owner = match self.members.get(&id) {
            Some(member) => member.user_id,
            None => return Err(DomainError::not_found().into()),
        };
        self.check_member_email_free(&profile.email, Some(id))?;
        self.check_user_email_free(&profile.email, Some(owner))?;

        if let Some(user) = self.users.get_mut(&owner) {
            user.email = profile.email.clone();
        }
        let member = self
            .members
            .get_mut(&id)
            .ok_or_else(|| StoreError::Backend(format!("member {id} vanished mid-update")))?;
        member.name = profile.name;
        member.email = profile.email;
        member.phone = profile.phone;
        Ok(member.clone())
    }
}

fn paginate<T>(rows: Vec<T>, params: PageParams) -> Page<T> {
    let total = rows.len() as u64;
    let items = rows
        .into_iter()
        .skip(params.offset() as usize)
        .take(params.page_size as usize)
        .collect();
    Page::new(items, params, total)
}

/// Everything behind one `Mutex`. Lock scope is a single operation; no
/// guard is ever held across an await point.
#[derive(Debug)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    /// An empty store pre-seeded with the role and permission matrix.
    pub fn new() -> Self {
        let mut state = State::default();
        let mut ids_by_name = HashMap::new();
        for name in names::ALL {
            let id = PermissionId::new();
            state.permissions.insert(id, name.to_string());
            ids_by_name.insert(name, id);
        }
        for role_name in seed::ROLE_NAMES {
            let role = Role {
                id: RoleId::new(),
                name: role_name.to_string(),
            };
            let grants = seed::grants_for(role_name)
                .iter()
                .filter_map(|name| ids_by_name.get(name).copied())
                .collect();
            state.role_permissions.insert(role.id, grants);
            state.roles.insert(role.id, role);
        }
        Self {
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("state lock poisoned".to_string()))
    }

    /// Grants a permission directly to one user, beyond their role.
    pub fn grant_to_user(&self, user: UserId, permission: &str) -> StoreResult<()> {
        let mut state = self.state()?;
        let id = state.permission_id(permission)?;
        let grants = state.user_permissions.entry(user).or_default();
        if !grants.contains(&id) {
            grants.push(id);
        }
        Ok(())
    }

    /// Denies a permission for one user; denial wins over any grant.
    pub fn deny_to_user(&self, user: UserId, permission: &str) -> StoreResult<()> {
        let mut state = self.state()?;
        let id = state.permission_id(permission)?;
        let denials = state.user_denials.entry(user).or_default();
        if !denials.contains(&id) {
            denials.push(id);
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityStore for InMemoryStore {
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserAccount>> {
        let state = self.state()?;
        Ok(state
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_user(&self, id: UserId) -> StoreResult<Option<UserAccount>> {
        Ok(self.state()?.users.get(&id).cloned())
    }

    async fn list_users(&self) -> StoreResult<Vec<UserDetails>> {
        let state = self.state()?;
        let mut rows = Vec::with_capacity(state.users.len());
        for account in state.users.values() {
            rows.push(UserDetails {
                account: account.clone(),
                role: state.role_name(account.role_id)?,
            });
        }
        rows.sort_by(|a, b| b.account.id.as_uuid().cmp(a.account.id.as_uuid()));
        Ok(rows)
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let state = self.state()?;
        let mut roles: Vec<Role> = state.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn role(&self, id: RoleId) -> StoreResult<Option<Role>> {
        Ok(self.state()?.roles.get(&id).cloned())
    }

    async fn role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let state = self.state()?;
        Ok(state
            .roles
            .values()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn permission_sources(
        &self,
        user: UserId,
        role: RoleId,
    ) -> StoreResult<PermissionSources> {
        let state = self.state()?;
        Ok(PermissionSources {
            role_grants: state.grants(state.role_permissions.get(&role)),
            user_grants: state.grants(state.user_permissions.get(&user)),
            denials: state.user_denials.get(&user).cloned().unwrap_or_default(),
        })
    }

    async fn create_user(
        &self,
        account: NewAccount,
        now: DateTime<Utc>,
    ) -> StoreResult<UserAccount> {
        let mut state = self.state()?;
        state.require_role(account.role_id)?;
        state.check_username_free(&account.username, None)?;
        state.check_user_email_free(&account.email, None)?;

        let user = UserAccount {
            id: UserId::new(),
            username: account.username,
            email: account.email,
            password_hash: account.password_hash,
            role_id: account.role_id,
            created_at: now,
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn register_member(
        &self,
        account: NewAccount,
        profile: MemberProfile,
        now: DateTime<Utc>,
    ) -> StoreResult<(UserAccount, Member)> {
        let mut state = self.state()?;
        state.require_role(account.role_id)?;
        state.check_username_free(&account.username, None)?;
        state.check_user_email_free(&account.email, None)?;
        state.check_member_email_free(&profile.email, None)?;

        let user = UserAccount {
            id: UserId::new(),
            username: account.username,
            email: account.email,
            password_hash: account.password_hash,
            role_id: account.role_id,
            created_at: now,
        };
        let member = Member {
            id: MemberId::new(),
            user_id: user.id,
            name: profile.name,
            email: profile.email,
            phone: profile.phone,
            registered_at: now,
        };
        state.users.insert(user.id, user.clone());
        state.members.insert(member.id, member.clone());
        Ok((user, member))
    }

    async fn rename_user(
        &self,
        id: UserId,
        username: String,
        email: String,
    ) -> StoreResult<UserAccount> {
        let mut state = self.state()?;
        if !state.users.contains_key(&id) {
            return Err(DomainError::not_found().into());
        }
        state.check_username_free(&username, Some(id))?;
        state.check_user_email_free(&email, Some(id))?;

        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::Backend(format!("user {id} vanished mid-update")))?;
        user.username = username;
        user.email = email;
        Ok(user.clone())
    }

    async fn set_password(&self, id: UserId, password_hash: String) -> StoreResult<()> {
        let mut state = self.state()?;
        match state.users.get_mut(&id) {
            Some(user) => {
                user.password_hash = password_hash;
                Ok(())
            }
            None => Err(DomainError::not_found().into()),
        }
    }

    async fn set_role(&self, id: UserId, role: RoleId) -> StoreResult<()> {
        let mut state = self.state()?;
        state.require_role(role)?;
        match state.users.get_mut(&id) {
            Some(user) => {
                user.role_id = role;
                Ok(())
            }
            None => Err(DomainError::not_found().into()),
        }
    }

    async fn delete_user(&self, id: UserId) -> StoreResult<()> {
        let mut state = self.state()?;
        if !state.users.contains_key(&id) {
            return Err(DomainError::not_found().into());
        }
        if let Some(member_id) = state.members.values().find(|m| m.user_id == id).map(|m| m.id) {
            if state.member_has_history(member_id) {
                return Err(DomainError::conflict(ConflictKind::HasBorrowHistory).into());
            }
            state.members.remove(&member_id);
        }
        state.users.remove(&id);
        state.user_permissions.remove(&id);
        state.user_denials.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl RevocationStore for InMemoryStore {
    async fn revoke(
        &self,
        jti: &str,
        keep_until: DateTime<Utc>,
        revoked_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state()?;
        if state.revoked.contains_key(jti) {
            return Err(DomainError::conflict(ConflictKind::AlreadyRevoked).into());
        }
        state.revoked.insert(
            jti.to_string(),
            RevokedToken {
                jti: jti.to_string(),
                keep_until,
                revoked_at,
            },
        );
        Ok(())
    }

    async fn is_revoked(&self, jti: &str) -> StoreResult<bool> {
        Ok(self.state()?.revoked.contains_key(jti))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state()?;
        let before = state.revoked.len();
        state.revoked.retain(|_, entry| entry.keep_until > now);
        Ok((before - state.revoked.len()) as u64)
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn create_book(&self, book: ValidBook) -> StoreResult<BookRecord> {
        let mut state = self.state()?;
        state.check_isbn_free(book.isbn_normalized.as_deref(), None)?;
        state.check_title_free(&book.title, &book.author, book.year, None)?;

        let book = book.into_book(BookId::new());
        let record = BookRecord::new(book.clone(), 0);
        state.books.insert(book.id, book);
        Ok(record)
    }

    async fn update_book(&self, id: BookId, book: ValidBook) -> StoreResult<BookRecord> {
        let mut state = self.state()?;
        if !state.books.contains_key(&id) {
            return Err(DomainError::not_found().into());
        }
        state.check_isbn_free(book.isbn_normalized.as_deref(), Some(id))?;
        state.check_title_free(&book.title, &book.author, book.year, Some(id))?;

        let updated = book.into_book(id);
        let record = BookRecord::new(updated.clone(), state.active_count(id));
        state.books.insert(id, updated);
        Ok(record)
    }

    async fn get_book(&self, id: BookId) -> StoreResult<Option<BookRecord>> {
        let state = self.state()?;
        Ok(state.books.get(&id).map(|b| state.record(b)))
    }

    async fn delete_book(&self, id: BookId) -> StoreResult<()> {
        let mut state = self.state()?;
        if !state.books.contains_key(&id) {
            return Err(DomainError::not_found().into());
        }
        if state.book_has_history(id) {
            return Err(DomainError::conflict(ConflictKind::HasBorrowHistory).into());
        }
        state.books.remove(&id);
        Ok(())
    }

    async fn list_books(&self, query: &BookQuery) -> StoreResult<Page<BookRecord>> {
        let state = self.state()?;
        let mut rows: Vec<BookRecord> = state
            .books
            .values()
            .map(|b| state.record(b))
            .filter(|r| query.matches(r))
            .collect();
        rows.sort_by(|a, b| query.compare(a, b));
        Ok(paginate(rows, query.page_params()))
    }

    async fn export_books(&self, query: &BookQuery) -> StoreResult<Vec<BookRecord>> {
        let state = self.state()?;
        let mut rows: Vec<BookRecord> = state
            .books
            .values()
            .map(|b| state.record(b))
            .filter(|r| query.matches(r))
            .collect();
        rows.sort_by(|a, b| query.compare(a, b));
        rows.truncate(EXPORT_ROW_CAP);
        Ok(rows)
    }
}

#[async_trait]
impl MemberStore for InMemoryStore {
    async fn get_member(&self, id: MemberId) -> StoreResult<Option<Member>> {
        Ok(self.state()?.members.get(&id).cloned())
    }

    async fn member_by_user(&self, user: UserId) -> StoreResult<Option<Member>> {
        let state = self.state()?;
        Ok(state.members.values().find(|m| m.user_id == user).cloned())
    }

    async fn list_members(&self, query: &MemberQuery) -> StoreResult<Page<Member>> {
        let state = self.state()?;
        let mut rows: Vec<Member> = state
            .members
            .values()
            .filter(|m| query.matches(m))
            .cloned()
            .collect();
        rows.sort_by(|a, b| query.compare(a, b));
        Ok(paginate(rows, query.page_params()))
    }

    async fn export_members(&self, query: &MemberQuery) -> StoreResult<Vec<Member>> {
        let state = self.state()?;
        let mut rows: Vec<Member> = state
            .members
            .values()
            .filter(|m| query.matches(m))
            .cloned()
            .collect();
        rows.sort_by(|a, b| query.compare(a, b));
        rows.truncate(EXPORT_ROW_CAP);
        Ok(rows)
    }

    async fn update_member(&self, id: MemberId, profile: MemberProfile) -> StoreResult<Member> {
        let mut state = self.state()?;
        state.apply_member_update(id, profile)
    }

    async fn update_member_by_user(
        &self,
        user: UserId,
        profile: MemberProfile,
    ) -> StoreResult<Member> {
        let mut state = self.state()?;
        let id = state
            .members
            .values()
            .find(|m| m.user_id == user)
            .map(|m| m.id)
            .ok_or_else(DomainError::not_found)?;
        state.apply_member_update(id, profile)
    }

    async fn delete_member(&self, id: MemberId) -> StoreResult<()> {
        let mut state = self.state()?;
        if !state.members.contains_key(&id) {
            return Err(DomainError::not_found().into());
        }
        if state.member_has_history(id) {
            return Err(DomainError::conflict(ConflictKind::HasBorrowHistory).into());
        }
        state.members.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl CirculationStore for InMemoryStore {
    async fn create_borrow(
        &self,
        member: MemberId,
        book: BookId,
        now: DateTime<Utc>,
        duration_days: i64,
    ) -> StoreResult<BorrowRecord> {
        let duration = validate_duration(duration_days)?;
        let mut state = self.state()?;
        state.borrow_facts(member, book).admit()?;

        let record = BorrowRecord::open(BorrowId::new(), book, member, now, duration);
        state.borrows.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_borrow(
        &self,
        id: BorrowId,
        member: MemberId,
        book: BookId,
        now: DateTime<Utc>,
        duration_days: i64,
    ) -> StoreResult<BorrowRecord> {
        let duration = validate_duration(duration_days)?;
        let mut state = self.state()?;
        if !state.borrows.contains_key(&id) {
            return Err(DomainError::not_found().into());
        }
        if !state.books.contains_key(&book) {
            return Err(DomainError::validation("book does not exist").into());
        }
        if !state.members.contains_key(&member) {
            return Err(DomainError::validation("member does not exist").into());
        }

        let record = state
            .borrows
            .get_mut(&id)
            .ok_or_else(|| StoreError::Backend(format!("borrow {id} vanished mid-update")))?;
        record.rebook(book, member, now, duration);
        Ok(record.clone())
    }

    async fn return_borrow(&self, id: BorrowId, now: DateTime<Utc>) -> StoreResult<BorrowRecord> {
        let mut state = self.state()?;
        let record = state
            .borrows
            .get_mut(&id)
            .ok_or_else(DomainError::not_found)?;
        if record.returned_at.is_some() {
            return Err(DomainError::conflict(ConflictKind::AlreadyReturned).into());
        }
        record.returned_at = Some(now);
        Ok(record.clone())
    }

    async fn delete_borrow(&self, id: BorrowId) -> StoreResult<()> {
        let mut state = self.state()?;
        match state.borrows.remove(&id) {
            Some(_) => Ok(()),
            None => Err(DomainError::not_found().into()),
        }
    }

    async fn get_borrow(&self, id: BorrowId) -> StoreResult<Option<BorrowDetails>> {
        let state = self.state()?;
        match state.borrows.get(&id) {
            Some(record) => Ok(Some(state.details(record)?)),
            None => Ok(None),
        }
    }

    async fn list_borrows(&self, query: &BorrowQuery) -> StoreResult<Page<BorrowDetails>> {
        let state = self.state()?;
        let mut rows: Vec<&BorrowRecord> =
            state.borrows.values().filter(|r| query.matches(r)).collect();
        rows.sort_by(|a, b| b.id.as_uuid().cmp(a.id.as_uuid()));

        let params = query.page_params();
        let total = rows.len() as u64;
        let mut items = Vec::new();
        for record in rows
            .into_iter()
            .skip(params.offset() as usize)
            .take(params.page_size as usize)
        {
            items.push(state.details(record)?);
        }
        Ok(Page::new(items, params, total))
    }

    async fn export_borrows(&self, query: &BorrowQuery) -> StoreResult<Vec<BorrowDetails>> {
        let state = self.state()?;
        let mut rows: Vec<&BorrowRecord> =
            state.borrows.values().filter(|r| query.matches(r)).collect();
        rows.sort_by(|a, b| b.id.as_uuid().cmp(a.id.as_uuid()));
        rows.truncate(EXPORT_ROW_CAP);

        let mut out = Vec::with_capacity(rows.len());
        for record in rows {
            out.push(state.details(record)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use libris_auth::resolve_effective_permissions;
    use libris_catalog::BookDraft;

    use super::*;
    use crate::seed::{AdminBootstrap, ensure_admin};

    fn draft(title: &str, isbn: Option<&str>, copies: u32) -> ValidBook {
        BookDraft {
            title: title.to_string(),
            author: "Some Author".to_string(),
            category: None,
            year: 2020,
            isbn: isbn.map(str::to_string),
            copies_count: copies,
        }
        .validate(2025)
        .unwrap()
    }

    async fn add_book(store: &InMemoryStore, title: &str, copies: u32) -> BookId {
        store
            .create_book(draft(title, None, copies))
            .await
            .unwrap()
            .book
            .id
    }

    async fn add_member(store: &InMemoryStore, username: &str, email: &str) -> (UserAccount, Member) {
        let role = store.role_by_name("Member").await.unwrap().unwrap();
        let account = NewAccount::new(username, email, "secret1", role.id).unwrap();
        let profile = MemberProfile::validate(username, email, None).unwrap();
        store
            .register_member(account, profile, Utc::now())
            .await
            .unwrap()
    }

    fn conflict_kind(err: StoreError) -> ConflictKind {
        match err {
            StoreError::Domain(DomainError::Conflict(kind)) => kind,
            other => panic!("expected a conflict, got {other:?}"),
        }
    }

    async fn resolved_names(store: &InMemoryStore, user: UserId, role: RoleId) -> Vec<String> {
        let sources = store.permission_sources(user, role).await.unwrap();
        resolve_effective_permissions(&sources.role_grants, &sources.user_grants, &sources.denials)
            .into_iter()
            .map(|p| p.as_str().to_string())
            .collect()
    }

    #[tokio::test]
    async fn seeded_roles_carry_the_grant_matrix() {
        let store = InMemoryStore::new();
        let admin = store.role_by_name("Admin").await.unwrap().unwrap();
        let employee = store.role_by_name("Employee").await.unwrap().unwrap();
        let member = store.role_by_name("Member").await.unwrap().unwrap();

        let probe = UserId::new();
        assert_eq!(resolved_names(&store, probe, admin.id).await.len(), 12);
        let employee_perms = resolved_names(&store, probe, employee.id).await;
        assert_eq!(employee_perms.len(), 6);
        assert!(!employee_perms.iter().any(|p| p == names::BOOK_DELETE));
        assert_eq!(
            resolved_names(&store, probe, member.id).await,
            vec![names::BOOK_READ.to_string()]
        );
    }

    #[tokio::test]
    async fn direct_grants_and_denials_shape_the_effective_set() {
        let store = InMemoryStore::new();
        let (user, _) = add_member(&store, "casual", "casual@example.com").await;
        store.grant_to_user(user.id, names::BORROW_READ).unwrap();
        store.deny_to_user(user.id, names::BOOK_READ).unwrap();

        let perms = resolved_names(&store, user.id, user.role_id).await;
        assert!(perms.iter().any(|p| p == names::BORROW_READ));
        assert!(!perms.iter().any(|p| p == names::BOOK_READ));
    }

    #[tokio::test]
    async fn registration_creates_account_and_profile_together() {
        let store = InMemoryStore::new();
        let (user, member) = add_member(&store, "reader", "Reader@Example.com").await;

        assert_eq!(user.email, "reader@example.com");
        assert_eq!(member.user_id, user.id);
        let found = store.member_by_user(user.id).await.unwrap().unwrap();
        assert_eq!(found.id, member.id);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_case_insensitively() {
        let store = InMemoryStore::new();
        add_member(&store, "first", "reader@example.com").await;

        let role = store.role_by_name("Member").await.unwrap().unwrap();
        let account = NewAccount::new("second", "READER@example.com", "secret1", role.id).unwrap();
        let err = store.create_user(account, Utc::now()).await.unwrap_err();
        assert_eq!(conflict_kind(err), ConflictKind::DuplicateEmail);
    }

    #[tokio::test]
    async fn borrow_lifecycle_honours_the_ledger_rules() {
        let store = InMemoryStore::new();
        let book = add_book(&store, "Dune", 2).await;
        let (_, m1) = add_member(&store, "m1", "m1@example.com").await;
        let (_, m2) = add_member(&store, "m2", "m2@example.com").await;
        let (_, m3) = add_member(&store, "m3", "m3@example.com").await;
        let now = Utc::now();

        let r1 = store.create_borrow(m1.id, book, now, 14).await.unwrap();
        store.create_borrow(m2.id, book, now, 14).await.unwrap();

        let err = store.create_borrow(m3.id, book, now, 14).await.unwrap_err();
        assert_eq!(conflict_kind(err), ConflictKind::NoCopiesAvailable);

        let err = store.create_borrow(m1.id, book, now, 7).await.unwrap_err();
        assert_eq!(conflict_kind(err), ConflictKind::DuplicateActiveBorrow);

        store.return_borrow(r1.id, now).await.unwrap();
        store.create_borrow(m3.id, book, now, 14).await.unwrap();

        let err = store.return_borrow(r1.id, now).await.unwrap_err();
        assert_eq!(conflict_kind(err), ConflictKind::AlreadyReturned);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_creates_never_oversell_the_last_copy() {
        let store = Arc::new(InMemoryStore::new());
        let book = add_book(&store, "Sole Copy", 1).await;
        let (_, m1) = add_member(&store, "c1", "c1@example.com").await;
        let (_, m2) = add_member(&store, "c2", "c2@example.com").await;
        let now = Utc::now();

        let a = tokio::spawn({
            let store = store.clone();
            async move { store.create_borrow(m1.id, book, now, 14).await }
        });
        let b = tokio::spawn({
            let store = store.clone();
            async move { store.create_borrow(m2.id, book, now, 14).await }
        });

        let outcomes = [a.await.unwrap(), b.await.unwrap()];
        let successes = outcomes.iter().filter(|o| o.is_ok()).count();
        assert_eq!(successes, 1);
        let rejected = outcomes.into_iter().find_map(Result::err).unwrap();
        assert_eq!(conflict_kind(rejected), ConflictKind::NoCopiesAvailable);
    }

    #[tokio::test]
    async fn update_rebooks_without_an_availability_check() {
        let store = InMemoryStore::new();
        let book = add_book(&store, "Hot Title", 1).await;
        let (_, m1) = add_member(&store, "u1", "u1@example.com").await;
        let (_, m2) = add_member(&store, "u2", "u2@example.com").await;
        let borrowed = Utc::now() - Duration::days(10);

        let record = store.create_borrow(m1.id, book, borrowed, 14).await.unwrap();

        // Zero copies left, yet reassigning the same slot must succeed.
        let later = Utc::now();
        let updated = store
            .update_borrow(record.id, m2.id, book, later, 7)
            .await
            .unwrap();
        assert_eq!(updated.member_id, m2.id);
        assert_eq!(updated.borrowed_at, later);
        assert_eq!(updated.due_at, later + Duration::days(7));
        assert!(updated.returned_at.is_none());

        let missing_book = store
            .update_borrow(record.id, m2.id, BookId::new(), later, 7)
            .await
            .unwrap_err();
        assert!(matches!(
            missing_book,
            StoreError::Domain(DomainError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn revocation_is_first_writer_wins() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let keep_until = now + Duration::hours(2);

        store.revoke("token-1", keep_until, now).await.unwrap();
        assert!(store.is_revoked("token-1").await.unwrap());

        let err = store.revoke("token-1", keep_until, now).await.unwrap_err();
        assert_eq!(conflict_kind(err), ConflictKind::AlreadyRevoked);

        assert_eq!(store.purge_expired(now + Duration::hours(3)).await.unwrap(), 1);
        assert!(!store.is_revoked("token-1").await.unwrap());
    }

    #[tokio::test]
    async fn purge_keeps_entries_still_in_their_window() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .revoke("fresh", now + Duration::hours(2), now)
            .await
            .unwrap();
        store
            .revoke("stale", now - Duration::minutes(1), now - Duration::hours(3))
            .await
            .unwrap();

        assert_eq!(store.purge_expired(now).await.unwrap(), 1);
        assert!(store.is_revoked("fresh").await.unwrap());
        assert!(!store.is_revoked("stale").await.unwrap());
    }

    #[tokio::test]
    async fn borrow_history_blocks_book_member_and_user_deletion() {
        let store = InMemoryStore::new();
        let book = add_book(&store, "Kept", 1).await;
        let (user, member) = add_member(&store, "hist", "hist@example.com").await;
        let now = Utc::now();

        let record = store.create_borrow(member.id, book, now, 14).await.unwrap();
        store.return_borrow(record.id, now).await.unwrap();

        // Even settled history pins all three rows.
        let err = store.delete_book(book).await.unwrap_err();
        assert_eq!(conflict_kind(err), ConflictKind::HasBorrowHistory);
        let err = store.delete_member(member.id).await.unwrap_err();
        assert_eq!(conflict_kind(err), ConflictKind::HasBorrowHistory);
        let err = store.delete_user(user.id).await.unwrap_err();
        assert_eq!(conflict_kind(err), ConflictKind::HasBorrowHistory);

        store.delete_borrow(record.id).await.unwrap();
        store.delete_book(book).await.unwrap();
        store.delete_user(user.id).await.unwrap();
        assert!(store.member_by_user(user.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_isbn_is_caught_across_formats() {
        let store = InMemoryStore::new();
        store
            .create_book(draft("Clean Code", Some("978-0132350884"), 3))
            .await
            .unwrap();

        let err = store
            .create_book(draft("Clean Code 2nd", Some("9780132350884"), 3))
            .await
            .unwrap_err();
        assert_eq!(conflict_kind(err), ConflictKind::DuplicateIsbn);

        let err = store
            .create_book(draft("Clean Code", None, 1))
            .await
            .unwrap_err();
        assert_eq!(conflict_kind(err), ConflictKind::DuplicateTitle);
    }

    #[tokio::test]
    async fn listing_pages_newest_first() {
        let store = InMemoryStore::new();
        add_book(&store, "Alpha", 1).await;
        add_book(&store, "Beta", 1).await;
        let newest = add_book(&store, "Gamma", 1).await;

        let query = BookQuery {
            page_size: Some(2),
            ..BookQuery::default()
        };
        let page = store.list_books(&query).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].book.id, newest);
    }

    #[tokio::test]
    async fn member_email_update_syncs_the_owning_account() {
        let store = InMemoryStore::new();
        let (user, member) = add_member(&store, "sync", "old@example.com").await;

        let profile = MemberProfile::validate("Sync", "new@example.com", Some("123-456")).unwrap();
        let updated = store.update_member(member.id, profile).await.unwrap();
        assert_eq!(updated.email, "new@example.com");

        let account = store.find_user(user.id).await.unwrap().unwrap();
        assert_eq!(account.email, "new@example.com");
    }

    #[tokio::test]
    async fn member_email_update_rejects_taken_addresses() {
        let store = InMemoryStore::new();
        add_member(&store, "one", "one@example.com").await;
        let (user, _) = add_member(&store, "two", "two@example.com").await;

        let profile = MemberProfile::validate("Two", "one@example.com", None).unwrap();
        let err = store
            .update_member_by_user(user.id, profile)
            .await
            .unwrap_err();
        assert_eq!(conflict_kind(err), ConflictKind::DuplicateEmail);
    }

    #[tokio::test]
    async fn set_role_requires_an_existing_role() {
        let store = InMemoryStore::new();
        let (user, _) = add_member(&store, "promote", "promote@example.com").await;

        let err = store.set_role(user.id, RoleId::new()).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Domain(DomainError::Validation(_))
        ));

        let admin = store.role_by_name("Admin").await.unwrap().unwrap();
        store.set_role(user.id, admin.id).await.unwrap();
        let account = store.find_user(user.id).await.unwrap().unwrap();
        assert_eq!(account.role_id, admin.id);
    }

    #[tokio::test]
    async fn bootstrap_admin_runs_exactly_once() {
        let store = InMemoryStore::new();
        let boot = AdminBootstrap {
            username: "admin".to_string(),
            email: "admin@example.com".to_string(),
            password: "change-me".to_string(),
        };

        let created = ensure_admin(&store, &boot, Utc::now()).await.unwrap();
        assert!(created.is_some());
        let again = ensure_admin(&store, &boot, Utc::now()).await.unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn missing_ids_surface_as_not_found() {
        let store = InMemoryStore::new();
        assert!(store.get_book(BookId::new()).await.unwrap().is_none());
        assert!(store.get_borrow(BorrowId::new()).await.unwrap().is_none());

        let err = store.delete_borrow(BorrowId::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::NotFound)));
    }
}
