//! Postgres-backed store.
//!
//! ## Design
//!
//! Plain relational tables, applied idempotently by [`PostgresStore::migrate`].
//! The borrow admission path runs under `SERIALIZABLE` with a bounded retry
//! on serialization failures; the partial unique index on
//! `(member_id, book_id) WHERE returned_at IS NULL` stays the final arbiter
//! for the duplicate-active rule even if a race slips past the reads.
//!
//! ## Error mapping
//!
//! | Postgres signal                  | Mapped to                           |
//! |----------------------------------|-------------------------------------|
//! | `23505` on a known unique index  | the matching `ConflictKind`         |
//! | `40001` / `40P01`                | internal retry, then `Backend`      |
//! | anything else                    | `StoreError::Backend`               |
//!
//! List filtering and ordering run SQL-side and mirror the domain query
//! types predicate for predicate, so both backends page identically.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, QueryBuilder, Transaction};
use tracing::instrument;
use uuid::Uuid;

use libris_auth::{NewAccount, PermissionGrant, PermissionSources, Role, UserAccount};
use libris_catalog::{Book, BookQuery, BookRecord, BookSortKey, ValidBook, isbn};
use libris_circulation::{
    BookAvailability, BorrowFacts, BorrowQuery, BorrowRecord, validate_duration,
};
use libris_core::{
    BookId, BorrowId, ConflictKind, DomainError, EXPORT_ROW_CAP, MemberId, Page, RoleId, SortDir,
    UserId,
};
use libris_members::{Member, MemberProfile, MemberQuery, MemberSortKey};

use super::{
    BorrowDetails, CatalogStore, CirculationStore, IdentityStore, MemberStore, RevocationStore,
    StoreError, StoreResult, UserDetails,
};
use crate::seed;

const SERIALIZATION_ATTEMPTS: u32 = 3;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS roles (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS permissions (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS role_permissions (
        role_id UUID NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        permission_id UUID NOT NULL REFERENCES permissions(id) ON DELETE CASCADE,
        PRIMARY KEY (role_id, permission_id)
    )",
    "CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        username TEXT NOT NULL,
        email TEXT NOT NULL,
        password_hash TEXT NOT NULL,
        role_id UUID NOT NULL REFERENCES roles(id),
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS users_email_key ON users (LOWER(email))",
    "CREATE UNIQUE INDEX IF NOT EXISTS users_username_key ON users (LOWER(username))",
    "CREATE TABLE IF NOT EXISTS user_permissions (
        user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        permission_id UUID NOT NULL REFERENCES permissions(id) ON DELETE CASCADE,
        PRIMARY KEY (user_id, permission_id)
    )",
    "CREATE TABLE IF NOT EXISTS user_denied_permissions (
        user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        permission_id UUID NOT NULL REFERENCES permissions(id) ON DELETE CASCADE,
        PRIMARY KEY (user_id, permission_id)
    )",
    "CREATE TABLE IF NOT EXISTS revoked_tokens (
        jti TEXT PRIMARY KEY,
        keep_until TIMESTAMPTZ NOT NULL,
        revoked_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS members (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        email TEXT NOT NULL,
        phone TEXT,
        registered_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS members_email_key ON members (LOWER(email))",
    "CREATE TABLE IF NOT EXISTS books (
        id UUID PRIMARY KEY,
        title TEXT NOT NULL,
        author TEXT NOT NULL,
        category TEXT,
        year INT NOT NULL,
        isbn TEXT,
        isbn_normalized TEXT,
        copies_count INT NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS books_isbn_key ON books (isbn_normalized)
        WHERE isbn_normalized IS NOT NULL",
    "CREATE UNIQUE INDEX IF NOT EXISTS books_identity_key
        ON books (LOWER(title), LOWER(author), year)",
    "CREATE TABLE IF NOT EXISTS borrow_records (
        id UUID PRIMARY KEY,
        book_id UUID NOT NULL REFERENCES books(id),
        member_id UUID NOT NULL REFERENCES members(id),
        borrowed_at TIMESTAMPTZ NOT NULL,
        due_at TIMESTAMPTZ NOT NULL,
        returned_at TIMESTAMPTZ
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS borrow_active_key
        ON borrow_records (member_id, book_id) WHERE returned_at IS NULL",
];

/// Shared-pool Postgres backend. Cheap to clone; all methods take `&self`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to connect to postgres: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Applies the schema and seeds the role/permission matrix. Safe to run
    /// on every startup.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("apply_schema", e))?;
        }

        for name in libris_auth::permissions::names::ALL {
            sqlx::query("INSERT INTO permissions (id, name) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING")
                .bind(Uuid::now_v7())
                .bind(name)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("seed_permissions", e))?;
        }
        for role in seed::ROLE_NAMES {
            sqlx::query("INSERT INTO roles (id, name) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING")
                .bind(Uuid::now_v7())
                .bind(role)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("seed_roles", e))?;

            let grants: Vec<String> = seed::grants_for(role)
                .iter()
                .map(|s| s.to_string())
                .collect();
            sqlx::query(
                "INSERT INTO role_permissions (role_id, permission_id)
                 SELECT r.id, p.id FROM roles r JOIN permissions p ON p.name = ANY($2)
                 WHERE r.name = $1
                 ON CONFLICT DO NOTHING",
            )
            .bind(role)
            .bind(&grants)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("seed_role_permissions", e))?;
        }
        Ok(())
    }

    async fn begin(&self, operation: &str) -> StoreResult<Transaction<'_, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }

    async fn create_borrow_tx(
        &self,
        member: MemberId,
        book: BookId,
        now: DateTime<Utc>,
        duration: i64,
    ) -> Result<BorrowRecord, TxError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| tx_error("begin_borrow", e))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(|e| tx_error("set_isolation", e))?;

        let copies: Option<i32> = sqlx::query_scalar("SELECT copies_count FROM books WHERE id = $1")
            .bind(Uuid::from(book))
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| tx_error("load_book", e))?;
        let member_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM members WHERE id = $1)")
                .bind(Uuid::from(member))
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| tx_error("load_member", e))?;
        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM borrow_records WHERE book_id = $1 AND returned_at IS NULL",
        )
        .bind(Uuid::from(book))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| tx_error("count_active", e))?;
        let duplicate: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM borrow_records
             WHERE member_id = $1 AND book_id = $2 AND returned_at IS NULL)",
        )
        .bind(Uuid::from(member))
        .bind(Uuid::from(book))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| tx_error("check_duplicate", e))?;

        let facts = BorrowFacts {
            book: copies.map(|c| BookAvailability {
                copies_count: c.max(0) as u32,
                active_count: active.max(0) as u32,
            }),
            member_exists,
            duplicate_active: duplicate,
        };
        facts.admit().map_err(|e| TxError::Store(e.into()))?;

        let record = BorrowRecord::open(BorrowId::new(), book, member, now, duration);
        sqlx::query(
            "INSERT INTO borrow_records (id, book_id, member_id, borrowed_at, due_at, returned_at)
             VALUES ($1, $2, $3, $4, $5, NULL)",
        )
        .bind(Uuid::from(record.id))
        .bind(Uuid::from(record.book_id))
        .bind(Uuid::from(record.member_id))
        .bind(record.borrowed_at)
        .bind(record.due_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| tx_error("insert_borrow", e))?;

        tx.commit().await.map_err(|e| tx_error("commit_borrow", e))?;
        Ok(record)
    }
}

enum TxError {
    /// The database asked us to try again (40001 / 40P01).
    Serialization,
    Store(StoreError),
}

fn tx_error(operation: &str, err: sqlx::Error) -> TxError {
    if serialization_conflict(&err) {
        TxError::Serialization
    } else {
        TxError::Store(map_sqlx_error(operation, err))
    }
}

fn serialization_conflict(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
    )
}

fn conflict_for_constraint(name: Option<&str>) -> Option<ConflictKind> {
    match name? {
        "users_email_key" | "members_email_key" => Some(ConflictKind::DuplicateEmail),
        "users_username_key" => Some(ConflictKind::DuplicateUsername),
        "books_isbn_key" => Some(ConflictKind::DuplicateIsbn),
        "books_identity_key" => Some(ConflictKind::DuplicateTitle),
        "borrow_active_key" => Some(ConflictKind::DuplicateActiveBorrow),
        "revoked_tokens_pkey" => Some(ConflictKind::AlreadyRevoked),
        _ => None,
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some("23505")
                && let Some(kind) = conflict_for_constraint(db_err.constraint())
            {
                return DomainError::conflict(kind).into();
            }
            StoreError::Backend(format!(
                "database error in {operation}: {}",
                db_err.message()
            ))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

fn trimmed(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn order_nulls(dir: SortDir) -> &'static str {
    match dir {
        SortDir::Asc => "ASC NULLS FIRST",
        SortDir::Desc => "DESC NULLS LAST",
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    role_id: Uuid,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for UserAccount {
    fn from(row: UserRow) -> Self {
        UserAccount {
            id: UserId::from_uuid(row.id),
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            role_id: RoleId::from_uuid(row.role_id),
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct UserDetailsRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    role_id: Uuid,
    created_at: DateTime<Utc>,
    role: String,
}

impl From<UserDetailsRow> for UserDetails {
    fn from(row: UserDetailsRow) -> Self {
        UserDetails {
            account: UserAccount {
                id: UserId::from_uuid(row.id),
                username: row.username,
                email: row.email,
                password_hash: row.password_hash,
                role_id: RoleId::from_uuid(row.role_id),
                created_at: row.created_at,
            },
            role: row.role,
        }
    }
}

#[derive(FromRow)]
struct RoleRow {
    id: Uuid,
    name: String,
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        Role {
            id: RoleId::from_uuid(row.id),
            name: row.name,
        }
    }
}

#[derive(FromRow)]
struct GrantRow {
    id: Uuid,
    name: String,
}

impl From<GrantRow> for PermissionGrant {
    fn from(row: GrantRow) -> Self {
        PermissionGrant {
            id: row.id.into(),
            name: row.name,
        }
    }
}

#[derive(FromRow)]
struct BookRow {
    id: Uuid,
    title: String,
    author: String,
    category: Option<String>,
    year: i32,
    isbn: Option<String>,
    copies_count: i32,
    active_count: i64,
}

impl From<BookRow> for BookRecord {
    fn from(row: BookRow) -> Self {
        BookRecord::new(
            Book {
                id: BookId::from_uuid(row.id),
                title: row.title,
                author: row.author,
                category: row.category,
                year: row.year,
                isbn: row.isbn,
                copies_count: row.copies_count.max(0) as u32,
            },
            row.active_count.max(0) as u32,
        )
    }
}

#[derive(FromRow)]
struct MemberRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    email: String,
    phone: Option<String>,
    registered_at: DateTime<Utc>,
}

impl From<MemberRow> for Member {
    fn from(row: MemberRow) -> Self {
        Member {
            id: MemberId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            name: row.name,
            email: row.email,
            phone: row.phone,
            registered_at: row.registered_at,
        }
    }
}

#[derive(FromRow)]
struct BorrowRow {
    id: Uuid,
    book_id: Uuid,
    member_id: Uuid,
    borrowed_at: DateTime<Utc>,
    due_at: DateTime<Utc>,
    returned_at: Option<DateTime<Utc>>,
}

impl From<BorrowRow> for BorrowRecord {
    fn from(row: BorrowRow) -> Self {
        BorrowRecord {
            id: BorrowId::from_uuid(row.id),
            book_id: BookId::from_uuid(row.book_id),
            member_id: MemberId::from_uuid(row.member_id),
            borrowed_at: row.borrowed_at,
            due_at: row.due_at,
            returned_at: row.returned_at,
        }
    }
}

#[derive(FromRow)]
struct BorrowDetailsRow {
    id: Uuid,
    book_id: Uuid,
    member_id: Uuid,
    borrowed_at: DateTime<Utc>,
    due_at: DateTime<Utc>,
    returned_at: Option<DateTime<Utc>>,
    book_title: String,
    member_name: String,
}

impl From<BorrowDetailsRow> for BorrowDetails {
    fn from(row: BorrowDetailsRow) -> Self {
        BorrowDetails {
            record: BorrowRecord {
                id: BorrowId::from_uuid(row.id),
                book_id: BookId::from_uuid(row.book_id),
                member_id: MemberId::from_uuid(row.member_id),
                borrowed_at: row.borrowed_at,
                due_at: row.due_at,
                returned_at: row.returned_at,
            },
            book_title: row.book_title,
            member_name: row.member_name,
        }
    }
}

const BOOK_SELECT: &str = "SELECT b.id, b.title, b.author, b.category, b.year, b.isbn, b.copies_count, \
     (SELECT COUNT(*) FROM borrow_records r WHERE r.book_id = b.id AND r.returned_at IS NULL) AS active_count \
     FROM books b WHERE 1=1";

const BORROW_DETAILS_SELECT: &str = "SELECT br.id, br.book_id, br.member_id, br.borrowed_at, br.due_at, br.returned_at, \
     b.title AS book_title, m.name AS member_name \
     FROM borrow_records br \
     JOIN books b ON b.id = br.book_id \
     JOIN members m ON m.id = br.member_id \
     WHERE 1=1";

fn push_book_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &BookQuery) {
    if let Some(q) = trimmed(&query.q) {
        let pattern = format!("%{q}%");
        qb.push(" AND (b.title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR b.author ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR b.category ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR b.isbn ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(title) = trimmed(&query.title) {
        qb.push(" AND b.title ILIKE ").push_bind(format!("%{title}%"));
    }
    if let Some(author) = trimmed(&query.author) {
        qb.push(" AND b.author ILIKE ").push_bind(format!("%{author}%"));
    }
    if let Some(category) = trimmed(&query.category) {
        qb.push(" AND b.category ILIKE ").push_bind(format!("%{category}%"));
    }
    if let Some(raw) = trimmed(&query.isbn) {
        let needle = isbn::normalize(raw);
        qb.push(" AND b.isbn_normalized LIKE ").push_bind(format!("{needle}%"));
    }
    if let Some(from) = query.year_from {
        qb.push(" AND b.year >= ").push_bind(from);
    }
    if let Some(to) = query.year_to {
        qb.push(" AND b.year <= ").push_bind(to);
    }
    if let Some(min) = query.min_copies {
        qb.push(" AND b.copies_count >= ").push_bind(min as i32);
    }
    if let Some(max) = query.max_copies {
        qb.push(" AND b.copies_count <= ").push_bind(max as i32);
    }
}

fn book_order_sql(query: &BookQuery) -> String {
    let (key, dir) = query.order();
    let column = match key {
        BookSortKey::Id => "b.id",
        BookSortKey::Title => "LOWER(b.title)",
        BookSortKey::Author => "LOWER(b.author)",
        BookSortKey::Isbn => "b.isbn_normalized",
        BookSortKey::Category => "LOWER(b.category)",
        BookSortKey::Year => "b.year",
        BookSortKey::CopiesCount => "b.copies_count",
    };
    format!(" ORDER BY {column} {}, b.id ASC", order_nulls(dir))
}

fn push_member_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &MemberQuery) {
    if let Some(q) = trimmed(&query.q) {
        let pattern = format!("%{q}%");
        qb.push(" AND (m.name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR m.email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR m.phone ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(name) = trimmed(&query.name) {
        qb.push(" AND m.name ILIKE ").push_bind(format!("%{name}%"));
    }
    if let Some(email) = trimmed(&query.email) {
        qb.push(" AND LOWER(m.email) = ").push_bind(email.to_lowercase());
    }
    if let Some(phone) = trimmed(&query.phone) {
        qb.push(" AND m.phone ILIKE ").push_bind(format!("%{phone}%"));
    }
    if let Some(from) = query.registered_from {
        qb.push(" AND m.registered_at >= ").push_bind(from);
    }
    if let Some(to) = query.registered_to {
        qb.push(" AND m.registered_at <= ").push_bind(to);
    }
}

fn member_order_sql(query: &MemberQuery) -> String {
    let (key, dir) = query.order();
    let column = match key {
        MemberSortKey::Id => "m.id",
        MemberSortKey::Name => "LOWER(m.name)",
        MemberSortKey::Email => "m.email",
        MemberSortKey::RegisteredAt => "m.registered_at",
    };
    format!(" ORDER BY {column} {}, m.id ASC", order_nulls(dir))
}

fn push_borrow_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &BorrowQuery) {
    if let Some(member) = query.member_id {
        qb.push(" AND br.member_id = ").push_bind(Uuid::from(member));
    }
    if let Some(book) = query.book_id {
        qb.push(" AND br.book_id = ").push_bind(Uuid::from(book));
    }
}

#[async_trait]
impl IdentityStore for PostgresStore {
    #[instrument(skip(self, email), err)]
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserAccount>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, email, password_hash, role_id, created_at
             FROM users WHERE LOWER(email) = LOWER($1)",
        )
        .bind(email)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_user_by_email", e))?;
        Ok(row.map(UserAccount::from))
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn find_user(&self, id: UserId) -> StoreResult<Option<UserAccount>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, email, password_hash, role_id, created_at
             FROM users WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_user", e))?;
        Ok(row.map(UserAccount::from))
    }

    #[instrument(skip(self), err)]
    async fn list_users(&self) -> StoreResult<Vec<UserDetails>> {
        let rows = sqlx::query_as::<_, UserDetailsRow>(
            "SELECT u.id, u.username, u.email, u.password_hash, u.role_id, u.created_at,
                    r.name AS role
             FROM users u JOIN roles r ON r.id = u.role_id
             ORDER BY u.id DESC",
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_users", e))?;
        Ok(rows.into_iter().map(UserDetails::from).collect())
    }

    #[instrument(skip(self), err)]
    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let rows =
            sqlx::query_as::<_, RoleRow>("SELECT id, name FROM roles ORDER BY name")
                .fetch_all(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("list_roles", e))?;
        Ok(rows.into_iter().map(Role::from).collect())
    }

    #[instrument(skip(self), fields(role_id = %id), err)]
    async fn role(&self, id: RoleId) -> StoreResult<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>("SELECT id, name FROM roles WHERE id = $1")
            .bind(Uuid::from(id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("role", e))?;
        Ok(row.map(Role::from))
    }

    #[instrument(skip(self), err)]
    async fn role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>(
            "SELECT id, name FROM roles WHERE LOWER(name) = LOWER($1)",
        )
        .bind(name)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("role_by_name", e))?;
        Ok(row.map(Role::from))
    }

    #[instrument(skip(self), fields(user_id = %user), err)]
    async fn permission_sources(
        &self,
        user: UserId,
        role: RoleId,
    ) -> StoreResult<PermissionSources> {
        let mut tx = self.begin("permission_sources").await?;

        let role_grants = sqlx::query_as::<_, GrantRow>(
            "SELECT p.id, p.name FROM role_permissions rp
             JOIN permissions p ON p.id = rp.permission_id
             WHERE rp.role_id = $1",
        )
        .bind(Uuid::from(role))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_role_grants", e))?;

        let user_grants = sqlx::query_as::<_, GrantRow>(
            "SELECT p.id, p.name FROM user_permissions up
             JOIN permissions p ON p.id = up.permission_id
             WHERE up.user_id = $1",
        )
        .bind(Uuid::from(user))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_user_grants", e))?;

        let denials: Vec<Uuid> = sqlx::query_scalar(
            "SELECT permission_id FROM user_denied_permissions WHERE user_id = $1",
        )
        .bind(Uuid::from(user))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_denials", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("permission_sources", e))?;

        Ok(PermissionSources {
            role_grants: role_grants.into_iter().map(PermissionGrant::from).collect(),
            user_grants: user_grants.into_iter().map(PermissionGrant::from).collect(),
            denials: denials.into_iter().map(Into::into).collect(),
        })
    }

    #[instrument(skip(self, account), fields(username = %account.username), err)]
    async fn create_user(
        &self,
        account: NewAccount,
        now: DateTime<Utc>,
    ) -> StoreResult<UserAccount> {
        let role_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM roles WHERE id = $1)")
                .bind(Uuid::from(account.role_id))
                .fetch_one(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("check_role", e))?;
        if !role_exists {
            return Err(DomainError::validation("role does not exist").into());
        }

        let user = UserAccount {
            id: UserId::new(),
            username: account.username,
            email: account.email,
            password_hash: account.password_hash,
            role_id: account.role_id,
            created_at: now,
        };
        sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, role_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::from(user.id))
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(Uuid::from(user.role_id))
        .bind(user.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_user", e))?;
        Ok(user)
    }

    #[instrument(skip(self, account, profile), fields(username = %account.username), err)]
    async fn register_member(
        &self,
        account: NewAccount,
        profile: MemberProfile,
        now: DateTime<Utc>,
    ) -> StoreResult<(UserAccount, Member)> {
        let role_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM roles WHERE id = $1)")
                .bind(Uuid::from(account.role_id))
                .fetch_one(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("check_role", e))?;
        if !role_exists {
            return Err(DomainError::validation("role does not exist").into());
        }

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

        let mut tx = self.begin("register_member").await?;
        sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, role_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::from(user.id))
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(Uuid::from(user.role_id))
        .bind(user.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("register_user", e))?;

        sqlx::query(
            "INSERT INTO members (id, user_id, name, email, phone, registered_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::from(member.id))
        .bind(Uuid::from(member.user_id))
        .bind(&member.name)
        .bind(&member.email)
        .bind(&member.phone)
        .bind(member.registered_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("register_profile", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("register_member", e))?;
        Ok((user, member))
    }

    #[instrument(skip(self, username, email), fields(user_id = %id), err)]
    async fn rename_user(
        &self,
        id: UserId,
        username: String,
        email: String,
    ) -> StoreResult<UserAccount> {
        let row = sqlx::query_as::<_, UserRow>(
            "UPDATE users SET username = $2, email = $3 WHERE id = $1
             RETURNING id, username, email, password_hash, role_id, created_at",
        )
        .bind(Uuid::from(id))
        .bind(username)
        .bind(email)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("rename_user", e))?;
        row.map(UserAccount::from)
            .ok_or_else(|| DomainError::not_found().into())
    }

    #[instrument(skip(self, password_hash), fields(user_id = %id), err)]
    async fn set_password(&self, id: UserId, password_hash: String) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(Uuid::from(id))
            .bind(password_hash)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_password", e))?;
        if result.rows_affected() == 0 {
            return Err(DomainError::not_found().into());
        }
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %id, role_id = %role), err)]
    async fn set_role(&self, id: UserId, role: RoleId) -> StoreResult<()> {
        let role_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM roles WHERE id = $1)")
                .bind(Uuid::from(role))
                .fetch_one(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("check_role", e))?;
        if !role_exists {
            return Err(DomainError::validation("role does not exist").into());
        }

        let result = sqlx::query("UPDATE users SET role_id = $2 WHERE id = $1")
            .bind(Uuid::from(id))
            .bind(Uuid::from(role))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_role", e))?;
        if result.rows_affected() == 0 {
            return Err(DomainError::not_found().into());
        }
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn delete_user(&self, id: UserId) -> StoreResult<()> {
        let mut tx = self.begin("delete_user").await?;

        let has_history: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM borrow_records br
             JOIN members m ON m.id = br.member_id
             WHERE m.user_id = $1)",
        )
        .bind(Uuid::from(id))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("check_history", e))?;
        if has_history {
            return Err(DomainError::conflict(ConflictKind::HasBorrowHistory).into());
        }

        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?;
        if result.rows_affected() == 0 {
            return Err(DomainError::not_found().into());
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?;
        Ok(())
    }
}

#[async_trait]
impl RevocationStore for PostgresStore {
    #[instrument(skip(self, jti), err)]
    async fn revoke(
        &self,
        jti: &str,
        keep_until: DateTime<Utc>,
        revoked_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query("INSERT INTO revoked_tokens (jti, keep_until, revoked_at) VALUES ($1, $2, $3)")
            .bind(jti)
            .bind(keep_until)
            .bind(revoked_at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("revoke", e))?;
        Ok(())
    }

    async fn is_revoked(&self, jti: &str) -> StoreResult<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM revoked_tokens WHERE jti = $1)")
            .bind(jti)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("is_revoked", e))
    }

    #[instrument(skip(self), err)]
    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM revoked_tokens WHERE keep_until <= $1")
            .bind(now)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_expired", e))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CatalogStore for PostgresStore {
    #[instrument(skip(self, book), fields(title = %book.title), err)]
    async fn create_book(&self, book: ValidBook) -> StoreResult<BookRecord> {
        let stored = book.into_book(BookId::new());
        sqlx::query(
            "INSERT INTO books (id, title, author, category, year, isbn, isbn_normalized, copies_count)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(Uuid::from(stored.id))
        .bind(&stored.title)
        .bind(&stored.author)
        .bind(&stored.category)
        .bind(stored.year)
        .bind(&stored.isbn)
        .bind(stored.normalized_isbn())
        .bind(stored.copies_count as i32)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_book", e))?;
        Ok(BookRecord::new(stored, 0))
    }

    #[instrument(skip(self, book), fields(book_id = %id), err)]
    async fn update_book(&self, id: BookId, book: ValidBook) -> StoreResult<BookRecord> {
        let updated = book.into_book(id);
        let row = sqlx::query_as::<_, BookRow>(
            "UPDATE books SET title = $2, author = $3, category = $4, year = $5,
                    isbn = $6, isbn_normalized = $7, copies_count = $8
             WHERE id = $1
             RETURNING id, title, author, category, year, isbn, copies_count,
               (SELECT COUNT(*) FROM borrow_records r
                WHERE r.book_id = books.id AND r.returned_at IS NULL) AS active_count",
        )
        .bind(Uuid::from(updated.id))
        .bind(&updated.title)
        .bind(&updated.author)
        .bind(&updated.category)
        .bind(updated.year)
        .bind(&updated.isbn)
        .bind(updated.normalized_isbn())
        .bind(updated.copies_count as i32)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_book", e))?;
        row.map(BookRecord::from)
            .ok_or_else(|| DomainError::not_found().into())
    }

    #[instrument(skip(self), fields(book_id = %id), err)]
    async fn get_book(&self, id: BookId) -> StoreResult<Option<BookRecord>> {
        let mut qb = QueryBuilder::<Postgres>::new(BOOK_SELECT);
        qb.push(" AND b.id = ").push_bind(Uuid::from(id));
        let row = qb
            .build_query_as::<BookRow>()
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_book", e))?;
        Ok(row.map(BookRecord::from))
    }

    #[instrument(skip(self), fields(book_id = %id), err)]
    async fn delete_book(&self, id: BookId) -> StoreResult<()> {
        let mut tx = self.begin("delete_book").await?;

        let has_history: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM borrow_records WHERE book_id = $1)")
                .bind(Uuid::from(id))
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("check_history", e))?;
        if has_history {
            return Err(DomainError::conflict(ConflictKind::HasBorrowHistory).into());
        }

        let result = sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_book", e))?;
        if result.rows_affected() == 0 {
            return Err(DomainError::not_found().into());
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("delete_book", e))?;
        Ok(())
    }

    #[instrument(skip(self, query), err)]
    async fn list_books(&self, query: &BookQuery) -> StoreResult<Page<BookRecord>> {
        let params = query.page_params();

        let mut qb = QueryBuilder::<Postgres>::new(BOOK_SELECT);
        push_book_filters(&mut qb, query);
        qb.push(book_order_sql(query));
        qb.push(" LIMIT ")
            .push_bind(params.page_size as i64)
            .push(" OFFSET ")
            .push_bind(params.offset() as i64);
        let rows = qb
            .build_query_as::<BookRow>()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_books", e))?;

        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM books b WHERE 1=1");
        push_book_filters(&mut count_qb, query);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_books", e))?;

        Ok(Page::new(
            rows.into_iter().map(BookRecord::from).collect(),
            params,
            total.max(0) as u64,
        ))
    }

    #[instrument(skip(self, query), err)]
    async fn export_books(&self, query: &BookQuery) -> StoreResult<Vec<BookRecord>> {
        let mut qb = QueryBuilder::<Postgres>::new(BOOK_SELECT);
        push_book_filters(&mut qb, query);
        qb.push(book_order_sql(query));
        qb.push(" LIMIT ").push_bind(EXPORT_ROW_CAP as i64);
        let rows = qb
            .build_query_as::<BookRow>()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("export_books", e))?;
        Ok(rows.into_iter().map(BookRecord::from).collect())
    }
}

#[async_trait]
impl MemberStore for PostgresStore {
    #[instrument(skip(self), fields(member_id = %id), err)]
    async fn get_member(&self, id: MemberId) -> StoreResult<Option<Member>> {
        let row = sqlx::query_as::<_, MemberRow>(
            "SELECT id, user_id, name, email, phone, registered_at FROM members WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_member", e))?;
        Ok(row.map(Member::from))
    }

    #[instrument(skip(self), fields(user_id = %user), err)]
    async fn member_by_user(&self, user: UserId) -> StoreResult<Option<Member>> {
        let row = sqlx::query_as::<_, MemberRow>(
            "SELECT id, user_id, name, email, phone, registered_at FROM members WHERE user_id = $1",
        )
        .bind(Uuid::from(user))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("member_by_user", e))?;
        Ok(row.map(Member::from))
    }

    #[instrument(skip(self, query), err)]
    async fn list_members(&self, query: &MemberQuery) -> StoreResult<Page<Member>> {
        let params = query.page_params();

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT m.id, m.user_id, m.name, m.email, m.phone, m.registered_at FROM members m WHERE 1=1",
        );
        push_member_filters(&mut qb, query);
        qb.push(member_order_sql(query));
        qb.push(" LIMIT ")
            .push_bind(params.page_size as i64)
            .push(" OFFSET ")
            .push_bind(params.offset() as i64);
        let rows = qb
            .build_query_as::<MemberRow>()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_members", e))?;

        let mut count_qb =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM members m WHERE 1=1");
        push_member_filters(&mut count_qb, query);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_members", e))?;

        Ok(Page::new(
            rows.into_iter().map(Member::from).collect(),
            params,
            total.max(0) as u64,
        ))
    }

    #[instrument(skip(self, query), err)]
    async fn export_members(&self, query: &MemberQuery) -> StoreResult<Vec<Member>> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT m.id, m.user_id, m.name, m.email, m.phone, m.registered_at FROM members m WHERE 1=1",
        );
        push_member_filters(&mut qb, query);
        qb.push(member_order_sql(query));
        qb.push(" LIMIT ").push_bind(EXPORT_ROW_CAP as i64);
        let rows = qb
            .build_query_as::<MemberRow>()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("export_members", e))?;
        Ok(rows.into_iter().map(Member::from).collect())
    }

    #[instrument(skip(self, profile), fields(member_id = %id), err)]
    async fn update_member(&self, id: MemberId, profile: MemberProfile) -> StoreResult<Member> {
        let mut tx = self.begin("update_member").await?;
        let member = apply_member_update(&mut tx, id, profile).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("update_member", e))?;
        Ok(member)
    }

    #[instrument(skip(self, profile), fields(user_id = %user), err)]
    async fn update_member_by_user(
        &self,
        user: UserId,
        profile: MemberProfile,
    ) -> StoreResult<Member> {
        let mut tx = self.begin("update_member_by_user").await?;

        let id: Option<Uuid> = sqlx::query_scalar("SELECT id FROM members WHERE user_id = $1")
            .bind(Uuid::from(user))
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("find_profile", e))?;
        let id = id.ok_or_else(DomainError::not_found)?;

        let member = apply_member_update(&mut tx, MemberId::from_uuid(id), profile).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("update_member_by_user", e))?;
        Ok(member)
    }

    #[instrument(skip(self), fields(member_id = %id), err)]
    async fn delete_member(&self, id: MemberId) -> StoreResult<()> {
        let mut tx = self.begin("delete_member").await?;

        let has_history: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM borrow_records WHERE member_id = $1)")
                .bind(Uuid::from(id))
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("check_history", e))?;
        if has_history {
            return Err(DomainError::conflict(ConflictKind::HasBorrowHistory).into());
        }

        let result = sqlx::query("DELETE FROM members WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_member", e))?;
        if result.rows_affected() == 0 {
            return Err(DomainError::not_found().into());
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("delete_member", e))?;
        Ok(())
    }
}

/// Updates the profile and synchronizes a changed email onto the owning
/// user, inside the caller's transaction.
async fn apply_member_update(
    tx: &mut Transaction<'_, Postgres>,
    id: MemberId,
    profile: MemberProfile,
) -> StoreResult<Member> {
    let row = sqlx::query_as::<_, MemberRow>(
        "UPDATE members SET name = $2, email = $3, phone = $4 WHERE id = $1
         RETURNING id, user_id, name, email, phone, registered_at",
    )
    .bind(Uuid::from(id))
    .bind(&profile.name)
    .bind(&profile.email)
    .bind(&profile.phone)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_profile", e))?;
    let member = Member::from(row.ok_or_else(DomainError::not_found)?);

    sqlx::query("UPDATE users SET email = $2 WHERE id = $1")
        .bind(Uuid::from(member.user_id))
        .bind(&member.email)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("sync_account_email", e))?;
    Ok(member)
}

#[async_trait]
impl CirculationStore for PostgresStore {
    #[instrument(skip(self), fields(member_id = %member, book_id = %book), err)]
    async fn create_borrow(
        &self,
        member: MemberId,
        book: BookId,
        now: DateTime<Utc>,
        duration_days: i64,
    ) -> StoreResult<BorrowRecord> {
        let duration = validate_duration(duration_days)?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.create_borrow_tx(member, book, now, duration).await {
                Ok(record) => return Ok(record),
                Err(TxError::Serialization) if attempt < SERIALIZATION_ATTEMPTS => {
                    tracing::debug!(attempt, "borrow admission hit a serialization conflict, retrying");
                }
                Err(TxError::Serialization) => {
                    return Err(StoreError::Backend(
                        "borrow admission kept losing serialization races".to_string(),
                    ));
                }
                Err(TxError::Store(err)) => return Err(err),
            }
        }
    }

    #[instrument(skip(self), fields(borrow_id = %id), err)]
    async fn update_borrow(
        &self,
        id: BorrowId,
        member: MemberId,
        book: BookId,
        now: DateTime<Utc>,
        duration_days: i64,
    ) -> StoreResult<BorrowRecord> {
        let duration = validate_duration(duration_days)?;
        let mut tx = self.begin("update_borrow").await?;

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM borrow_records WHERE id = $1)")
                .bind(Uuid::from(id))
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("load_borrow", e))?;
        if !exists {
            return Err(DomainError::not_found().into());
        }
        let book_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM books WHERE id = $1)")
                .bind(Uuid::from(book))
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("load_book", e))?;
        if !book_exists {
            return Err(DomainError::validation("book does not exist").into());
        }
        let member_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM members WHERE id = $1)")
                .bind(Uuid::from(member))
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("load_member", e))?;
        if !member_exists {
            return Err(DomainError::validation("member does not exist").into());
        }

        let row = sqlx::query_as::<_, BorrowRow>(
            "UPDATE borrow_records
             SET book_id = $2, member_id = $3, borrowed_at = $4, due_at = $5
             WHERE id = $1
             RETURNING id, book_id, member_id, borrowed_at, due_at, returned_at",
        )
        .bind(Uuid::from(id))
        .bind(Uuid::from(book))
        .bind(Uuid::from(member))
        .bind(now)
        .bind(now + Duration::days(duration))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_borrow", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("update_borrow", e))?;
        Ok(row.into())
    }

    #[instrument(skip(self), fields(borrow_id = %id), err)]
    async fn return_borrow(&self, id: BorrowId, now: DateTime<Utc>) -> StoreResult<BorrowRecord> {
        let row = sqlx::query_as::<_, BorrowRow>(
            "UPDATE borrow_records SET returned_at = $2
             WHERE id = $1 AND returned_at IS NULL
             RETURNING id, book_id, member_id, borrowed_at, due_at, returned_at",
        )
        .bind(Uuid::from(id))
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("return_borrow", e))?;

        if let Some(row) = row {
            return Ok(row.into());
        }
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM borrow_records WHERE id = $1)")
                .bind(Uuid::from(id))
                .fetch_one(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("return_borrow", e))?;
        if exists {
            Err(DomainError::conflict(ConflictKind::AlreadyReturned).into())
        } else {
            Err(DomainError::not_found().into())
        }
    }

    #[instrument(skip(self), fields(borrow_id = %id), err)]
    async fn delete_borrow(&self, id: BorrowId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM borrow_records WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_borrow", e))?;
        if result.rows_affected() == 0 {
            return Err(DomainError::not_found().into());
        }
        Ok(())
    }

    #[instrument(skip(self), fields(borrow_id = %id), err)]
    async fn get_borrow(&self, id: BorrowId) -> StoreResult<Option<BorrowDetails>> {
        let mut qb = QueryBuilder::<Postgres>::new(BORROW_DETAILS_SELECT);
        qb.push(" AND br.id = ").push_bind(Uuid::from(id));
        let row = qb
            .build_query_as::<BorrowDetailsRow>()
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_borrow", e))?;
        Ok(row.map(BorrowDetails::from))
    }

    #[instrument(skip(self, query), err)]
    async fn list_borrows(&self, query: &BorrowQuery) -> StoreResult<Page<BorrowDetails>> {
        let params = query.page_params();

        let mut qb = QueryBuilder::<Postgres>::new(BORROW_DETAILS_SELECT);
        push_borrow_filters(&mut qb, query);
        qb.push(" ORDER BY br.id DESC");
        qb.push(" LIMIT ")
            .push_bind(params.page_size as i64)
            .push(" OFFSET ")
            .push_bind(params.offset() as i64);
        let rows = qb
            .build_query_as::<BorrowDetailsRow>()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_borrows", e))?;

        let mut count_qb =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM borrow_records br WHERE 1=1");
        push_borrow_filters(&mut count_qb, query);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_borrows", e))?;

        Ok(Page::new(
            rows.into_iter().map(BorrowDetails::from).collect(),
            params,
            total.max(0) as u64,
        ))
    }

    #[instrument(skip(self, query), err)]
    async fn export_borrows(&self, query: &BorrowQuery) -> StoreResult<Vec<BorrowDetails>> {
        let mut qb = QueryBuilder::<Postgres>::new(BORROW_DETAILS_SELECT);
        push_borrow_filters(&mut qb, query);
        qb.push(" ORDER BY br.id DESC");
        qb.push(" LIMIT ").push_bind(EXPORT_ROW_CAP as i64);
        let rows = qb
            .build_query_as::<BorrowDetailsRow>()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("export_borrows", e))?;
        Ok(rows.into_iter().map(BorrowDetails::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_names_map_to_conflicts() {
        assert_eq!(
            conflict_for_constraint(Some("users_email_key")),
            Some(ConflictKind::DuplicateEmail)
        );
        assert_eq!(
            conflict_for_constraint(Some("borrow_active_key")),
            Some(ConflictKind::DuplicateActiveBorrow)
        );
        assert_eq!(
            conflict_for_constraint(Some("revoked_tokens_pkey")),
            Some(ConflictKind::AlreadyRevoked)
        );
        assert_eq!(conflict_for_constraint(Some("something_else")), None);
        assert_eq!(conflict_for_constraint(None), None);
    }

    #[test]
    fn order_clauses_pin_direction_and_tiebreak() {
        let query = BookQuery {
            sort_by: Some(BookSortKey::Title),
            sort_dir: Some(SortDir::Asc),
            ..BookQuery::default()
        };
        assert_eq!(
            book_order_sql(&query),
            " ORDER BY LOWER(b.title) ASC NULLS FIRST, b.id ASC"
        );
        assert_eq!(
            book_order_sql(&BookQuery::default()),
            " ORDER BY b.id DESC NULLS LAST, b.id ASC"
        );
    }
}
