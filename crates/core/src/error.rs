//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// conflicts, lookups). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A business-rule conflict on otherwise well-formed input. Kept as a
    /// closed enum so callers can react per kind instead of matching on
    /// message text.
    #[error("conflict: {0}")]
    Conflict(ConflictKind),

    /// The caller presented no usable credentials, or credentials that failed
    /// verification. Surfaced uniformly regardless of which check failed.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Authenticated, but the required permission or role is missing.
    #[error("forbidden: {0}")]
    Forbidden(String),
}

/// The business-rule conflicts this domain can raise.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    #[error("duplicate active borrow")]
    DuplicateActiveBorrow,

    #[error("no copies available")]
    NoCopiesAvailable,

    #[error("already returned")]
    AlreadyReturned,

    #[error("has borrow history")]
    HasBorrowHistory,

    #[error("duplicate isbn")]
    DuplicateIsbn,

    #[error("duplicate title/author/year")]
    DuplicateTitle,

    #[error("email already in use")]
    DuplicateEmail,

    #[error("username already in use")]
    DuplicateUsername,

    #[error("token already revoked")]
    AlreadyRevoked,
}

impl ConflictKind {
    /// Stable outcome code for the HTTP boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateActiveBorrow => "duplicate_active_borrow",
            Self::NoCopiesAvailable => "no_copies_available",
            Self::AlreadyReturned => "already_returned",
            Self::HasBorrowHistory => "has_borrow_history",
            Self::DuplicateIsbn => "duplicate_isbn",
            Self::DuplicateTitle => "duplicate_title",
            Self::DuplicateEmail => "duplicate_email",
            Self::DuplicateUsername => "duplicate_username",
            Self::AlreadyRevoked => "already_revoked",
        }
    }
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(kind: ConflictKind) -> Self {
        Self::Conflict(kind)
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// True for the conflict taxonomy (vs. validation or lookup failures).
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
