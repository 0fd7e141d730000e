//! The borrow admission decision.
//!
//! Stores gather [`BorrowFacts`] inside their transaction and ask this module
//! whether the insert may proceed, so both backends enforce exactly one rule
//! set. Check order is part of the contract: missing book, then missing
//! member, then duplicate active loan, then availability.

use libris_core::{ConflictKind, DomainError, DomainResult};

/// A book's copy situation inside the admission transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookAvailability {
    pub copies_count: u32,
    pub active_count: u32,
}

impl BookAvailability {
    pub fn available(&self) -> u32 {
        self.copies_count.saturating_sub(self.active_count)
    }
}

/// Facts gathered under the same transaction as the insert they admit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BorrowFacts {
    /// `None` when the referenced book does not exist.
    pub book: Option<BookAvailability>,
    pub member_exists: bool,
    /// An active record already exists for this (member, book) pair.
    pub duplicate_active: bool,
}

impl BorrowFacts {
    pub fn admit(&self) -> DomainResult<()> {
        let book = self
            .book
            .ok_or_else(|| DomainError::validation("book does not exist"))?;
        if !self.member_exists {
            return Err(DomainError::validation("member does not exist"));
        }
        if self.duplicate_active {
            return Err(DomainError::conflict(ConflictKind::DuplicateActiveBorrow));
        }
        if book.available() == 0 {
            return Err(DomainError::conflict(ConflictKind::NoCopiesAvailable));
        }
        Ok(())
    }
}
