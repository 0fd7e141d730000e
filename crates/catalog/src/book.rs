use serde::{Deserialize, Serialize};

use libris_core::{BookId, DomainError, DomainResult};

use crate::isbn;

pub const MIN_YEAR: i32 = 1500;
pub const MAX_COPIES: u32 = 1000;
pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_AUTHOR_LEN: usize = 150;
pub const MAX_CATEGORY_LEN: usize = 100;

/// A catalog entry as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author: String,
    pub category: Option<String>,
    pub year: i32,
    /// As entered; uniqueness is judged on [`isbn::normalize`] of this.
    pub isbn: Option<String>,
    pub copies_count: u32,
}

impl Book {
    pub fn normalized_isbn(&self) -> Option<String> {
        self.isbn.as_deref().map(isbn::normalize)
    }
}

/// A book as read back: the stored fields plus live availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookRecord {
    #[serde(flatten)]
    pub book: Book,
    pub active_borrow_count: u32,
    pub available_copies: u32,
}

impl BookRecord {
    pub fn new(book: Book, active_borrow_count: u32) -> Self {
        let available_copies = book.copies_count.saturating_sub(active_borrow_count);
        Self {
            book,
            active_borrow_count,
            available_copies,
        }
    }
}

/// Raw input for creating or replacing a book.
#[derive(Debug, Clone, Deserialize)]
pub struct BookDraft {
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub category: Option<String>,
    pub year: i32,
    #[serde(default)]
    pub isbn: Option<String>,
    pub copies_count: u32,
}

/// A draft that passed validation: fields trimmed, ISBN kept raw alongside its
/// normalized form for uniqueness checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidBook {
    pub title: String,
    pub author: String,
    pub category: Option<String>,
    pub year: i32,
    pub isbn: Option<String>,
    pub isbn_normalized: Option<String>,
    pub copies_count: u32,
}

impl BookDraft {
    /// Trim and validate. `current_year` comes from the caller's clock; years
    /// in the future are rejected.
    pub fn validate(self, current_year: i32) -> DomainResult<ValidBook> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(DomainError::validation("title is required"));
        }
        if title.len() > MAX_TITLE_LEN {
            return Err(DomainError::validation("title is too long"));
        }

        let author = self.author.trim();
        if author.is_empty() {
            return Err(DomainError::validation("author is required"));
        }
        if author.len() > MAX_AUTHOR_LEN {
            return Err(DomainError::validation("author is too long"));
        }

        let category = match self.category.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(c) if c.len() > MAX_CATEGORY_LEN => {
                return Err(DomainError::validation("category is too long"));
            }
            Some(c) => Some(c.to_string()),
        };

        if self.year < MIN_YEAR || self.year > current_year {
            return Err(DomainError::validation(format!(
                "year must be between {MIN_YEAR} and {current_year}"
            )));
        }

        if self.copies_count > MAX_COPIES {
            return Err(DomainError::validation(format!(
                "copies count must be between 0 and {MAX_COPIES}"
            )));
        }

        let (isbn_raw, isbn_normalized) = match self.isbn.as_deref().map(str::trim) {
            None | Some("") => (None, None),
            Some(raw) => {
                let normalized = isbn::normalize(raw);
                if !isbn::is_valid_normalized(&normalized) {
                    return Err(DomainError::validation(
                        "isbn must be 10 or 13 digits (X allowed as the last ISBN-10 character)",
                    ));
                }
                (Some(raw.to_string()), Some(normalized))
            }
        };

        Ok(ValidBook {
            title: title.to_string(),
            author: author.to_string(),
            category,
            year: self.year,
            isbn: isbn_raw,
            isbn_normalized,
            copies_count: self.copies_count,
        })
    }
}

impl ValidBook {
    /// Materialize with a fresh id.
    pub fn into_book(self, id: BookId) -> Book {
        Book {
            id,
            title: self.title,
            author: self.author,
            category: self.category,
            year: self.year,
            isbn: self.isbn,
            copies_count: self.copies_count,
        }
    }
}
