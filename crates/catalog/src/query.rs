//! Catalog list filters and ordering.
//!
//! The in-memory store evaluates these predicates directly; the SQL backend
//! mirrors them in its WHERE/ORDER BY clauses.

use std::cmp::Ordering;

use serde::Deserialize;

use libris_core::{PageParams, SortDir};

use crate::book::BookRecord;
use crate::isbn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookSortKey {
    Id,
    Title,
    Author,
    Isbn,
    Category,
    Year,
    CopiesCount,
}

/// Filters for listing/exporting books. All optional; absent means "match".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookQuery {
    /// Free-text needle matched against title, author, category and ISBN.
    pub q: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub category: Option<String>,
    /// Matched exactly or as a prefix, on the normalized form.
    pub isbn: Option<String>,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    pub min_copies: Option<u32>,
    pub max_copies: Option<u32>,
    pub sort_by: Option<BookSortKey>,
    pub sort_dir: Option<SortDir>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

impl BookQuery {
    pub fn page_params(&self) -> PageParams {
        PageParams::clamped(self.page, self.page_size)
    }

    pub fn order(&self) -> (BookSortKey, SortDir) {
        (
            self.sort_by.unwrap_or(BookSortKey::Id),
            self.sort_dir.unwrap_or(SortDir::Desc),
        )
    }

    pub fn matches(&self, record: &BookRecord) -> bool {
        let book = &record.book;

        if let Some(q) = self.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let hit = contains_ci(&book.title, q)
                || contains_ci(&book.author, q)
                || book.category.as_deref().is_some_and(|c| contains_ci(c, q))
                || book.isbn.as_deref().is_some_and(|i| contains_ci(i, q));
            if !hit {
                return false;
            }
        }

        if let Some(title) = self.title.as_deref().map(str::trim).filter(|t| !t.is_empty())
            && !contains_ci(&book.title, title)
        {
            return false;
        }
        if let Some(author) = self.author.as_deref().map(str::trim).filter(|a| !a.is_empty())
            && !contains_ci(&book.author, author)
        {
            return false;
        }
        if let Some(category) = self
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
        {
            match book.category.as_deref() {
                Some(c) if contains_ci(c, category) => {}
                _ => return false,
            }
        }

        if let Some(raw) = self.isbn.as_deref().map(str::trim).filter(|i| !i.is_empty()) {
            let needle = isbn::normalize(raw);
            match book.normalized_isbn() {
                Some(stored) if stored == needle || stored.starts_with(&needle) => {}
                _ => return false,
            }
        }

        if let Some(from) = self.year_from
            && book.year < from
        {
            return false;
        }
        if let Some(to) = self.year_to
            && book.year > to
        {
            return false;
        }
        if let Some(min) = self.min_copies
            && book.copies_count < min
        {
            return false;
        }
        if let Some(max) = self.max_copies
            && book.copies_count > max
        {
            return false;
        }

        true
    }

    pub fn compare(&self, a: &BookRecord, b: &BookRecord) -> Ordering {
        let (key, dir) = self.order();
        let ordering = match key {
            BookSortKey::Id => a.book.id.as_uuid().cmp(b.book.id.as_uuid()),
            BookSortKey::Title => a.book.title.to_lowercase().cmp(&b.book.title.to_lowercase()),
            BookSortKey::Author => a
                .book
                .author
                .to_lowercase()
                .cmp(&b.book.author.to_lowercase()),
            BookSortKey::Isbn => a.book.normalized_isbn().cmp(&b.book.normalized_isbn()),
            BookSortKey::Category => {
                let lower = |r: &BookRecord| r.book.category.as_deref().map(str::to_lowercase);
                lower(a).cmp(&lower(b))
            }
            BookSortKey::Year => a.book.year.cmp(&b.book.year),
            BookSortKey::CopiesCount => a.book.copies_count.cmp(&b.book.copies_count),
        };
        // Ties fall back to id so paging is stable.
        dir.apply(ordering)
            .then_with(|| a.book.id.as_uuid().cmp(b.book.id.as_uuid()))
    }
}
