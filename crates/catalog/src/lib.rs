//! Book catalog domain module.
//!
//! Pure domain logic for books: ISBN handling, validation and the list/query
//! model. No IO, no HTTP, no storage.

pub mod book;
pub mod isbn;
pub mod query;

pub use book::{Book, BookDraft, BookRecord, ValidBook};
pub use query::{BookQuery, BookSortKey};
