//! Borrow-ledger domain module.
//!
//! The rules that keep lending honest: duration bounds, the admission
//! decision (existence, duplicate-active, availability) and status
//! classification. All deterministic; the stores supply the facts and the
//! atomicity.

pub mod admission;
pub mod query;
pub mod record;
pub mod status;

pub use admission::{BookAvailability, BorrowFacts};
pub use query::BorrowQuery;
pub use record::{BorrowRecord, MAX_DURATION_DAYS, MIN_DURATION_DAYS, validate_duration};
pub use status::{BorrowStatus, classify, overdue_days};
