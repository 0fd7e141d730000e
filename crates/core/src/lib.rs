//! `libris-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod clock;
pub mod email;
pub mod error;
pub mod id;
pub mod page;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{ConflictKind, DomainError, DomainResult};
pub use id::{BookId, BorrowId, MemberId, PermissionId, RoleId, UserId};
pub use page::{EXPORT_ROW_CAP, Page, PageParams, SortDir};
