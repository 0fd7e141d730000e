//! Member-profile domain module.
//!
//! Pure domain logic for member profiles. No IO, no HTTP, no storage.

pub mod member;
pub mod query;

pub use member::{Member, MemberProfile};
pub use query::{MemberQuery, MemberSortKey};
