//! Borrow status classification for listings and exports.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::record::BorrowRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BorrowStatus {
    Active,
    Overdue,
    Returned,
    #[serde(rename = "Returned (Late)")]
    ReturnedLate,
}

impl BorrowStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Overdue => "Overdue",
            Self::Returned => "Returned",
            Self::ReturnedLate => "Returned (Late)",
        }
    }
}

impl core::fmt::Display for BorrowStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// Classify a record at `now`. A return exactly at the due instant still
/// counts as on time, and an unreturned loan is Active up to and including
/// the due instant.
pub fn classify(record: &BorrowRecord, now: DateTime<Utc>) -> BorrowStatus {
    match record.returned_at {
        Some(returned) if returned > record.due_at => BorrowStatus::ReturnedLate,
        Some(_) => BorrowStatus::Returned,
        None if now > record.due_at => BorrowStatus::Overdue,
        None => BorrowStatus::Active,
    }
}

/// Whole days past due, clamped to zero. The effective end is the return
/// time for closed records and `now` for open ones.
pub fn overdue_days(record: &BorrowRecord, now: DateTime<Utc>) -> i64 {
    let effective_end = record.returned_at.unwrap_or(now);
    (effective_end - record.due_at).num_days().max(0)
}
