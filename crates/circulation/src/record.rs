use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use libris_core::{BookId, BorrowId, DomainError, DomainResult, MemberId};

pub const MIN_DURATION_DAYS: i64 = 1;
pub const MAX_DURATION_DAYS: i64 = 365;

/// One lending of one book copy to one member.
///
/// Two states: active (`returned_at` unset) and returned, with no way back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowRecord {
    pub id: BorrowId,
    pub book_id: BookId,
    pub member_id: MemberId,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
}

impl BorrowRecord {
    pub fn open(
        id: BorrowId,
        book_id: BookId,
        member_id: MemberId,
        now: DateTime<Utc>,
        duration_days: i64,
    ) -> Self {
        Self {
            id,
            book_id,
            member_id,
            borrowed_at: now,
            due_at: now + Duration::days(duration_days),
            returned_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.returned_at.is_none()
    }

    /// Restart the loan against a (possibly different) book and member,
    /// keeping the id. Used by the update operation.
    pub fn rebook(
        &mut self,
        book_id: BookId,
        member_id: MemberId,
        now: DateTime<Utc>,
        duration_days: i64,
    ) {
        self.book_id = book_id;
        self.member_id = member_id;
        self.borrowed_at = now;
        self.due_at = now + Duration::days(duration_days);
    }
}

pub fn validate_duration(days: i64) -> DomainResult<i64> {
    if !(MIN_DURATION_DAYS..=MAX_DURATION_DAYS).contains(&days) {
        return Err(DomainError::validation(format!(
            "duration must be between {MIN_DURATION_DAYS} and {MAX_DURATION_DAYS} days"
        )));
    }
    Ok(days)
}
