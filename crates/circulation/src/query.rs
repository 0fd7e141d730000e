//! Borrow list filters. Ordering is fixed: newest record first.

use serde::Deserialize;

use libris_core::{BookId, MemberId, PageParams};

use crate::record::BorrowRecord;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BorrowQuery {
    pub member_id: Option<MemberId>,
    pub book_id: Option<BookId>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl BorrowQuery {
    pub fn page_params(&self) -> PageParams {
        PageParams::clamped(self.page, self.page_size)
    }

    pub fn matches(&self, record: &BorrowRecord) -> bool {
        if let Some(member_id) = self.member_id
            && record.member_id != member_id
        {
            return false;
        }
        if let Some(book_id) = self.book_id
            && record.book_id != book_id
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use libris_core::BorrowId;

    use super::*;

    #[test]
    fn filters_by_member_and_book() {
        let record = BorrowRecord::open(
            BorrowId::new(),
            BookId::new(),
            MemberId::new(),
            Utc::now(),
            7,
        );

        assert!(BorrowQuery::default().matches(&record));
        assert!(
            BorrowQuery {
                member_id: Some(record.member_id),
                book_id: Some(record.book_id),
                ..Default::default()
            }
            .matches(&record)
        );
        assert!(
            !BorrowQuery {
                member_id: Some(MemberId::new()),
                ..Default::default()
            }
            .matches(&record)
        );
    }
}
