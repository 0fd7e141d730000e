//! Member list filters and ordering.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use libris_core::{PageParams, SortDir};

use crate::member::Member;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberSortKey {
    Id,
    Name,
    Email,
    RegisteredAt,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemberQuery {
    /// Free-text needle matched against name, email and phone.
    pub q: Option<String>,
    pub name: Option<String>,
    /// Exact match, compared lowercase.
    pub email: Option<String>,
    pub phone: Option<String>,
    pub registered_from: Option<DateTime<Utc>>,
    pub registered_to: Option<DateTime<Utc>>,
    pub sort_by: Option<MemberSortKey>,
    pub sort_dir: Option<SortDir>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

impl MemberQuery {
    pub fn page_params(&self) -> PageParams {
        PageParams::clamped(self.page, self.page_size)
    }

    pub fn order(&self) -> (MemberSortKey, SortDir) {
        (
            self.sort_by.unwrap_or(MemberSortKey::Id),
            self.sort_dir.unwrap_or(SortDir::Desc),
        )
    }

    pub fn matches(&self, member: &Member) -> bool {
        if let Some(q) = self.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let hit = contains_ci(&member.name, q)
                || contains_ci(&member.email, q)
                || member.phone.as_deref().is_some_and(|p| contains_ci(p, q));
            if !hit {
                return false;
            }
        }

        if let Some(name) = self.name.as_deref().map(str::trim).filter(|n| !n.is_empty())
            && !contains_ci(&member.name, name)
        {
            return false;
        }

        if let Some(email) = self.email.as_deref().map(str::trim).filter(|e| !e.is_empty())
            && member.email != email.to_lowercase()
        {
            return false;
        }

        if let Some(phone) = self.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            match member.phone.as_deref() {
                Some(p) if contains_ci(p, phone) => {}
                _ => return false,
            }
        }

        if let Some(from) = self.registered_from
            && member.registered_at < from
        {
            return false;
        }
        if let Some(to) = self.registered_to
            && member.registered_at > to
        {
            return false;
        }

        true
    }

    pub fn compare(&self, a: &Member, b: &Member) -> Ordering {
        let (key, dir) = self.order();
        let ordering = match key {
            MemberSortKey::Id => a.id.as_uuid().cmp(b.id.as_uuid()),
            MemberSortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            MemberSortKey::Email => a.email.cmp(&b.email),
            MemberSortKey::RegisteredAt => a.registered_at.cmp(&b.registered_at),
        };
        dir.apply(ordering)
            .then_with(|| a.id.as_uuid().cmp(b.id.as_uuid()))
    }
}
