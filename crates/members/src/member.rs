use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use libris_core::{DomainError, DomainResult, MemberId, UserId, email};

pub const MAX_NAME_LEN: usize = 150;
pub const MAX_PHONE_LEN: usize = 30;

/// A member profile, tied 1:1 to a user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub user_id: UserId,
    pub name: String,
    /// Lowercase; unique among members, kept in step with the owning user.
    pub email: String,
    pub phone: Option<String>,
    pub registered_at: DateTime<Utc>,
}

/// Validated profile fields, used both at registration and on updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberProfile {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

impl MemberProfile {
    /// Trim the name, lowercase the email, treat a blank phone as absent.
    pub fn validate(name: &str, raw_email: &str, phone: Option<&str>) -> DomainResult<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("name is required"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(DomainError::validation("name is too long"));
        }

        let email = email::normalize(raw_email)?;

        let phone = match phone.map(str::trim) {
            None | Some("") => None,
            Some(p) if p.len() > MAX_PHONE_LEN => {
                return Err(DomainError::validation("phone is too long"));
            }
            Some(p) => Some(p.to_string()),
        };

        Ok(Self {
            name: name.to_string(),
            email,
            phone,
        })
    }
}
