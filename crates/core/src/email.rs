//! Email normalization.
//!
//! Emails are compared case-insensitively everywhere; normalizing to
//! lowercase at every write site makes plain equality sufficient.

use crate::error::{DomainError, DomainResult};

pub const MAX_EMAIL_LEN: usize = 254;

pub fn normalize(raw: &str) -> DomainResult<String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        return Err(DomainError::validation("email is required"));
    }
    if !email.contains('@') || email.len() > MAX_EMAIL_LEN {
        return Err(DomainError::validation("email is malformed"));
    }
    Ok(email)
}
