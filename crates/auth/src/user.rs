//! Identity model: user accounts and roles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use libris_core::{DomainError, DomainResult, RoleId, UserId};

use crate::credentials;

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_USERNAME_LEN: usize = 100;

/// A stored account. The hash stays inside the service layer; response DTOs
/// never carry it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role_id: RoleId,
    pub created_at: DateTime<Utc>,
}

/// A role row: a named bucket the grant matrix hangs off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
}

pub fn validate_username(raw: &str) -> DomainResult<String> {
    let username = raw.trim();
    if username.is_empty() {
        return Err(DomainError::validation("username is required"));
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(DomainError::validation("username is too long"));
    }
    Ok(username.to_string())
}

pub fn validate_password(raw: &str) -> DomainResult<()> {
    if raw.len() < MIN_PASSWORD_LEN {
        return Err(DomainError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Validated, hash-carrying input for account creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role_id: RoleId,
}

impl NewAccount {
    /// Trim the username, lowercase the email, enforce the password rule and
    /// hash the secret.
    pub fn new(username: &str, email: &str, password: &str, role_id: RoleId) -> DomainResult<Self> {
        let username = validate_username(username)?;
        let email = libris_core::email::normalize(email)?;
        validate_password(password)?;
        Ok(Self {
            username,
            email,
            password_hash: credentials::hash_secret(password),
            role_id,
        })
    }
}
