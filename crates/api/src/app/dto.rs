//! Request/response DTOs and the strict extractors that parse them.
//!
//! Axum's stock `Json` and `Query` extractors answer malformed input with
//! 415/422/400 depending on what exactly went wrong. This API promises a
//! plain 400 with the standard error body for anything unparseable, so
//! handlers take [`AppJson`] and [`AppQuery`] instead.

use axum::extract::{FromRequest, FromRequestParts, Json, Query, Request};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use libris_auth::{IssuedToken, Permission};
use libris_circulation::{BorrowStatus, classify, overdue_days};
use libris_core::{RoleId, UserId};
use libris_infra::store::{BorrowDetails, UserDetails};
use libris_members::Member;

use crate::app::errors;

/// JSON body extractor whose rejection is always a 400 `invalid_body`.
pub struct AppJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for AppJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_body",
                rejection.body_text(),
            )),
        }
    }
}

/// Query-string extractor whose rejection is always a 400 `invalid_query`.
pub struct AppQuery<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequestParts<S> for AppQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_query",
                rejection.body_text(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub role: String,
    pub permissions: Vec<Permission>,
    pub expires_at: DateTime<Utc>,
}

impl From<IssuedToken> for LoginResponse {
    fn from(issued: IssuedToken) -> Self {
        let IssuedToken { token, claims } = issued;
        let expires_at = claims.expires_at();
        Self {
            token,
            role: claims.role,
            permissions: claims.permissions,
            expires_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user: UserResponse,
    pub member: Member,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameUserRequest {
    pub username: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordChangeRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RoleChangeRequest {
    pub role_id: String,
}

#[derive(Debug, Deserialize)]
pub struct MemberUpdateRequest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BorrowRequest {
    pub member_id: String,
    pub book_id: String,
    pub duration_days: i64,
}

/// Account projection for responses. Built from [`UserDetails`] so the
/// password hash can never leak by accident.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub role_id: RoleId,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

impl From<UserDetails> for UserResponse {
    fn from(details: UserDetails) -> Self {
        Self {
            id: details.account.id,
            username: details.account.username,
            email: details.account.email,
            role_id: details.account.role_id,
            role: details.role,
            created_at: details.account.created_at,
        }
    }
}

/// A borrow row as listings render it, with the status computed at request
/// time rather than stored.
#[derive(Debug, Serialize)]
pub struct BorrowView {
    #[serde(flatten)]
    pub details: BorrowDetails,
    pub status: BorrowStatus,
    pub overdue_days: i64,
}

impl BorrowView {
    pub fn of(details: BorrowDetails, now: DateTime<Utc>) -> Self {
        let status = classify(&details.record, now);
        let late_days = overdue_days(&details.record, now);
        Self {
            details,
            status,
            overdue_days: late_days,
        }
    }
}
