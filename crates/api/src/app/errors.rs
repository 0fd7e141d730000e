//! Translation of domain and store failures into HTTP responses.
//!
//! The mapping is fixed:
//!
//! | error                          | response                                |
//! |--------------------------------|-----------------------------------------|
//! | `Validation`                   | 400, code `validation_error`            |
//! | `InvalidId`                    | 400, code `invalid_id`                  |
//! | `Unauthenticated`              | 401, uniform body                       |
//! | `Forbidden`                    | 403, code `forbidden`                   |
//! | `NotFound`                     | 404, code `not_found`                   |
//! | `Conflict(kind)`               | 409, code from [`ConflictKind::code`]   |
//! | `Backend`                      | 500, opaque body, details to the log    |

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use libris_core::DomainError;
use libris_infra::store::StoreError;

/// Standard error body: `{"error": <stable code>, "message": <human text>}`.
pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// The one 401 body every authentication failure shares. Missing, malformed,
/// expired, and revoked tokens are indistinguishable to the caller.
pub fn unauthenticated() -> Response {
    json_error(
        StatusCode::UNAUTHORIZED,
        "unauthenticated",
        "authentication required",
    )
}

pub fn domain_error_response(err: DomainError) -> Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DomainError::Conflict(kind) => {
            json_error(StatusCode::CONFLICT, kind.code(), kind.to_string())
        }
        DomainError::Unauthenticated => unauthenticated(),
        DomainError::Forbidden(msg) => json_error(StatusCode::FORBIDDEN, "forbidden", msg),
    }
}

/// Domain errors pass through [`domain_error_response`]; backend failures are
/// logged in full and surfaced as an opaque 500.
pub fn store_error_response(err: StoreError) -> Response {
    match err {
        StoreError::Domain(domain) => domain_error_response(domain),
        StoreError::Backend(detail) => {
            tracing::error!(detail = %detail, "storage backend failure");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal error",
            )
        }
    }
}
