use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};

use crate::app::dto::{
    AppJson, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse, UserResponse,
};
use crate::app::{errors, services};
use crate::context::{AppContext, CurrentUser};
use crate::middleware;

/// Endpoints reachable without a token. Logout lives here because it must
/// accept tokens the verification gate would bounce (expired ones).
pub fn public_router() -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/register", post(register))
        .route("/logout", post(logout))
}

pub async fn login(
    Extension(ctx): Extension<Arc<AppContext>>,
    AppJson(body): AppJson<LoginRequest>,
) -> axum::response::Response {
    if body.email.trim().is_empty() || body.password.is_empty() {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "email and password are required",
        );
    }
    match services::login(&ctx, &body.email, &body.password).await {
        Ok(issued) => (StatusCode::OK, Json(LoginResponse::from(issued))).into_response(),
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn logout(
    Extension(ctx): Extension<Arc<AppContext>>,
    headers: HeaderMap,
) -> axum::response::Response {
    let Some(token) = middleware::bearer_token(&headers) else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_header",
            "a bearer token is required to log out",
        );
    };
    match services::logout(&ctx, token).await {
        Ok(revoked_until) => (
            StatusCode::OK,
            Json(serde_json::json!({ "revoked_until": revoked_until })),
        )
            .into_response(),
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn register(
    Extension(ctx): Extension<Arc<AppContext>>,
    AppJson(body): AppJson<RegisterRequest>,
) -> axum::response::Response {
    match services::register(
        &ctx,
        &body.username,
        &body.email,
        &body.password,
        &body.name,
        body.phone.as_deref(),
    )
    .await
    {
        Ok((details, member)) => (
            StatusCode::CREATED,
            Json(RegisterResponse {
                user: UserResponse::from(details),
                member,
            }),
        )
            .into_response(),
        Err(err) => errors::store_error_response(err),
    }
}

/// The caller's own claims snapshot, exactly as embedded in the token.
pub async fn me(Extension(user): Extension<CurrentUser>) -> axum::response::Response {
    let claims = &user.claims;
    Json(serde_json::json!({
        "user_id": claims.sub,
        "email": claims.email,
        "role_id": claims.role_id,
        "role": claims.role,
        "permissions": claims.permissions,
        "issued_at": claims.issued_at(),
        "expires_at": claims.expires_at(),
    }))
    .into_response()
}
