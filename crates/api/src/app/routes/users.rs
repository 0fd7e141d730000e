use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
};

use libris_auth::roles;
use libris_core::{RoleId, UserId};

use crate::app::dto::{
    AppJson, CreateUserRequest, PasswordChangeRequest, RenameUserRequest, RoleChangeRequest,
    UserResponse,
};
use crate::app::{errors, services};
use crate::authz;
use crate::context::{AppContext, CurrentUser};

/// Account administration. Every endpoint is gated on the Admin role, not on
/// a permission, so a denial written into the grant matrix cannot lock the
/// administrator out of account management.
pub fn router() -> Router {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/roles", get(list_roles))
        .route("/:id", get(get_user).put(rename_user).delete(delete_user))
        .route("/:id/password", put(set_password))
        .route("/:id/role", put(set_role))
}

pub async fn list_users(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_any_role(&user, &[roles::ADMIN]) {
        return resp;
    }
    match ctx.store.list_users().await {
        Ok(users) => {
            let users: Vec<UserResponse> = users.into_iter().map(UserResponse::from).collect();
            (StatusCode::OK, Json(users)).into_response()
        }
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn list_roles(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_any_role(&user, &[roles::ADMIN]) {
        return resp;
    }
    match ctx.store.list_roles().await {
        Ok(roles) => (StatusCode::OK, Json(roles)).into_response(),
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn get_user(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_any_role(&user, &[roles::ADMIN]) {
        return resp;
    }
    let id: UserId = match id.parse() {
        Ok(id) => id,
        Err(err) => return errors::domain_error_response(err),
    };
    match services::user_details(&ctx, id).await {
        Ok(Some(details)) => (StatusCode::OK, Json(UserResponse::from(details))).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "user not found"),
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn create_user(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    AppJson(body): AppJson<CreateUserRequest>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_any_role(&user, &[roles::ADMIN]) {
        return resp;
    }
    let role_id: RoleId = match body.role_id.parse() {
        Ok(id) => id,
        Err(err) => return errors::domain_error_response(err),
    };
    match services::create_user(&ctx, &body.username, &body.email, &body.password, role_id).await {
        Ok(details) => (StatusCode::CREATED, Json(UserResponse::from(details))).into_response(),
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn rename_user(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    AppJson(body): AppJson<RenameUserRequest>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_any_role(&user, &[roles::ADMIN]) {
        return resp;
    }
    let id: UserId = match id.parse() {
        Ok(id) => id,
        Err(err) => return errors::domain_error_response(err),
    };
    match services::rename_user(&ctx, id, &body.username, &body.email).await {
        Ok(details) => (StatusCode::OK, Json(UserResponse::from(details))).into_response(),
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn set_password(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    AppJson(body): AppJson<PasswordChangeRequest>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_any_role(&user, &[roles::ADMIN]) {
        return resp;
    }
    let id: UserId = match id.parse() {
        Ok(id) => id,
        Err(err) => return errors::domain_error_response(err),
    };
    match services::set_password(&ctx, id, &body.password).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn set_role(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    AppJson(body): AppJson<RoleChangeRequest>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_any_role(&user, &[roles::ADMIN]) {
        return resp;
    }
    let id: UserId = match id.parse() {
        Ok(id) => id,
        Err(err) => return errors::domain_error_response(err),
    };
    let role_id: RoleId = match body.role_id.parse() {
        Ok(id) => id,
        Err(err) => return errors::domain_error_response(err),
    };
    match ctx.store.set_role(id, role_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn delete_user(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_any_role(&user, &[roles::ADMIN]) {
        return resp;
    }
    let id: UserId = match id.parse() {
        Ok(id) => id,
        Err(err) => return errors::domain_error_response(err),
    };
    match ctx.store.delete_user(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => errors::store_error_response(err),
    }
}
