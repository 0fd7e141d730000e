use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use libris_auth::{permissions::names, roles};
use libris_core::MemberId;
use libris_members::{MemberProfile, MemberQuery};

use crate::app::dto::{AppJson, AppQuery, MemberUpdateRequest};
use crate::app::errors;
use crate::authz;
use crate::context::{AppContext, CurrentUser};

pub fn router() -> Router {
    // "/me" is a static segment, so it wins over "/:id" in route matching.
    Router::new()
        .route("/", get(list_members))
        .route("/export", get(export_members))
        .route("/me", get(my_profile).put(update_my_profile))
        .route(
            "/:id",
            get(get_member).put(update_member).delete(delete_member),
        )
}

pub async fn list_members(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    AppQuery(query): AppQuery<MemberQuery>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&ctx, &user, names::MEMBER_READ) {
        return resp;
    }
    match ctx.store.list_members(&query).await {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn export_members(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    AppQuery(query): AppQuery<MemberQuery>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&ctx, &user, names::MEMBER_READ) {
        return resp;
    }
    match ctx.store.export_members(&query).await {
        Ok(items) => (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response(),
        Err(err) => errors::store_error_response(err),
    }
}

/// The caller's own profile. Open to any authenticated user; accounts
/// without a member profile (staff) get a 404.
pub async fn my_profile(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
) -> axum::response::Response {
    match ctx.store.member_by_user(user.user_id()).await {
        Ok(Some(member)) => (StatusCode::OK, Json(member)).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            "no member profile for this account",
        ),
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn update_my_profile(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    AppJson(body): AppJson<MemberUpdateRequest>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&ctx, &user, names::MEMBER_UPDATE) {
        return resp;
    }
    let profile = match MemberProfile::validate(&body.name, &body.email, body.phone.as_deref()) {
        Ok(profile) => profile,
        Err(err) => return errors::domain_error_response(err),
    };
    match ctx
        .store
        .update_member_by_user(user.user_id(), profile)
        .await
    {
        Ok(member) => (StatusCode::OK, Json(member)).into_response(),
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn get_member(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&ctx, &user, names::MEMBER_READ) {
        return resp;
    }
    let id: MemberId = match id.parse() {
        Ok(id) => id,
        Err(err) => return errors::domain_error_response(err),
    };
    match ctx.store.get_member(id).await {
        Ok(Some(member)) => (StatusCode::OK, Json(member)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "member not found"),
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn update_member(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    AppJson(body): AppJson<MemberUpdateRequest>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_any_role(&user, &[roles::ADMIN, roles::EMPLOYEE]) {
        return resp;
    }
    let id: MemberId = match id.parse() {
        Ok(id) => id,
        Err(err) => return errors::domain_error_response(err),
    };
    let profile = match MemberProfile::validate(&body.name, &body.email, body.phone.as_deref()) {
        Ok(profile) => profile,
        Err(err) => return errors::domain_error_response(err),
    };
    match ctx.store.update_member(id, profile).await {
        Ok(member) => (StatusCode::OK, Json(member)).into_response(),
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn delete_member(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_any_role(&user, &[roles::ADMIN]) {
        return resp;
    }
    let id: MemberId = match id.parse() {
        Ok(id) => id,
        Err(err) => return errors::domain_error_response(err),
    };
    match ctx.store.delete_member(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => errors::store_error_response(err),
    }
}
