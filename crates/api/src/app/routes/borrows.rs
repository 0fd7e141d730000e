use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use libris_auth::permissions::names;
use libris_circulation::BorrowQuery;
use libris_core::{BookId, BorrowId, MemberId};

use crate::app::dto::{AppJson, AppQuery, BorrowRequest, BorrowView};
use crate::app::errors;
use crate::authz;
use crate::context::{AppContext, CurrentUser};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_borrows).post(create_borrow))
        .route("/export", get(export_borrows))
        .route(
            "/:id",
            get(get_borrow).put(update_borrow).delete(delete_borrow),
        )
        .route("/:id/return", post(return_borrow))
}

pub async fn list_borrows(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    AppQuery(query): AppQuery<BorrowQuery>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&ctx, &user, names::BORROW_READ) {
        return resp;
    }
    let now = ctx.clock.now();
    match ctx.store.list_borrows(&query).await {
        Ok(page) => {
            (StatusCode::OK, Json(page.map(|details| BorrowView::of(details, now))))
                .into_response()
        }
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn export_borrows(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    AppQuery(query): AppQuery<BorrowQuery>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&ctx, &user, names::BORROW_READ) {
        return resp;
    }
    let now = ctx.clock.now();
    match ctx.store.export_borrows(&query).await {
        Ok(items) => {
            let views: Vec<BorrowView> = items
                .into_iter()
                .map(|details| BorrowView::of(details, now))
                .collect();
            (StatusCode::OK, Json(serde_json::json!({ "items": views }))).into_response()
        }
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn get_borrow(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&ctx, &user, names::BORROW_READ) {
        return resp;
    }
    let id: BorrowId = match id.parse() {
        Ok(id) => id,
        Err(err) => return errors::domain_error_response(err),
    };
    match ctx.store.get_borrow(id).await {
        Ok(Some(details)) => {
            (StatusCode::OK, Json(BorrowView::of(details, ctx.clock.now()))).into_response()
        }
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "borrow not found"),
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn create_borrow(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    AppJson(body): AppJson<BorrowRequest>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&ctx, &user, names::BORROW_CREATE) {
        return resp;
    }
    let member: MemberId = match body.member_id.parse() {
        Ok(id) => id,
        Err(err) => return errors::domain_error_response(err),
    };
    let book: BookId = match body.book_id.parse() {
        Ok(id) => id,
        Err(err) => return errors::domain_error_response(err),
    };
    match ctx
        .store
        .create_borrow(member, book, ctx.clock.now(), body.duration_days)
        .await
    {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn update_borrow(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    AppJson(body): AppJson<BorrowRequest>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&ctx, &user, names::BORROW_UPDATE) {
        return resp;
    }
    let id: BorrowId = match id.parse() {
        Ok(id) => id,
        Err(err) => return errors::domain_error_response(err),
    };
    let member: MemberId = match body.member_id.parse() {
        Ok(id) => id,
        Err(err) => return errors::domain_error_response(err),
    };
    let book: BookId = match body.book_id.parse() {
        Ok(id) => id,
        Err(err) => return errors::domain_error_response(err),
    };
    match ctx
        .store
        .update_borrow(id, member, book, ctx.clock.now(), body.duration_days)
        .await
    {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn return_borrow(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&ctx, &user, names::BORROW_UPDATE) {
        return resp;
    }
    let id: BorrowId = match id.parse() {
        Ok(id) => id,
        Err(err) => return errors::domain_error_response(err),
    };
    match ctx.store.return_borrow(id, ctx.clock.now()).await {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn delete_borrow(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&ctx, &user, names::BORROW_DELETE) {
        return resp;
    }
    let id: BorrowId = match id.parse() {
        Ok(id) => id,
        Err(err) => return errors::domain_error_response(err),
    };
    match ctx.store.delete_borrow(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => errors::store_error_response(err),
    }
}
