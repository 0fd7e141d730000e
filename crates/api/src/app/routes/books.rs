use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::Datelike;

use libris_auth::permissions::names;
use libris_catalog::{BookDraft, BookQuery};
use libris_core::BookId;

use crate::app::dto::{AppJson, AppQuery};
use crate::app::errors;
use crate::authz;
use crate::context::{AppContext, CurrentUser};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_books).post(create_book))
        .route("/export", get(export_books))
        .route("/:id", get(get_book).put(update_book).delete(delete_book))
}

pub async fn list_books(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    AppQuery(query): AppQuery<BookQuery>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&ctx, &user, names::BOOK_READ) {
        return resp;
    }
    match ctx.store.list_books(&query).await {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn export_books(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    AppQuery(query): AppQuery<BookQuery>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&ctx, &user, names::BOOK_READ) {
        return resp;
    }
    match ctx.store.export_books(&query).await {
        Ok(items) => (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response(),
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn get_book(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&ctx, &user, names::BOOK_READ) {
        return resp;
    }
    let id: BookId = match id.parse() {
        Ok(id) => id,
        Err(err) => return errors::domain_error_response(err),
    };
    match ctx.store.get_book(id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "book not found"),
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn create_book(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    AppJson(draft): AppJson<BookDraft>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&ctx, &user, names::BOOK_CREATE) {
        return resp;
    }
    let book = match draft.validate(ctx.clock.now().year()) {
        Ok(book) => book,
        Err(err) => return errors::domain_error_response(err),
    };
    match ctx.store.create_book(book).await {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn update_book(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    AppJson(draft): AppJson<BookDraft>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&ctx, &user, names::BOOK_UPDATE) {
        return resp;
    }
    let id: BookId = match id.parse() {
        Ok(id) => id,
        Err(err) => return errors::domain_error_response(err),
    };
    let book = match draft.validate(ctx.clock.now().year()) {
        Ok(book) => book,
        Err(err) => return errors::domain_error_response(err),
    };
    match ctx.store.update_book(id, book).await {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(err) => errors::store_error_response(err),
    }
}

pub async fn delete_book(
    Extension(ctx): Extension<Arc<AppContext>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&ctx, &user, names::BOOK_DELETE) {
        return resp;
    }
    let id: BookId = match id.parse() {
        Ok(id) => id,
        Err(err) => return errors::domain_error_response(err),
    };
    match ctx.store.delete_book(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => errors::store_error_response(err),
    }
}
