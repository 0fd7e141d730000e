//! Axum application assembly.
//!
//! Layout of this folder:
//! - `services.rs`: startup wiring and multi-step account flows
//! - `routes/`: HTTP routes and handlers, one file per resource
//! - `dto.rs`: request/response DTOs and the strict extractors
//! - `errors.rs`: the error-to-response mapping

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::context::AppContext;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router around an already-constructed context.
///
/// Everything outside `/healthz` and `/auth/{login,register,logout}` sits
/// behind the bearer-token gate.
pub fn build_app(ctx: Arc<AppContext>) -> Router {
    let protected = routes::router().layer(axum::middleware::from_fn_with_state(
        ctx.clone(),
        middleware::require_auth,
    ));

    Router::new()
        .route("/healthz", get(routes::system::health))
        .nest("/auth", routes::auth::public_router())
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::request_log))
                .layer(Extension(ctx)),
        )
}
