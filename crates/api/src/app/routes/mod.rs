use axum::{Router, routing::get};

pub mod auth;
pub mod books;
pub mod borrows;
pub mod members;
pub mod system;
pub mod users;

/// Router for every endpoint behind the bearer-token gate.
pub fn router() -> Router {
    Router::new()
        .route("/auth/me", get(auth::me))
        .nest("/books", books::router())
        .nest("/members", members::router())
        .nest("/borrows", borrows::router())
        .nest("/users", users::router())
}
