//! HTTP surface of the library service.
//!
//! The crate wires the domain crates to an [`axum`] application: request
//! extractors and DTOs, the bearer-token gate, per-resource routers, and the
//! translation of [`libris_core::DomainError`] values into JSON responses.

pub mod app;
pub mod authz;
pub mod config;
pub mod context;
pub mod middleware;
