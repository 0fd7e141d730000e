//! Infrastructure layer: persistence backends and first-run seed data.
//!
//! The domain crates never touch IO. Everything stateful goes through the
//! store traits in [`store`], which exist in two implementations: an
//! in-memory backend for tests and single-node deployments, and a Postgres
//! backend (behind the `postgres` feature) for everything else.

pub mod seed;
pub mod store;

pub use store::memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use store::postgres::PostgresStore;
pub use store::{
    BorrowDetails, CatalogStore, CirculationStore, IdentityStore, MemberStore, RevocationStore,
    RevokedToken, Store, StoreError, StoreResult, UserDetails,
};
