//! `libris-auth` — permission resolution and the signed-token lifecycle.
//!
//! This crate is intentionally decoupled from HTTP and storage: callers load
//! grants/denials and pass them in, and the token issuer only needs a key and
//! a clock reading.

pub mod claims;
pub mod credentials;
pub mod permissions;
pub mod policy;
pub mod resolver;
pub mod roles;
pub mod token;
pub mod user;

pub use claims::AccessClaims;
pub use permissions::{Permission, PermissionGrant};
pub use policy::{AccessRequirement, PolicyRegistry, evaluate_requirement};
pub use resolver::{PermissionSources, resolve_effective_permissions};
pub use roles::RoleName;
pub use token::{IssuedToken, TokenError, TokenIssuer, TokenSubject};
pub use user::{NewAccount, Role, UserAccount};
