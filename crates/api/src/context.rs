//! Shared application state handed to every handler.

use std::sync::Arc;

use libris_auth::{AccessClaims, PolicyRegistry, TokenIssuer};
use libris_core::UserId;
use libris_core::clock::Clock;
use libris_infra::store::Store;

/// Long-lived dependencies built once at startup and cloned into the router.
pub struct AppContext {
    /// Persistence backend behind the store traits.
    pub store: Arc<dyn Store>,
    /// Issues and verifies bearer tokens.
    pub tokens: TokenIssuer,
    /// Registered authorization policies, one per known permission.
    pub policies: PolicyRegistry,
    /// Time source; tests swap in a fixed clock.
    pub clock: Arc<dyn Clock>,
}

impl AppContext {
    pub fn new(
        store: Arc<dyn Store>,
        tokens: TokenIssuer,
        policies: PolicyRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, tokens, policies, clock }
    }
}

/// The authenticated caller, inserted into request extensions by the
/// bearer-token middleware once verification and the revocation check pass.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub claims: AccessClaims,
}

impl CurrentUser {
    /// Identifier of the account the token was issued to.
    pub fn user_id(&self) -> UserId {
        self.claims.sub
    }
}
