//! Request-level middleware: the bearer-token gate and access logging.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method, header},
    middleware::Next,
    response::Response,
};

use crate::app::errors;
use crate::context::{AppContext, CurrentUser};

/// Verifies the bearer token and checks it against the revocation list before
/// letting the request through. Every rejection returns the same 401 body so
/// the response does not reveal whether a token exists, is malformed, expired,
/// or revoked; the distinction goes to the debug log instead.
pub async fn require_auth(
    State(ctx): State<Arc<AppContext>>,
    mut req: Request,
    next: Next,
) -> Result<Response, Response> {
    let Some(token) = bearer_token(req.headers()) else {
        tracing::debug!("rejected request without bearer credentials");
        return Err(errors::unauthenticated());
    };

    let claims = match ctx.tokens.verify(token) {
        Ok(claims) => claims,
        Err(err) => {
            tracing::debug!(error = %err, "rejected token that failed verification");
            return Err(errors::unauthenticated());
        }
    };

    match ctx.store.is_revoked(&claims.jti).await {
        Ok(false) => {}
        Ok(true) => {
            tracing::debug!(jti = %claims.jti, "rejected revoked token");
            return Err(errors::unauthenticated());
        }
        Err(err) => return Err(errors::store_error_response(err)),
    }

    req.extensions_mut().insert(CurrentUser { claims });
    Ok(next.run(req).await)
}

/// Pulls the token out of `Authorization: Bearer <token>`. Shared with the
/// logout handler, which needs the raw token rather than verified claims.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() { None } else { Some(token) }
}

/// Logs one line per finished request. If the connection drops before the
/// handler produces a response, the guard's destructor records it as a 499.
pub async fn request_log(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let mut guard = DisconnectGuard {
        method: method.clone(),
        path: path.clone(),
        armed: true,
    };

    let response = next.run(req).await;
    guard.armed = false;

    tracing::info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

/// Armed while a request is in flight; dropping it without disarming means
/// the response future was cancelled, which only happens when the client went
/// away first.
struct DisconnectGuard {
    method: Method,
    path: String,
    armed: bool,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(
                method = %self.method,
                path = %self.path,
                status = 499u16,
                "client disconnected before the response was ready"
            );
        }
    }
}
