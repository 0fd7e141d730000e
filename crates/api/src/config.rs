//! Environment-driven server configuration.
//!
//! Every knob has a development default so `cargo run` works out of the box;
//! anything security-sensitive logs a warning when the default is used.

use std::env;

use libris_infra::seed::AdminBootstrap;

/// Settings assembled from the process environment at startup.
pub struct AppConfig {
    /// Socket address the server binds, from `LIBRIS_BIND_ADDR`.
    pub bind_addr: String,
    /// HMAC secret for access tokens, from `JWT_SECRET`.
    pub jwt_secret: String,
    /// `iss` claim stamped into issued tokens, from `JWT_ISSUER`.
    pub token_issuer: String,
    /// `aud` claim stamped into issued tokens, from `JWT_AUDIENCE`.
    pub token_audience: String,
    /// Overrides the default token lifetime when `TOKEN_TTL_SECONDS` is set.
    pub token_ttl_seconds: Option<i64>,
    /// Postgres connection string; the in-memory store is used when unset.
    pub database_url: Option<String>,
    /// Credentials for the administrator account seeded on startup.
    pub admin: AdminBootstrap,
}

impl AppConfig {
    /// Reads the configuration from the environment.
    pub fn from_env() -> Self {
        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => secret,
            _ => {
                tracing::warn!("JWT_SECRET not set; using insecure dev default");
                "dev-secret".to_string()
            }
        };
        let admin_password = match env::var("ADMIN_PASSWORD") {
            Ok(password) if !password.trim().is_empty() => password,
            _ => {
                tracing::warn!("ADMIN_PASSWORD not set; using insecure dev default");
                "admin123".to_string()
            }
        };
        let token_ttl_seconds = env::var("TOKEN_TTL_SECONDS").ok().and_then(|raw| {
            match raw.parse::<i64>() {
                Ok(seconds) if seconds > 0 => Some(seconds),
                _ => {
                    tracing::warn!(value = %raw, "ignoring invalid TOKEN_TTL_SECONDS");
                    None
                }
            }
        });

        Self {
            bind_addr: env_or("LIBRIS_BIND_ADDR", "0.0.0.0:8080"),
            jwt_secret,
            token_issuer: env_or("JWT_ISSUER", "libris"),
            token_audience: env_or("JWT_AUDIENCE", "libris-clients"),
            token_ttl_seconds,
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty()),
            admin: AdminBootstrap {
                username: env_or("ADMIN_USERNAME", "admin"),
                email: env_or("ADMIN_EMAIL", "admin@libris.local"),
                password: admin_password,
            },
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
