//! Startup wiring and the account flows that span several store calls.
//!
//! Handlers stay thin: anything that chains store operations or mixes
//! validation with persistence lives here, returning [`StoreResult`] so the
//! route layer has exactly one error type to map.

use std::sync::Arc;

use anyhow::Context as _;
use chrono::{DateTime, Duration, Utc};

use libris_auth::{
    IssuedToken, NewAccount, PolicyRegistry, TokenIssuer, TokenSubject, credentials,
    permissions::names, roles, user,
};
use libris_core::clock::{Clock, SystemClock};
use libris_core::{DomainError, RoleId, UserId};
use libris_infra::seed;
use libris_infra::store::{Store, StoreError, StoreResult, UserDetails};
use libris_members::{Member, MemberProfile};

use crate::config::AppConfig;
use crate::context::AppContext;

/// Builds the shared context: the store (Postgres when `DATABASE_URL` is
/// set, in-memory otherwise), the seeded administrator, the token issuer and
/// the policy registry.
pub async fn build_context(config: &AppConfig) -> anyhow::Result<Arc<AppContext>> {
    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => connect_postgres(url).await?,
        None => {
            tracing::warn!("DATABASE_URL not set; state lives in memory and is lost on restart");
            Arc::new(libris_infra::InMemoryStore::new())
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    if let Some(admin) = seed::ensure_admin(&*store, &config.admin, clock.now())
        .await
        .context("bootstrap administrator")?
    {
        tracing::info!(username = %admin.username, "created bootstrap administrator");
    }

    let mut tokens = TokenIssuer::new(
        config.jwt_secret.as_bytes(),
        config.token_issuer.as_str(),
        config.token_audience.as_str(),
    );
    if let Some(seconds) = config.token_ttl_seconds {
        tokens = tokens.with_ttl(Duration::seconds(seconds));
    }

    let policies = PolicyRegistry::permission_policies(names::ALL);
    Ok(Arc::new(AppContext::new(store, tokens, policies, clock)))
}

#[cfg(feature = "postgres")]
async fn connect_postgres(url: &str) -> anyhow::Result<Arc<dyn Store>> {
    let store = libris_infra::PostgresStore::connect(url)
        .await
        .context("connect to Postgres")?;
    store.migrate().await.context("run schema migration")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn connect_postgres(_url: &str) -> anyhow::Result<Arc<dyn Store>> {
    anyhow::bail!("DATABASE_URL is set but this binary was built without the postgres feature")
}

/// Verifies credentials and mints a token carrying the caller's effective
/// permissions. An unknown email and a wrong password fail identically.
pub async fn login(ctx: &AppContext, email: &str, password: &str) -> StoreResult<IssuedToken> {
    let Some(account) = ctx.store.find_user_by_email(email.trim()).await? else {
        return Err(DomainError::Unauthenticated.into());
    };
    if !credentials::verify_secret(password, &account.password_hash) {
        return Err(DomainError::Unauthenticated.into());
    }

    let role = ctx
        .store
        .role(account.role_id)
        .await?
        .ok_or_else(|| StoreError::Backend("account references a missing role".to_string()))?;
    let sources = ctx
        .store
        .permission_sources(account.id, account.role_id)
        .await?;
    let permissions = sources.resolve();

    let subject = TokenSubject {
        user_id: account.id,
        email: account.email,
        role_id: account.role_id,
        role: role.name,
    };
    ctx.tokens
        .issue(&subject, &permissions, ctx.clock.now())
        .map_err(|err| StoreError::Backend(format!("token issuance failed: {err}")))
}

/// Revokes the presented token until its own expiry and reports that instant.
/// Expired tokens are still accepted so logout never fails for being slow;
/// tokens not signed by us are rejected as unauthenticated.
pub async fn logout(ctx: &AppContext, token: &str) -> StoreResult<DateTime<Utc>> {
    let claims = ctx
        .tokens
        .decode_for_revocation(token)
        .map_err(|_| DomainError::Unauthenticated)?;
    let keep_until = claims.expires_at();
    ctx.store
        .revoke(&claims.jti, keep_until, ctx.clock.now())
        .await?;
    Ok(keep_until)
}

/// Self-service signup: a Member-role account and its profile, created as
/// one atomic unit. The profile email starts out equal to the account email.
pub async fn register(
    ctx: &AppContext,
    username: &str,
    email: &str,
    password: &str,
    name: &str,
    phone: Option<&str>,
) -> StoreResult<(UserDetails, Member)> {
    let role = ctx
        .store
        .role_by_name(roles::MEMBER)
        .await?
        .ok_or_else(|| StoreError::Backend("member role missing from seed data".to_string()))?;

    let account = NewAccount::new(username, email, password, role.id)?;
    let profile = MemberProfile::validate(name, email, phone)?;
    let (account, member) = ctx
        .store
        .register_member(account, profile, ctx.clock.now())
        .await?;
    Ok((
        UserDetails {
            account,
            role: role.name,
        },
        member,
    ))
}

/// A user joined with its role name, or `None` when the user is gone.
pub async fn user_details(ctx: &AppContext, id: UserId) -> StoreResult<Option<UserDetails>> {
    let Some(account) = ctx.store.find_user(id).await? else {
        return Ok(None);
    };
    let Some(role) = ctx.store.role(account.role_id).await? else {
        return Ok(None);
    };
    Ok(Some(UserDetails {
        account,
        role: role.name,
    }))
}

/// Administrative account creation with a caller-chosen role.
pub async fn create_user(
    ctx: &AppContext,
    username: &str,
    email: &str,
    password: &str,
    role_id: RoleId,
) -> StoreResult<UserDetails> {
    let role = ctx
        .store
        .role(role_id)
        .await?
        .ok_or_else(|| DomainError::validation("role does not exist"))?;
    let account = NewAccount::new(username, email, password, role_id)?;
    let created = ctx.store.create_user(account, ctx.clock.now()).await?;
    Ok(UserDetails {
        account: created,
        role: role.name,
    })
}

/// Changes username and email after normalizing both.
pub async fn rename_user(
    ctx: &AppContext,
    id: UserId,
    username: &str,
    email: &str,
) -> StoreResult<UserDetails> {
    let username = user::validate_username(username)?;
    let email = libris_core::email::normalize(email)?;
    let account = ctx.store.rename_user(id, username, email).await?;
    let role = ctx
        .store
        .role(account.role_id)
        .await?
        .ok_or_else(|| StoreError::Backend("account references a missing role".to_string()))?;
    Ok(UserDetails {
        account,
        role: role.name,
    })
}

/// Validates and hashes the new password, then stores the hash. Tokens
/// issued before the change stay valid until they expire or are revoked.
pub async fn set_password(ctx: &AppContext, id: UserId, password: &str) -> StoreResult<()> {
    user::validate_password(password)?;
    ctx.store
        .set_password(id, credentials::hash_secret(password))
        .await
}
