use std::sync::Arc;

use chrono::{Duration, Utc};
use reqwest::StatusCode;
use serde_json::json;

use libris_api::app;
use libris_api::context::AppContext;
use libris_auth::{PolicyRegistry, TokenIssuer, permissions::names};
use libris_core::clock::{Clock, FixedClock, SystemClock};
use libris_infra::seed::{self, AdminBootstrap};
use libris_infra::store::Store;
use libris_infra::InMemoryStore;

const ADMIN_EMAIL: &str = "root@libris.test";
const ADMIN_PASSWORD: &str = "rootpass";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Same router as production, on an in-memory store and an ephemeral
    /// port, with a known administrator seeded.
    async fn spawn() -> Self {
        Self::spawn_with_clock(Arc::new(SystemClock)).await
    }

    async fn spawn_with_clock(clock: Arc<dyn Clock>) -> Self {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let admin = AdminBootstrap {
            username: "root".to_string(),
            email: ADMIN_EMAIL.to_string(),
            password: ADMIN_PASSWORD.to_string(),
        };
        seed::ensure_admin(&*store, &admin, Utc::now())
            .await
            .expect("failed to seed admin");

        let tokens = TokenIssuer::new(b"black-box-secret", "libris", "libris-clients");
        let policies = PolicyRegistry::permission_policies(names::ALL);
        let ctx = Arc::new(AppContext::new(store, tokens, policies, clock));
        let router = app::build_app(ctx);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{addr}");

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn login(
    client: &reqwest::Client,
    base: &str,
    email: &str,
    password: &str,
) -> reqwest::Response {
    client
        .post(format!("{base}/auth/login"))
        .json(&json!({ "email": email, "password": password }))
        .send()
        .await
        .unwrap()
}

async fn token_for(client: &reqwest::Client, base: &str, email: &str, password: &str) -> String {
    let res = login(client, base, email, password).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    body["token"].as_str().unwrap().to_string()
}

async fn register(
    client: &reqwest::Client,
    base: &str,
    username: &str,
    email: &str,
    password: &str,
    name: &str,
) -> serde_json::Value {
    let res = client
        .post(format!("{base}/auth/register"))
        .json(&json!({
            "username": username,
            "email": email,
            "password": password,
            "name": name,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    res.json().await.unwrap()
}

async fn create_book(
    client: &reqwest::Client,
    base: &str,
    token: &str,
    title: &str,
    isbn: Option<&str>,
    copies: u32,
) -> serde_json::Value {
    let res = client
        .post(format!("{base}/books"))
        .bearer_auth(token)
        .json(&json!({
            "title": title,
            "author": "Pat Writer",
            "year": 2020,
            "isbn": isbn,
            "copies_count": copies,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    res.json().await.unwrap()
}

async fn role_id_by_name(
    client: &reqwest::Client,
    base: &str,
    admin_token: &str,
    name: &str,
) -> String {
    let res = client
        .get(format!("{base}/users/roles"))
        .bearer_auth(admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let roles: serde_json::Value = res.json().await.unwrap();
    roles
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["name"] == name)
        .unwrap_or_else(|| panic!("role {name} not seeded"))["id"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn health_is_open_and_everything_else_is_gated() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/healthz", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // No credentials, malformed credentials and a forged token all produce
    // the same body.
    let res = client
        .get(format!("{}/books", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let no_creds: serde_json::Value = res.json().await.unwrap();
    assert_eq!(no_creds["error"], "unauthenticated");

    let res = client
        .get(format!("{}/books", srv.base_url))
        .bearer_auth("not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let garbage: serde_json::Value = res.json().await.unwrap();
    assert_eq!(garbage, no_creds);
}

#[tokio::test]
async fn login_returns_the_claims_snapshot() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    // Email matching ignores case and padding.
    let res = login(&client, &srv.base_url, "  Root@LIBRIS.test ", ADMIN_PASSWORD).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["role"], "Admin");
    assert_eq!(body["permissions"].as_array().unwrap().len(), 12);
    assert!(body["expires_at"].is_string());

    let token = body["token"].as_str().unwrap();
    let res = client
        .get(format!("{}/auth/me", srv.base_url))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let me: serde_json::Value = res.json().await.unwrap();
    assert_eq!(me["email"], ADMIN_EMAIL);
    assert_eq!(me["role"], "Admin");
    assert_eq!(me["permissions"], body["permissions"]);

    // Wrong password and unknown email fail identically.
    let wrong_pass = login(&client, &srv.base_url, ADMIN_EMAIL, "nope-nope").await;
    assert_eq!(wrong_pass.status(), StatusCode::UNAUTHORIZED);
    let wrong_pass: serde_json::Value = wrong_pass.json().await.unwrap();
    let unknown = login(&client, &srv.base_url, "ghost@libris.test", ADMIN_PASSWORD).await;
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    let unknown: serde_json::Value = unknown.json().await.unwrap();
    assert_eq!(wrong_pass, unknown);

    // Missing fields are a 400, not a 401.
    let res = client
        .post(format!("{}/auth/login", srv.base_url))
        .json(&json!({ "email": "", "password": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn logout_revokes_the_token_immediately() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let token = token_for(&client, &srv.base_url, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let res = client
        .get(format!("{}/books", srv.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .post(format!("{}/auth/logout", srv.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert!(body["revoked_until"].is_string());

    let res = client
        .get(format!("{}/books", srv.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // Revoking twice is a conflict, not a silent success.
    let res = client
        .post(format!("{}/auth/logout", srv.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "already_revoked");

    // Without a bearer header there is nothing to revoke.
    let res = client
        .post(format!("{}/auth/logout", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn registered_members_can_read_books_and_nothing_else() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let created = register(
        &client,
        &srv.base_url,
        "casey",
        "casey@libris.test",
        "casepass",
        "Casey Reads",
    )
    .await;
    assert_eq!(created["user"]["role"], "Member");
    assert_eq!(created["member"]["email"], "casey@libris.test");
    assert!(created["user"].get("password_hash").is_none());

    let res = login(&client, &srv.base_url, "casey@libris.test", "casepass").await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["permissions"], json!(["book.read"]));
    let token = body["token"].as_str().unwrap();

    let res = client
        .get(format!("{}/books", srv.base_url))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .post(format!("{}/books", srv.base_url))
        .bearer_auth(token)
        .json(&json!({
            "title": "Sneaky Insert",
            "author": "Casey Reads",
            "year": 2020,
            "copies_count": 1,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .get(format!("{}/members", srv.base_url))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // Duplicate registration on either unique field conflicts.
    let res = client
        .post(format!("{}/auth/register", srv.base_url))
        .json(&json!({
            "username": "casey2",
            "email": "Casey@libris.test",
            "password": "casepass",
            "name": "Casey Again",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "duplicate_email");
}

#[tokio::test]
async fn book_crud_round_trip_with_conflicts() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let token = token_for(&client, &srv.base_url, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let book = create_book(
        &client,
        &srv.base_url,
        &token,
        "The Pragmatic Programmer",
        Some("978-0-13-595705-9"),
        3,
    )
    .await;
    let id = book["id"].as_str().unwrap();
    assert_eq!(book["available_copies"], 3);
    assert_eq!(book["active_borrow_count"], 0);

    // Same ISBN, different punctuation: rejected on the normalized form.
    let res = client
        .post(format!("{}/books", srv.base_url))
        .bearer_auth(&token)
        .json(&json!({
            "title": "Shadow Copy",
            "author": "Pat Writer",
            "year": 2020,
            "isbn": "9780135957059",
            "copies_count": 1,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "duplicate_isbn");

    let res = client
        .put(format!("{}/books/{id}", srv.base_url))
        .bearer_auth(&token)
        .json(&json!({
            "title": "The Pragmatic Programmer, 20th Anniversary",
            "author": "Pat Writer",
            "year": 2019,
            "isbn": "978-0-13-595705-9",
            "copies_count": 5,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let updated: serde_json::Value = res.json().await.unwrap();
    assert_eq!(updated["copies_count"], 5);
    assert_eq!(updated["id"], book["id"]);

    let res = client
        .get(format!("{}/books/not-a-uuid", srv.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_id");

    let res = client
        .get(format!(
            "{}/books/00000000-0000-7000-8000-000000000000",
            srv.base_url
        ))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // A future year is a validation failure.
    let res = client
        .post(format!("{}/books", srv.base_url))
        .bearer_auth(&token)
        .json(&json!({
            "title": "From Tomorrow",
            "author": "Pat Writer",
            "year": 2999,
            "copies_count": 1,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn borrow_lifecycle_enforces_the_ledger_rules() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let admin = token_for(&client, &srv.base_url, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let first = register(
        &client,
        &srv.base_url,
        "ada",
        "ada@libris.test",
        "adapass42",
        "Ada Lovelace",
    )
    .await;
    let second = register(
        &client,
        &srv.base_url,
        "grace",
        "grace@libris.test",
        "gracepass",
        "Grace Hopper",
    )
    .await;
    let ada = first["member"]["id"].as_str().unwrap();
    let grace = second["member"]["id"].as_str().unwrap();

    let book = create_book(&client, &srv.base_url, &admin, "Single Copy", None, 1).await;
    let book_id = book["id"].as_str().unwrap();

    let res = client
        .post(format!("{}/borrows", srv.base_url))
        .bearer_auth(&admin)
        .json(&json!({ "member_id": ada, "book_id": book_id, "duration_days": 14 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let borrow: serde_json::Value = res.json().await.unwrap();
    let borrow_id = borrow["id"].as_str().unwrap();
    assert!(borrow["returned_at"].is_null());

    // The same member cannot hold the same book twice; the duplicate check
    // fires before availability.
    let res = client
        .post(format!("{}/borrows", srv.base_url))
        .bearer_auth(&admin)
        .json(&json!({ "member_id": ada, "book_id": book_id, "duration_days": 7 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "duplicate_active_borrow");

    // Someone else is out of luck while the only copy is lent.
    let res = client
        .post(format!("{}/borrows", srv.base_url))
        .bearer_auth(&admin)
        .json(&json!({ "member_id": grace, "book_id": book_id, "duration_days": 7 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "no_copies_available");

    let res = client
        .get(format!("{}/borrows/{borrow_id}", srv.base_url))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let view: serde_json::Value = res.json().await.unwrap();
    assert_eq!(view["status"], "Active");
    assert_eq!(view["book_title"], "Single Copy");
    assert_eq!(view["member_name"], "Ada Lovelace");
    assert_eq!(view["overdue_days"], 0);

    let res = client
        .post(format!("{}/borrows/{borrow_id}/return", srv.base_url))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let returned: serde_json::Value = res.json().await.unwrap();
    assert!(returned["returned_at"].is_string());

    let res = client
        .post(format!("{}/borrows/{borrow_id}/return", srv.base_url))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "already_returned");

    // The returned copy is lendable again.
    let res = client
        .post(format!("{}/borrows", srv.base_url))
        .bearer_auth(&admin)
        .json(&json!({ "member_id": grace, "book_id": book_id, "duration_days": 7 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    // History pins the book.
    let res = client
        .delete(format!("{}/books/{book_id}", srv.base_url))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "has_borrow_history");
}

#[tokio::test]
async fn borrow_duration_bounds_are_enforced() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let admin = token_for(&client, &srv.base_url, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let created = register(
        &client,
        &srv.base_url,
        "ada",
        "ada@libris.test",
        "adapass42",
        "Ada Lovelace",
    )
    .await;
    let member = created["member"]["id"].as_str().unwrap();
    let book = create_book(&client, &srv.base_url, &admin, "Bounded", None, 2).await;
    let book_id = book["id"].as_str().unwrap();

    for days in [0, 366] {
        let res = client
            .post(format!("{}/borrows", srv.base_url))
            .bearer_auth(&admin)
            .json(&json!({ "member_id": member, "book_id": book_id, "duration_days": days }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "duration {days}");
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["error"], "validation_error");
    }

    // A borrow against a non-existent member is a validation failure too.
    let res = client
        .post(format!("{}/borrows", srv.base_url))
        .bearer_auth(&admin)
        .json(&json!({
            "member_id": "00000000-0000-7000-8000-000000000000",
            "book_id": book_id,
            "duration_days": 7,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn overdue_classification_follows_the_clock() {
    // Domain time is pinned and advanced by hand. Tokens stay valid because
    // their lifetime is checked against wall-clock time, which does not move.
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let srv = TestServer::spawn_with_clock(clock.clone()).await;
    let client = reqwest::Client::new();
    let admin = token_for(&client, &srv.base_url, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let created = register(
        &client,
        &srv.base_url,
        "ada",
        "ada@libris.test",
        "adapass42",
        "Ada Lovelace",
    )
    .await;
    let member = created["member"]["id"].as_str().unwrap();
    let book = create_book(&client, &srv.base_url, &admin, "Short Loan", None, 1).await;
    let book_id = book["id"].as_str().unwrap();

    let res = client
        .post(format!("{}/borrows", srv.base_url))
        .bearer_auth(&admin)
        .json(&json!({ "member_id": member, "book_id": book_id, "duration_days": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let borrow: serde_json::Value = res.json().await.unwrap();
    let borrow_id = borrow["id"].as_str().unwrap();

    // Three days after a one-day loan: two whole days past due.
    clock.advance(Duration::days(3));
    let res = client
        .get(format!("{}/borrows/{borrow_id}", srv.base_url))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let view: serde_json::Value = res.json().await.unwrap();
    assert_eq!(view["status"], "Overdue");
    assert_eq!(view["overdue_days"], 2);

    let res = client
        .post(format!("{}/borrows/{borrow_id}/return", srv.base_url))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // Lateness is frozen at the return instant, however much later we look.
    clock.advance(Duration::days(30));
    let res = client
        .get(format!("{}/borrows/{borrow_id}", srv.base_url))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let view: serde_json::Value = res.json().await.unwrap();
    assert_eq!(view["status"], "Returned (Late)");
    assert_eq!(view["overdue_days"], 2);
}

#[tokio::test]
async fn token_permissions_stay_frozen_until_reissue() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let admin = token_for(&client, &srv.base_url, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let created = register(
        &client,
        &srv.base_url,
        "casey",
        "casey@libris.test",
        "casepass",
        "Casey Reads",
    )
    .await;
    let user_id = created["user"]["id"].as_str().unwrap();
    let member_token = token_for(&client, &srv.base_url, "casey@libris.test", "casepass").await;

    let book = json!({
        "title": "Promotion Test",
        "author": "Pat Writer",
        "year": 2020,
        "copies_count": 1,
    });
    let res = client
        .post(format!("{}/books", srv.base_url))
        .bearer_auth(&member_token)
        .json(&book)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // Promote the account to Employee.
    let employee = role_id_by_name(&client, &srv.base_url, &admin, "Employee").await;
    let res = client
        .put(format!("{}/users/{user_id}/role", srv.base_url))
        .bearer_auth(&admin)
        .json(&json!({ "role_id": employee }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    // The old token still carries the old snapshot.
    let res = client
        .post(format!("{}/books", srv.base_url))
        .bearer_auth(&member_token)
        .json(&book)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // A fresh login picks up the new role.
    let fresh = token_for(&client, &srv.base_url, "casey@libris.test", "casepass").await;
    let res = client
        .post(format!("{}/books", srv.base_url))
        .bearer_auth(&fresh)
        .json(&book)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn user_administration_is_admin_only() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let admin = token_for(&client, &srv.base_url, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    register(
        &client,
        &srv.base_url,
        "casey",
        "casey@libris.test",
        "casepass",
        "Casey Reads",
    )
    .await;
    let member_token = token_for(&client, &srv.base_url, "casey@libris.test", "casepass").await;

    let res = client
        .get(format!("{}/users", srv.base_url))
        .bearer_auth(&member_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .get(format!("{}/users", srv.base_url))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let users: serde_json::Value = res.json().await.unwrap();
    assert_eq!(users.as_array().unwrap().len(), 2);

    let employee_role = role_id_by_name(&client, &srv.base_url, &admin, "Employee").await;
    let res = client
        .post(format!("{}/users", srv.base_url))
        .bearer_auth(&admin)
        .json(&json!({
            "username": "lin",
            "email": "lin@libris.test",
            "password": "linpass",
            "role_id": employee_role,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let lin: serde_json::Value = res.json().await.unwrap();
    let lin_id = lin["id"].as_str().unwrap();
    assert_eq!(lin["role"], "Employee");

    let res = client
        .put(format!("{}/users/{lin_id}", srv.base_url))
        .bearer_auth(&admin)
        .json(&json!({ "username": "lin-w", "email": "lin.w@libris.test" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let renamed: serde_json::Value = res.json().await.unwrap();
    assert_eq!(renamed["username"], "lin-w");
    assert_eq!(renamed["email"], "lin.w@libris.test");

    let res = client
        .put(format!("{}/users/{lin_id}/password", srv.base_url))
        .bearer_auth(&admin)
        .json(&json!({ "password": "new-secret" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = login(&client, &srv.base_url, "lin.w@libris.test", "linpass").await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let res = login(&client, &srv.base_url, "lin.w@libris.test", "new-secret").await;
    assert_eq!(res.status(), StatusCode::OK);

    // A short replacement password never reaches the store.
    let res = client
        .put(format!("{}/users/{lin_id}/password", srv.base_url))
        .bearer_auth(&admin)
        .json(&json!({ "password": "tiny" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .delete(format!("{}/users/{lin_id}", srv.base_url))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = login(&client, &srv.base_url, "lin.w@libris.test", "new-secret").await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn listings_page_and_count_consistently() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let admin = token_for(&client, &srv.base_url, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    create_book(&client, &srv.base_url, &admin, "Alpha", None, 1).await;
    create_book(&client, &srv.base_url, &admin, "Beta", None, 1).await;
    let newest = create_book(&client, &srv.base_url, &admin, "Gamma", None, 1).await;

    let res = client
        .get(format!("{}/books?page=1&page_size=2", srv.base_url))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let page: serde_json::Value = res.json().await.unwrap();
    assert_eq!(page["items"].as_array().unwrap().len(), 2);
    assert_eq!(page["total"], 3);
    assert_eq!(page["total_pages"], 2);
    assert_eq!(page["page_size"], 2);
    // Default order is newest first.
    assert_eq!(page["items"][0]["id"], newest["id"]);

    let res = client
        .get(format!("{}/books?page=2&page_size=2", srv.base_url))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    let page: serde_json::Value = res.json().await.unwrap();
    assert_eq!(page["items"].as_array().unwrap().len(), 1);

    // Title search narrows the listing.
    let res = client
        .get(format!("{}/books?q=bet", srv.base_url))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    let page: serde_json::Value = res.json().await.unwrap();
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["title"], "Beta");

    // Export returns the filtered rows without paging.
    let res = client
        .get(format!("{}/books/export", srv.base_url))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let export: serde_json::Value = res.json().await.unwrap();
    assert_eq!(export["items"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn member_profile_self_service_and_email_sync() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let admin = token_for(&client, &srv.base_url, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let created = register(
        &client,
        &srv.base_url,
        "ada",
        "ada@libris.test",
        "adapass42",
        "Ada Lovelace",
    )
    .await;
    let member_id = created["member"]["id"].as_str().unwrap();
    let member_token = token_for(&client, &srv.base_url, "ada@libris.test", "adapass42").await;

    let res = client
        .get(format!("{}/members/me", srv.base_url))
        .bearer_auth(&member_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let me: serde_json::Value = res.json().await.unwrap();
    assert_eq!(me["name"], "Ada Lovelace");

    // The seeded Member role does not carry member.update, so even the own
    // profile stays read-only for members.
    let res = client
        .put(format!("{}/members/me", srv.base_url))
        .bearer_auth(&member_token)
        .json(&json!({ "name": "Ada L.", "email": "ada@libris.test" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // Staff accounts have no member profile behind /members/me.
    let res = client
        .get(format!("{}/members/me", srv.base_url))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // An admin-side profile update rewrites the login email too.
    let res = client
        .put(format!("{}/members/{member_id}", srv.base_url))
        .bearer_auth(&admin)
        .json(&json!({
            "name": "Ada King",
            "email": "ada.king@libris.test",
            "phone": "555-0100",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let updated: serde_json::Value = res.json().await.unwrap();
    assert_eq!(updated["name"], "Ada King");
    assert_eq!(updated["phone"], "555-0100");

    let res = login(&client, &srv.base_url, "ada@libris.test", "adapass42").await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let res = login(&client, &srv.base_url, "ada.king@libris.test", "adapass42").await;
    assert_eq!(res.status(), StatusCode::OK);

    // Deleting the member profile is reserved for the Admin role.
    let res = client
        .delete(format!("{}/members/{member_id}", srv.base_url))
        .bearer_auth(&member_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .delete(format!("{}/members/{member_id}", srv.base_url))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
}
