//! End-to-end tests of the request pipeline against a mock GraphQL server
//!
//! These exercise the reqwest transport together with every stage:
//! - Auth recovery: 401, refresh mutation, replay with the rotated token
//! - Retry of queries on server and rate-limit failures
//! - Mutations are sent exactly once
//! - Partial GraphQL errors

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use nestlink_core::{
    Classification, ClientConfig, Disposition, Error, MemorySecretStore, NestClient, Operation,
    SessionEndReason, Session,
};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

// ============================================================================
// Test Helpers
// ============================================================================

/// A JWT-shaped token expiring at `exp`
fn jwt(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"user-1","exp":{}}}"#, exp));
    format!("{}.{}.sig", header, payload)
}

fn in_an_hour(offset: i64) -> String {
    jwt(chrono::Utc::now().timestamp() + 3600 + offset)
}

async fn client_for(server: &MockServer, session: Option<Session>) -> NestClient {
    let mut config = ClientConfig::new(format!("{}/graphql", server.uri()));
    config.retry.linear_step_ms = 10;
    config.retry.rate_limit_base_ms = 10;

    let store = match session {
        Some(session) => MemorySecretStore::with_session(session),
        None => MemorySecretStore::new(),
    };
    NestClient::new(config, Arc::new(store)).unwrap()
}

fn data(value: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "data": value }))
}

/// Responds with `first` once, then `then` for every later request
fn first_then(first: ResponseTemplate, then: ResponseTemplate) -> impl Fn(&Request) -> ResponseTemplate {
    let calls = AtomicUsize::new(0);
    move |_req: &Request| {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            first.clone()
        } else {
            then.clone()
        }
    }
}

// ============================================================================
// Auth recovery
// ============================================================================

#[tokio::test]
async fn test_unauthorized_query_refreshes_and_replays() {
    let server = MockServer::start().await;
    let old = in_an_hour(0);
    let new = in_an_hour(60);

    Mock::given(method("POST"))
        .and(body_string_contains("RefreshToken"))
        .respond_with(data(json!({
            "refreshToken": { "success": true, "accessToken": new, "refreshToken": "refresh-2" }
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", format!("Bearer {}", old).as_str()))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "jwt expired" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", format!("Bearer {}", new).as_str()))
        .respond_with(data(json!({ "me": { "id": "u1" } })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Some(Session::new(old, "refresh-1"))).await;
    let response = client.execute(Operation::query("query Me { me { id } }")).await.unwrap();

    assert_eq!(response.data.unwrap()["me"]["id"], "u1");
    let session = client.session().await.unwrap().unwrap();
    assert_eq!(session.access_token, new);
    assert_eq!(session.refresh_token, "refresh-2");
}

#[tokio::test]
async fn test_rejected_refresh_ends_session() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_string_contains("RefreshToken"))
        .respond_with(data(json!({
            "refreshToken": { "success": false, "error": "invalid_grant" }
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Some(Session::new(in_an_hour(0), "refresh-1"))).await;
    let error = client
        .execute(Operation::query("query Me { me { id } }"))
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        Error::SessionEnded { reason: SessionEndReason::Rejected, .. }
    ));
    assert_eq!(error.disposition(), Disposition::SessionEnded);
    assert!(client.session().await.unwrap().is_none());
    assert_eq!(client.ensure_valid_token().await.unwrap(), None);
}

#[tokio::test]
async fn test_requests_carry_compliance_headers() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(header("x-client-name", "nestlink"))
        .respond_with(data(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, None).await;
    client.execute(Operation::query("{ ok }")).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("authorization").is_none());
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test]
async fn test_query_retried_after_server_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(first_then(
            ResponseTemplate::new(503),
            data(json!({ "supplies": [] })),
        ))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server, None).await;
    let response = client
        .execute(Operation::query("query Supplies { supplies { id } }"))
        .await
        .unwrap();
    assert_eq!(response.data.unwrap()["supplies"], json!([]));
}

#[tokio::test]
async fn test_query_gives_up_after_budget() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_for(&server, None).await;
    let error = client
        .execute(Operation::query("{ supplies { id } }"))
        .await
        .unwrap_err();

    assert_eq!(error.classification(), Some(Classification::Server));
    assert_eq!(error.disposition(), Disposition::Transient);
}

#[tokio::test]
async fn test_mutation_sent_exactly_once() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, None).await;
    let error = client
        .execute(Operation::mutation(
            "mutation LogChange($count: Int!) { logChange(count: $count) { id } }",
        ).with_variables(json!({ "count": 2 })))
        .await
        .unwrap_err();

    assert_eq!(error.classification(), Some(Classification::Server));
}

#[tokio::test]
async fn test_rate_limit_honours_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(first_then(
            ResponseTemplate::new(429).insert_header("Retry-After", "1"),
            data(json!({ "ok": true })),
        ))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server, None).await;
    let started = Instant::now();
    client.execute(Operation::query("{ ok }")).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(1000));
}

// ============================================================================
// GraphQL envelopes
// ============================================================================

#[tokio::test]
async fn test_partial_errors_are_returned_with_data() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "household": { "id": "h1", "supplies": null } },
            "errors": [{ "message": "supplies unavailable", "extensions": { "code": "NOT_FOUND" } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, None).await;
    let response = client.execute(Operation::query("{ household { id supplies } }")).await.unwrap();

    assert_eq!(response.data.unwrap()["household"]["id"], "h1");
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].code(), Some("NOT_FOUND"));
}

#[tokio::test]
async fn test_errors_without_data_are_fatal() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "errors": [{ "message": "not allowed", "extensions": { "code": "FORBIDDEN" } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, None).await;
    let error = client.execute(Operation::query("{ admin }")).await.unwrap_err();

    assert_eq!(error.classification(), Some(Classification::ClientFatal));
    assert_eq!(error.disposition(), Disposition::Invalid);
}
