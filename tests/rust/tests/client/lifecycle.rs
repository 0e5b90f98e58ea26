//! Readiness gate, context, reconnect and close

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use pretty_assertions::assert_eq;
use serde_json::json;
use tests::async_helpers::with_timeout;
use tests::events::{collect_events, wait_for_event};
use tests::fixtures::{session_for, session_json};
use tests::scope::FakeScope;
use tests::{ClientEvent, ScopeError, TokenState, INSTANCE_ID};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, ResponseTemplate};

// =============================================================================
// Readiness
// =============================================================================

#[tokio::test]
async fn test_ready_emits_readable_and_fills_context() {
    tests::init_test_logging();
    let scope = FakeScope::start().await;
    let client = scope.client();
    let mut events = client.events();

    with_timeout(client.ready()).await.unwrap();
    assert!(client.is_ready());
    assert_eq!(client.token_state(), Some(TokenState::Readable));
    assert_eq!(client.context().instance_id().as_deref(), Some(INSTANCE_ID));
    assert_eq!(client.context().deployment_id().as_deref(), Some(tests::DEPLOYMENT_ID));
    // Credential fields never reach the context
    assert!(client.context().get("token").is_none());
    assert!(client.context().is_original());

    let readable = wait_for_event(&mut events, Duration::from_secs(2), |e| {
        matches!(e, ClientEvent::Readable)
    })
    .await;
    assert!(readable.is_some());
}

#[tokio::test]
async fn test_queued_operations_run_after_session_is_ready() {
    let scope = FakeScope::bare().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(session_json("tok-1", ChronoDuration::hours(1)))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&scope.server)
        .await;
    scope.mount_get("/localhost:27017/top", json!({"totals": {}})).await;
    scope.mount_get("/localhost:27017/log", json!(["line"])).await;
    scope.mount_get("/localhost:27017/sharding", json!({"shards": []})).await;

    let client = scope.client();
    assert!(!client.is_ready());

    // Queue top, log and sharding one after another while the token is pending
    let top = tokio::spawn({
        let client = client.clone();
        async move { client.top().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let log = tokio::spawn({
        let client = client.clone();
        async move { client.log().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let sharding = tokio::spawn({
        let client = client.clone();
        async move { client.sharding().await }
    });
    assert!(!client.is_ready());

    assert_eq!(with_timeout(top).await.unwrap().unwrap(), json!({"totals": {}}));
    assert_eq!(with_timeout(log).await.unwrap().unwrap(), json!(["line"]));
    assert_eq!(with_timeout(sharding).await.unwrap().unwrap(), json!({"shards": []}));
    assert_eq!(scope.hits("POST", "/token").await, 1);

    let order: Vec<String> = scope
        .server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method.as_str() == "GET")
        .map(|r| r.url.path().to_string())
        .collect();
    assert_eq!(
        order,
        vec![
            "/api/v1/localhost:27017/top",
            "/api/v1/localhost:27017/log",
            "/api/v1/localhost:27017/sharding",
        ]
    );
}

#[tokio::test]
async fn test_dead_session_short_circuits_operations() {
    let scope = FakeScope::bare().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/token"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "mongod unreachable"})))
        .mount(&scope.server)
        .await;

    let client = scope.client();
    let mut events = client.events();

    let err = with_timeout(client.ready()).await.unwrap_err();
    assert!(matches!(err, ScopeError::Http { status: 500, .. }));
    assert_eq!(client.token_state(), Some(TokenState::Dead));

    // Every later operation fails with the same error without a request
    let err = with_timeout(client.instance()).await.unwrap_err();
    assert!(matches!(err, ScopeError::Http { status: 500, .. }));
    assert_eq!(scope.hits("GET", "/localhost:27017").await, 0);

    let error = wait_for_event(&mut events, Duration::from_secs(2), |e| {
        matches!(e, ClientEvent::Error(_))
    })
    .await;
    assert!(error.is_some());
}

#[tokio::test]
async fn test_connect_revives_dead_client() {
    let scope = FakeScope::bare().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/token"))
        .and(body_json(json!({"seed": tests::SEED})))
        .respond_with(ResponseTemplate::new(500))
        .mount(&scope.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/token"))
        .and(body_json(json!({"seed": "mongodb://localhost:27018"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_for(
            "tok-2",
            ChronoDuration::hours(1),
            "localhost:27018",
        )))
        .mount(&scope.server)
        .await;

    let client = scope.client();
    assert!(with_timeout(client.ready()).await.is_err());

    with_timeout(client.connect("mongodb://localhost:27018")).await.unwrap();
    with_timeout(client.ready()).await.unwrap();
    assert_eq!(client.context().instance_id().as_deref(), Some("localhost:27018"));
}

// =============================================================================
// Reconnect and context
// =============================================================================

#[tokio::test]
async fn test_connect_same_seed_is_noop() {
    let scope = FakeScope::start().await;
    let client = scope.client();
    with_timeout(client.ready()).await.unwrap();

    with_timeout(client.connect(tests::SEED)).await.unwrap();
    assert_eq!(scope.hits("POST", "/token").await, 1);
    assert!(client.context().is_original());
}

#[tokio::test]
async fn test_reconnect_emits_reconnected_and_dedups_context() {
    let scope = FakeScope::bare().await;
    // Two deployments that report the same instance, then a different one
    Mock::given(method("POST"))
        .and(path("/api/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_json("tok-1", ChronoDuration::hours(1))))
        .up_to_n_times(2)
        .mount(&scope.server)
        .await;
    scope
        .mount_token(session_for("tok-3", ChronoDuration::hours(1), "localhost:27019"))
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/token"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&scope.server)
        .await;

    let client = scope.client();
    let mut events = client.events();
    with_timeout(client.ready()).await.unwrap();
    let first_change = wait_for_event(&mut events, Duration::from_secs(2), |e| {
        matches!(e, ClientEvent::ContextChanged(_))
    })
    .await;
    assert!(first_change.is_some());

    with_timeout(client.connect("mongodb://localhost:27018")).await.unwrap();
    with_timeout(client.ready()).await.unwrap();
    assert!(!client.context().is_original());
    assert_eq!(client.seed(), "mongodb://localhost:27018");

    let seen = collect_events(&mut events, Duration::from_millis(300)).await;
    assert!(seen
        .iter()
        .any(|e| matches!(e, ClientEvent::Reconnected { seed } if seed == "mongodb://localhost:27018")));
    assert!(!seen.iter().any(|e| matches!(e, ClientEvent::Readable)));
    assert!(
        !seen.iter().any(|e| matches!(e, ClientEvent::ContextChanged(_))),
        "identical session context must not emit a change"
    );

    with_timeout(client.connect("mongodb://localhost:27019")).await.unwrap();
    with_timeout(client.ready()).await.unwrap();
    let change = wait_for_event(&mut events, Duration::from_secs(2), |e| {
        matches!(e, ClientEvent::ContextChanged(_))
    })
    .await;
    match change {
        Some(ClientEvent::ContextChanged(change)) => {
            assert!(change.changed("instance_id"));
            assert!(!change.changed("deployment_id"));
            assert_eq!(change.previous.get("instance_id"), Some(&json!(INSTANCE_ID)));
        }
        other => panic!("expected ContextChanged, got {other:?}"),
    }
    assert_eq!(client.context().instance_id().as_deref(), Some("localhost:27019"));

    // Each reconnect revoked the previous token
    assert_eq!(scope.hits("DELETE", "/token").await, 2);
}

#[tokio::test]
async fn test_connect_rejects_empty_seed() {
    let scope = FakeScope::start().await;
    let client = scope.client();
    assert!(matches!(client.connect("  ").await, Err(ScopeError::MissingSeed)));
}

// =============================================================================
// Close
// =============================================================================

#[tokio::test]
async fn test_close_revokes_and_rejects_later_operations() {
    let scope = FakeScope::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&scope.server)
        .await;

    let client = scope.client();
    with_timeout(client.ready()).await.unwrap();
    let mut events = client.events();

    with_timeout(client.close()).await;
    with_timeout(client.close()).await;
    assert!(client.is_closed());
    assert_eq!(client.token_state(), None);

    assert!(matches!(client.ready().await, Err(ScopeError::Closed)));
    assert!(matches!(client.instance().await, Err(ScopeError::Closed)));
    assert!(matches!(client.connect("mongodb://other:27017").await, Err(ScopeError::Closed)));

    let seen = collect_events(&mut events, Duration::from_millis(200)).await;
    let closes = seen.iter().filter(|e| matches!(e, ClientEvent::Close)).count();
    assert_eq!(closes, 1);
}

#[tokio::test]
async fn test_dropping_last_handle_closes_client() {
    let scope = FakeScope::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/token"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&scope.server)
        .await;

    let client = scope.client();
    with_timeout(client.ready()).await.unwrap();
    let mut events = client.events();
    let copy = client.clone();
    drop(client);
    assert!(!copy.is_closed());
    drop(copy);

    let closed = wait_for_event(&mut events, Duration::from_secs(2), |e| {
        matches!(e, ClientEvent::Close)
    })
    .await;
    assert!(closed.is_some());

    with_timeout(async {
        while scope.hits("DELETE", "/token").await == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
}

#[tokio::test]
async fn test_close_while_acquiring() {
    let scope = FakeScope::bare().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(session_json("tok-1", ChronoDuration::hours(1)))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&scope.server)
        .await;

    let client = scope.client();
    let waiting = {
        let client = client.clone();
        tokio::spawn(async move { client.instance().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    with_timeout(client.close()).await;
    let result = with_timeout(waiting).await.unwrap();
    assert!(matches!(result, Err(ScopeError::Closed)));
}
