//! Authorized requests, typed operations and router dispatch

use pretty_assertions::assert_eq;
use reqwest::Method;
use scope_core::{AggregateOptions, FindOptions};
use serde_json::json;
use tests::async_helpers::with_timeout;
use tests::fixtures::docs;
use tests::scope::FakeScope;
use tests::ScopeError;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

const THINGS: &str = "/api/v1/localhost:27017/test/things";

// =============================================================================
// Request primitive
// =============================================================================

#[tokio::test]
async fn test_instance_read_sends_bearer_token() {
    let scope = FakeScope::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/localhost:27017"))
        .and(header("authorization", "Bearer tok-1"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "database_names": ["local", "test"],
            "host": "localhost",
        })))
        .expect(2)
        .mount(&scope.server)
        .await;

    let client = scope.client();
    let instance = with_timeout(client.instance()).await.unwrap();
    assert_eq!(instance["host"], "localhost");

    let names = with_timeout(client.list_databases()).await.unwrap();
    assert_eq!(names, vec!["local", "test"]);
}

#[tokio::test]
async fn test_meta_route_skips_instance_prefix() {
    let scope = FakeScope::start().await;
    scope
        .mount_get("/", json!([{"_id": "deployment-1", "instances": []}]))
        .await;

    let client = scope.client();
    let deployments = with_timeout(client.deployments()).await.unwrap();
    assert_eq!(deployments[0]["_id"], "deployment-1");
    assert_eq!(scope.hits("GET", "/").await, 1);
}

#[tokio::test]
async fn test_error_status_maps_server_message() {
    let scope = FakeScope::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{}/count", THINGS)))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "message": "interrupted at shutdown",
            "code": 11600,
        })))
        .mount(&scope.server)
        .await;

    let client = scope.client();
    let err = with_timeout(client.count("test.things", FindOptions::default()))
        .await
        .unwrap_err();
    match err {
        ScopeError::Http {
            status,
            message,
            code,
            method,
            path,
        } => {
            assert_eq!(status, 500);
            assert_eq!(message, "interrupted at shutdown");
            assert_eq!(code, Some(json!(11600)));
            assert_eq!(method, "GET");
            assert_eq!(path, "/localhost:27017/test/things/count");
        }
        other => panic!("expected Http error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_error_without_body_uses_reason() {
    let scope = FakeScope::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/localhost:27017/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&scope.server)
        .await;

    let client = scope.client();
    let err = with_timeout(client.database("missing")).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert!(matches!(err, ScopeError::Http { ref message, .. } if message == "Not Found"));
}

#[tokio::test]
async fn test_empty_body_reads_as_null() {
    let scope = FakeScope::start().await;
    Mock::given(method("DELETE"))
        .and(path(THINGS))
        .respond_with(ResponseTemplate::new(204))
        .mount(&scope.server)
        .await;

    let client = scope.client();
    let response = with_timeout(client.destroy_collection("test.things")).await.unwrap();
    assert_eq!(response.status, 204);
    assert!(response.body.is_null());
}

// =============================================================================
// Typed operations
// =============================================================================

#[tokio::test]
async fn test_find_with_limit() {
    let scope = FakeScope::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{}/find", THINGS)))
        .and(query_param("limit", "1"))
        .and(query_param("skip", "0"))
        .and(query_param("query", r#"{"name":"a"}"#))
        .respond_with(ResponseTemplate::new(200).set_body_json(docs(0, 1)))
        .expect(1)
        .mount(&scope.server)
        .await;

    let client = scope.client();
    let found = with_timeout(client.find(
        "test.things",
        FindOptions::default().with_limit(1).with_query(json!({"name": "a"})),
    ))
    .await
    .unwrap();
    assert_eq!(found, vec![json!({"_id": 0})]);
}

#[tokio::test]
async fn test_find_rejects_non_array_body() {
    let scope = FakeScope::start().await;
    scope
        .mount_get("/localhost:27017/test/things/find", json!({"count": 3}))
        .await;

    let client = scope.client();
    let err = with_timeout(client.find("test.things", FindOptions::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, ScopeError::Decode(_)));
}

#[tokio::test]
async fn test_usage_errors_fail_before_the_gate() {
    // No token mock: any request would hang on the gate until failure
    let scope = FakeScope::bare().await;
    let client = scope.client();

    let err = client.find("no-dot", FindOptions::default()).await.unwrap_err();
    assert!(err.is_usage_error());
    let err = client
        .aggregate("test.things", json!({"$match": {}}), AggregateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ScopeError::InvalidPipeline));
    let err = client.analytics("everything").await.unwrap_err();
    assert!(err.is_usage_error());
}

#[tokio::test]
async fn test_aggregate_sends_pipeline() {
    let scope = FakeScope::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{}/aggregate", THINGS)))
        .and(query_param("pipeline", r#"[{"$group":{"_id":"$name"}}]"#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"_id": "a"}])))
        .mount(&scope.server)
        .await;

    let client = scope.client();
    let result = with_timeout(client.aggregate(
        "test.things",
        json!([{"$group": {"_id": "$name"}}]),
        AggregateOptions::default(),
    ))
    .await
    .unwrap();
    assert_eq!(result, json!([{"_id": "a"}]));
}

#[tokio::test]
async fn test_sample_and_random() {
    let scope = FakeScope::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{}/sample", THINGS)))
        .and(query_param("size", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(docs(0, 3)))
        .mount(&scope.server)
        .await;
    scope
        .mount_get("/localhost:27017/test/things/random", json!({"_id": 7}))
        .await;

    let client = scope.client();
    assert_eq!(with_timeout(client.sample("test.things", 3)).await.unwrap().len(), 3);
    assert_eq!(with_timeout(client.random("test.things")).await.unwrap(), json!({"_id": 7}));
}

#[tokio::test]
async fn test_document_crud() {
    let scope = FakeScope::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{}/documents", THINGS)))
        .and(body_json(json!({"name": "a"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"_id": "abc"})))
        .expect(1)
        .mount(&scope.server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("{}/documents/abc", THINGS)))
        .and(body_json(json!({"$inc": {"updates": 1}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": 1})))
        .expect(1)
        .mount(&scope.server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("{}/documents/abc", THINGS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": 1})))
        .expect(1)
        .mount(&scope.server)
        .await;

    let client = scope.client();
    let created = with_timeout(client.create_document("test.things", json!({"name": "a"})))
        .await
        .unwrap();
    assert_eq!(created.status, 201);
    let id = created.body["_id"].clone();

    with_timeout(client.update_document("test.things", &id, json!({"$inc": {"updates": 1}})))
        .await
        .unwrap();
    with_timeout(client.destroy_document("test.things", &id)).await.unwrap();
}

#[tokio::test]
async fn test_create_index_wraps_keys() {
    let scope = FakeScope::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{}/indexes", THINGS)))
        .and(body_json(json!({"field": {"hostname": 1}, "options": {"unique": true}})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"name": "hostname_1"})))
        .expect(1)
        .mount(&scope.server)
        .await;

    let client = scope.client();
    let response = with_timeout(client.create_index(
        "test.things",
        json!({"hostname": 1}),
        Some(json!({"unique": true})),
    ))
    .await
    .unwrap();
    assert_eq!(response.body["name"], "hostname_1");
}

#[tokio::test]
async fn test_raw_crud_helper() {
    let scope = FakeScope::start().await;
    Mock::given(method("PUT"))
        .and(path(THINGS))
        .and(body_json(json!({"name": "renamed"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "renamed"})))
        .mount(&scope.server)
        .await;

    let client = scope.client();
    let body = json!({"name": "renamed"});
    let response = with_timeout(client.crud(Method::PUT, "/test/things", Some(&body)))
        .await
        .unwrap();
    assert_eq!(response.body, body);
}

// =============================================================================
// Router dispatch
// =============================================================================

#[tokio::test]
async fn test_call_resolves_fragments() {
    let scope = FakeScope::start().await;
    scope.mount_get("/localhost:27017/test", json!({"collection_names": ["things"]})).await;
    scope.mount_get("/localhost:27017/test/things", json!({"name": "things"})).await;
    Mock::given(method("GET"))
        .and(path(format!("{}/count", THINGS)))
        .and(query_param("query", r#"{"a":1}"#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 4})))
        .mount(&scope.server)
        .await;

    let client = scope.client();
    assert_eq!(
        with_timeout(client.call("/test", None)).await.unwrap(),
        json!({"collection_names": ["things"]})
    );
    assert_eq!(
        with_timeout(client.call_segments(&["test", "things"])).await.unwrap(),
        json!({"name": "things"})
    );
    assert_eq!(
        with_timeout(client.call("/test/things/count?query=%7B%22a%22%3A1%7D", None))
            .await
            .unwrap(),
        json!({"count": 4})
    );
    assert_eq!(
        with_timeout(client.get_collection_names("test")).await.unwrap(),
        vec!["things"]
    );
}

#[tokio::test]
async fn test_call_reads_find_options_only_for_query_routes() {
    let scope = FakeScope::start().await;
    scope.mount_get("/localhost:27017/top", json!({"totals": {}})).await;
    let client = scope.client();

    assert_eq!(
        with_timeout(client.call("/top?limit=lots", None)).await.unwrap(),
        json!({"totals": {}})
    );
    let err = with_timeout(client.call("/test/things/find?limit=lots", None))
        .await
        .unwrap_err();
    assert!(matches!(err, ScopeError::Decode(_)));
}

#[tokio::test]
async fn test_call_without_route_fails() {
    let scope = FakeScope::start().await;
    let client = scope.client();
    let err = client.call("/a/b/c/d/e", None).await.unwrap_err();
    assert!(matches!(err, ScopeError::NoRoute(_)));
}

#[tokio::test]
async fn test_stream_rejects_non_streamable_route() {
    let scope = FakeScope::start().await;
    let client = scope.client();
    let err = client.stream("/test/things/count").await.unwrap_err();
    assert!(matches!(err, ScopeError::NotStreamable(ref method) if method == "count"));
}
