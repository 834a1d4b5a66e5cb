//! End-to-end API tests over the in-memory stack.
//!
//! Everything here runs without a Kafka broker: extractor clients are
//! created but never require a connection, and inspector tests point at an
//! unreachable endpoint with a short timeout.

use std::sync::Arc;
use std::time::Duration;

use paimen_runtime::{ConsumerSupervisor, LagInspector, MemoryStore, ProcessorFactory, SupervisorSettings};
use paimen_server::api::{self, ApiContext};
use serde_json::{json, Value};
use warp::http::StatusCode;
use warp::Filter;

fn test_context() -> ApiContext {
    let supervisor = ConsumerSupervisor::new(
        Arc::new(MemoryStore::new()),
        Arc::new(ProcessorFactory::with_defaults()),
        SupervisorSettings {
            poll_timeout: Duration::from_millis(50),
            stop_timeout: Duration::from_secs(5),
        },
    );
    // Unreachable bootstrap with a short bound keeps inspector tests fast.
    let inspector = Arc::new(LagInspector::new("127.0.0.1:1", Duration::from_millis(400)));
    ApiContext {
        supervisor,
        inspector,
    }
}

fn routes(
    ctx: ApiContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    // warp's default rejection rendering covers the 400/404/405 cases; the
    // binary installs `api::handle_rejection` on top for JSON bodies.
    api::routes(ctx)
}

fn file_sink_body(dir: &std::path::Path, auto_start: bool) -> Value {
    json!({
        "broker_host": "localhost",
        "broker_port": 9092,
        "topic": "t",
        "group_id": "g",
        "auto_start": auto_start,
        "processors": [
            {"type": "file_sink", "config": {"file_path": dir.join("x.log").to_str().unwrap()}}
        ]
    })
}

#[tokio::test]
async fn create_without_auto_start_is_inactive() {
    let api = routes(test_context());
    let dir = tempfile::tempdir().unwrap();

    let resp = warp::test::request()
        .method("POST")
        .path("/consumers")
        .json(&file_sink_body(dir.path(), false))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let created: Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(created["status"], "INACTIVE");
    assert_eq!(created["processors"][0]["type"], "file_sink");
    let id = created["id"].as_str().unwrap().to_string();

    let resp = warp::test::request()
        .method("GET")
        .path(&format!("/consumers/{id}"))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let fetched: Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(fetched["status"], "INACTIVE");
    assert_eq!(fetched["id"], created["id"]);
}

#[tokio::test]
async fn start_then_stop_round_trip() {
    let ctx = test_context();
    let api = routes(ctx.clone());
    let dir = tempfile::tempdir().unwrap();

    let resp = warp::test::request()
        .method("POST")
        .path("/consumers")
        .json(&file_sink_body(dir.path(), false))
        .reply(&api)
        .await;
    let created: Value = serde_json::from_slice(resp.body()).unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let resp = warp::test::request()
        .method("POST")
        .path(&format!("/consumers/{id}/start"))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["status"], "ACTIVE");
    assert_eq!(body["id"].as_str(), Some(id.as_str()));

    let resp = warp::test::request()
        .method("POST")
        .path(&format!("/consumers/{id}/stop"))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["status"], "INACTIVE");

    ctx.supervisor.shutdown().await;
}

#[tokio::test]
async fn unknown_processor_type_is_rejected_atomically() {
    let api = routes(test_context());

    let resp = warp::test::request()
        .method("POST")
        .path("/consumers")
        .json(&json!({
            "broker_host": "h",
            "broker_port": 9092,
            "topic": "t",
            "group_id": "g",
            "processors": [{"type": "nonexistent", "config": {}}]
        }))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let err: Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(err["code"], "unknown_type");

    // No partial spec was persisted.
    let resp = warp::test::request()
        .method("GET")
        .path("/consumers")
        .reply(&api)
        .await;
    let listed: Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn update_swaps_processors_on_an_active_consumer() {
    let ctx = test_context();
    let api = routes(ctx.clone());
    let dir = tempfile::tempdir().unwrap();

    let resp = warp::test::request()
        .method("POST")
        .path("/consumers")
        .json(&file_sink_body(dir.path(), true))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(created["status"], "ACTIVE");
    let id = created["id"].as_str().unwrap().to_string();

    let resp = warp::test::request()
        .method("PUT")
        .path(&format!("/consumers/{id}"))
        .json(&json!({
            "processors": [
                {"type": "file_sink", "config": {"file_path": dir.path().join("y.log").to_str().unwrap()}}
            ]
        }))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(updated["status"], "ACTIVE");
    assert_ne!(
        updated["processors"][0]["id"],
        created["processors"][0]["id"]
    );

    ctx.supervisor.shutdown().await;
}

#[tokio::test]
async fn delete_an_active_consumer_then_get_is_not_found() {
    let api = routes(test_context());
    let dir = tempfile::tempdir().unwrap();

    let resp = warp::test::request()
        .method("POST")
        .path("/consumers")
        .json(&file_sink_body(dir.path(), true))
        .reply(&api)
        .await;
    let created: Value = serde_json::from_slice(resp.body()).unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let resp = warp::test::request()
        .method("DELETE")
        .path(&format!("/consumers/{id}"))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = warp::test::request()
        .method("GET")
        .path(&format!("/consumers/{id}"))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let err: Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(err["code"], "not_found");
}

#[tokio::test]
async fn operations_on_unknown_ids_return_404() {
    let api = routes(test_context());
    let missing = uuid::Uuid::new_v4();

    for (method, path) in [
        ("GET", format!("/consumers/{missing}")),
        ("PUT", format!("/consumers/{missing}")),
        ("POST", format!("/consumers/{missing}/start")),
        ("POST", format!("/consumers/{missing}/stop")),
        ("DELETE", format!("/consumers/{missing}")),
    ] {
        let mut req = warp::test::request().method(method).path(&path);
        if method == "PUT" {
            req = req.json(&json!({}));
        }
        let resp = req.reply(&api).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{method} {path}");
    }
}

#[tokio::test]
async fn malformed_port_is_a_bad_request() {
    let api = routes(test_context());

    let resp = warp::test::request()
        .method("POST")
        .path("/consumers")
        .json(&json!({
            "broker_host": "h",
            "broker_port": 0,
            "topic": "t",
            "group_id": "g"
        }))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let err: Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(err["code"], "bad_config");
}

#[tokio::test]
async fn garbage_body_is_a_bad_request() {
    let api = routes(test_context());

    let resp = warp::test::request()
        .method("POST")
        .path("/consumers")
        .header("content-type", "application/json")
        .body("{not json")
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn known_groups_come_from_the_store() {
    let api = routes(test_context());
    let dir = tempfile::tempdir().unwrap();

    warp::test::request()
        .method("POST")
        .path("/consumers")
        .json(&file_sink_body(dir.path(), false))
        .reply(&api)
        .await;

    let resp = warp::test::request()
        .method("GET")
        .path("/consumergroups")
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["consumer_groups"], json!(["g"]));
}

#[tokio::test]
async fn monitor_lag_without_required_params_is_rejected() {
    let api = routes(test_context());

    let resp = warp::test::request()
        .method("GET")
        .path("/monitor/consumer-group-lag?group_id=g")
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn monitor_lag_against_unreachable_cluster_is_bounded() {
    let api = routes(test_context());

    let started = std::time::Instant::now();
    let resp = warp::test::request()
        .method("GET")
        .path("/monitor/consumer-group-lag?group_id=g&topic=t")
        .reply(&api)
        .await;
    assert!(
        resp.status() == StatusCode::GATEWAY_TIMEOUT || resp.status() == StatusCode::BAD_GATEWAY,
        "unexpected status {}",
        resp.status()
    );
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn health_reports_consumer_count_and_journal() {
    let api = routes(test_context());
    let dir = tempfile::tempdir().unwrap();

    warp::test::request()
        .method("POST")
        .path("/consumers")
        .json(&file_sink_body(dir.path(), false))
        .reply(&api)
        .await;

    let resp = warp::test::request()
        .method("GET")
        .path("/health")
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["consumers"], 1);
    assert_eq!(body["recent_operations"][0]["op"], "CREATE");
}

#[tokio::test]
async fn empty_update_returns_the_spec_unchanged() {
    let api = routes(test_context());
    let dir = tempfile::tempdir().unwrap();

    let resp = warp::test::request()
        .method("POST")
        .path("/consumers")
        .json(&file_sink_body(dir.path(), false))
        .reply(&api)
        .await;
    let created: Value = serde_json::from_slice(resp.body()).unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let resp = warp::test::request()
        .method("PUT")
        .path(&format!("/consumers/{id}"))
        .json(&json!({}))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(updated["topic"], created["topic"]);
    assert_eq!(updated["processors"], created["processors"]);
}
