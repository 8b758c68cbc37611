//! Queue protocol routes: admission, lookups and the minimal event stream.

mod common;

use axum::http::StatusCode;
use serde_json::json;
use std::time::Duration;
use tower::ServiceExt;

use common::{
    Reply, ScriptedBackend, body_json, body_text, data_events, get, post_json, queue_body,
    test_state,
};
use llm_queue_broker::{router, worker};

#[tokio::test]
async fn health_reports_downstream_and_queue() {
    let state = test_state(ScriptedBackend::new(vec![]));
    let response = router(state).oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["downstream_url"], "http://localhost:1234/v1");
    assert_eq!(body["queue_size"], 0);
    assert_eq!(body["stats"]["current_request_id"], serde_json::Value::Null);
}

#[tokio::test]
async fn back_to_back_admissions_get_positions_in_order() {
    let state = test_state(ScriptedBackend::new(vec![]));
    let app = router(state.clone());

    let mut positions = Vec::new();
    for i in 0..3 {
        let response = app
            .clone()
            .oneshot(post_json("/queue/add", queue_body("batch", &format!("prompt {i}"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "queued");
        positions.push(body["queue_position"].as_u64().unwrap());
    }
    assert_eq!(positions, vec![1, 2, 3]);

    let status = body_json(app.oneshot(get("/queue/status")).await.unwrap()).await;
    assert_eq!(status["queue_size"], 3);
    assert_eq!(status["tracked_requests"], 3);
    assert_eq!(status["stats"]["total_received"], 3);
}

#[tokio::test]
async fn malformed_admissions_are_rejected_and_not_queued() {
    let state = test_state(ScriptedBackend::new(vec![]));
    let app = router(state.clone());

    let bodies = [
        json!({"model": "qwen3-8b", "messages": [{"role": "user", "content": "hi"}]}),
        json!({"client_id": "x", "model": "qwen3-8b", "messages": []}),
        json!({"client_id": "x", "model": "qwen3-8b", "messages": [{"text": "hi"}]}),
        json!({"client_id": "x", "messages": [{"role": "user", "content": "hi"}]}),
    ];
    for body in bodies {
        let response = app.clone().oneshot(post_json("/queue/add", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["type"], "invalid_request_error");
    }

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/queue/add")
        .header("content-type", "application/json")
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(state.queue.len(), 0);
    assert_eq!(state.stats.snapshot().total_received, 0);
}

#[tokio::test]
async fn unknown_ids_get_not_found_payloads() {
    let state = test_state(ScriptedBackend::new(vec![]));
    let app = router(state);

    for uri in ["/request/does-not-exist", "/stream/does-not-exist"] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"error": "Request ID not found"}));
    }
}

#[tokio::test]
async fn queued_request_streams_positions_chunks_then_done() {
    let state = test_state(ScriptedBackend::new(vec![Reply::Slow(
        vec!["Hello", " world"],
        Duration::from_millis(30),
    )]));
    let app = router(state.clone());

    let added = body_json(
        app.clone()
            .oneshot(post_json("/queue/add", queue_body("page-1", "hi")))
            .await
            .unwrap(),
    )
    .await;
    let id = added["request_id"].as_str().unwrap().to_string();
    assert_eq!(added["queue_position"], 1);

    let response = app.clone().oneshot(get(&format!("/stream/{id}"))).await.unwrap();
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    let reader = tokio::spawn(body_text(response));

    // let the stream observe the queued state before work starts
    tokio::time::sleep(Duration::from_millis(50)).await;
    let worker = worker::spawn(state.clone());

    let events = data_events(&reader.await.unwrap());
    assert_eq!(events.first(), Some(&json!({"position": 1})));
    let chunks: Vec<&str> = events.iter().filter_map(|e| e["chunk"].as_str()).collect();
    assert_eq!(chunks, vec!["Hello", " world"]);
    assert_eq!(events.last(), Some(&json!({"done": true})));
    assert!(events.iter().all(|e| e.get("error").is_none()));

    let record = body_json(app.oneshot(get(&format!("/request/{id}"))).await.unwrap()).await;
    assert_eq!(record["status"], "complete");
    assert_eq!(record["result"], "Hello world");
    assert_eq!(record["client_id"], "page-1");
    assert_eq!(record["queue_entered_position"], 1);

    state.shutdown.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn refused_downstream_ends_stream_with_one_error() {
    let state = test_state(ScriptedBackend::new(vec![Reply::Refused]));
    let app = router(state.clone());
    let worker = worker::spawn(state.clone());

    let added = body_json(
        app.clone()
            .oneshot(post_json("/queue/add", queue_body("page-1", "hi")))
            .await
            .unwrap(),
    )
    .await;
    let id = added["request_id"].as_str().unwrap().to_string();

    let body = body_text(app.clone().oneshot(get(&format!("/stream/{id}"))).await.unwrap()).await;
    let events = data_events(&body);

    let errors: Vec<&str> = events.iter().filter_map(|e| e["error"].as_str()).collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Connection refused"));
    assert_eq!(events.last().unwrap()["error"], errors[0]);
    assert!(events.iter().all(|e| e.get("done").is_none() && e.get("chunk").is_none()));

    let status = body_json(app.oneshot(get("/queue/status")).await.unwrap()).await;
    assert_eq!(status["stats"]["total_errors"], 1);
    assert_eq!(status["stats"]["total_processed"], 0);

    state.shutdown.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn metrics_are_exposed() {
    let state = test_state(ScriptedBackend::new(vec![]));
    let app = router(state);
    app.clone()
        .oneshot(post_json("/queue/add", queue_body("page-1", "hi")))
        .await
        .unwrap();

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;
    assert!(text.contains("broker_requests_admitted_total"));
    assert!(text.contains("broker_queue_depth"));
}
