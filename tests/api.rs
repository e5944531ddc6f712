mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use common::{rag_with, test_config, write_courses, ScriptedClient};
use course_rag::generator::GeneratorError;
use course_rag::rag::RagSystem;
use course_rag::server::router;

fn app_with(rag: RagSystem) -> (Router, Arc<RagSystem>) {
    let rag = Arc::new(rag);
    (router(rag.clone(), None), rag)
}

fn app() -> (Router, Arc<RagSystem>) {
    app_with(rag_with(&test_config(), ScriptedClient::answering("Test answer.")))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_query_creates_session() {
    let (app, rag) = app();
    let (status, body) = send(&app, post_json("/api/query", json!({"query": "What is MCP?"}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answer"], "Test answer.");
    assert_eq!(body["sources"], json!([]));
    let session = body["session_id"].as_str().unwrap();
    assert!(!session.is_empty());
    assert_eq!(rag.sessions().history(session).len(), 1);
}

#[tokio::test]
async fn test_query_keeps_given_session() {
    let (app, rag) = app();
    let (status, body) = send(
        &app,
        post_json("/api/query", json!({"query": "Hi", "session_id": "my-session"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], "my-session");

    send(
        &app,
        post_json("/api/query", json!({"query": "Again", "session_id": "my-session"})),
    )
    .await;
    assert_eq!(rag.sessions().history("my-session").len(), 2);
}

#[tokio::test]
async fn test_empty_query_is_answered() {
    let (app, _) = app();
    let (status, body) = send(&app, post_json("/api/query", json!({"query": ""}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["session_id"].is_string());
}

#[tokio::test]
async fn test_malformed_bodies_are_422() {
    let (app, _) = app();
    let cases = vec![
        json!({}),
        json!({"session_id": "abc"}),
        json!({"query": 123}),
        json!({"query": "ok", "session_id": 123}),
        json!("What is MCP?"),
    ];
    for body in cases {
        let (status, response) = send(&app, post_json("/api/query", body.clone())).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "body: {}", body);
        assert_eq!(response["error"]["code"], "validation_error");
    }

    let syntax = Request::builder()
        .method(Method::POST)
        .uri("/api/query")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"query\": "))
        .unwrap();
    let (status, _) = send(&app, syntax).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let plain = Request::builder()
        .method(Method::POST)
        .uri("/api/query")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("What is MCP?"))
        .unwrap();
    let (status, response) = send(&app, plain).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response["error"]["code"], "validation_error");
}

#[tokio::test]
async fn test_server_survives_malformed_requests() {
    let (app, _) = app();
    send(&app, post_json("/api/query", json!({"query": null}))).await;
    let (status, _) = send(&app, post_json("/api/query", json!({"query": "still up"}))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_generation_errors_map_to_status() {
    let cases = vec![
        (
            GeneratorError::RateLimited("slow down".into()),
            StatusCode::SERVICE_UNAVAILABLE,
            "rate_limited",
        ),
        (GeneratorError::Timeout, StatusCode::GATEWAY_TIMEOUT, "timeout"),
        (
            GeneratorError::Api {
                status: 401,
                message: "invalid x-api-key".into(),
            },
            StatusCode::BAD_GATEWAY,
            "generation_failed",
        ),
    ];
    for (err, status, code) in cases {
        let client = ScriptedClient::scripted(vec![Err(err)], "unused");
        let (app, _) = app_with(rag_with(&test_config(), client));
        let (got, body) = send(&app, post_json("/api/query", json!({"query": "q"}))).await;
        assert_eq!(got, status);
        assert_eq!(body["error"]["code"], code);
        assert!(!body["error"]["message"].as_str().unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_courses_endpoint() {
    let (app, _) = app();
    let (status, body) = send(&app, get("/api/courses")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"total_courses": 0, "course_titles": []}));

    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    write_courses(&docs);
    let rag = rag_with(&test_config(), ScriptedClient::answering("ok"));
    rag.add_course_folder(&docs, false).await.unwrap();
    let (app, _) = app_with(rag);

    let (status, body) = send(&app, get("/api/courses")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_courses"], 2);
    assert_eq!(
        body["course_titles"],
        json!(["Advanced Retrieval for AI", "MCP: Build Rich-Context AI Apps"])
    );
}

#[tokio::test]
async fn test_clear_session_issues_new_id() {
    let (app, rag) = app();
    let (_, body) = send(&app, post_json("/api/query", json!({"query": "Hi"}))).await;
    let old = body["session_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        post_json("/api/clear-session", json!({"session_id": old})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let new = body["session_id"].as_str().unwrap();
    assert_ne!(new, old);
    assert!(rag.sessions().history(&old).is_empty());
    assert!(rag.sessions().contains(new));

    let (status, body) = send(&app, post_json("/api/clear-session", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["session_id"].is_string());

    let (status, _) = send(
        &app,
        post_json("/api/clear-session", json!({"session_id": 5})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_tools_and_health() {
    let (app, _) = app();
    let (status, body) = send(&app, get("/api/tools")).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["search_course_content", "get_course_outline"]);

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_cors_preflight() {
    let (app, _) = app();
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/query")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
}

#[tokio::test]
async fn test_static_frontend_fallback() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("index.html"), "<html>course assistant</html>").unwrap();
    std::fs::write(tmp.path().join("style.css"), "body {}").unwrap();

    let rag = Arc::new(rag_with(&test_config(), ScriptedClient::answering("ok")));
    let app = router(rag, Some(tmp.path()));

    for (uri, expected) in [
        ("/", "<html>course assistant</html>"),
        ("/style.css", "body {}"),
        ("/some/client/route", "<html>course assistant</html>"),
    ] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&bytes), expected, "uri: {}", uri);
    }

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
