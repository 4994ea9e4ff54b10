//! Drives the router in-process and checks what lands in the audit log.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;
use vitrine_audit::AuditPipeline;
use vitrine_core::{AuditConfig, ServerConfig};
use vitrine_server::{AppState, create_router};

async fn app(trust_actor_headers: bool) -> (Router, Arc<AuditPipeline>) {
    let mut audit = AuditConfig::default();
    audit.transport.redelivery_delay_ms = 5;
    audit.retention.days = 0;
    let pipeline = Arc::new(AuditPipeline::start(&audit).await.unwrap());

    let server = ServerConfig {
        trust_actor_headers,
        ..Default::default()
    };
    let state = AppState::new(server, pipeline.clone()).unwrap();
    (create_router(state), pipeline)
}

async fn wait_for_persisted(pipeline: &AuditPipeline, expected: u64) {
    for _ in 0..400 {
        if pipeline.metrics().persisted >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("audit records were not persisted in time");
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-actor-id", "7")
        .header("x-actor-name", "Ada")
        .header("x-actor-role", "ADMIN")
        .header("x-forwarded-for", "10.0.0.1, 203.0.113.5")
        .header("user-agent", "vitrine-tests/1.0")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_healthz_is_ok() {
    let (app, _) = app(false).await;
    let (status, _, body) = send(&app, get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn test_project_lifecycle_is_audited_with_request_context() {
    let (app, pipeline) = app(true).await;

    let (status, headers, created) = send(
        &app,
        json_request("POST", "/admin/projects", json!({ "title": "Shop" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let request_id = headers["x-request-id"].to_str().unwrap().to_string();
    let id = created["id"].as_u64().unwrap();

    let (status, _, _) = send(
        &app,
        json_request(
            "PUT",
            &format!("/admin/projects/{id}"),
            json!({ "title": "Shop v2", "tags": ["rust"] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, published) = send(
        &app,
        json_request("POST", &format!("/admin/projects/{id}/publish"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(published["published"], true);

    wait_for_persisted(&pipeline, 3).await;

    let (status, _, page) = send(
        &app,
        get(&format!("/admin/audit?entity_type=Project&entity_id={id}")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 3);
    assert_eq!(page["limit"], 50);

    let records = page["records"].as_array().unwrap();
    let by_action = |action: &str| {
        records
            .iter()
            .find(|r| r["action"] == action)
            .unwrap_or_else(|| panic!("no {action} record"))
    };

    let create = by_action("CREATE");
    assert_eq!(create["actor_id"], "7");
    assert_eq!(create["actor_role"], "ADMIN");
    assert_eq!(create["ip_address"], "203.0.113.5");
    assert_eq!(create["user_agent"], "vitrine-tests/1.0");
    assert_eq!(create["http_method"], "POST");
    assert_eq!(create["request_path"], "/admin/projects");
    assert_eq!(create["request_id"], request_id.as_str());
    assert_eq!(create["old_values"], Value::Null);

    let update = by_action("UPDATE");
    assert_eq!(update["old_values"]["title"], "Shop");
    assert_eq!(update["new_values"]["title"], "Shop v2");
    assert_eq!(update["changed_fields"], json!(["tags", "title"]));

    let publish = by_action("PUBLISH");
    assert_eq!(publish["changed_fields"], json!(["published"]));
    assert_eq!(publish["category"], "entity_mutation");

    let event_id = create["event_id"].as_str().unwrap();
    let (status, _, single) = send(&app, get(&format!("/admin/audit/{event_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(single["entity_name"], "Shop");
}

#[tokio::test]
async fn test_failed_mutation_returns_error_and_records_failure() {
    let (app, pipeline) = app(true).await;

    let (status, _, body) = send(
        &app,
        json_request("PUT", "/admin/projects/99", json!({ "title": "Ghost" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    wait_for_persisted(&pipeline, 1).await;

    let (_, _, page) = send(&app, get("/admin/audit?success=false")).await;
    let record = &page["records"][0];
    assert_eq!(record["action"], "UPDATE");
    assert_eq!(record["entity_id"], "99");
    assert_eq!(record["success"], false);
    assert_eq!(record["error_message"], "project 99 not found");
}

#[tokio::test]
async fn test_actor_headers_are_ignored_unless_trusted() {
    let (app, pipeline) = app(false).await;

    let (status, _, _) = send(
        &app,
        json_request("POST", "/admin/projects", json!({ "title": "Blog" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    wait_for_persisted(&pipeline, 1).await;

    let (_, _, page) = send(&app, get("/admin/audit")).await;
    assert_eq!(page["records"][0]["actor_id"], Value::Null);
}

#[tokio::test]
async fn test_inbound_request_id_is_kept_and_invalid_one_replaced() {
    let (app, _) = app(false).await;
    let inbound = Uuid::new_v4().to_string();

    let req = Request::builder()
        .uri("/healthz")
        .header("x-request-id", &inbound)
        .body(Body::empty())
        .unwrap();
    let (_, headers, _) = send(&app, req).await;
    assert_eq!(headers["x-request-id"].to_str().unwrap(), inbound);

    let req = Request::builder()
        .uri("/healthz")
        .header("x-request-id", "not-a-uuid")
        .body(Body::empty())
        .unwrap();
    let (_, headers, _) = send(&app, req).await;
    let generated = headers["x-request-id"].to_str().unwrap();
    assert!(Uuid::parse_str(generated).is_ok());
}

#[tokio::test]
async fn test_audit_query_validation_and_lookups() {
    let (app, _) = app(false).await;

    let (status, _, _) = send(&app, get("/admin/audit?limit=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(&app, get("/admin/audit?limit=501")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(&app, get(&format!("/admin/audit/{}", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(&app, get("/admin/audit/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stats_and_dead_letter_endpoints() {
    let (app, _) = app(false).await;

    let (status, _, stats) = send(&app, get("/admin/audit/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["enabled"], true);
    assert_eq!(stats["publisher_enabled"], true);
    assert_eq!(stats["dead_letters"], 0);
    assert_eq!(stats["metrics"]["persisted"], 0);

    let (status, _, letters) = send(&app, get("/admin/audit/dead-letters")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(letters, json!([]));

    let missing = Uuid::new_v4();
    let replay = Request::builder()
        .method("POST")
        .uri(format!("/admin/audit/dead-letters/{missing}/replay"))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, replay).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let discard = Request::builder()
        .method("DELETE")
        .uri(format!("/admin/audit/dead-letters/{missing}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, discard).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let (app, _) = app(false).await;
    let (status, _, body) = send(&app, get("/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}
