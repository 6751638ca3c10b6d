//! Authentication and admin-only enforcement on the engine endpoints.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{body_json, get, get_auth, send, token_for, TestApp};

const REPORT: &str = "/api/v1/admin/maintenance/resource-report";

#[tokio::test]
async fn missing_header_is_401() {
    let app = TestApp::new();
    let response = get(app.router(), REPORT).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["code"], "UNAUTHORIZED");
    assert_eq!(json["error"], "Missing Authorization header");
}

#[tokio::test]
async fn non_bearer_scheme_is_401() {
    let app = TestApp::new();
    let request = Request::builder()
        .uri(REPORT)
        .header("authorization", "Basic YWRtaW46YWRtaW4=")
        .body(Body::empty())
        .unwrap();
    let response = send(app.router(), request).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(
        json["error"],
        "Invalid Authorization format. Expected: Bearer <token>"
    );
}

#[tokio::test]
async fn garbage_token_is_401() {
    let app = TestApp::new();
    let response = get_auth(app.router(), REPORT, "not-a-jwt").await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Invalid or expired token");
}

#[tokio::test]
async fn non_admin_is_403() {
    let app = TestApp::new();
    let token = token_for(12, "TEACHER");
    let response = get_auth(app.router(), REPORT, &token).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response).await;
    assert_eq!(json["code"], "FORBIDDEN");
    assert_eq!(json["error"], "Insufficient permissions");
}

#[tokio::test]
async fn admin_is_let_through() {
    let app = TestApp::new();
    let token = token_for(12, "ADMIN");
    let response = get_auth(app.router(), REPORT, &token).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["chunks_dispatched"], 0);
}
