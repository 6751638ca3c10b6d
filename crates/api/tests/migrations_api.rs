//! HTTP-level tests for migrations, progress polling, and rollback.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use axum::Router;
use common::{admin_token, body_json, get_auth, post_empty_auth, post_json_auth, TestApp};
use roleshift_core::roles::Role;
use roleshift_core::user::UserAggregate;
use serde_json::{json, Value};

const MIGRATE_USER: &str = "/api/v1/admin/migrations/migrate-user";
const BATCH: &str = "/api/v1/admin/migrations/batch";
const BATCH_ASYNC: &str = "/api/v1/admin/migrations/batch-async";

async fn seed_learners(app: &TestApp, count: usize) -> Vec<UserAggregate> {
    app.seed("admin@example.com", Role::Admin).await;
    let mut learners = Vec::with_capacity(count);
    for i in 0..count {
        learners.push(app.seed(&format!("learner{i}@example.com"), Role::Learner).await);
    }
    learners
}

/// Poll the report endpoint until the background batch has finished.
async fn wait_for_report(router: Router, id: &str) -> Value {
    let uri = format!("/api/v1/admin/migrations/{id}/report");
    for _ in 0..200 {
        let response = get_auth(router.clone(), &uri, &admin_token()).await;
        match response.status() {
            StatusCode::OK => return body_json(response).await,
            StatusCode::CONFLICT => tokio::time::sleep(Duration::from_millis(10)).await,
            other => panic!("unexpected status {other}"),
        }
    }
    panic!("batch {id} did not finish");
}

// ---------------------------------------------------------------------------
// Single-user migration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn migrate_user_moves_learner_to_customer() {
    let app = TestApp::new();
    let learners = seed_learners(&app, 1).await;

    let body = json!({ "user_id": learners[0].id });
    let response = post_json_auth(app.router(), MIGRATE_USER, body, &admin_token()).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let data = &json["data"];
    assert_eq!(data["success"], true);
    assert_eq!(data["new_role"], "CUSTOMER");
    assert_eq!(data["data_integrity_check"]["passed"], true);
    assert_eq!(
        data["data_integrity_check"]["pre_checksum"],
        data["data_integrity_check"]["post_checksum"]
    );
    assert!(data["migration_time_ms"].is_u64());
    assert_eq!(app.user(learners[0].id).await.role, Role::Customer);
}

#[tokio::test]
async fn migrate_user_skips_compatible_roles() {
    let app = TestApp::new();
    app.seed("admin@example.com", Role::Admin).await;
    let teacher = app.seed("teacher@example.com", Role::Teacher).await;

    let body = json!({ "email": "teacher@example.com" });
    let response = post_json_auth(app.router(), MIGRATE_USER, body, &admin_token()).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["skipped"], true);
    assert_eq!(json["data"]["skip_reason"], "User already has compatible role");
    assert_eq!(app.user(teacher.id).await.role, Role::Teacher);
}

#[tokio::test]
async fn single_migration_rolls_back_once() {
    let app = TestApp::new();
    let learners = seed_learners(&app, 1).await;

    let body = json!({ "user_id": learners[0].id });
    let migrated = body_json(post_json_auth(app.router(), MIGRATE_USER, body, &admin_token()).await).await;
    let id = migrated["data"]["operation_id"].as_str().unwrap().to_string();

    let rollback_uri = format!("/api/v1/admin/migrations/{id}/rollback");
    let response = post_json_auth(
        app.router(),
        &rollback_uri,
        json!({ "validate_rollback": true }),
        &admin_token(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["success"], true);
    assert_eq!(json["data"]["reverses"], id.as_str());
    assert_eq!(app.user(learners[0].id).await.role, Role::Learner);

    let status = get_auth(
        app.router(),
        &format!("/api/v1/admin/migrations/{id}/status"),
        &admin_token(),
    )
    .await;
    assert_eq!(status.status(), StatusCode::OK);
    assert_eq!(body_json(status).await["data"]["status"], "rolled_back");

    let again = post_empty_auth(app.router(), &rollback_uri, &admin_token()).await;
    assert_eq!(again.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(again).await["code"], "ROLLBACK_UNAVAILABLE");
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dry_run_reports_without_writing() {
    let app = TestApp::new();
    let learners = seed_learners(&app, 3).await;

    let body = json!({ "from_role": "LEARNER", "to_role": "CUSTOMER", "dry_run": true });
    let response = post_json_auth(app.router(), BATCH, body, &admin_token()).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["kind"], "dry_run");
    assert_eq!(json["data"]["would_migrate"], 3);
    for learner in &learners {
        assert_eq!(app.user(learner.id).await.role, Role::Learner);
    }
}

#[tokio::test]
async fn batch_then_partial_or_atomic_rollback() {
    let app = TestApp::new();
    let learners = seed_learners(&app, 4).await;

    let body = json!({
        "from_role": "LEARNER",
        "to_role": "CUSTOMER",
        "batch_size": 2,
        "parallel": true,
        "reason": "Role system v2",
    });
    let response = post_json_auth(app.router(), BATCH, body, &admin_token()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["kind"], "batch");
    assert_eq!(json["data"]["migrated"], 4);
    assert_eq!(json["data"]["chunks"], 2);
    let batch_id = json["data"]["bulk_operation_id"].as_str().unwrap().to_string();

    let uri = format!("/api/v1/admin/migrations/batches/{batch_id}/rollback");
    let response = post_json_auth(
        app.router(),
        &uri,
        json!({ "atomic_rollback": false }),
        &admin_token(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["success"], true);
    assert_eq!(json["data"]["rolled_back_users"].as_array().unwrap().len(), 4);
    assert_eq!(json["data"]["failed_rollbacks"], 0);
    for learner in &learners {
        assert_eq!(app.user(learner.id).await.role, Role::Learner);
    }
}

#[tokio::test]
async fn batch_size_is_validated() {
    let app = TestApp::new();
    let body = json!({ "from_role": "LEARNER", "to_role": "CUSTOMER", "batch_size": 0 });
    let response = post_json_auth(app.router(), BATCH, body, &admin_token()).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn async_batch_is_polled_to_completion() {
    let app = TestApp::new();
    let learners = seed_learners(&app, 5).await;
    let router = app.router();

    let body = json!({ "from_role": "LEARNER", "to_role": "CUSTOMER", "batch_size": 2 });
    let response = post_json_auth(router.clone(), BATCH_ASYNC, body, &admin_token()).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    let id = json["data"]["migration_id"].as_str().unwrap().to_string();

    let report = wait_for_report(router.clone(), &id).await;
    assert_eq!(report["data"]["kind"], "batch");
    assert_eq!(report["data"]["migrated"], 5);

    let status = get_auth(
        router,
        &format!("/api/v1/admin/migrations/{id}/status"),
        &admin_token(),
    )
    .await;
    let status = body_json(status).await;
    assert_eq!(status["data"]["status"], "completed");
    assert_eq!(status["data"]["processed"], 5);
    assert_eq!(status["data"]["total"], 5);
    for learner in &learners {
        assert_eq!(app.user(learner.id).await.role, Role::Customer);
    }
}

#[tokio::test]
async fn unknown_migration_is_404_everywhere() {
    let app = TestApp::new();
    let id = uuid::Uuid::now_v7();

    for path in ["status", "report"] {
        let uri = format!("/api/v1/admin/migrations/{id}/{path}");
        let response = get_auth(app.router(), &uri, &admin_token()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
    }
    for path in ["cancel", "rollback"] {
        let uri = format!("/api/v1/admin/migrations/{id}/{path}");
        let response = post_empty_auth(app.router(), &uri, &admin_token()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
    }
}
