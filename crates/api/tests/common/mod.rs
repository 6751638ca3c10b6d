#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use roleshift_core::roles::Role;
use roleshift_core::types::DbId;
use roleshift_core::user::UserAggregate;
use roleshift_db::{MemoryStore, MigrationStore, NewUser};
use roleshift_engine::{Engine, EngineConfig};
use roleshift_events::{EventBus, NoopNotifier};
use tower::ServiceExt;

use roleshift_api::app::build_app;
use roleshift_api::auth::jwt::{generate_access_token, JwtConfig};
use roleshift_api::config::ServerConfig;
use roleshift_api::state::AppState;

/// Operator id carried by test tokens. Never a seeded user.
pub const OPERATOR_ID: DbId = 9_000;

pub fn jwt_config() -> JwtConfig {
    JwtConfig {
        secret: "test-secret-that-is-long-enough-for-hs256".to_string(),
        access_token_expiry_mins: 15,
        issuer: None,
        leeway_secs: 60,
    }
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        jwt: jwt_config(),
    }
}

/// A fully wired app over a fresh in-memory store.
pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub engine: Engine,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_engine_config(EngineConfig::default())
    }

    pub fn with_engine_config(config: EngineConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let engine = Engine::new(
            store.clone(),
            Arc::new(NoopNotifier),
            Arc::new(EventBus::default()),
            config,
        );
        Self { store, engine }
    }

    /// The router with the production middleware stack. Cheap to rebuild,
    /// and every copy shares the same engine.
    pub fn router(&self) -> Router {
        build_app(AppState {
            engine: self.engine.clone(),
            config: Arc::new(test_config()),
        })
    }

    pub async fn seed(&self, email: &str, role: Role) -> UserAggregate {
        self.store
            .insert_user(NewUser::new(email, "Seeded User", role))
            .await
            .unwrap()
    }

    pub async fn user(&self, id: DbId) -> UserAggregate {
        self.store.find_user(id).await.unwrap().unwrap()
    }
}

pub fn admin_token() -> String {
    token_for(OPERATOR_ID, "ADMIN")
}

pub fn token_for(user_id: DbId, role: &str) -> String {
    generate_access_token(user_id, role, &jwt_config()).unwrap()
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn send(app: Router, request: Request<Body>) -> Response<Body> {
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

pub async fn get_auth(app: Router, uri: &str, token: &str) -> Response<Body> {
    let request = Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn post_json_auth(
    app: Router,
    uri: &str,
    body: serde_json::Value,
    token: &str,
) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

/// POST with no body at all, for endpoints whose body is optional.
pub async fn post_empty_auth(app: Router, uri: &str, token: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
