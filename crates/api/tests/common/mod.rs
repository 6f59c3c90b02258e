#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use unplugd_api::config::ServerConfig;
use unplugd_api::router::build_app_router;
use unplugd_api::state::AppState;
use unplugd_api::ws::{WsGateway, WsManager};
use unplugd_db::{MemoryConnectionRegistry, MemoryJobStore};
use unplugd_events::{EventBus, NotificationDispatcher};
use unplugd_pipeline::runners::ScriptedTaskRunner;
use unplugd_pipeline::{JobService, MemoryObjectStore, Orchestrator, OrchestratorSettings};

pub const UPLOAD_BUCKET: &str = "test-uploads";
pub const OUTPUT_BUCKET: &str = "test-output";

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        connection_ttl_secs: 7200,
        connection_sweep_interval_secs: 300,
        database_url: None,
        connection_gateway_url: None,
        single_replica: false,
    }
}

/// The application router over in-memory stores, plus handles on its parts.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub jobs: Arc<MemoryJobStore>,
    pub connections: Arc<MemoryConnectionRegistry>,
    pub objects: Arc<MemoryObjectStore>,
    pub runner: Arc<ScriptedTaskRunner>,
}

/// Build the full application with the production middleware stack and a
/// scripted stage runner in which every stage succeeds.
pub fn build_test_app() -> TestApp {
    build_test_app_with(|runner| runner)
}

pub fn build_test_app_with(
    script: impl FnOnce(ScriptedTaskRunner) -> ScriptedTaskRunner,
) -> TestApp {
    let config = test_config();
    let jobs = Arc::new(MemoryJobStore::new());
    let connections = Arc::new(MemoryConnectionRegistry::new());
    let objects = Arc::new(MemoryObjectStore::new());
    let runner = Arc::new(script(ScriptedTaskRunner::new(objects.clone())));
    let ws_manager = Arc::new(WsManager::new());
    let event_bus = Arc::new(EventBus::default());

    let dispatcher = Arc::new(NotificationDispatcher::new(
        connections.clone(),
        Arc::new(WsGateway::new(ws_manager.clone())),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        jobs.clone(),
        objects.clone(),
        runner.clone(),
        dispatcher.clone(),
        event_bus.clone(),
        OrchestratorSettings::new(UPLOAD_BUCKET, OUTPUT_BUCKET),
    ));
    let service = Arc::new(JobService::new(
        jobs.clone(),
        objects.clone(),
        orchestrator,
        dispatcher,
        4,
    ));

    let state = AppState {
        config: Arc::new(config.clone()),
        pool: None,
        jobs: service,
        connections: connections.clone(),
        ws_manager,
        event_bus,
    };
    let router = build_app_router(state.clone(), &config);

    TestApp {
        router,
        state,
        jobs,
        connections,
        objects,
        runner,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str, owner: Option<&str>) -> Response {
        self.send(request(Method::GET, uri, owner, None)).await
    }

    pub async fn post_json(
        &self,
        uri: &str,
        owner: Option<&str>,
        body: serde_json::Value,
    ) -> Response {
        self.send(request(Method::POST, uri, owner, Some(body))).await
    }

    pub async fn delete(&self, uri: &str, owner: Option<&str>) -> Response {
        self.send(request(Method::DELETE, uri, owner, None)).await
    }
}

pub fn request(
    method: Method,
    uri: &str,
    owner: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(owner) = owner {
        builder = builder.header("x-owner-id", owner);
    }
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
