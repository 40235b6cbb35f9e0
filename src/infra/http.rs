//! Ops HTTP surface: liveness and cache introspection for operators.

use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    application::{login_attempts::LoginAttemptLimiter, presence::PresenceTracker},
    cache::{QueryCache, QueryReport},
    infra::db::PostgresRepositories,
};

/// Dependency checked by `/health`.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> Result<(), String>;
}

#[async_trait]
impl HealthCheck for PostgresRepositories {
    async fn check(&self) -> Result<(), String> {
        self.health_check().await.map_err(|err| err.to_string())
    }
}

#[derive(Clone)]
pub struct OpsState {
    pub health: Arc<dyn HealthCheck>,
    pub queries: Arc<QueryCache>,
    pub presence: PresenceTracker,
    pub login: LoginAttemptLimiter,
}

#[derive(Debug, Serialize)]
pub struct CacheStatus {
    pub query_entries: usize,
    pub query_tags: usize,
    pub active_users: usize,
    pub tracked_logins: usize,
}

#[derive(Debug, Serialize)]
struct HealthFailure {
    status: &'static str,
    error: String,
}

pub fn build_ops_router(state: OpsState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ops/query-report", get(query_report))
        .route("/ops/caches", get(cache_status))
        .layer(middleware::from_fn(log_responses))
        .with_state(state)
}

async fn health(State(state): State<OpsState>) -> Response {
    match state.health.check().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!(error = %err, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthFailure {
                    status: "unavailable",
                    error: err,
                }),
            )
                .into_response()
        }
    }
}

async fn query_report(State(state): State<OpsState>) -> Json<QueryReport> {
    Json(state.queries.profiler().report())
}

async fn cache_status(State(state): State<OpsState>) -> Json<CacheStatus> {
    Json(CacheStatus {
        query_entries: state.queries.len(),
        query_tags: state.queries.tag_count(),
        active_users: state.presence.active_count(),
        tracked_logins: state.login.tracked(),
    })
}

async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = Uuid::new_v4();
    let start = Instant::now();

    let response = next.run(request).await;
    let status = response.status();

    if status.is_server_error() {
        error!(
            target = "crunevo::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            elapsed_ms = start.elapsed().as_millis(),
            request_id = %request_id,
            "request failed",
        );
    } else if status.is_client_error() {
        warn!(
            target = "crunevo::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            elapsed_ms = start.elapsed().as_millis(),
            request_id = %request_id,
            "client request error",
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use axum::{body::to_bytes, http::Method};
    use serde_json::Value;
    use time::Duration;
    use tower::ServiceExt;

    use super::*;
    use crate::cache::{CacheConfig, TtlCache, system_clock};

    struct StaticHealth(Result<(), String>);

    #[async_trait]
    impl HealthCheck for StaticHealth {
        async fn check(&self) -> Result<(), String> {
            self.0.clone()
        }
    }

    fn state(health: Result<(), String>) -> OpsState {
        let clock = system_clock();
        let presence = PresenceTracker::new(
            Arc::new(TtlCache::new(
                "presence",
                NonZeroUsize::new(8).expect("non-zero"),
                clock.clone(),
            )),
            Duration::seconds(300),
        );
        presence.touch(7);
        OpsState {
            health: Arc::new(StaticHealth(health)),
            queries: Arc::new(QueryCache::new(&CacheConfig::default(), clock.clone())),
            presence,
            login: LoginAttemptLimiter::new(5, Duration::seconds(900), clock),
        }
    }

    async fn get_path(router: Router, path: &str) -> Response {
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())
            .expect("request should build");
        router.oneshot(request).await.expect("router should respond")
    }

    #[tokio::test]
    async fn health_reports_dependency_state() {
        let ok = get_path(build_ops_router(state(Ok(()))), "/health").await;
        assert_eq!(ok.status(), StatusCode::NO_CONTENT);

        let down = get_path(
            build_ops_router(state(Err("connection refused".to_string()))),
            "/health",
        )
        .await;
        assert_eq!(down.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn cache_status_reports_live_counts() {
        let response = get_path(build_ops_router(state(Ok(()))), "/ops/caches").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("body");
        let json: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["active_users"], 1);
        assert_eq!(json["query_entries"], 0);
    }

    #[tokio::test]
    async fn query_report_is_served_as_json() {
        let response = get_path(build_ops_router(state(Ok(()))), "/ops/query-report").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("body");
        let json: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["window_queries"], 0);
        assert_eq!(json["lifetime_queries"], 0);
    }
}
