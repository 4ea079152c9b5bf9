//! Health check endpoints for container orchestration
//!
//! Mounted on the same HTTP server as the WebSocket endpoint, supporting
//! both human operators and container orchestration platforms.

use crate::bridge::ClientRegistry;
use crate::observability::metrics::metrics;
use crate::transport::Broker;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use warp::http::StatusCode;
use warp::Filter;

/// Health, readiness, liveness and metrics routes
pub struct HealthServer<B: Broker> {
    broker: Arc<B>,
    registry: ClientRegistry,
    ws_path: String,
}

impl<B: Broker + 'static> HealthServer<B> {
    pub fn new(broker: Arc<B>, registry: ClientRegistry, ws_path: impl Into<String>) -> Self {
        Self {
            broker,
            registry,
            ws_path: ws_path.into(),
        }
    }

    /// Build the warp filters for every observability endpoint
    pub fn routes(
        self: Arc<Self>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let health_server = self.clone();
        let ready_server = self.clone();
        let root_server = self;

        // GET /health - overall status with detailed checks
        let health_route = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = health_server.clone();
                async move {
                    let status = server.get_health_status().await;
                    let status_code = if status.status == "healthy" {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    Ok::<_, Infallible>(warp::reply::with_status(
                        warp::reply::json(&status),
                        status_code,
                    ))
                }
            });

        // GET /metrics - complete metrics export
        let metrics_route = warp::path("metrics")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| warp::reply::json(&metrics().get_metrics()));

        // GET /ready - readiness probe
        let ready_route = warp::path("ready")
            .and(warp::path::end())
            .and(warp::get())
            .map(move || {
                let ready = ready_server.broker.is_ready();
                let response = ReadinessResponse {
                    ready,
                    timestamp: current_timestamp(),
                };
                let status_code = if ready {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                warp::reply::with_status(warp::reply::json(&response), status_code)
            });

        // GET /live - liveness probe
        let live_route = warp::path("live")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| {
                warp::reply::json(&LivenessResponse {
                    alive: true,
                    timestamp: current_timestamp(),
                })
            });

        // GET / - endpoint listing
        let root_route = warp::path::end().and(warp::get()).map(move || {
            let mut endpoints = HashMap::new();
            endpoints.insert(
                format!("/{}", root_server.ws_path),
                "WebSocket bridge to the MQTT broker".to_string(),
            );
            endpoints.insert(
                "/health".to_string(),
                "Overall health status with detailed checks".to_string(),
            );
            endpoints.insert(
                "/metrics".to_string(),
                "Bridge metrics and statistics".to_string(),
            );
            endpoints.insert("/ready".to_string(), "Readiness probe".to_string());
            endpoints.insert("/live".to_string(), "Liveness probe".to_string());

            warp::reply::json(&ApiDocumentationResponse { endpoints })
        });

        health_route
            .or(metrics_route)
            .or(ready_route)
            .or(live_route)
            .or(root_route)
    }

    async fn get_health_status(&self) -> HealthStatus {
        let now = current_timestamp();

        let mut checks = HashMap::new();
        checks.insert("mqtt".to_string(), self.check_mqtt_health());

        let overall_healthy = checks.values().all(|check| check.status == "healthy");
        let overall_status = if overall_healthy {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        };

        HealthStatus {
            status: overall_status,
            timestamp: now,
            uptime_seconds: metrics().get_metrics().uptime_seconds,
            connected_clients: self.registry.client_count().await,
            checks,
        }
    }

    fn check_mqtt_health(&self) -> HealthCheck {
        let state = self.broker.connection_state();
        let now = current_timestamp();

        if state.is_ready() {
            HealthCheck {
                status: "healthy".to_string(),
                message: Some("MQTT connection established".to_string()),
                last_check: now,
            }
        } else {
            HealthCheck {
                status: "unhealthy".to_string(),
                message: Some(format!("MQTT connection {}", state.label())),
                last_check: now,
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub last_check: u64,
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: u64,
    uptime_seconds: u64,
    connected_clients: usize,
    checks: HashMap<String, HealthCheck>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct ApiDocumentationResponse {
    endpoints: HashMap<String, String>,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
