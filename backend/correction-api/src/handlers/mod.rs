use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics;
use crate::services::AppState;

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut dependencies = serde_json::Map::new();

    let mongo_health = check("MongoDB", Duration::from_secs(1), state.store.ping()).await;
    let redis_health = check("Redis", Duration::from_millis(500), state.queue.ping()).await;
    let all_healthy = [&mongo_health, &redis_health]
        .iter()
        .all(|h| h.get("status").and_then(|v| v.as_str()) == Some("healthy"));
    dependencies.insert("mongodb".to_string(), json!(mongo_health));
    dependencies.insert("redis".to_string(), json!(redis_health));

    let (status_code, status) = if all_healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status_code,
        Json(json!({
            "status": status,
            "service": "prologin-correction",
            "version": env!("CARGO_PKG_VERSION"),
            "correctors": state.config.correctors.endpoints.len(),
            "dependencies": dependencies
        })),
    )
}

async fn check<F, E>(
    name: &str,
    timeout: Duration,
    probe: F,
) -> serde_json::Map<String, serde_json::Value>
where
    F: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let mut result = serde_json::Map::new();

    match tokio::time::timeout(timeout, probe).await {
        Ok(Ok(())) => {
            result.insert("status".to_string(), json!("healthy"));
            result.insert(
                "message".to_string(),
                json!(format!("{} connection successful", name)),
            );
        }
        Ok(Err(e)) => {
            result.insert("status".to_string(), json!("unhealthy"));
            result.insert("error".to_string(), json!(format!("{} error: {}", name, e)));
        }
        Err(_) => {
            result.insert("status".to_string(), json!("unhealthy"));
            result.insert(
                "error".to_string(),
                json!(format!("{} timeout after {}ms", name, timeout.as_millis())),
            );
        }
    }

    result
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {}", e),
        ),
    }
}

pub mod submissions;
