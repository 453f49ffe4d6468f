//! HTTP surface for the external-metrics adapter (component H, spec §6).
//!
//! `axum::Router` + `with_state` + a single `tokio::net::TcpListener`
//! bind-and-serve, adapted from a JSON-RPC envelope to the platform's
//! external-metrics query/response shape.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::domain::models::config::AdapterConfig;
use crate::services::metrics_adapter::{AdapterError, MetricQuery, MetricsAdapter};

#[derive(Clone)]
struct AppState {
    adapter: Arc<MetricsAdapter>,
}

#[derive(Debug, Deserialize)]
struct QueryParams {
    #[serde(rename = "labelSelector")]
    label_selector: Option<String>,
}

/// One entry of the platform's canonical external-metrics envelope.
#[derive(Debug, Serialize)]
struct ExternalMetricValue {
    #[serde(rename = "metricName")]
    metric_name: String,
    #[serde(rename = "metricLabels")]
    metric_labels: std::collections::BTreeMap<String, String>,
    timestamp: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct ExternalMetricValueList {
    kind: &'static str,
    #[serde(rename = "apiVersion")]
    api_version: &'static str,
    items: Vec<ExternalMetricValue>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

/// Bind and serve the adapter's query endpoint until the process exits.
pub async fn serve(config: AdapterConfig, adapter: Arc<MetricsAdapter>) -> anyhow::Result<()> {
    let listen_port = config.listen_port;
    let listen_path = config.listen_path.clone();
    let state = AppState { adapter };

    let route = format!("{listen_path}/namespaces/:namespace/:target_name/:metric_name");
    let app = Router::new()
        .route(&route, get(query_metric))
        .with_state(state);

    let addr = format!("0.0.0.0:{listen_port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(target: "metrics_server", %addr, path = %listen_path, "external metrics adapter listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn query_metric(
    State(state): State<AppState>,
    Path((namespace, target_name, metric_name)): Path<(String, String, String)>,
    Query(params): Query<QueryParams>,
) -> Response {
    let query = MetricQuery {
        namespace,
        target_name,
        metric_name: metric_name.clone(),
        label_selector: params.label_selector,
    };

    match state.adapter.query(&query).await {
        Ok(value) => {
            let body = ExternalMetricValueList {
                kind: "ExternalMetricValueList",
                api_version: "external.metrics.k8s.io/v1beta1",
                items: vec![ExternalMetricValue {
                    metric_name,
                    metric_labels: std::collections::BTreeMap::new(),
                    timestamp: chrono::Utc::now().to_rfc3339(),
                    value: format!("{value}"),
                }],
            };
            Json(body).into_response()
        }
        Err(err) => adapter_error_response(&err),
    }
}

/// 404 on target/metric not found, 503 when the probe failed and no
/// fallback applied — every other adapter error also degrades to a
/// retriable 503 rather than a hard crash of the HTTP surface (spec §6).
fn adapter_error_response(err: &AdapterError) -> Response {
    let status = if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    tracing::warn!(target: "metrics_server", error = %err, "metric query failed");
    (
        status,
        Json(ErrorBody {
            message: err.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ScaleError;

    #[test]
    fn not_found_maps_to_404() {
        let err = AdapterError::TargetNotFound {
            namespace: "default".into(),
            name: "ghost".into(),
        };
        let response = adapter_error_response(&err);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn probe_failure_maps_to_503() {
        let err = AdapterError::Scale(ScaleError::TargetMissing {
            namespace: "default".into(),
            name: "orders".into(),
            workload: "orders-worker".into(),
        });
        let response = adapter_error_response(&err);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
