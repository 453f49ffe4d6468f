//! An HTTP-polling probe: GETs a JSON endpoint of shape `{"value": <number>}`
//! and compares it against the trigger's activation threshold.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::errors::ProbeError;
use crate::domain::models::metric::DerivedMetricSpec;
use crate::domain::ports::probe::{Probe, ProbeConstructArgs, ProbeFactory, ProbeReading};

pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
    bearer_token: Option<String>,
    spec: DerivedMetricSpec,
}

impl HttpProbe {
    async fn fetch_value(&self) -> Result<f64, ProbeError> {
        let mut req = self.client.get(&self.url);
        if let Some(token) = &self.bearer_token {
            req = req.bearer_auth(token);
        }
        let response = req
            .send()
            .await
            .map_err(|e| ProbeError::Unreachable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProbeError::Unreachable(format!(
                "status {}",
                response.status()
            )));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProbeError::InvalidResponse(e.to_string()))?;
        body.get("value")
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| ProbeError::InvalidResponse("missing numeric \"value\" field".into()))
    }
}

#[async_trait]
impl Probe for HttpProbe {
    fn metric_spec(&self) -> &DerivedMetricSpec {
        &self.spec
    }

    async fn is_active(&self) -> Result<bool, ProbeError> {
        let value = self.fetch_value().await?;
        Ok(value >= self.spec.activation_threshold)
    }

    async fn metrics_and_activity(&self) -> Result<ProbeReading, ProbeError> {
        let value = self.fetch_value().await?;
        Ok(ProbeReading {
            value,
            active: value >= self.spec.activation_threshold,
        })
    }

    async fn close(&self) {}
}

/// Builds [`HttpProbe`]s from `config.url` and, via the resolved auth map,
/// an optional `bearerToken` parameter.
pub struct HttpProbeFactory {
    pub call_timeout: Duration,
}

#[async_trait]
impl ProbeFactory for HttpProbeFactory {
    async fn construct(&self, args: ProbeConstructArgs<'_>) -> Result<Box<dyn Probe>, ProbeError> {
        let url = args
            .config
            .get("url")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ProbeError::InvalidConfig("config.url is required".into()))?
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(self.call_timeout)
            .build()
            .map_err(|e| ProbeError::InvalidConfig(e.to_string()))?;

        Ok(Box::new(HttpProbe {
            client,
            url,
            bearer_token: args.resolved_auth.get("bearerToken").cloned(),
            spec: DerivedMetricSpec {
                metric_name: args.metric_name,
                target_value: args.target_value,
                activation_threshold: args.activation_threshold,
                metric_type: args.metric_type,
                fallback_threshold: None,
                fallback_replicas: None,
            },
        }))
    }
}
