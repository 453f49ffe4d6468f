//! A probe that always reports a fixed reading. Useful for tests and as a
//! template for new probe types.

use async_trait::async_trait;

use crate::domain::errors::ProbeError;
use crate::domain::models::metric::DerivedMetricSpec;
use crate::domain::ports::probe::{Probe, ProbeConstructArgs, ProbeFactory, ProbeReading};

pub struct StubProbe {
    spec: DerivedMetricSpec,
    fixed_value: f64,
    fixed_active: bool,
}

#[async_trait]
impl Probe for StubProbe {
    fn metric_spec(&self) -> &DerivedMetricSpec {
        &self.spec
    }

    async fn is_active(&self) -> Result<bool, ProbeError> {
        Ok(self.fixed_active)
    }

    async fn metrics_and_activity(&self) -> Result<ProbeReading, ProbeError> {
        Ok(ProbeReading {
            value: self.fixed_value,
            active: self.fixed_active,
        })
    }

    async fn close(&self) {}
}

/// Builds [`StubProbe`]s from `config.value` (number) and `config.active`
/// (bool); both default to values that read as inactive.
pub struct StubProbeFactory;

#[async_trait]
impl ProbeFactory for StubProbeFactory {
    async fn construct(&self, args: ProbeConstructArgs<'_>) -> Result<Box<dyn Probe>, ProbeError> {
        let fixed_value = args
            .config
            .get("value")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.0);
        let fixed_active = args
            .config
            .get("active")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        Ok(Box::new(StubProbe {
            spec: DerivedMetricSpec {
                metric_name: args.metric_name,
                target_value: args.target_value,
                activation_threshold: args.activation_threshold,
                metric_type: args.metric_type,
                fallback_threshold: None,
                fallback_replicas: None,
            },
            fixed_value,
            fixed_active,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::metric::MetricType;

    #[tokio::test]
    async fn reports_configured_value_and_activity() {
        let mut config = serde_json::Map::new();
        config.insert("value".into(), serde_json::json!(7.5));
        config.insert("active".into(), serde_json::json!(true));
        let auth = Default::default();

        let probe = StubProbeFactory
            .construct(ProbeConstructArgs {
                config: &config,
                resolved_auth: &auth,
                pod_identity_hint: None,
                metric_name: "s0-stub-x".into(),
                metric_type: MetricType::Value,
                activation_threshold: 1.0,
                target_value: 10.0,
            })
            .await
            .unwrap();

        assert!(probe.is_active().await.unwrap());
        let reading = probe.metrics_and_activity().await.unwrap();
        assert_eq!(reading.value, 7.5);
        assert!(reading.active);
    }

    #[tokio::test]
    async fn defaults_to_inactive_zero() {
        let config = serde_json::Map::new();
        let auth = Default::default();
        let probe = StubProbeFactory
            .construct(ProbeConstructArgs {
                config: &config,
                resolved_auth: &auth,
                pod_identity_hint: None,
                metric_name: "s0-stub-x".into(),
                metric_type: MetricType::Value,
                activation_threshold: 1.0,
                target_value: 10.0,
            })
            .await
            .unwrap();
        assert!(!probe.is_active().await.unwrap());
    }
}
