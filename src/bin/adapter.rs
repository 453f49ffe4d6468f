//! External-metrics adapter binary entry point: answers on-demand metric
//! queries for the platform's native horizontal autoscaler (component H).
//!
//! Thin by design (non-goal on CLI surfaces) — flags only, no subcommand
//! tree, a plain clap-dispatch entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use scaletide::domain::models::config::OperatorConfig;
use scaletide::infrastructure::config::AdapterConfigLoader;
use scaletide::infrastructure::k8s::{
    build_client, DynamicPodTemplateReader, ScaleSubresourceController, ScaledTargetAuthRepository,
    ScaledTargetRepository,
};
use scaletide::infrastructure::logging::{LogConfig, LoggerImpl};
use scaletide::infrastructure::metrics_server;
use scaletide::services::metric_store::MetricStore;
use scaletide::services::metrics_adapter::MetricsAdapter;
use scaletide::services::probe_registry::{LoadedProbeFactory, ProbeRegistry};
use scaletide::services::secret_resolution::SecretResolverRegistry;

/// `scaletide-adapter` — serves external-metric queries.
#[derive(Debug, Parser)]
#[command(name = "scaletide-adapter", version, about)]
struct Cli {
    /// Optional YAML config file, merged over built-in defaults and under
    /// `SCALETIDE_`-prefixed environment variables.
    #[arg(long, env = "SCALETIDE_CONFIG_FILE")]
    config_file: Option<PathBuf>,

    /// Port the metric-query HTTP surface listens on.
    #[arg(long, env = "SCALETIDE_LISTEN_PORT")]
    listen_port: Option<u16>,

    /// Base path for the metric-query endpoint.
    #[arg(long, env = "SCALETIDE_LISTEN_PATH")]
    listen_path: Option<String>,

    /// Per-call probe timeout for on-demand probe invocation.
    #[arg(long, env = "SCALETIDE_PROBE_TIMEOUT_SECS")]
    probe_timeout_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "SCALETIDE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _logger = LoggerImpl::init(&LogConfig {
        level: cli.log_level.clone(),
        ..LogConfig::default()
    })
    .context("failed to initialize logging")?;

    let mut config = AdapterConfigLoader::load(cli.config_file.as_deref())
        .context("failed to load adapter configuration")?;
    if let Some(port) = cli.listen_port {
        config.listen_port = port;
    }
    if let Some(path) = cli.listen_path {
        config.listen_path = path;
    }
    if let Some(secs) = cli.probe_timeout_secs {
        config.probe_timeout_secs = secs;
    }

    let client = build_client().await?;

    // The adapter has no reconciler-side defaults of its own; a target
    // descriptor that omits its own polling interval/cooldown falls back
    // to the operator's stock defaults here too (spec §6).
    let operator_defaults = OperatorConfig::default();
    let targets = Arc::new(ScaledTargetRepository::new(
        client.clone(),
        operator_defaults.default_polling_interval_secs,
        operator_defaults.default_cooldown_secs,
    ));
    let trigger_auths = Arc::new(ScaledTargetAuthRepository::new(client.clone()));
    let pod_templates = Arc::new(DynamicPodTemplateReader::new(client.clone()));
    let replica_controller = Arc::new(ScaleSubresourceController::new(client));
    let secret_registry = Arc::new(SecretResolverRegistry::new(vec![]));
    let probe_registry = Arc::new(ProbeRegistry::from_loaded(built_in_probe_factories(
        config.probe_timeout_secs,
    )));
    let metric_store = Arc::new(MetricStore::new());

    let adapter = Arc::new(MetricsAdapter::new(
        config.clone(),
        targets,
        trigger_auths,
        pod_templates,
        secret_registry,
        probe_registry,
        replica_controller,
        metric_store,
    ));

    tracing::info!(target: "adapter", port = config.listen_port, path = %config.listen_path, "scaletide adapter started");

    metrics_server::serve(config, adapter).await
}

fn built_in_probe_factories(probe_timeout_secs: u64) -> Vec<LoadedProbeFactory> {
    vec![
        LoadedProbeFactory {
            trigger_type: "http".into(),
            factory: Arc::new(scaletide::probes::HttpProbeFactory {
                call_timeout: std::time::Duration::from_secs(probe_timeout_secs),
            }),
        },
        LoadedProbeFactory {
            trigger_type: "stub".into(),
            factory: Arc::new(scaletide::probes::StubProbeFactory),
        },
    ]
}
