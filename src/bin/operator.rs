//! Operator binary entry point: reconciles `ScaledTarget` descriptors and
//! drives per-target probe loops (components D, E, F).
//!
//! Thin by design (non-goal on CLI surfaces) — flags only, no subcommand
//! tree, a plain clap-dispatch entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use scaletide::infrastructure::config::OperatorConfigLoader;
use scaletide::infrastructure::k8s::{
    build_client, DynamicPodTemplateReader, HpaWriter, ScaleSubresourceController,
    ScaledTargetAuthRepository, ScaledTargetRepository, TargetWatcher,
};
use scaletide::infrastructure::logging::{LogConfig, LoggerImpl};
use scaletide::services::job_mode::JobModeController;
use scaletide::services::metric_store::MetricStore;
use scaletide::services::probe_registry::{LoadedProbeFactory, ProbeRegistry};
use scaletide::services::reconciler::{Reconciler, RequeueAction};
use scaletide::services::secret_resolution::SecretResolverRegistry;
use scaletide::services::target_watcher::TargetWatcherService;

const RECONCILE_QUEUE_CAPACITY: usize = 1024;

/// `scaletide-operator` — watches scale targets and reconciles them.
#[derive(Debug, Parser)]
#[command(name = "scaletide-operator", version, about)]
struct Cli {
    /// Optional YAML config file, merged over built-in defaults and under
    /// `SCALETIDE_`-prefixed environment variables.
    #[arg(long, env = "SCALETIDE_CONFIG_FILE")]
    config_file: Option<PathBuf>,

    /// Namespace to watch; unset means cluster-wide (spec §6).
    #[arg(long, env = "SCALETIDE_WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Default polling interval applied when a target omits its own.
    #[arg(long, env = "SCALETIDE_DEFAULT_POLLING_INTERVAL_SECS")]
    default_polling_interval_secs: Option<u64>,

    /// Default per-call probe timeout applied when a target omits its own.
    #[arg(long, env = "SCALETIDE_DEFAULT_PROBE_TIMEOUT_SECS")]
    default_probe_timeout_secs: Option<u64>,

    /// Participate in leader election before reconciling.
    #[arg(long, env = "SCALETIDE_LEADER_ELECTION_ENABLED")]
    leader_election: bool,

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

    let mut config = OperatorConfigLoader::load(cli.config_file.as_deref())
        .context("failed to load operator configuration")?;
    if let Some(namespace) = cli.watch_namespace {
        config.watch_namespace = namespace;
    }
    if let Some(secs) = cli.default_polling_interval_secs {
        config.default_polling_interval_secs = secs;
    }
    if let Some(secs) = cli.default_probe_timeout_secs {
        config.default_probe_timeout_secs = secs;
    }
    if cli.leader_election {
        config.leader_election_enabled = true;
    }

    let client = build_client().await?;
    let namespace = (!config.watch_namespace.is_empty()).then(|| config.watch_namespace.clone());

    let targets = Arc::new(ScaledTargetRepository::new(
        client.clone(),
        config.default_polling_interval_secs,
        config.default_cooldown_secs,
    ));
    let trigger_auths = Arc::new(ScaledTargetAuthRepository::new(client.clone()));
    let pod_templates = Arc::new(DynamicPodTemplateReader::new(client.clone()));
    let autoscaler_writer = Arc::new(HpaWriter::new(client.clone()));
    let replica_controller = Arc::new(ScaleSubresourceController::new(client.clone()));
    let secret_registry = Arc::new(SecretResolverRegistry::new(vec![]));
    let probe_registry = Arc::new(ProbeRegistry::from_loaded(built_in_probe_factories(
        config.default_probe_timeout_secs,
    )));
    let metric_store = Arc::new(MetricStore::new());
    let job_mode = Arc::new(JobModeController::new());

    let reconciler = Arc::new(Reconciler::new(
        config.clone(),
        targets,
        trigger_auths,
        pod_templates,
        secret_registry,
        probe_registry,
        autoscaler_writer,
        replica_controller,
        metric_store,
        job_mode,
    ));

    let watcher_service = Arc::new(TargetWatcherService::new(RECONCILE_QUEUE_CAPACITY));
    let watch_events = TargetWatcher::new(client, namespace).run();
    tokio::spawn({
        let watcher_service = watcher_service.clone();
        async move { watcher_service.run(watch_events).await }
    });

    tracing::info!(target: "operator", namespace = %config.watch_namespace, "scaletide operator started");

    while let Some(key) = watcher_service.recv().await {
        let reconciler = reconciler.clone();
        tokio::spawn(async move {
            match reconciler.reconcile(&key).await {
                Ok(RequeueAction::AwaitChange) => {}
                Ok(RequeueAction::Requeue(delay)) => {
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    tracing::warn!(target: "operator", %error, namespace = %key.namespace, name = %key.name, "reconcile failed");
                    if let RequeueAction::Requeue(delay) = Reconciler::error_policy(&error) {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        });
    }

    Ok(())
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
