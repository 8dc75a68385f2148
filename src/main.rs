use anyhow::Context as _;
use aws_config::BehaviorVersion;
use drainwatch::aws::{EcsControlPlane, ElbTargetHealth, MetadataClient};
use drainwatch::config::SidecarConfig;
use drainwatch::error::SidecarError;
use drainwatch::server::{
    create_metrics, run_health_server, shutdown_channel, wait_for_signal, ReadinessState,
    SharedMetrics,
};
use drainwatch::sidecar::{
    bootstrap, run_until_signal, Clock, DrainDetector, ExitTrigger, HealthPoller, Outcome,
    PortSelection, Runner, SystemClock,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How long the health server gets to finish in-flight requests on exit
const SERVER_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting drainwatch sidecar");

    let outcome = match run(SidecarConfig::from_env()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = format!("{:#}", e), "Sidecar failed");
            Outcome::Fatal
        }
    };

    info!(outcome = ?outcome, code = outcome.exit_status(), "Exiting");
    outcome.exit_code()
}

async fn run(config: SidecarConfig) -> anyhow::Result<Outcome> {
    info!(
        metadata_uri = %config.metadata_uri,
        deregistration_wait_secs = config.deregistration_wait.as_secs(),
        poll_interval_secs = config.poll_interval.as_secs(),
        max_consecutive_failures = config.max_consecutive_failures,
        "Configuration loaded"
    );

    let (shutdown_controller, shutdown_signal) = shutdown_channel();

    // Not ready until the target is resolved
    let readiness = ReadinessState::new();

    let metrics = create_metrics().context("failed to create metrics registry")?;

    let health_handle = config.health_port.map(|port| {
        let health_readiness = readiness.clone();
        let health_metrics = metrics.clone();
        let health_shutdown = shutdown_signal.clone();
        tokio::spawn(async move {
            if let Err(e) =
                run_health_server(port, health_readiness, health_metrics, health_shutdown).await
            {
                warn!(error = %e, "Health server failed");
            }
        })
    });
    if health_handle.is_none() {
        info!("HEALTH_PORT not set - health server disabled");
    }

    // SIGTERM from ECS wins over anything the watch loop is doing
    let outcome = run_until_signal(watch(&config, readiness, metrics), wait_for_signal()).await;

    shutdown_controller.shutdown();
    if let Some(handle) = health_handle {
        if tokio::time::timeout(SERVER_SHUTDOWN_GRACE, handle)
            .await
            .is_err()
        {
            warn!("Health server did not stop within the grace period");
        }
    }

    Ok(outcome)
}

/// Resolve the target, then poll until it drains or polling gives up
async fn watch(
    config: &SidecarConfig,
    readiness: ReadinessState,
    metrics: SharedMetrics,
) -> Result<Outcome, SidecarError> {
    let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    info!(
        region = sdk_config.region().map(|r| r.as_ref()).unwrap_or("unset"),
        "AWS configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let metadata = MetadataClient::new(config.metadata_uri.clone());
    let control_plane = EcsControlPlane::new(&sdk_config);
    let poller = HealthPoller::new(
        Arc::new(ElbTargetHealth::new(&sdk_config)),
        clock.clone(),
        config.retry.clone(),
    )
    .with_call_timeout(config.health_call_timeout)
    .with_metrics(metrics.clone());

    let (identity, target) =
        bootstrap(&metadata, &control_plane, &poller, &PortSelection::from(config)).await?;
    info!(
        task_arn = %identity.task_arn,
        target_group = %target.target_group_arn,
        target_id = %target.target_id,
        port = target.target_port,
        "Watching target"
    );
    readiness.set_ready();

    let trigger = Arc::new(ExitTrigger::new(Some(readiness.clone())));
    let mut runner = Runner::new(
        poller,
        DrainDetector::new(config.deregistration_wait),
        clock,
        trigger,
        config.poll_interval,
        config.max_consecutive_failures,
    )
    .with_metrics(metrics)
    .with_readiness(readiness);

    runner.run(&target).await
}
