//! Instance Queue Worker Service
//!
//! Receives every notification published to the configured topics, once per
//! running replica.
//!
//! ## Architecture
//!
//! ```text
//! SNS topics (IQ_TOPIC_ARNS)
//!   ↓ (one subscription per topic)
//! SQS queue <IQ_PREFIX>_srv-<HOSTNAME>
//!   ↓ (long poll, batch of up to IQ_MAX_NUMBER_OF_MESSAGES)
//! InstanceQueue
//!   ↓ (one task per message, IQ_HANDLER_TIMEOUT deadline)
//! Handler → delete on success
//! ```
//!
//! On shutdown the subscriptions are removed and the queue deleted.

use axum::Router;
use core_config::{app_info, server::ServerConfig, Environment, FromEnv};
use eyre::{Result, WrapErr};
use instance_queue::{
    handler_fn, health_router, metrics, unique_name, AwsBroker, HealthState, InstanceQueue,
    IqConfig,
};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

/// Start the health HTTP server
///
/// - Liveness checks: `/health`, `/healthz`
/// - Readiness checks: `/ready`, `/readyz`
/// - Prometheus metrics: `/metrics`
async fn start_health_server(health_state: HealthState, server: ServerConfig) -> Result<()> {
    let app: Router = health_router(health_state);

    let addr = server.address();
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(address = %addr, "Health server listening");

    axum::serve(listener, app)
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// Run the instance queue worker
///
/// 1. Sets up structured logging (JSON for prod, pretty for dev) and metrics
/// 2. Provisions the instance queue and its topic subscriptions
/// 3. Serves health endpoints and handles notifications
/// 4. On SIGINT/SIGTERM, or if polling fails, tears the queue down
///
/// # Errors
///
/// Returns an error if:
/// - Configuration is invalid
/// - The queue cannot be provisioned
/// - The poll loop terminates on a receive error
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    metrics::init_metrics();

    let app_info = app_info!();
    info!(name = %app_info.name, version = %app_info.version, "Starting instance queue worker");
    info!("Environment: {:?}", environment);

    let server_config =
        ServerConfig::from_env().wrap_err("Failed to load health server configuration")?;
    let iq_config =
        IqConfig::from_env().wrap_err("Failed to load instance queue configuration")?;
    info!(
        prefix = %iq_config.prefix,
        topics = ?iq_config.topic_arns,
        max_number_of_messages = iq_config.max_number_of_messages,
        wait_time_seconds = iq_config.wait_time_seconds,
        handler_timeout = iq_config.handler_timeout,
        "Instance queue configuration loaded"
    );

    let broker = AwsBroker::from_env().await;
    let mut iq = InstanceQueue::provision(unique_name(), iq_config, broker)
        .await
        .wrap_err("Failed to provision instance queue")?;

    let health_state = HealthState::new(
        app_info.name,
        app_info.version,
        iq.queue_name(),
        iq.subscribe_state(),
    );
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, server_config).await {
            error!(error = %e, "Health server failed");
        }
    });

    iq.start(handler_fn(|ctx, msg| {
        Box::pin(async move {
            info!(
                topic = %msg.notification.topic_arn,
                remaining_ms = ctx.remaining().as_millis() as u64,
                body = ?msg.body,
                "Handling notification"
            );
            Ok(())
        })
    }));

    let outcome = tokio::select! {
        result = shutdown_signal() => result,
        result = iq.wait() => result.wrap_err("Instance queue worker terminated"),
    };

    iq.stop().await;

    outcome?;
    info!("Instance queue worker stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result.wrap_err("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C, initiating shutdown...");
            },
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating shutdown...");
            },
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .wrap_err("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C, initiating shutdown...");
    }

    Ok(())
}
