//! tierd scheduler
//!
//! Subscribes to the cluster manager as a framework and converges a
//! three-tier Kubernetes cluster (datastore, servers, agents) onto the
//! offered resources.
//!
//! ## Architecture
//!
//! - **Subscription**: event stream from the master; exits the process on
//!   any stream failure so the supervisor restarts it
//! - **Heartbeat Loop**: health assessment and tier start-up
//! - **Reconciler**: CheckState promotion and task reconciliation

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tierd_scheduler::heartbeat::run_heartbeat_loop;
use tierd_scheduler::reconciler::{Reconciler, ReconcilerConfig};
use tierd_scheduler::stream::run_subscription;
use tierd_scheduler::{store, Config, MasterClient, Scheduler, StoreNodeDirectory, TaskRepository};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first so the log level can come from it
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.as_str().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        framework = %config.framework_name,
        master = %config.master,
        store_url = %config.store_url,
        "Starting tierd scheduler"
    );

    // Connect to the task store
    let task_store = store::connect(&config.store_url).await?;
    let repo = TaskRepository::new(task_store, config.framework_name.clone());
    repo.ping().await?;
    let nodes = Arc::new(StoreNodeDirectory::new(repo.clone()));

    let master = Arc::new(MasterClient::new(&config)?);

    // Resume a previous registration if there is one
    let mut scheduler = Scheduler::new(config.clone(), repo.clone(), nodes, master.clone());
    if let Some(identity) = repo.load_identity().await? {
        info!(framework_id = ?identity.framework_id.as_ref().map(|id| id.as_str()), "Resuming framework");
        scheduler = scheduler.with_identity(identity);
    }
    match repo.load_config().await {
        Ok(Some(persisted)) => scheduler = scheduler.with_persisted_config(persisted),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Ignoring persisted framework config"),
    }
    let scheduler = Arc::new(scheduler);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start the heartbeat loop
    let heartbeat_handle = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        let shutdown_rx = shutdown_rx.clone();
        async move { run_heartbeat_loop(scheduler, shutdown_rx).await }
    });

    // Start the reconciliation loop
    let reconciler = Reconciler::new(Arc::clone(&scheduler), ReconcilerConfig::from_config(&config));
    let reconciler_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            reconciler.run(shutdown_rx).await;
        }
    });

    // The subscription runs until the stream fails
    let outcome = tokio::select! {
        result = run_subscription(&scheduler, &master) => {
            match result {
                Ok(()) => Ok(()),
                Err(e) => {
                    error!(error = %e, "Subscription terminated");
                    Err(e.into())
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            Ok(())
        }
    };

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);
    let _ = heartbeat_handle.await;
    let _ = reconciler_handle.await;

    info!("Scheduler shutdown complete");
    outcome
}
