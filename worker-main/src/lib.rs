use anyhow::Result;
use app::app::run::RunApp;
use app::module::AppModule;
use futures::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use worker_app::engine::AgentEngine;
use worker_app::worker::dispatcher::RunJobDispatcherImpl;
use worker_app::worker::executor::RunExecutorImpl;

const EXPIRATION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Boot the all-in-one worker process: storage modules from env, the run
/// job dispatcher, the periodic expiration sweep and signal handling. The
/// agent engine is injected; the orchestrator treats it as opaque.
pub async fn boot_worker(engine: Arc<dyn AgentEngine>) -> Result<()> {
    let app_module = Arc::new(AppModule::new_by_env()?);
    let config = app_module.config_module.clone();
    tracing::info!(
        "booting {} (storage={:?}, concurrency={})",
        runweaver_base::APP_WORKER_NAME,
        config.storage_type(),
        config.queue_config.concurrency
    );

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone())?;
    spawn_expiration_sweep(app_module.clone(), shutdown.clone());

    let executor = Arc::new(RunExecutorImpl::new(
        config.run_config.clone(),
        config.queue_config.clone(),
        app_module.repositories.clone(),
        engine,
    ));
    let dispatcher = RunJobDispatcherImpl::new(
        app_module.repositories.job_queue.clone(),
        executor,
        config.queue_config.concurrency,
        shutdown,
    );
    dispatcher.dispatch_jobs().await
}

fn spawn_signal_listener(shutdown: CancellationToken) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    tokio::spawn(async move {
        if let Some(signal) = signals.next().await {
            tracing::info!("received signal {}, shutting down", signal);
            shutdown.cancel();
        }
    });
    Ok(())
}

/// Runs whose worker died (or that never left the queue) are reclaimed by
/// marking them expired once their deadline passes.
fn spawn_expiration_sweep(app_module: Arc<AppModule>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(EXPIRATION_SWEEP_INTERVAL);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = interval.tick() => {
                    if let Err(e) = app_module.run_app.expire_stale_runs().await {
                        tracing::error!("expiration sweep failed: {:?}", e);
                    }
                }
            }
        }
    });
}
