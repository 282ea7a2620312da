use crate::engine::AgentEngine;
use crate::worker::gate::ActionGate;
use crate::worker::handler::EngineEventHandler;
use crate::worker::stop::{RunStopController, StopCause};
use anyhow::Result;
use domain::engine::EngineInput;
use domain::error::ApiError;
use domain::event::{RunEventKind, RunStreamEvent};
use domain::id::RunId;
use domain::run::{Run, RunStatus};
use infra::infra::module::RepositoryModule;
use runweaver_base::config::{QueueConfig, RunConfig};
use runweaver_base::error::OrchestratorError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const ENGINE_EVENT_BUFFER: usize = 64;

/// Executes one run end to end: the entry point invoked per queue job.
/// Owns the run's records for the whole execution and performs exactly one
/// terminal transition on every path.
pub struct RunExecutorImpl {
    run_config: Arc<RunConfig>,
    queue_config: Arc<QueueConfig>,
    repositories: Arc<RepositoryModule>,
    engine: Arc<dyn AgentEngine>,
}

impl RunExecutorImpl {
    pub fn new(
        run_config: Arc<RunConfig>,
        queue_config: Arc<QueueConfig>,
        repositories: Arc<RepositoryModule>,
        engine: Arc<dyn AgentEngine>,
    ) -> Self {
        Self {
            run_config,
            queue_config,
            repositories,
            engine,
        }
    }

    pub async fn execute(&self, run_id: &RunId, shutdown: CancellationToken) -> Result<()> {
        match self.execute_inner(run_id, shutdown).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // safeguard for programmatic errors and unfinished paths:
                // fail the run now instead of letting the client wait for
                // expiration
                tracing::error!("run {} execution failed: {:?}", run_id, e);
                self.mark_failed_safeguard(run_id).await;
                Err(e)
            }
        }
    }

    async fn execute_inner(&self, run_id: &RunId, shutdown: CancellationToken) -> Result<()> {
        let repositories = &self.repositories;
        let Some(mut run) = repositories.run_repository.find(run_id).await? else {
            tracing::warn!("run {} not found, dropping job", run_id);
            return Ok(());
        };
        if run.is_terminal() {
            tracing::debug!("run {} already {}, dropping job", run_id, run.status);
            return Ok(());
        }

        // bound concurrently active runs per principal by deferring the job
        let active = repositories
            .run_repository
            .count_active(&run.principal_id)
            .await?;
        if run.status == RunStatus::Queued && active >= self.run_config.max_active_per_principal {
            tracing::debug!(
                "principal {} has {} active runs, deferring run {}",
                run.principal_id,
                active,
                run_id
            );
            repositories
                .job_queue
                .enqueue_after(
                    run_id,
                    Duration::from_millis(self.queue_config.deferral_milliseconds),
                )
                .await?;
            return Ok(());
        }

        run.start()?;
        repositories.run_repository.upsert(&run).await?;
        repositories
            .event_publisher
            .publish_event(
                run_id,
                &RunStreamEvent::run(RunEventKind::RunInProgress, &run),
            )
            .await?;

        let controller = RunStopController::start(
            repositories.run_repository.clone(),
            run.id.clone(),
            run.expires_at,
            Duration::from_millis(self.run_config.status_poll_interval_milliseconds),
            shutdown,
        );
        let token = controller.token();

        let memory = repositories
            .message_repository
            .find_by_thread(&run.thread_id)
            .await?;
        let engine_input = EngineInput {
            run_id: run.id.clone(),
            thread_id: run.thread_id.clone(),
            assistant_id: run.assistant_id.clone(),
            model: run.model.clone(),
            instructions: run.instructions.clone(),
            tools: run.tools.clone(),
            memory,
        };
        let (events_tx, mut events_rx) = mpsc::channel(ENGINE_EVENT_BUFFER);
        let engine = self.engine.clone();
        let engine_token = token.clone();
        let engine_task =
            tokio::spawn(async move { engine.run(engine_input, events_tx, engine_token).await });

        let gate = ActionGate::new(
            repositories.run_repository.clone(),
            repositories.event_publisher.clone(),
            repositories.event_subscriber.clone(),
        );
        let mut handler = EngineEventHandler::new(
            run,
            repositories.step_repository.clone(),
            repositories.message_repository.clone(),
            repositories.event_publisher.clone(),
            gate,
            token,
        );

        // the single dispatcher loop: engine events are handled strictly in
        // emission order; the channel closes when the engine finishes
        while let Some(event) = events_rx.recv().await {
            if let Err(e) = handler.handle(event).await {
                tracing::error!("event handling failed for run {}: {:?}", run_id, e);
            }
        }
        let engine_result: Result<()> = match engine_task.await {
            Ok(result) => result,
            Err(e) => {
                Err(OrchestratorError::RuntimeError(format!("engine task died: {e}")).into())
            }
        };

        match &engine_result {
            Ok(()) => {
                if let Err(e) = handler.on_engine_success().await {
                    tracing::error!("finalizing run {} leftovers failed: {:?}", run_id, e);
                }
            }
            Err(engine_error) => {
                if let Err(e) = handler.on_engine_error(engine_error).await {
                    tracing::error!("finalizing run {} leftovers failed: {:?}", run_id, e);
                }
            }
        }
        let fatal_error = handler.fatal_error().cloned();
        let mut run = handler.into_run();

        let finish = self
            .finish_run(&mut run, engine_result, fatal_error, controller.cause())
            .await;
        // finally-equivalent: whatever happened above, streaming clients
        // must be able to detect end-of-stream
        let done = repositories
            .event_publisher
            .publish_event(run_id, &RunStreamEvent::done())
            .await;
        drop(controller);
        finish?;
        done.map(|_| ())
    }

    /// Exactly one terminal transition and one terminal event. The deadline
    /// check precedes the completed-commit: expiration wins over an
    /// in-flight success.
    async fn finish_run(
        &self,
        run: &mut Run,
        engine_result: Result<()>,
        fatal_error: Option<ApiError>,
        cause: Option<StopCause>,
    ) -> Result<()> {
        let now = runweaver_base::datetime::now();
        let terminal_event = match engine_result {
            Ok(()) => {
                if cause == Some(StopCause::Expired) || run.is_expired_at(now) {
                    run.expire()?;
                    Some(RunEventKind::RunExpired)
                } else if let Some(error) = fatal_error {
                    run.fail(error)?;
                    Some(RunEventKind::RunFailed)
                } else {
                    run.complete()?;
                    Some(RunEventKind::RunCompleted)
                }
            }
            Err(engine_error) => match cause {
                Some(StopCause::Expired) => {
                    run.expire()?;
                    Some(RunEventKind::RunExpired)
                }
                Some(StopCause::Cancelled) => {
                    // the cancel endpoint moved the persisted record to
                    // cancelling; align the worker's copy before finishing
                    if run.status != RunStatus::Cancelling {
                        run.start_cancel()?;
                    }
                    run.cancel()?;
                    Some(RunEventKind::RunCancelled)
                }
                Some(StopCause::Shutdown) => {
                    tracing::warn!(
                        "run {} interrupted by worker shutdown, left for redelivery",
                        run.id
                    );
                    None
                }
                None => {
                    tracing::error!("run {} failed: {:?}", run.id, engine_error);
                    run.fail(ApiError::from_error(&engine_error))?;
                    Some(RunEventKind::RunFailed)
                }
            },
        };
        if let Some(event) = terminal_event {
            self.repositories.run_repository.upsert(run).await?;
            self.repositories
                .event_publisher
                .publish_event(&run.id, &RunStreamEvent::run(event, run))
                .await?;
            tracing::info!("run {} finished as {}", run.id, run.status);
        }
        Ok(())
    }

    async fn mark_failed_safeguard(&self, run_id: &RunId) {
        let run = match self.repositories.run_repository.find(run_id).await {
            Ok(Some(run)) => run,
            Ok(None) => return,
            Err(e) => {
                tracing::error!("safeguard load failed for run {}: {:?}", run_id, e);
                return;
            }
        };
        if run.is_terminal() {
            return;
        }
        let mut run = run;
        if let Err(e) = run.fail(ApiError::internal("internal server error")) {
            tracing::error!("safeguard transition failed for run {}: {:?}", run_id, e);
            return;
        }
        let publisher = &self.repositories.event_publisher;
        let _ = self
            .repositories
            .run_repository
            .upsert(&run)
            .await
            .inspect_err(|e| tracing::error!("safeguard upsert failed: {:?}", e));
        let _ = publisher
            .publish_event(run_id, &RunStreamEvent::run(RunEventKind::RunFailed, &run))
            .await
            .inspect_err(|e| tracing::error!("safeguard publish failed: {:?}", e));
        let _ = publisher
            .publish_event(run_id, &RunStreamEvent::done())
            .await
            .inspect_err(|e| tracing::error!("safeguard publish failed: {:?}", e));
    }
}
