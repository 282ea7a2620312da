use chrono::{DateTime, Utc};
use domain::id::RunId;
use domain::run::RunStatus;
use infra::infra::repository::RunRepository;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Why the composed token fired. First cause wins; later triggers are
/// no-ops, so concurrent firing cannot double-transition the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopCause {
    Cancelled = 1,
    Expired = 2,
    Shutdown = 3,
}

/// Composes the three stop conditions into one token observed by the
/// engine at every suspension point:
/// - a level-triggered poll of the persisted status for `cancelling`
///   (cancellation must work even when the cancel request was handled by
///   a different process, so this is a poll, not a push); a deleted run
///   counts as cancelled too;
/// - a deadline timer at the run's `expires_at`;
/// - process shutdown.
pub struct RunStopController {
    token: CancellationToken,
    cause: Arc<AtomicU8>,
    watchers: Vec<JoinHandle<()>>,
}

impl RunStopController {
    pub fn start(
        run_repository: Arc<dyn RunRepository>,
        run_id: RunId,
        expires_at: DateTime<Utc>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let token = CancellationToken::new();
        let cause = Arc::new(AtomicU8::new(0));
        let mut watchers = Vec::with_capacity(3);

        // (a) cancellation poll
        {
            let token = token.clone();
            let cause = cause.clone();
            let run_id = run_id.clone();
            watchers.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(poll_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                interval.tick().await; // immediate first tick
                loop {
                    interval.tick().await;
                    match run_repository.find_status(&run_id).await {
                        Ok(Some(RunStatus::Cancelling)) => {
                            tracing::info!("run {} is cancelling, stopping execution", run_id);
                            trigger(&cause, &token, StopCause::Cancelled);
                            return;
                        }
                        Ok(None) => {
                            tracing::info!("run {} was deleted, stopping execution", run_id);
                            trigger(&cause, &token, StopCause::Cancelled);
                            return;
                        }
                        Ok(Some(_)) => {}
                        Err(e) => {
                            tracing::error!("failed to poll run {} status: {:?}", run_id, e);
                        }
                    }
                }
            }));
        }

        // (b) expiration deadline
        {
            let token = token.clone();
            let cause = cause.clone();
            watchers.push(tokio::spawn(async move {
                let remaining = expires_at - runweaver_base::datetime::now();
                if let Ok(remaining) = remaining.to_std() {
                    tokio::time::sleep(remaining).await;
                }
                trigger(&cause, &token, StopCause::Expired);
            }));
        }

        // (c) worker shutdown
        {
            let token = token.clone();
            let cause = cause.clone();
            watchers.push(tokio::spawn(async move {
                shutdown.cancelled().await;
                trigger(&cause, &token, StopCause::Shutdown);
            }));
        }

        Self {
            token,
            cause,
            watchers,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cause(&self) -> Option<StopCause> {
        match self.cause.load(Ordering::Acquire) {
            1 => Some(StopCause::Cancelled),
            2 => Some(StopCause::Expired),
            3 => Some(StopCause::Shutdown),
            _ => None,
        }
    }
}

fn trigger(cause: &AtomicU8, token: &CancellationToken, fired: StopCause) {
    if cause
        .compare_exchange(0, fired as u8, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        token.cancel();
    }
}

impl Drop for RunStopController {
    fn drop(&mut self) {
        for watcher in &self.watchers {
            watcher.abort();
        }
    }
}
