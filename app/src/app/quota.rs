use anyhow::Result;
use domain::id::PrincipalId;
use infra::infra::repository::RunRepository;
use runweaver_base::config::RunConfig;
use runweaver_base::error::OrchestratorError;
use std::sync::Arc;

/// Daily run ceiling per principal, consulted before any state is
/// persisted or enqueued.
#[derive(Clone)]
pub struct RunQuota {
    run_repository: Arc<dyn RunRepository>,
    run_config: Arc<RunConfig>,
}

impl RunQuota {
    pub fn new(run_repository: Arc<dyn RunRepository>, run_config: Arc<RunConfig>) -> Self {
        Self {
            run_repository,
            run_config,
        }
    }

    pub async fn ensure_can_create(&self, principal_id: &PrincipalId) -> Result<()> {
        let since = runweaver_base::datetime::start_of_utc_day(runweaver_base::datetime::now());
        let created_today = self
            .run_repository
            .count_created_since(principal_id, since)
            .await?;
        if created_today >= self.run_config.daily_limit {
            tracing::warn!(
                "daily run quota reached for {}: {}/{}",
                principal_id,
                created_today,
                self.run_config.daily_limit
            );
            return Err(OrchestratorError::QuotaExceeded(format!(
                "daily run limit of {} reached",
                self.run_config.daily_limit
            ))
            .into());
        }
        Ok(())
    }
}
