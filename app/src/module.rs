use crate::app::run::{RunApp, RunAppImpl};
use anyhow::Result;
use infra::infra::module::RepositoryModule;
use runweaver_base::config::{QueueConfig, RunConfig, StorageConfig, StorageKind};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct AppConfigModule {
    pub storage_config: Arc<StorageConfig>,
    pub run_config: Arc<RunConfig>,
    pub queue_config: Arc<QueueConfig>,
}

impl AppConfigModule {
    pub fn new_by_env() -> Self {
        Self {
            storage_config: Arc::new(StorageConfig::from_env()),
            run_config: Arc::new(RunConfig::from_env()),
            queue_config: Arc::new(QueueConfig::from_env()),
        }
    }

    pub fn storage_type(&self) -> StorageKind {
        self.storage_config.r#type
    }
}

#[derive(Clone)]
pub struct AppModule {
    pub config_module: Arc<AppConfigModule>,
    pub repositories: Arc<RepositoryModule>,
    pub run_app: Arc<dyn RunApp + 'static>,
}

impl std::fmt::Debug for AppModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppModule")
            .field("config_module", &self.config_module)
            .finish_non_exhaustive()
    }
}

impl AppModule {
    pub fn new(config_module: Arc<AppConfigModule>, repositories: Arc<RepositoryModule>) -> Self {
        let run_app = Arc::new(RunAppImpl::new(
            config_module.run_config.clone(),
            repositories.clone(),
        ));
        Self {
            config_module,
            repositories,
            run_app,
        }
    }

    pub fn new_by_env() -> Result<Self> {
        let config_module = Arc::new(AppConfigModule::new_by_env());
        let repositories = Arc::new(RepositoryModule::new_by_env(
            &config_module.storage_config,
            &config_module.queue_config,
        )?);
        Ok(Self::new(config_module, repositories))
    }
}

pub trait UseAppModule {
    fn app_module(&self) -> &AppModule;
}
