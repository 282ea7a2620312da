use anyhow::Result;
use deadpool_redis::Runtime;
use runweaver_base::config::RedisConfig;
use runweaver_base::error::OrchestratorError;

pub type RedisPool = deadpool_redis::Pool;

/// Plain client for pub/sub connections plus a pooled command connection.
#[derive(Clone)]
pub struct RedisClientModule {
    pub client: redis::Client,
    pub pool: RedisPool,
}

impl std::fmt::Debug for RedisClientModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClientModule").finish_non_exhaustive()
    }
}

pub fn setup_redis_client(config: &RedisConfig) -> Result<RedisClientModule> {
    let client = redis::Client::open(config.url.as_str())?;
    let pool = deadpool_redis::Config::from_url(config.url.clone())
        .builder()
        .map_err(|e| OrchestratorError::RuntimeError(format!("redis pool setup: {e:?}")))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| OrchestratorError::RuntimeError(format!("redis pool setup: {e:?}")))?;
    Ok(RedisClientModule { client, pool })
}

pub trait UseRedisClient {
    fn redis_client(&self) -> &RedisClientModule;
}
