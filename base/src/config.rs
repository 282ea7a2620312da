use serde::Deserialize;

/// Run execution limits.
///
/// # Environment Variables
/// - `RUN_EXPIRATION_MILLISECONDS`: run TTL from creation (default: 10 min)
/// - `RUN_STATUS_POLL_INTERVAL_MILLISECONDS`: cancellation poll interval (default: 5 sec)
/// - `RUN_MAX_ACTIVE_PER_PRINCIPAL`: concurrently active runs per principal (default: 5)
/// - `RUN_DAILY_LIMIT`: runs created per principal per UTC day (default: 200)
#[derive(Deserialize, Clone, Debug)]
pub struct RunConfig {
    #[serde(default = "default_expiration_milliseconds")]
    pub expiration_milliseconds: u64,
    #[serde(default = "default_status_poll_interval")]
    pub status_poll_interval_milliseconds: u64,
    #[serde(default = "default_max_active_per_principal")]
    pub max_active_per_principal: usize,
    #[serde(default = "default_daily_limit")]
    pub daily_limit: usize,
}

fn default_expiration_milliseconds() -> u64 {
    10 * 60 * 1000
}
fn default_status_poll_interval() -> u64 {
    5 * 1000
}
fn default_max_active_per_principal() -> usize {
    5
}
fn default_daily_limit() -> usize {
    200
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            expiration_milliseconds: default_expiration_milliseconds(),
            status_poll_interval_milliseconds: default_status_poll_interval(),
            max_active_per_principal: default_max_active_per_principal(),
            daily_limit: default_daily_limit(),
        }
    }
}

impl RunConfig {
    pub fn from_env() -> Self {
        envy::prefixed("RUN_").from_env::<RunConfig>().unwrap_or_default()
    }
}

/// Queue and pub/sub tuning.
#[derive(Deserialize, Clone, Debug)]
pub struct QueueConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_expire_channel_seconds")]
    pub expire_channel_seconds: u64,
    #[serde(default = "default_deferral_milliseconds")]
    pub deferral_milliseconds: u64,
}

fn default_concurrency() -> usize {
    100
}
fn default_channel_capacity() -> usize {
    128
}
fn default_expire_channel_seconds() -> u64 {
    60 * 60
}
fn default_deferral_milliseconds() -> u64 {
    3000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            channel_capacity: default_channel_capacity(),
            expire_channel_seconds: default_expire_channel_seconds(),
            deferral_milliseconds: default_deferral_milliseconds(),
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Self {
        envy::prefixed("QUEUE_")
            .from_env::<QueueConfig>()
            .unwrap_or_default()
    }
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// In-process channels and maps. Single instance only.
    #[default]
    Standalone,
    /// Redis-backed records, queue and pub/sub for multi-process deployment.
    Scalable,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub r#type: StorageKind,
}

impl StorageConfig {
    pub fn from_env() -> Self {
        envy::prefixed("STORAGE_")
            .from_env::<StorageConfig>()
            .unwrap_or_default()
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_redis_pool_size() -> usize {
    16
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
        }
    }
}

impl RedisConfig {
    pub fn from_env() -> Self {
        envy::prefixed("REDIS_")
            .from_env::<RedisConfig>()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_config_defaults() {
        let conf = RunConfig::default();
        assert_eq!(conf.expiration_milliseconds, 600_000);
        assert_eq!(conf.status_poll_interval_milliseconds, 5_000);
        assert_eq!(conf.max_active_per_principal, 5);
    }

    #[test]
    fn test_storage_kind_default_is_standalone() {
        assert_eq!(StorageConfig::default().r#type, StorageKind::Standalone);
    }
}
