//! DCS configuration, grounded in
//! `original_source/services/dcs/src/dcs/config.py`'s `DataRepositoryConfig`.

use flp_common::config::StorageAliases;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct MongoSettings {
    pub db_connection_str: String,
    pub db_name: String,
}

/// Fields consumed directly by [`crate::core::DataRepository`], split out
/// from the rest of [`Config`] so the core can be constructed with just the
/// parameters it needs.
#[derive(Debug, Clone, Deserialize)]
pub struct StagingConfig {
    pub drs_server_uri: String,
    #[serde(default = "default_staging_speed")]
    pub staging_speed_mb_per_s: u64,
    #[serde(default = "default_retry_after_min")]
    pub retry_after_min: u64,
    #[serde(default = "default_retry_after_max")]
    pub retry_after_max: u64,
    pub presigned_url_expires_after: u64,
    #[serde(default = "default_url_expiration_buffer")]
    pub url_expiration_buffer: u64,
    #[serde(default = "default_outbox_cache_timeout")]
    pub outbox_cache_timeout_days: u64,
}

fn default_staging_speed() -> u64 {
    100
}
fn default_retry_after_min() -> u64 {
    5
}
fn default_retry_after_max() -> u64 {
    300
}
fn default_url_expiration_buffer() -> u64 {
    10
}
fn default_outbox_cache_timeout() -> u64 {
    7
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service_name: String,
    pub host: String,
    pub port: u16,
    pub mongo: MongoSettings,
    pub kafka_brokers: String,
    pub kafka_consumer_group: String,
    /// Topic poison messages are shunted to instead of being dropped
    /// (spec.md §5/§6).
    #[serde(default = "default_dlq_topic")]
    pub dlq_topic: String,
    pub object_storages: StorageAliases,
    pub ekss_base_url: String,
    #[serde(default = "default_http_call_timeout")]
    pub http_call_timeout_secs: u64,
    #[serde(default = "default_jwks_dir")]
    pub work_order_jwks_dir: String,
    #[serde(flatten)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    /// Schema version this build expects (spec.md §6 "DB versioning &
    /// migrations"). Bumped by hand whenever a `Migration` is registered in
    /// `main.rs`; 0 means no migration has ever been needed yet.
    #[serde(default)]
    pub db_version: i32,
    #[serde(default = "default_migration_wait_secs")]
    pub migration_wait_secs: u64,
}

fn default_http_call_timeout() -> u64 {
    3
}
fn default_jwks_dir() -> String {
    "work_order_jwks".to_string()
}
fn default_dlq_topic() -> String {
    "dcs-dead-letter".to_string()
}
fn default_migration_wait_secs() -> u64 {
    5
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let config: Self = flp_common::config::load(path, "dcs")?;
        flp_common::config::validate_drs_server_uri(&config.staging.drs_server_uri)?;
        Ok(config)
    }
}
