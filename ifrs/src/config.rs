//! IFRS configuration, grounded in `original_source/services/ifrs/src/ifrs/config.py`.

use flp_common::config::StorageAliases;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct MongoSettings {
    pub db_connection_str: String,
    pub db_name: String,
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

fn default_migration_wait_secs() -> u64 {
    5
}
fn default_dlq_topic() -> String {
    "ifrs-dead-letter".to_string()
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        flp_common::config::load(path, "ifrs")
    }
}
