//! FIS configuration, grounded in `ServiceConfig` in
//! `original_source/services/fis/src/fis/core/ingest.py` and
//! `fis/config.py`.

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
    pub private_key_path: String,
    #[serde(default)]
    pub private_key_passphrase: Option<String>,
    pub key_store_base_url: String,
    /// Directory of one `<data_hub_alias>.pem` file per entry in
    /// `data_hub_auth_keys` (spec.md §6 "JWK sets per data hub"), loaded the
    /// same way `work_order_jwks_dir`/`uos_wps_jwks_dir` are in DCS/UCS.
    #[serde(default = "default_data_hub_jwks_dir")]
    pub data_hub_jwks_dir: String,
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

fn default_data_hub_jwks_dir() -> String {
    "data_hub_jwks".to_string()
}
fn default_migration_wait_secs() -> u64 {
    5
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        flp_common::config::load(path, "fis")
    }
}
