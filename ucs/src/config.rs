//! UCS configuration, grounded in the teacher's `Settings` struct
//! (`crates/teacher_gateway/src/config.rs`) and spec.md §9's "flat config
//! composition" decision: one struct, no mixin hierarchy.

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
    pub object_storages: StorageAliases,
    pub part_upload_url_expires_after_secs: u64,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default = "default_jwks_dir")]
    pub uos_wps_jwks_dir: String,
    /// Schema version this build expects (spec.md §6 "DB versioning &
    /// migrations"). Bumped by hand whenever a `Migration` is registered in
    /// `main.rs`; 0 means no migration has ever been needed yet.
    #[serde(default)]
    pub db_version: i32,
    #[serde(default = "default_migration_wait_secs")]
    pub migration_wait_secs: u64,
}

fn default_jwks_dir() -> String {
    "uos_wps_jwks".to_string()
}
fn default_migration_wait_secs() -> u64 {
    5
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        flp_common::config::load(path, "ucs")
    }
}
