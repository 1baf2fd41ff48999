//! Layered configuration loading, grounded in the teacher's `Settings::new`
//! (`crates/teacher_gateway/src/config.rs`): a YAML file plus environment
//! overrides under a service-specific prefix. Each service defines its own
//! `Config` struct (flat, composed at load time, per spec.md §9's
//! "replace multiple inheritance config mixins with a flat record") and
//! calls [`load`] with its own env prefix.

use std::collections::HashMap;

use config::{Config as ConfigBuilder, Environment, File};
use regex::Regex;
use serde::de::DeserializeOwned;

use crate::objstore::StorageEndpoint;

/// Load a service `Config` from a YAML file overlaid with
/// `{PREFIX}__nested__keys`-style environment variables.
pub fn load<T: DeserializeOwned>(config_path: &str, env_prefix: &str) -> Result<T, anyhow::Error> {
    let built = ConfigBuilder::builder()
        .add_source(File::with_name(config_path))
        .add_source(Environment::with_prefix(env_prefix).separator("__"))
        .build()?;
    Ok(built.try_deserialize()?)
}

/// Map of storage alias -> endpoint details, shared by every service that
/// resolves aliases (spec.md §6's "storage aliases map").
pub type StorageAliases = HashMap<String, StorageEndpoint>;

/// Validate `drs_server_uri` matches `^drs://.+/$` (spec.md §3/§4.5),
/// grounded in `DataRepositoryConfig.check_server_uri` from
/// `original_source/services/dcs/src/dcs/core/data_repository.py`.
pub fn validate_drs_server_uri(uri: &str) -> Result<(), anyhow::Error> {
    let pattern = Regex::new(r"^drs://.+/$").expect("static regex is valid");
    if !pattern.is_match(uri) {
        anyhow::bail!("drs_server_uri must start with 'drs://' and end with '/', got: {uri}");
    }
    Ok(())
}
