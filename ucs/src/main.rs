mod config;
mod core;
mod error;
mod http;
mod models;

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use flp_common::auth::load_jwks_dir;
use flp_common::dao::MongoDao;
use flp_common::migrate::{Migration, MigrationManager};
use flp_common::objstore::{S3ObjectStorage, StorageRegistry};
use tracing::info;

use crate::config::Config;
use crate::core::UploadController;
use crate::models::{FileUpload, FileUploadBox, S3UploadDetails};

#[derive(Debug, Parser)]
#[command(version)]
struct Opt {
    #[arg(long, short, default_value = "config.yaml")]
    config: String,
}

/// No schema changes have been needed yet; this list grows as
/// `config.db_version` is bumped.
fn registered_migrations() -> Vec<Box<dyn Migration>> {
    Vec::new()
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();
    let config = Config::load(&opt.config)?;
    flp_common::telemetry::init(&config.service_name, config.otlp_endpoint.as_deref())?;

    let client = mongodb::Client::with_uri_str(&config.mongo.db_connection_str).await?;
    let db = client.database(&config.mongo.db_name);

    let migrations = registered_migrations();
    let manager = MigrationManager::new(
        db.clone(),
        "ucsDbVersionLock",
        "ucsDbVersion",
        std::time::Duration::from_secs(config.migration_wait_secs),
    );
    manager
        .migrate_or_wait(&config.service_name, config.db_version, &migrations)
        .await?;

    let box_dao = Arc::new(MongoDao::<FileUploadBox>::new(&db, "fileUploadBoxes"));
    let file_dao = Arc::new(MongoDao::<FileUpload>::new(&db, "fileUploads"));
    let s3_details_dao = Arc::new(MongoDao::<S3UploadDetails>::new(&db, "s3UploadDetails"));

    let mut aliases = HashMap::new();
    for (alias, endpoint) in &config.object_storages {
        let storage = S3ObjectStorage::new(endpoint).await;
        aliases.insert(alias.clone(), (endpoint.bucket.clone(), Arc::new(storage) as Arc<_>));
    }
    let storages = StorageRegistry::new(aliases);

    let controller = Arc::new(UploadController::new(box_dao, file_dao, s3_details_dao, storages));
    let issuer_keys = load_jwks_dir(&config.uos_wps_jwks_dir).await;
    let app = http::router(http::AppState { controller, issuer_keys });

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!("ucs listening on {}:{}", config.host, config.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
