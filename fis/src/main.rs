mod config;
mod core;
mod crypt;
mod error;
mod http;
mod models;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use flp_common::auth::load_jwks_dir;
use flp_common::dao::MongoDao;
use flp_common::eventbus::{build_producer, Outbox};
use flp_common::keystore::{KeyStore, KeyStoreClient};
use flp_common::migrate::{Migration, MigrationManager};
use tracing::info;

use crate::config::Config;
use crate::core::{InterrogationHandler, UploadMetadataProcessor};
use crate::crypt::ServiceKeypair;
use crate::http::AppState;
use crate::models::{FileIdRecord, FileUnderInterrogation};

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

    let key_bytes = tokio::fs::read(&config.private_key_path).await?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&key_bytes[..32]);
    let keypair = Arc::new(ServiceKeypair::from_bytes(key));

    let client = mongodb::Client::with_uri_str(&config.mongo.db_connection_str).await?;
    let db = client.database(&config.mongo.db_name);

    let migrations = registered_migrations();
    let manager = MigrationManager::new(
        db.clone(),
        "fisDbVersionLock",
        "fisDbVersion",
        std::time::Duration::from_secs(config.migration_wait_secs),
    );
    manager
        .migrate_or_wait(&config.service_name, config.db_version, &migrations)
        .await?;

    let file_id_dao = Arc::new(MongoDao::<FileIdRecord>::new(&db, "fileIds"));
    let interrogation_dao = Arc::new(MongoDao::<FileUnderInterrogation>::new(&db, "filesUnderInterrogation"));

    let producer = build_producer(&config.kafka_brokers)?;
    flp_common::migrate::ensure_indexes(&db, "fisPersistedEvents").await?;
    let outbox = Arc::new(Outbox::new(&db, "fisPersistedEvents", producer));

    let key_store: Arc<dyn KeyStore> =
        Arc::new(KeyStoreClient::new(config.key_store_base_url.clone(), Duration::from_secs(10)));

    let ingest = Arc::new(UploadMetadataProcessor::new(
        keypair,
        file_id_dao,
        key_store.clone(),
        outbox.clone(),
    ));
    let interrogation = Arc::new(InterrogationHandler::new(interrogation_dao, key_store, outbox));

    let issuer_keys = load_jwks_dir(&config.data_hub_jwks_dir).await;
    let state = Arc::new(AppState { ingest, interrogation, issuer_keys });
    let app = http::router(state);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!("fis listening on {}:{}", config.host, config.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
