mod config;
mod core;
mod error;
mod events;
mod models;

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use flp_common::dao::MongoDao;
use flp_common::eventbus::{build_consumer, build_producer, DeadLetterSink, IdempotenceGuard, Outbox};
use flp_common::migrate::{Migration, MigrationManager};
use flp_common::objstore::{S3ObjectStorage, StorageRegistry};
use tracing::info;

use crate::config::Config;
use crate::core::FileRegistry;
use crate::models::{FileIdToAccession, FileMetadata, PendingFileUpload};

#[derive(Debug, Parser)]
#[command(version)]
struct Opt {
    #[arg(long, short, default_value = "config.yaml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

/// `migrate` brings the database to `db_version` and exits, the way
/// `original_source`'s migration manager is meant to be run ahead of a
/// rolling deploy rather than racing every replica's own startup check.
#[derive(Debug, clap::Subcommand)]
enum Command {
    Migrate,
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
        "ifrsDbVersionLock",
        "ifrsDbVersion",
        std::time::Duration::from_secs(config.migration_wait_secs),
    );
    manager
        .migrate_or_wait(&config.service_name, config.db_version, &migrations)
        .await?;

    if matches!(opt.command, Some(Command::Migrate)) {
        info!("ifrs database at version {}", config.db_version);
        return Ok(());
    }

    let file_dao = Arc::new(MongoDao::<FileMetadata>::new(&db, "file_metadata"));
    let pending_dao = Arc::new(MongoDao::<PendingFileUpload>::new(&db, "pendingFileUploads"));
    let accession_dao = Arc::new(MongoDao::<FileIdToAccession>::new(&db, "fileIdToAccession"));

    let producer = build_producer(&config.kafka_brokers)?;
    flp_common::migrate::ensure_indexes(&db, "ifrsPersistedEvents").await?;
    let outbox = Arc::new(Outbox::new(&db, "ifrsPersistedEvents", producer));
    let idempotence = Arc::new(IdempotenceGuard::new(&db, "ifrsIdempotence"));

    let mut aliases = HashMap::new();
    for (alias, endpoint) in &config.object_storages {
        let storage = S3ObjectStorage::new(endpoint).await;
        aliases.insert(alias.clone(), (endpoint.bucket.clone(), Arc::new(storage) as Arc<_>));
    }
    let storages = StorageRegistry::new(aliases);

    let registry = Arc::new(FileRegistry::new(file_dao, pending_dao, accession_dao, outbox, storages));

    let consumer = build_consumer(
        &config.kafka_brokers,
        &config.kafka_consumer_group,
        &["file-upload-validation-success", "file-accession-map"],
    )?;
    let dlq_producer = build_producer(&config.kafka_brokers)?;
    let dlq = Arc::new(DeadLetterSink::new(dlq_producer, config.dlq_topic.clone()));

    let health_app = Router::new().route("/health", get(|| async { StatusCode::OK }));
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!("ifrs health endpoint listening on {}:{}", config.host, config.port);

    tokio::select! {
        _ = events::run(consumer, registry, idempotence, dlq) => {}
        res = axum::serve(listener, health_app) => { res?; }
        _ = tokio::signal::ctrl_c() => {}
    }
    Ok(())
}
