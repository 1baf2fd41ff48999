mod config;
mod core;
mod error;
mod events;
mod http;
mod models;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use flp_common::auth::load_jwks_dir;
use flp_common::dao::MongoDao;
use flp_common::eventbus::{build_consumer, build_producer, DeadLetterSink, IdempotenceGuard, Outbox};
use flp_common::keystore::{KeyStore, KeyStoreClient};
use flp_common::migrate::{Migration, MigrationManager};
use flp_common::objstore::{S3ObjectStorage, StorageRegistry};
use tracing::info;

use crate::config::{Config, StagingConfig};
use crate::core::DataRepository;
use crate::models::DrsObject;

#[derive(Debug, Parser)]
#[command(version)]
struct Opt {
    #[arg(long, short, default_value = "config.yaml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

/// `cleanup-outbox` runs the outbox TTL sweep on demand, the way
/// `original_source`'s `data_repository.py` notes it's meant to run
/// ("through CLI, so crashing should be ok if the alias is not
/// configured") rather than on the request path.
#[derive(Debug, clap::Subcommand)]
enum Command {
    CleanupOutbox {
        #[arg(long)]
        storage_alias: Option<String>,
    },
}

/// No schema changes have been needed yet; this list grows as
/// `config.db_version` is bumped.
fn registered_migrations() -> Vec<Box<dyn Migration>> {
    Vec::new()
}

async fn build_repository(config: &Config) -> anyhow::Result<(Arc<DataRepository>, mongodb::Database)> {
    let client = mongodb::Client::with_uri_str(&config.mongo.db_connection_str).await?;
    let db = client.database(&config.mongo.db_name);

    let migrations = registered_migrations();
    let manager = MigrationManager::new(
        db.clone(),
        "dcsDbVersionLock",
        "dcsDbVersion",
        std::time::Duration::from_secs(config.migration_wait_secs),
    );
    manager
        .migrate_or_wait(&config.service_name, config.db_version, &migrations)
        .await?;

    let drs_object_dao = Arc::new(MongoDao::<DrsObject>::new(&db, "drs_objects"));
    let producer = build_producer(&config.kafka_brokers)?;
    flp_common::migrate::ensure_indexes(&db, "dcsPersistedEvents").await?;
    let outbox = Arc::new(Outbox::new(&db, "dcsPersistedEvents", producer));

    let mut aliases = HashMap::new();
    for (alias, endpoint) in &config.object_storages {
        let storage = S3ObjectStorage::new(endpoint).await;
        aliases.insert(alias.clone(), (endpoint.bucket.clone(), Arc::new(storage) as Arc<_>));
    }
    let storages = StorageRegistry::new(aliases);

    let key_store: Arc<dyn KeyStore> =
        Arc::new(KeyStoreClient::new(&config.ekss_base_url, Duration::from_secs(config.http_call_timeout_secs)));

    let staging = StagingConfig {
        drs_server_uri: config.staging.drs_server_uri.clone(),
        staging_speed_mb_per_s: config.staging.staging_speed_mb_per_s,
        retry_after_min: config.staging.retry_after_min,
        retry_after_max: config.staging.retry_after_max,
        presigned_url_expires_after: config.staging.presigned_url_expires_after,
        url_expiration_buffer: config.staging.url_expiration_buffer,
        outbox_cache_timeout_days: config.staging.outbox_cache_timeout_days,
    };

    let repository = Arc::new(DataRepository::new(drs_object_dao, storages, outbox, key_store, staging));
    Ok((repository, db))
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();
    let config = Config::load(&opt.config)?;
    flp_common::telemetry::init(&config.service_name, config.otlp_endpoint.as_deref())?;

    let (repository, db) = build_repository(&config).await?;

    if let Some(Command::CleanupOutbox { storage_alias }) = opt.command {
        let aliases: Vec<String> = match storage_alias {
            Some(alias) => vec![alias],
            None => config.object_storages.keys().cloned().collect(),
        };
        for alias in aliases {
            repository.cleanup_outbox(&alias).await?;
        }
        return Ok(());
    }

    let idempotence = Arc::new(IdempotenceGuard::new(&db, "dcsIdempotence"));

    let url_max_age = config
        .staging
        .presigned_url_expires_after
        .saturating_sub(config.staging.url_expiration_buffer)
        .max(config.staging.url_expiration_buffer);

    let consumer = build_consumer(
        &config.kafka_brokers,
        &config.kafka_consumer_group,
        &["file-internally-registered", "file-deletion-requested"],
    )?;
    let dlq_producer = build_producer(&config.kafka_brokers)?;
    let dlq = Arc::new(DeadLetterSink::new(dlq_producer, config.dlq_topic.clone()));

    let issuer_keys = load_jwks_dir(&config.work_order_jwks_dir).await;
    let state = http::AppState {
        repository: repository.clone(),
        issuer_keys,
        url_max_age,
    };
    let app = http::router(state);
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!("dcs listening on {}:{}", config.host, config.port);

    tokio::select! {
        _ = events::run(consumer, repository, idempotence, dlq) => {}
        res = axum::serve(listener, app) => { res?; }
        _ = tokio::signal::ctrl_c() => {}
    }
    Ok(())
}
