//! `DataRepository`: DRS object registry, staging requests, envelope
//! fetch, and outbox garbage collection, grounded in
//! `original_source/services/dcs/src/dcs/core/data_repository.py`.

use std::sync::Arc;
use std::time::Duration;

use bson::doc;
use chrono::Utc;
use flp_common::dao::Dao;
use flp_common::error::{log_critical, DaoError, ObjectStorageError};
use flp_common::eventbus::EventPublisher;
use flp_common::keystore::KeyStore;
use flp_common::objstore::StorageRegistry;
use serde_json::json;
use uuid::Uuid;

use crate::config::StagingConfig;
use crate::error::RepositoryError as Error;
use crate::models::{DrsObject, DrsObjectBase};

pub struct DataRepository {
    drs_object_dao: Arc<dyn Dao<DrsObject>>,
    storages: StorageRegistry,
    events: Arc<dyn EventPublisher>,
    key_store: Arc<dyn KeyStore>,
    config: StagingConfig,
}

impl DataRepository {
    pub fn new(
        drs_object_dao: Arc<dyn Dao<DrsObject>>,
        storages: StorageRegistry,
        events: Arc<dyn EventPublisher>,
        key_store: Arc<dyn KeyStore>,
        config: StagingConfig,
    ) -> Self {
        Self {
            drs_object_dao,
            storages,
            events,
            key_store,
            config,
        }
    }

    pub fn drs_uri(&self, drs_id: &str) -> String {
        format!("{}{drs_id}", self.config.drs_server_uri)
    }

    /// Serve the specified DRS object with access information. If it does
    /// not exist in the outbox yet, returns `RetryAccessLater` instructing
    /// the caller to retry after a computed delay (spec.md §4.5).
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn access_drs_object(&self, drs_id: &str) -> Result<(DrsObject, String), Error> {
        let mut drs_object = self.drs_object_dao.get_by_id(&drs_id.to_string()).await.map_err(|err| match err {
            DaoError::NotFound { .. } => Error::DrsObjectNotFound { drs_id: drs_id.to_string() },
            other => other.into(),
        })?;

        let (bucket_id, storage) = self.storages.for_alias(&drs_object.s3_endpoint_alias).map_err(|_| {
            Error::StorageAliasNotConfigured {
                alias: drs_object.s3_endpoint_alias.clone(),
            }
        })?;

        let access_url = match storage
            .presigned_download_url(&bucket_id, &drs_object.object_id, Duration::from_secs(self.config.presigned_url_expires_after))
            .await
        {
            Ok(url) => url,
            Err(ObjectStorageError::ObjectNotFound { .. }) => {
                tracing::info!(drs_id, "file not in outbox, requesting staging");
                self.events
                    .publish(
                        "nonstaged-file-requested",
                        drs_id,
                        "NonStagedFileRequested",
                        json!({
                            "file_id": drs_object.file_id,
                            "decryption_secret_id": drs_object.decryption_secret_id,
                            "bucket_id": bucket_id,
                        }),
                    )
                    .await?;

                let bytes_per_second = self.config.staging_speed_mb_per_s as f64 * 1e6;
                let retry_after = (drs_object.decrypted_size as f64 / bytes_per_second).round() as u64;
                let retry_after = retry_after
                    .max(self.config.retry_after_min)
                    .min(self.config.retry_after_max);
                return Err(Error::RetryAccessLater { retry_after });
            }
            Err(other) => return Err(other.into()),
        };

        drs_object.last_accessed = Utc::now();
        self.drs_object_dao.update(&drs_object).await?;

        let self_uri = self.drs_uri(drs_id);
        self.events
            .publish(
                "file-download-served",
                drs_id,
                "FileDownloadServed",
                json!({ "file_id": drs_object.file_id, "target_bucket_id": bucket_id }),
            )
            .await?;

        Ok((drs_object, access_url))
    }

    /// Register a new DRS object from an internally-registered file.
    /// Duplicate `file_id` is logged and dropped, not surfaced as an error
    /// (spec.md §4.5 `register_new_file`).
    #[tracing::instrument(level = "debug", skip(self, file))]
    pub async fn register_new_file(&self, file: DrsObjectBase) -> Result<(), Error> {
        if self.drs_object_dao.get_by_id(&file.file_id).await.is_ok() {
            tracing::error!(file_id = %file.file_id, "DRS object already registered, dropping duplicate");
            return Ok(());
        }

        let object_id = Uuid::new_v4().to_string();
        let file_id = file.file_id.clone();
        let drs_object = DrsObject::from_base(file, object_id, Utc::now());
        self.drs_object_dao.insert(&drs_object).await?;
        tracing::info!(file_id, "registered new DRS object");

        self.events
            .publish(
                "file-registered-for-download",
                &file_id,
                "FileRegisteredForDownload",
                json!({
                    "file_id": drs_object.file_id,
                    "self_uri": self.drs_uri(&drs_object.file_id),
                }),
            )
            .await?;
        Ok(())
    }

    /// Fetch a per-recipient Crypt4GH envelope for the file's secret
    /// (spec.md §4.5 `serve_envelope`).
    #[tracing::instrument(level = "debug", skip(self, public_key))]
    pub async fn serve_envelope(&self, drs_id: &str, public_key: &str) -> Result<String, Error> {
        let drs_object = self.drs_object_dao.get_by_id(&drs_id.to_string()).await.map_err(|err| match err {
            DaoError::NotFound { .. } => Error::DrsObjectNotFound { drs_id: drs_id.to_string() },
            other => other.into(),
        })?;

        self.key_store
            .fetch_envelope(&drs_object.decryption_secret_id, public_key)
            .await
            .map_err(|err| match err {
                flp_common::error::KeyStoreError::SecretNotFound { .. } => Error::EnvelopeNotFound {
                    object_id: drs_object.object_id.clone(),
                },
                flp_common::error::KeyStoreError::RequestFailed(_) | flp_common::error::KeyStoreError::BadResponse { .. } => {
                    Error::ApiCommunicationError {
                        api_url: "key store".to_string(),
                    }
                }
            })
    }

    /// Best-effort delete: key-store secret, outbox/permanent object, DAO
    /// record, then a `FileDeleted` event (spec.md §4.5 `delete_file`).
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn delete_file(&self, file_id: &str) -> Result<(), Error> {
        let drs_object = match self.drs_object_dao.get_by_id(&file_id.to_string()).await {
            Ok(obj) => obj,
            Err(DaoError::NotFound { .. }) => {
                tracing::info!(file_id, "already deleted");
                return Ok(());
            }
            Err(other) => return Err(other.into()),
        };

        if let Err(err) = self.key_store.delete_secret(&drs_object.decryption_secret_id).await {
            tracing::warn!(%err, "failed to delete secret from key store");
        }

        if let Ok((bucket_id, storage)) = self.storages.for_alias(&drs_object.s3_endpoint_alias) {
            match storage.delete_object(&bucket_id, &drs_object.object_id).await {
                Ok(()) | Err(ObjectStorageError::ObjectNotFound { .. }) => {}
                Err(err) => tracing::warn!(%err, "failed to delete object from outbox"),
            }
        }

        self.drs_object_dao.delete(&file_id.to_string()).await?;
        self.events
            .publish("file-deletion-success", file_id, "FileDeleted", json!({ "file_id": file_id }))
            .await?;
        tracing::info!(file_id, "deleted DRS object");
        Ok(())
    }

    /// Enumerate objects in the outbox bucket for `storage_alias` and
    /// remove those whose `last_accessed` is older than
    /// `outbox_cache_timeout` days. A missing `DrsObject` for an object
    /// present in the bucket is logged CRITICAL and skipped, not fatal
    /// (spec.md REDESIGN FLAGS: prefer log-and-continue).
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn cleanup_outbox(&self, storage_alias: &str) -> Result<(), Error> {
        let (bucket_id, storage) = self.storages.for_alias(storage_alias).map_err(|_| {
            let err = Error::StorageAliasNotConfigured {
                alias: storage_alias.to_string(),
            };
            log_critical(&err);
            err
        })?;

        let threshold = Utc::now() - chrono::Duration::days(self.config.outbox_cache_timeout_days as i64);
        let object_ids = storage.list_all_object_ids(&bucket_id).await?;

        for object_id in object_ids {
            let drs_object = match self.drs_object_dao.find_one(doc! { "object_id": &object_id }).await {
                Ok(obj) => obj,
                Err(DaoError::NotFound { .. }) => {
                    let error = Error::CleanupError {
                        object_id: object_id.clone(),
                    };
                    log_critical(&error);
                    continue;
                }
                Err(other) => return Err(other.into()),
            };

            if drs_object.last_accessed <= threshold {
                tracing::info!(object_id, storage_alias, "deleting stale outbox object");
                if let Err(err) = storage.delete_object(&bucket_id, &object_id).await {
                    let error = Error::CleanupError {
                        object_id: object_id.clone(),
                    };
                    log_critical(&error);
                    tracing::warn!(%err, "could not delete outbox object");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use flp_common::dao::MockDao;
    use flp_common::error::KeyStoreError;
    use flp_common::eventbus::MockEventPublisher;
    use flp_common::keystore::MockKeyStore;
    use flp_common::objstore::MockObjectStorage;

    use super::*;

    fn staging_config() -> StagingConfig {
        StagingConfig {
            drs_server_uri: "https://dcs.example/objects/".to_string(),
            staging_speed_mb_per_s: 10,
            retry_after_min: 5,
            retry_after_max: 300,
            presigned_url_expires_after: 3600,
            url_expiration_buffer: 60,
            outbox_cache_timeout_days: 7,
        }
    }

    fn sample_drs_object(file_id: &str) -> DrsObject {
        DrsObject {
            file_id: file_id.to_string(),
            object_id: "obj-1".to_string(),
            decryption_secret_id: "secret-1".to_string(),
            s3_endpoint_alias: "alias-a".to_string(),
            decrypted_size: 100_000_000,
            encrypted_size: 100_000_032,
            decrypted_sha256: "deadbeef".to_string(),
            creation_date: Utc::now(),
            last_accessed: Utc::now() - chrono::Duration::days(30),
        }
    }

    fn registry_with(alias: &str, storage: MockObjectStorage) -> StorageRegistry {
        let mut aliases = HashMap::new();
        aliases.insert(alias.to_string(), ("outbox".to_string(), Arc::new(storage) as Arc<_>));
        StorageRegistry::new(aliases)
    }

    fn repository(
        drs_object_dao: MockDao<DrsObject>,
        events: MockEventPublisher,
        key_store: MockKeyStore,
        storages: StorageRegistry,
    ) -> DataRepository {
        DataRepository::new(Arc::new(drs_object_dao), storages, Arc::new(events), Arc::new(key_store), staging_config())
    }

    #[tokio::test]
    async fn access_drs_object_requests_staging_when_not_in_outbox() {
        let file_id = "GHGA-F1";
        let mut drs_object_dao = MockDao::new();
        drs_object_dao.expect_get_by_id().returning(move |_| Ok(sample_drs_object(file_id)));
        let mut storage = MockObjectStorage::new();
        storage
            .expect_presigned_download_url()
            .returning(|b, o, _| Err(flp_common::error::ObjectStorageError::ObjectNotFound { bucket_id: b.into(), object_id: o.into() }));
        let mut events = MockEventPublisher::new();
        events.expect_publish().returning(|_, _, type_, _| {
            assert_eq!(type_, "NonStagedFileRequested");
            Ok(())
        });
        let repo = repository(drs_object_dao, events, MockKeyStore::new(), registry_with("alias-a", storage));

        let err = repo.access_drs_object(file_id).await.unwrap_err();
        match err {
            Error::RetryAccessLater { retry_after } => {
                assert!(retry_after >= 5 && retry_after <= 300);
            }
            other => panic!("expected RetryAccessLater, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn access_drs_object_serves_and_touches_last_accessed_when_staged() {
        let file_id = "GHGA-F1";
        let mut drs_object_dao = MockDao::new();
        drs_object_dao.expect_get_by_id().returning(move |_| Ok(sample_drs_object(file_id)));
        drs_object_dao.expect_update().returning(|obj| {
            assert!(obj.last_accessed > Utc::now() - chrono::Duration::minutes(1));
            Ok(())
        });
        let mut storage = MockObjectStorage::new();
        storage.expect_presigned_download_url().returning(|_, _, _| Ok("https://presigned.example/obj-1".to_string()));
        let mut events = MockEventPublisher::new();
        events.expect_publish().returning(|_, _, type_, _| {
            assert_eq!(type_, "FileDownloadServed");
            Ok(())
        });
        let repo = repository(drs_object_dao, events, MockKeyStore::new(), registry_with("alias-a", storage));

        let (drs_object, url) = repo.access_drs_object(file_id).await.unwrap();
        assert_eq!(drs_object.file_id, file_id);
        assert_eq!(url, "https://presigned.example/obj-1");
    }

    #[tokio::test]
    async fn register_new_file_drops_duplicate_silently() {
        let mut drs_object_dao = MockDao::new();
        drs_object_dao.expect_get_by_id().returning(move |_| Ok(sample_drs_object("GHGA-F1")));
        let repo = repository(drs_object_dao, MockEventPublisher::new(), MockKeyStore::new(), StorageRegistry::new(HashMap::new()));

        let base = DrsObjectBase {
            file_id: "GHGA-F1".to_string(),
            decryption_secret_id: "secret-1".to_string(),
            s3_endpoint_alias: "alias-a".to_string(),
            decrypted_size: 100,
            encrypted_size: 132,
            decrypted_sha256: "deadbeef".to_string(),
            creation_date: Utc::now(),
        };
        assert!(repo.register_new_file(base).await.is_ok());
    }

    #[tokio::test]
    async fn serve_envelope_maps_secret_not_found() {
        let mut drs_object_dao = MockDao::new();
        drs_object_dao.expect_get_by_id().returning(move |_| Ok(sample_drs_object("GHGA-F1")));
        let mut key_store = MockKeyStore::new();
        key_store
            .expect_fetch_envelope()
            .returning(|id, _| Err(KeyStoreError::SecretNotFound { secret_id: id.to_string() }));
        let repo = repository(drs_object_dao, MockEventPublisher::new(), key_store, StorageRegistry::new(HashMap::new()));

        let err = repo.serve_envelope("GHGA-F1", "recipient-pubkey").await.unwrap_err();
        assert!(matches!(err, Error::EnvelopeNotFound { .. }));
    }

    #[tokio::test]
    async fn serve_envelope_maps_communication_failure() {
        let mut drs_object_dao = MockDao::new();
        drs_object_dao.expect_get_by_id().returning(move |_| Ok(sample_drs_object("GHGA-F1")));
        let mut key_store = MockKeyStore::new();
        key_store.expect_fetch_envelope().returning(|_, _| Err(KeyStoreError::RequestFailed("connection reset".to_string())));
        let repo = repository(drs_object_dao, MockEventPublisher::new(), key_store, StorageRegistry::new(HashMap::new()));

        let err = repo.serve_envelope("GHGA-F1", "recipient-pubkey").await.unwrap_err();
        assert!(matches!(err, Error::ApiCommunicationError { .. }));
    }

    #[tokio::test]
    async fn delete_file_is_a_no_op_when_already_gone() {
        let mut drs_object_dao = MockDao::new();
        drs_object_dao
            .expect_get_by_id()
            .returning(|id| Err(DaoError::NotFound { collection: "drs_objects".to_string(), id: id.clone() }));
        let repo = repository(drs_object_dao, MockEventPublisher::new(), MockKeyStore::new(), StorageRegistry::new(HashMap::new()));
        assert!(repo.delete_file("GHGA-F1").await.is_ok());
    }

    #[tokio::test]
    async fn delete_file_best_effort_chain_publishes_final_event() {
        let mut drs_object_dao = MockDao::new();
        drs_object_dao.expect_get_by_id().returning(move |_| Ok(sample_drs_object("GHGA-F1")));
        drs_object_dao.expect_delete().returning(|_| Ok(()));
        let mut key_store = MockKeyStore::new();
        key_store.expect_delete_secret().returning(|_| Ok(()));
        let mut storage = MockObjectStorage::new();
        storage.expect_delete_object().returning(|_, _| Ok(()));
        let mut events = MockEventPublisher::new();
        events.expect_publish().returning(|_, _, type_, _| {
            assert_eq!(type_, "FileDeleted");
            Ok(())
        });
        let repo = repository(drs_object_dao, events, key_store, registry_with("alias-a", storage));
        assert!(repo.delete_file("GHGA-F1").await.is_ok());
    }

    #[tokio::test]
    async fn cleanup_outbox_skips_objects_missing_from_the_dao() {
        let mut storage = MockObjectStorage::new();
        storage.expect_list_all_object_ids().returning(|_| Ok(vec!["orphan-obj".to_string()]));
        let mut drs_object_dao = MockDao::new();
        drs_object_dao
            .expect_find_one()
            .returning(|_| Err(DaoError::NotFound { collection: "drs_objects".to_string(), id: "orphan-obj".to_string() }));
        let repo = repository(drs_object_dao, MockEventPublisher::new(), MockKeyStore::new(), registry_with("alias-a", storage));
        assert!(repo.cleanup_outbox("alias-a").await.is_ok());
    }

    #[tokio::test]
    async fn cleanup_outbox_rejects_unknown_alias() {
        let repo = repository(MockDao::new(), MockEventPublisher::new(), MockKeyStore::new(), StorageRegistry::new(HashMap::new()));
        let err = repo.cleanup_outbox("not-configured").await.unwrap_err();
        assert!(matches!(err, Error::StorageAliasNotConfigured { .. }));
    }
}
