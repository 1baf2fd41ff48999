//! `FileRegistry`: archive, stage, delete, and accession↔upload join logic,
//! grounded in
//! `original_source/services/ifrs/src/ifrs/core/file_registry.py`.

use std::sync::Arc;

use bson::doc;
use flp_common::dao::Dao;
use flp_common::error::{log_critical, DaoError, ObjectStorageError};
use flp_common::eventbus::EventPublisher;
use flp_common::objstore::StorageRegistry;
use serde_json::json;
use uuid::Uuid;

use crate::error::RegistryError as Error;
use crate::models::{FileIdToAccession, FileMetadata, PendingFileUpload};

pub struct FileRegistry {
    file_dao: Arc<dyn Dao<FileMetadata>>,
    pending_dao: Arc<dyn Dao<PendingFileUpload>>,
    accession_dao: Arc<dyn Dao<FileIdToAccession>>,
    events: Arc<dyn EventPublisher>,
    storages: StorageRegistry,
}

impl FileRegistry {
    pub fn new(
        file_dao: Arc<dyn Dao<FileMetadata>>,
        pending_dao: Arc<dyn Dao<PendingFileUpload>>,
        accession_dao: Arc<dyn Dao<FileIdToAccession>>,
        events: Arc<dyn EventPublisher>,
        storages: StorageRegistry,
    ) -> Self {
        Self {
            file_dao,
            pending_dao,
            accession_dao,
            events,
            storages,
        }
    }

    /// Returns `Ok(true)` if `file` is already registered with identical
    /// metadata (no-op), `Ok(false)` if it's new, or an error if a record
    /// exists with *different* metadata (dropped, not surfaced to the bus).
    async fn is_file_registered(&self, file: &FileMetadata) -> Result<bool, Error> {
        match self.file_dao.get_by_id(&file.id).await {
            Ok(existing) if &existing == file => Ok(true),
            Ok(_) => Err(Error::FileUpdateDropped { file_id: file.id }),
            Err(DaoError::NotFound { .. }) => Ok(false),
            Err(other) => Err(other.into()),
        }
    }

    #[tracing::instrument(level = "debug", skip(self, file))]
    pub async fn register_file(&self, file: FileMetadata) -> Result<(), Error> {
        let (permanent_bucket_id, storage) = self
            .storages
            .for_alias(&file.storage_alias)
            .map_err(|_| Error::UnknownStorageAlias {
                storage_alias: file.storage_alias.clone(),
            })?;

        match self.is_file_registered(&file).await {
            Ok(true) => {
                tracing::info!(file_id = %file.id, "file already registered");
                return Ok(());
            }
            Ok(false) => {}
            Err(err @ Error::FileUpdateDropped { .. }) => {
                tracing::warn!("{err}");
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        let actual_size = storage
            .get_object_size(&file.bucket_id, &file.id.to_string())
            .await
            .map_err(|err| match err {
                ObjectStorageError::ObjectNotFound { .. } => Error::FileNotInInterrogation { file_id: file.id },
                other => other.into(),
            })?;
        if actual_size as u64 != file.encrypted_size {
            return Err(Error::SizeMismatch {
                file_id: file.id,
                expected: file.encrypted_size,
                actual: actual_size as u64,
            });
        }

        match storage
            .copy_object(&file.bucket_id, &file.id.to_string(), &permanent_bucket_id, &file.id.to_string())
            .await
        {
            Ok(()) => {}
            Err(ObjectStorageError::ObjectAlreadyExists { .. }) => {
                tracing::info!(file_id = %file.id, "object already present in permanent storage");
                return Ok(());
            }
            Err(err) => {
                let error = Error::CopyOperation {
                    file_id: file.id,
                    dest_bucket_id: permanent_bucket_id,
                    reason: err.to_string(),
                };
                log_critical(&error);
                return Err(error);
            }
        }

        self.file_dao.insert(&file).await?;
        self.events
            .publish(
                "file-internally-registered",
                &file.id.to_string(),
                "FileInternallyRegistered",
                json!({
                    "file_id": file.id,
                    "accession": file.accession,
                    "storage_alias": file.storage_alias,
                    "decrypted_sha256": file.decrypted_sha256,
                }),
            )
            .await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, decrypted_sha256))]
    pub async fn stage_registered_file(
        &self,
        accession: &str,
        decrypted_sha256: &str,
        download_object_id: Uuid,
        download_bucket_id: &str,
    ) -> Result<(), Error> {
        let file = match self.file_dao.find_one(doc! {"accession": accession}).await {
            Ok(f) => f,
            Err(DaoError::NotFound { .. }) => {
                tracing::error!(accession, "not in registry");
                return Ok(());
            }
            Err(other) => return Err(other.into()),
        };

        if decrypted_sha256 != file.decrypted_sha256 {
            return Err(Error::ChecksumMismatch {
                file_id: file.id,
                provided: decrypted_sha256.to_string(),
                expected: file.decrypted_sha256.clone(),
            });
        }

        let (permanent_bucket_id, storage) = self.storages.for_alias(&file.storage_alias).map_err(|_| {
            Error::UnknownStorageAlias {
                storage_alias: file.storage_alias.clone(),
            }
        })?;

        match storage
            .copy_object(
                &permanent_bucket_id,
                &file.id.to_string(),
                download_bucket_id,
                &download_object_id.to_string(),
            )
            .await
        {
            Ok(()) => {}
            Err(ObjectStorageError::ObjectAlreadyExists { .. }) => {
                tracing::info!(file_id = %file.id, "already staged to outbox");
            }
            Err(ObjectStorageError::ObjectNotFound { .. }) => {
                let error = Error::FileInRegistryButNotInStorage { file_id: file.id };
                log_critical(&error);
                return Err(error);
            }
            Err(err) => {
                let error = Error::CopyOperation {
                    file_id: file.id,
                    dest_bucket_id: download_bucket_id.to_string(),
                    reason: err.to_string(),
                };
                log_critical(&error);
                return Err(error);
            }
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn delete_file(&self, accession: &str) -> Result<(), Error> {
        let file = match self.file_dao.find_one(doc! {"accession": accession}).await {
            Ok(f) => f,
            Err(DaoError::NotFound { .. }) => {
                tracing::info!(accession, "already deleted");
                return Ok(());
            }
            Err(other) => return Err(other.into()),
        };

        let (bucket_id, storage) = self
            .storages
            .for_alias(&file.storage_alias)
            .map_err(|_| Error::UnknownStorageAlias {
                storage_alias: file.storage_alias.clone(),
            })?;

        match storage.delete_object(&bucket_id, &file.id.to_string()).await {
            Ok(()) | Err(ObjectStorageError::ObjectNotFound { .. }) => {}
            Err(other) => return Err(other.into()),
        }

        match self.file_dao.delete(&file.id).await {
            Ok(()) | Err(DaoError::NotFound { .. }) => {}
            Err(other) => return Err(other.into()),
        }

        self.events
            .publish(
                "file-deleted",
                accession,
                "FileDeleted",
                json!({ "accession": accession }),
            )
            .await?;
        Ok(())
    }

    /// Persist an accession, triggering archival immediately if a matching
    /// upload has already arrived.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn store_accession(&self, accession: &str, file_id: Uuid) -> Result<(), Error> {
        match self.pending_dao.get_by_id(&file_id).await {
            Ok(pending) => {
                let file = FileMetadata {
                    id: pending.id,
                    accession: accession.to_string(),
                    bucket_id: pending.bucket_id,
                    storage_alias: pending.storage_alias,
                    decrypted_sha256: pending.decrypted_sha256,
                    encrypted_size: pending.encrypted_size,
                    unencrypted_size: pending.unencrypted_size,
                };
                self.register_file(file).await
            }
            Err(DaoError::NotFound { .. }) => {
                self.accession_dao
                    .upsert(&FileIdToAccession {
                        file_id,
                        accession: accession.to_string(),
                    })
                    .await?;
                Ok(())
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Handle a newly validated upload, triggering archival immediately if
    /// its accession already arrived.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn handle_file_upload(&self, pending_file: PendingFileUpload) -> Result<(), Error> {
        match self.accession_dao.get_by_id(&pending_file.id).await {
            Ok(mapping) => {
                let file = FileMetadata {
                    id: pending_file.id,
                    accession: mapping.accession,
                    bucket_id: pending_file.bucket_id,
                    storage_alias: pending_file.storage_alias,
                    decrypted_sha256: pending_file.decrypted_sha256,
                    encrypted_size: pending_file.encrypted_size,
                    unencrypted_size: pending_file.unencrypted_size,
                };
                self.register_file(file).await
            }
            Err(DaoError::NotFound { .. }) => {
                self.pending_dao.upsert(&pending_file).await?;
                Ok(())
            }
            Err(other) => Err(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use flp_common::dao::MockDao;
    use flp_common::eventbus::MockEventPublisher;
    use flp_common::objstore::MockObjectStorage;

    use super::*;

    fn sample_file(id: Uuid) -> FileMetadata {
        FileMetadata {
            id,
            accession: "GHGA-F1".to_string(),
            bucket_id: "interrogation".to_string(),
            storage_alias: "alias-a".to_string(),
            decrypted_sha256: "deadbeef".to_string(),
            encrypted_size: 100,
            unencrypted_size: 90,
        }
    }

    fn registry_with(alias: &str, storage: MockObjectStorage) -> StorageRegistry {
        let mut aliases = HashMap::new();
        aliases.insert(alias.to_string(), ("permanent".to_string(), Arc::new(storage) as Arc<_>));
        StorageRegistry::new(aliases)
    }

    fn registry(
        file_dao: MockDao<FileMetadata>,
        pending_dao: MockDao<PendingFileUpload>,
        accession_dao: MockDao<FileIdToAccession>,
        events: MockEventPublisher,
        storages: StorageRegistry,
    ) -> FileRegistry {
        FileRegistry::new(Arc::new(file_dao), Arc::new(pending_dao), Arc::new(accession_dao), Arc::new(events), storages)
    }

    #[tokio::test]
    async fn register_file_rejects_size_mismatch() {
        let id = Uuid::new_v4();
        let file = sample_file(id);
        let mut file_dao = MockDao::new();
        file_dao
            .expect_get_by_id()
            .returning(|fid| Err(DaoError::NotFound { collection: "file_metadata".to_string(), id: fid.to_string() }));
        let mut storage = MockObjectStorage::new();
        storage.expect_get_object_size().returning(|_, _| Ok(50));
        let r = registry(file_dao, MockDao::new(), MockDao::new(), MockEventPublisher::new(), registry_with("alias-a", storage));
        let err = r.register_file(file).await.unwrap_err();
        assert!(matches!(err, Error::SizeMismatch { expected: 100, actual: 50, .. }));
    }

    #[tokio::test]
    async fn register_file_is_a_no_op_when_already_registered_identically() {
        let id = Uuid::new_v4();
        let file = sample_file(id);
        let existing = file.clone();
        let mut file_dao = MockDao::new();
        file_dao.expect_get_by_id().returning(move |_| Ok(existing.clone()));
        let r = registry(
            file_dao,
            MockDao::new(),
            MockDao::new(),
            MockEventPublisher::new(),
            registry_with("alias-a", MockObjectStorage::new()),
        );
        assert!(r.register_file(file).await.is_ok());
    }

    #[tokio::test]
    async fn register_file_drops_conflicting_re_registration() {
        let id = Uuid::new_v4();
        let file = sample_file(id);
        let mut conflicting = file.clone();
        conflicting.decrypted_sha256 = "different".to_string();
        let mut file_dao = MockDao::new();
        file_dao.expect_get_by_id().returning(move |_| Ok(conflicting.clone()));
        let r = registry(
            file_dao,
            MockDao::new(),
            MockDao::new(),
            MockEventPublisher::new(),
            registry_with("alias-a", MockObjectStorage::new()),
        );
        // Dropped silently: no error surfaces, nothing else is called.
        assert!(r.register_file(file).await.is_ok());
    }

    #[tokio::test]
    async fn register_file_inserts_and_publishes_on_success() {
        let id = Uuid::new_v4();
        let file = sample_file(id);
        let mut file_dao = MockDao::new();
        file_dao
            .expect_get_by_id()
            .returning(|fid| Err(DaoError::NotFound { collection: "file_metadata".to_string(), id: fid.to_string() }));
        file_dao.expect_insert().returning(|_| Ok(()));
        let mut storage = MockObjectStorage::new();
        storage.expect_get_object_size().returning(|_, _| Ok(100));
        storage.expect_copy_object().returning(|_, _, _, _| Ok(()));
        let mut events = MockEventPublisher::new();
        events.expect_publish().returning(|_, _, type_, _| {
            assert_eq!(type_, "FileInternallyRegistered");
            Ok(())
        });
        let r = registry(file_dao, MockDao::new(), MockDao::new(), events, registry_with("alias-a", storage));
        assert!(r.register_file(file).await.is_ok());
    }

    #[tokio::test]
    async fn store_accession_defers_when_no_matching_upload_yet() {
        let file_id = Uuid::new_v4();
        let mut pending_dao = MockDao::new();
        pending_dao
            .expect_get_by_id()
            .returning(move |_| Err(DaoError::NotFound { collection: "pendingFileUploads".to_string(), id: file_id.to_string() }));
        let mut accession_dao = MockDao::new();
        accession_dao.expect_upsert().returning(|mapping| {
            assert_eq!(mapping.accession, "GHGA-F1");
            Ok(())
        });
        let r = registry(
            MockDao::new(),
            pending_dao,
            accession_dao,
            MockEventPublisher::new(),
            StorageRegistry::new(HashMap::new()),
        );
        assert!(r.store_accession("GHGA-F1", file_id).await.is_ok());
    }

    #[tokio::test]
    async fn store_accession_triggers_registration_when_upload_already_arrived() {
        let file_id = Uuid::new_v4();
        let mut pending_dao = MockDao::new();
        pending_dao.expect_get_by_id().returning(move |_| {
            Ok(PendingFileUpload {
                id: file_id,
                bucket_id: "interrogation".to_string(),
                storage_alias: "alias-a".to_string(),
                decrypted_sha256: "deadbeef".to_string(),
                encrypted_size: 100,
                unencrypted_size: 90,
            })
        });
        let mut file_dao = MockDao::new();
        file_dao
            .expect_get_by_id()
            .returning(move |fid| Err(DaoError::NotFound { collection: "file_metadata".to_string(), id: fid.to_string() }));
        file_dao.expect_insert().returning(|_| Ok(()));
        let mut storage = MockObjectStorage::new();
        storage.expect_get_object_size().returning(|_, _| Ok(100));
        storage.expect_copy_object().returning(|_, _, _, _| Ok(()));
        let mut events = MockEventPublisher::new();
        events.expect_publish().returning(|_, _, _, _| Ok(()));
        let r = registry(file_dao, pending_dao, MockDao::new(), events, registry_with("alias-a", storage));
        assert!(r.store_accession("GHGA-F1", file_id).await.is_ok());
    }

    #[tokio::test]
    async fn delete_file_is_a_no_op_when_not_in_registry() {
        let mut file_dao = MockDao::new();
        file_dao
            .expect_find_one()
            .returning(|_| Err(DaoError::NotFound { collection: "file_metadata".to_string(), id: "<filter>".to_string() }));
        let r = registry(
            file_dao,
            MockDao::new(),
            MockDao::new(),
            MockEventPublisher::new(),
            StorageRegistry::new(HashMap::new()),
        );
        assert!(r.delete_file("GHGA-F1").await.is_ok());
    }
}
