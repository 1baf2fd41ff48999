//! `UploadController`: the core business logic of the upload controller
//! service, grounded line-for-line in
//! `original_source/services/ucs/src/ucs/core/controller.py`.

use std::sync::Arc;

use bson::doc;
use chrono::Utc;
use flp_common::dao::Dao;
use flp_common::error::{log_critical, DaoError, ObjectStorageError};
use flp_common::objstore::StorageRegistry;
use uuid::Uuid;

use crate::error::ControllerError as Error;
use crate::models::{FileUpload, FileUploadBox, S3UploadDetails};

pub struct UploadController {
    box_dao: Arc<dyn Dao<FileUploadBox>>,
    file_dao: Arc<dyn Dao<FileUpload>>,
    s3_details_dao: Arc<dyn Dao<S3UploadDetails>>,
    storages: StorageRegistry,
}

impl UploadController {
    pub fn new(
        box_dao: Arc<dyn Dao<FileUploadBox>>,
        file_dao: Arc<dyn Dao<FileUpload>>,
        s3_details_dao: Arc<dyn Dao<S3UploadDetails>>,
        storages: StorageRegistry,
    ) -> Self {
        Self {
            box_dao,
            file_dao,
            s3_details_dao,
            storages,
        }
    }

    fn bucket_and_storage(
        &self,
        storage_alias: &str,
    ) -> Result<(String, Arc<dyn flp_common::objstore::ObjectStorage>), Error> {
        self.storages.for_alias(storage_alias).map_err(|_| Error::UnknownStorageAlias {
            storage_alias: storage_alias.to_string(),
        })
    }

    async fn unlocked_box(&self, box_id: Uuid) -> Result<FileUploadBox, Error> {
        let box_ = self.box_dao.get_by_id(&box_id).await.map_err(|err| match err {
            DaoError::NotFound { .. } => Error::BoxNotFound { box_id },
            other => other.into(),
        })?;
        if box_.locked {
            return Err(Error::LockedBox { box_id });
        }
        Ok(box_)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn create_file_upload_box(&self, storage_alias: &str) -> Result<Uuid, Error> {
        self.bucket_and_storage(storage_alias)?;
        let box_ = FileUploadBox {
            id: Uuid::new_v4(),
            storage_alias: storage_alias.to_string(),
            locked: false,
            file_count: 0,
            size: 0,
        };
        self.box_dao.insert(&box_).await?;
        Ok(box_.id)
    }

    /// Initialize a new multipart upload for `alias` in `box_id`, returning
    /// the new file's ID. Mirrors `initiate_file_upload`.
    #[tracing::instrument(level = "debug", skip(self, checksum))]
    pub async fn initiate_file_upload(
        &self,
        box_id: Uuid,
        alias: &str,
        checksum: &str,
        size: u64,
    ) -> Result<Uuid, Error> {
        let box_ = self.unlocked_box(box_id).await?;
        let (bucket_id, storage) = self.bucket_and_storage(&box_.storage_alias)?;

        let existing = self
            .file_dao
            .find_all(doc! {"box_id": box_id.to_string(), "alias": alias})
            .await?;
        if !existing.is_empty() {
            return Err(Error::FileUploadAlreadyExists {
                alias: alias.to_string(),
            });
        }

        let file_id = Uuid::new_v4();
        let initiated = Utc::now();
        let file_upload = FileUpload {
            id: file_id,
            box_id,
            alias: alias.to_string(),
            size,
            checksum: checksum.to_string(),
            completed: false,
        };
        self.file_dao.insert(&file_upload).await?;

        let s3_upload_id = match storage.init_multipart(&bucket_id, &file_id.to_string()).await {
            Ok(id) => id,
            Err(ObjectStorageError::MultipartUploadAlreadyExists { .. }) => {
                let error = Error::OrphanedMultipartUpload {
                    file_id,
                    bucket_id: bucket_id.clone(),
                };
                log_critical(&error);
                // The file record can't be salvaged without an upload ID, so
                // delete it so the client can retry cleanly.
                self.file_dao.delete(&file_id).await.ok();
                return Err(error);
            }
            Err(err) => return Err(err.into()),
        };

        let details = S3UploadDetails {
            file_id,
            storage_alias: box_.storage_alias.clone(),
            s3_upload_id,
            initiated,
            completed: None,
        };
        self.s3_details_dao.insert(&details).await?;
        Ok(file_id)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_part_upload_url(&self, file_id: Uuid, part_no: i32) -> Result<String, Error> {
        let details = self.s3_details_dao.get_by_id(&file_id).await.map_err(|err| match err {
            DaoError::NotFound { .. } => Error::S3UploadDetailsNotFound { file_id },
            other => other.into(),
        })?;
        let (bucket_id, storage) = self.bucket_and_storage(&details.storage_alias)?;
        storage
            .part_upload_url(&details.s3_upload_id, &bucket_id, &file_id.to_string(), part_no)
            .await
            .map_err(|err| match err {
                ObjectStorageError::MultipartUploadNotFound { .. } => Error::S3UploadNotFound {
                    s3_upload_id: details.s3_upload_id.clone(),
                    bucket_id,
                },
                other => other.into(),
            })
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn complete_file_upload(&self, box_id: Uuid, file_id: Uuid) -> Result<(), Error> {
        let box_ = self.unlocked_box(box_id).await?;

        let mut file_upload = self.file_dao.get_by_id(&file_id).await.map_err(|err| match err {
            DaoError::NotFound { .. } => Error::FileUploadNotFound { file_id },
            other => other.into(),
        })?;

        if file_upload.completed {
            self.update_box_stats(&box_).await?;
            return Ok(());
        }

        let mut details = self.s3_details_dao.get_by_id(&file_id).await.map_err(|err| match err {
            DaoError::NotFound { .. } => Error::S3UploadDetailsNotFound { file_id },
            other => other.into(),
        })?;
        let (bucket_id, storage) = self.bucket_and_storage(&details.storage_alias)?;

        match storage
            .complete_multipart(&details.s3_upload_id, &bucket_id, &file_id.to_string())
            .await
        {
            Ok(()) => {}
            Err(ObjectStorageError::MultipartUploadNotFound { .. })
                if storage.does_object_exist(&bucket_id, &file_id.to_string()).await.unwrap_or(false) =>
            {
                tracing::info!(%file_id, "object already present, completing DB update only");
            }
            Err(_) => {
                let error = Error::UploadCompletionError {
                    file_id,
                    s3_upload_id: details.s3_upload_id.clone(),
                    bucket_id,
                };
                log_critical(&error);
                return Err(error);
            }
        }

        file_upload.completed = true;
        details.completed = Some(Utc::now());
        self.file_dao.update(&file_upload).await?;
        self.s3_details_dao.update(&details).await?;
        self.update_box_stats(&box_).await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn remove_file_upload(&self, box_id: Uuid, file_id: Uuid) -> Result<(), Error> {
        let box_ = self.unlocked_box(box_id).await?;

        let file_upload = match self.file_dao.get_by_id(&file_id).await {
            Ok(f) => f,
            Err(DaoError::NotFound { .. }) => {
                tracing::info!(%file_id, "already deleted");
                return Ok(());
            }
            Err(other) => return Err(other.into()),
        };

        let details = self.s3_details_dao.get_by_id(&file_id).await.map_err(|err| match err {
            DaoError::NotFound { .. } => Error::S3UploadDetailsNotFound { file_id },
            other => other.into(),
        })?;
        let (bucket_id, storage) = self.bucket_and_storage(&details.storage_alias)?;

        if file_upload.completed {
            let object_id = file_id.to_string();
            if storage.does_object_exist(&bucket_id, &object_id).await? {
                storage.delete_object(&bucket_id, &object_id).await?;
            } else if let Err(err) = storage
                .abort_multipart(&details.s3_upload_id, &bucket_id, &object_id)
                .await
            {
                if !matches!(err, ObjectStorageError::MultipartUploadNotFound { .. }) {
                    return Err(err.into());
                }
            }
        } else if let Err(err) = storage
            .abort_multipart(&details.s3_upload_id, &bucket_id, &file_id.to_string())
            .await
        {
            match err {
                ObjectStorageError::MultipartUploadNotFound { .. } => {}
                _ => {
                    let error = Error::UploadAbortError {
                        file_id,
                        s3_upload_id: details.s3_upload_id.clone(),
                        bucket_id,
                    };
                    log_critical(&error);
                    return Err(error);
                }
            }
        }

        self.s3_details_dao.delete(&file_id).await?;
        self.file_dao.delete(&file_id).await?;
        self.update_box_stats(&box_).await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn lock_file_upload_box(&self, box_id: Uuid) -> Result<(), Error> {
        let mut box_ = self.box_dao.get_by_id(&box_id).await.map_err(|err| match err {
            DaoError::NotFound { .. } => Error::BoxNotFound { box_id },
            other => other.into(),
        })?;
        if box_.locked {
            return Ok(());
        }
        let incomplete = self
            .file_dao
            .find_all(doc! {"box_id": box_id.to_string(), "completed": false})
            .await?;
        if !incomplete.is_empty() {
            let mut file_ids: Vec<Uuid> = incomplete.iter().map(|f| f.id).collect();
            file_ids.sort();
            return Err(Error::IncompleteUploads { box_id, file_ids });
        }
        box_.locked = true;
        self.box_dao.update(&box_).await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn unlock_file_upload_box(&self, box_id: Uuid) -> Result<(), Error> {
        let mut box_ = self.box_dao.get_by_id(&box_id).await.map_err(|err| match err {
            DaoError::NotFound { .. } => Error::BoxNotFound { box_id },
            other => other.into(),
        })?;
        box_.locked = false;
        self.box_dao.update(&box_).await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_file_ids_for_box(&self, box_id: Uuid) -> Result<Vec<Uuid>, Error> {
        self.box_dao.get_by_id(&box_id).await.map_err(|err| match err {
            DaoError::NotFound { .. } => Error::BoxNotFound { box_id },
            other => other.into(),
        })?;
        let uploads = self
            .file_dao
            .find_all(doc! {"box_id": box_id.to_string(), "completed": true})
            .await?;
        Ok(uploads.into_iter().map(|f| f.id).collect())
    }

    /// Recompute and persist a box's file count and total size only when
    /// they actually changed, so completing an already-complete upload
    /// doesn't emit a spurious update event.
    async fn update_box_stats(&self, box_: &FileUploadBox) -> Result<(), Error> {
        let completed = self
            .file_dao
            .find_all(doc! {"box_id": box_.id.to_string(), "completed": true})
            .await?;
        let file_count = completed.len() as u64;
        let size: u64 = completed.iter().map(|f| f.size).sum();
        if file_count != box_.file_count || size != box_.size {
            let mut updated = box_.clone();
            updated.file_count = file_count;
            updated.size = size;
            self.box_dao.update(&updated).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use flp_common::dao::MockDao;
    use flp_common::error::DaoError;
    use flp_common::objstore::{MockObjectStorage, StorageRegistry};

    use super::*;

    fn registry_with(alias: &str, storage: MockObjectStorage) -> StorageRegistry {
        let mut aliases = HashMap::new();
        aliases.insert(alias.to_string(), ("bucket".to_string(), Arc::new(storage) as Arc<_>));
        StorageRegistry::new(aliases)
    }

    fn controller(
        box_dao: MockDao<FileUploadBox>,
        file_dao: MockDao<FileUpload>,
        s3_details_dao: MockDao<S3UploadDetails>,
        storages: StorageRegistry,
    ) -> UploadController {
        UploadController::new(Arc::new(box_dao), Arc::new(file_dao), Arc::new(s3_details_dao), storages)
    }

    #[tokio::test]
    async fn create_box_rejects_unknown_storage_alias() {
        let controller = controller(
            MockDao::new(),
            MockDao::new(),
            MockDao::new(),
            StorageRegistry::new(HashMap::new()),
        );
        let err = controller.create_file_upload_box("nope").await.unwrap_err();
        assert!(matches!(err, Error::UnknownStorageAlias { .. }));
    }

    #[tokio::test]
    async fn create_box_inserts_unlocked_empty_box() {
        let mut box_dao = MockDao::new();
        box_dao.expect_insert().returning(|box_| {
            assert_eq!(box_.storage_alias, "alias-a");
            assert!(!box_.locked);
            assert_eq!(box_.file_count, 0);
            Ok(())
        });
        let controller = controller(
            box_dao,
            MockDao::new(),
            MockDao::new(),
            registry_with("alias-a", MockObjectStorage::new()),
        );
        assert!(controller.create_file_upload_box("alias-a").await.is_ok());
    }

    #[tokio::test]
    async fn initiate_upload_rejects_locked_box() {
        let box_id = Uuid::new_v4();
        let mut box_dao = MockDao::new();
        box_dao.expect_get_by_id().returning(move |_| {
            Ok(FileUploadBox {
                id: box_id,
                storage_alias: "alias-a".to_string(),
                locked: true,
                file_count: 0,
                size: 0,
            })
        });
        let controller = controller(box_dao, MockDao::new(), MockDao::new(), StorageRegistry::new(HashMap::new()));
        let err = controller
            .initiate_file_upload(box_id, "name.txt", "checksum", 10)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LockedBox { box_id: id } if id == box_id));
    }

    #[tokio::test]
    async fn initiate_upload_rejects_duplicate_alias() {
        let box_id = Uuid::new_v4();
        let mut box_dao = MockDao::new();
        box_dao.expect_get_by_id().returning(move |_| {
            Ok(FileUploadBox {
                id: box_id,
                storage_alias: "alias-a".to_string(),
                locked: false,
                file_count: 0,
                size: 0,
            })
        });
        let mut file_dao = MockDao::new();
        file_dao.expect_find_all().returning(move |_| {
            Ok(vec![FileUpload {
                id: Uuid::new_v4(),
                box_id,
                alias: "name.txt".to_string(),
                size: 10,
                checksum: "checksum".to_string(),
                completed: false,
            }])
        });
        let controller = controller(
            box_dao,
            file_dao,
            MockDao::new(),
            registry_with("alias-a", MockObjectStorage::new()),
        );
        let err = controller
            .initiate_file_upload(box_id, "name.txt", "checksum", 10)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FileUploadAlreadyExists { alias } if alias == "name.txt"));
    }

    #[tokio::test]
    async fn complete_upload_is_idempotent_for_already_completed_file() {
        let box_id = Uuid::new_v4();
        let file_id = Uuid::new_v4();
        let mut box_dao = MockDao::new();
        box_dao.expect_get_by_id().returning(move |_| {
            Ok(FileUploadBox {
                id: box_id,
                storage_alias: "alias-a".to_string(),
                locked: false,
                file_count: 1,
                size: 10,
            })
        });
        let mut file_dao = MockDao::new();
        file_dao.expect_get_by_id().returning(move |_| {
            Ok(FileUpload {
                id: file_id,
                box_id,
                alias: "name.txt".to_string(),
                size: 10,
                checksum: "checksum".to_string(),
                completed: true,
            })
        });
        file_dao.expect_find_all().returning(move |_| {
            Ok(vec![FileUpload {
                id: file_id,
                box_id,
                alias: "name.txt".to_string(),
                size: 10,
                checksum: "checksum".to_string(),
                completed: true,
            }])
        });
        // update_box_stats finds no change (file_count/size already match), so
        // box_dao.update must not be called.
        let controller = controller(box_dao, file_dao, MockDao::new(), StorageRegistry::new(HashMap::new()));
        assert!(controller.complete_file_upload(box_id, file_id).await.is_ok());
    }

    #[tokio::test]
    async fn remove_upload_is_a_no_op_when_already_deleted() {
        let box_id = Uuid::new_v4();
        let file_id = Uuid::new_v4();
        let mut box_dao = MockDao::new();
        box_dao.expect_get_by_id().returning(move |_| {
            Ok(FileUploadBox {
                id: box_id,
                storage_alias: "alias-a".to_string(),
                locked: false,
                file_count: 0,
                size: 0,
            })
        });
        let mut file_dao = MockDao::new();
        file_dao
            .expect_get_by_id()
            .returning(|id| Err(DaoError::NotFound { collection: "fileUploads".to_string(), id: id.to_string() }));
        let controller = controller(box_dao, file_dao, MockDao::new(), StorageRegistry::new(HashMap::new()));
        assert!(controller.remove_file_upload(box_id, file_id).await.is_ok());
    }

    #[tokio::test]
    async fn lock_box_rejects_when_uploads_are_incomplete() {
        let box_id = Uuid::new_v4();
        let pending_id = Uuid::new_v4();
        let mut box_dao = MockDao::new();
        box_dao.expect_get_by_id().returning(move |_| {
            Ok(FileUploadBox {
                id: box_id,
                storage_alias: "alias-a".to_string(),
                locked: false,
                file_count: 0,
                size: 0,
            })
        });
        let mut file_dao = MockDao::new();
        file_dao.expect_find_all().returning(move |_| {
            Ok(vec![FileUpload {
                id: pending_id,
                box_id,
                alias: "name.txt".to_string(),
                size: 10,
                checksum: "checksum".to_string(),
                completed: false,
            }])
        });
        let controller = controller(box_dao, file_dao, MockDao::new(), StorageRegistry::new(HashMap::new()));
        let err = controller.lock_file_upload_box(box_id).await.unwrap_err();
        match err {
            Error::IncompleteUploads { box_id: id, file_ids } => {
                assert_eq!(id, box_id);
                assert_eq!(file_ids, vec![pending_id]);
            }
            other => panic!("expected IncompleteUploads, got {other:?}"),
        }
    }
}
