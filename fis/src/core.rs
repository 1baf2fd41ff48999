//! `UploadMetadataProcessor` and `InterrogationHandler`, grounded in
//! `original_source/services/fis/src/fis/core/ingest.py` and
//! `interrogation.py`, with the federated secret/metadata split grounded
//! in `original_source/src/fis/adapters/inbound/fastapi_/routes.py`'s
//! `ingest_secret`/`ingest_metadata` handlers.

use std::sync::Arc;

use bson::doc;
use chrono::Utc;
use flp_common::dao::Dao;
use flp_common::error::DaoError;
use flp_common::eventbus::EventPublisher;
use flp_common::keystore::KeyStore;
use serde_json::json;
use uuid::Uuid;

use crate::crypt::ServiceKeypair;
use crate::error::{IngestError, InterrogationError};
use crate::models::{
    BaseFileInformation, DecryptedSecret, EncryptedPayload, FileIdRecord, FileUnderInterrogation,
    FileUploadState, InterrogationReport, LegacyUploadMetadata, UploadMetadata,
};

pub struct UploadMetadataProcessor {
    keypair: Arc<ServiceKeypair>,
    file_dao: Arc<dyn Dao<FileIdRecord>>,
    key_store: Arc<dyn KeyStore>,
    events: Arc<dyn EventPublisher>,
}

impl UploadMetadataProcessor {
    pub fn new(
        keypair: Arc<ServiceKeypair>,
        file_dao: Arc<dyn Dao<FileIdRecord>>,
        key_store: Arc<dyn KeyStore>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            keypair,
            file_dao,
            key_store,
            events,
        }
    }

    #[tracing::instrument(level = "debug", skip(self, encrypted))]
    pub fn decrypt_payload(&self, encrypted: &EncryptedPayload) -> Result<UploadMetadata, IngestError> {
        let decrypted = self.keypair.decrypt_envelope(&encrypted.payload)?;
        serde_json::from_slice(&decrypted).map_err(|e| IngestError::WrongDecryptedFormat(e.to_string()))
    }

    pub fn decrypt_legacy_payload(
        &self,
        encrypted: &EncryptedPayload,
    ) -> Result<LegacyUploadMetadata, IngestError> {
        let decrypted = self.keypair.decrypt_envelope(&encrypted.payload)?;
        serde_json::from_slice(&decrypted).map_err(|e| IngestError::WrongDecryptedFormat(e.to_string()))
    }

    /// Decrypt the secret-only envelope submitted to
    /// `/federated/ingest_secret`, separate from its metadata.
    #[tracing::instrument(level = "debug", skip(self, encrypted))]
    pub fn decrypt_secret(&self, encrypted: &EncryptedPayload) -> Result<String, IngestError> {
        let decrypted = self.keypair.decrypt_envelope(&encrypted.payload)?;
        let secret: DecryptedSecret =
            serde_json::from_slice(&decrypted).map_err(|e| IngestError::WrongDecryptedFormat(e.to_string()))?;
        Ok(secret.file_secret)
    }

    pub async fn has_already_been_processed(&self, file_id: Uuid) -> Result<bool, IngestError> {
        match self.file_dao.get_by_id(&file_id).await {
            Ok(_) => Ok(true),
            Err(DaoError::NotFound { .. }) => Ok(false),
            Err(other) => Err(other.into()),
        }
    }

    /// Deposit the decrypted file secret with the key store and return the
    /// assigned secret id.
    #[tracing::instrument(level = "debug", skip(self, file_secret))]
    pub async fn store_secret(&self, file_secret: &str) -> Result<String, IngestError> {
        self.key_store
            .deposit_secret(file_secret)
            .await
            .map(|res| res.secret_id)
            .map_err(|e| IngestError::VaultCommunication(e.to_string()))
    }

    /// Record the file as processed and emit `FileUploadValidationSuccess`.
    #[tracing::instrument(level = "debug", skip(self, metadata))]
    pub async fn populate_by_event(&self, metadata: &UploadMetadata, secret_id: &str) -> Result<(), IngestError> {
        self.file_dao.insert(&FileIdRecord { file_id: metadata.file_id }).await?;
        self.events
            .publish(
                "file-upload-validation-success",
                &metadata.file_id.to_string(),
                "FileUploadValidationSuccess",
                json!({
                    "file_id": metadata.file_id,
                    "object_id": metadata.object_id,
                    "secret_id": secret_id,
                    "part_size": metadata.part_size,
                    "unencrypted_size": metadata.unencrypted_size,
                    "encrypted_size": metadata.encrypted_size,
                    "encrypted_parts_md5": metadata.encrypted_parts_md5,
                    "encrypted_parts_sha256": metadata.encrypted_parts_sha256,
                    "decrypted_sha256": metadata.unencrypted_checksum,
                    "storage_alias": metadata.storage_alias,
                }),
            )
            .await?;
        Ok(())
    }
}

pub struct InterrogationHandler {
    file_dao: Arc<dyn Dao<FileUnderInterrogation>>,
    key_store: Arc<dyn KeyStore>,
    events: Arc<dyn EventPublisher>,
}

impl InterrogationHandler {
    pub fn new(
        file_dao: Arc<dyn Dao<FileUnderInterrogation>>,
        key_store: Arc<dyn KeyStore>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            file_dao,
            key_store,
            events,
        }
    }

    pub async fn check_if_removable(&self, file_id: Uuid) -> bool {
        match self.file_dao.get_by_id(&file_id).await {
            Ok(file) => file.can_remove,
            Err(_) => {
                tracing::warn!(%file_id, "no interrogation record found, treating as removable");
                true
            }
        }
    }

    pub async fn does_file_exist(&self, file_id: Uuid) -> bool {
        self.file_dao.get_by_id(&file_id).await.is_ok()
    }

    /// Act on a data hub's interrogation report: deposit the secret on
    /// success, publish the matching event either way, and record the new
    /// state.
    #[tracing::instrument(level = "debug", skip(self, report))]
    pub async fn handle_interrogation_report(
        &self,
        report: &InterrogationReport,
    ) -> Result<(), InterrogationError> {
        let mut file = self
            .file_dao
            .get_by_id(&report.file_id)
            .await
            .map_err(|_| InterrogationError::FileNotFound { file_id: report.file_id })?;

        if report.passed {
            let secret = report.secret.as_deref().unwrap_or_default();
            let deposit = self.key_store.deposit_secret(secret).await.map_err(|e| {
                InterrogationError::SecretDeposition {
                    file_id: report.file_id,
                    reason: e.to_string(),
                }
            })?;

            file.state = FileUploadState::Interrogated;
            self.events
                .publish(
                    "interrogation-success",
                    &report.file_id.to_string(),
                    "InterrogationSuccess",
                    json!({
                        "file_id": report.file_id,
                        "secret_id": deposit.secret_id,
                        "storage_alias": report.storage_alias,
                        "interrogated_at": report.interrogated_at,
                        "encrypted_parts_md5": report.encrypted_parts_md5,
                        "encrypted_parts_sha256": report.encrypted_parts_sha256,
                    }),
                )
                .await?;
        } else {
            file.state = FileUploadState::Failed;
            file.can_remove = true;
            self.events
                .publish(
                    "interrogation-failed",
                    &report.file_id.to_string(),
                    "InterrogationFailure",
                    json!({
                        "file_id": report.file_id,
                        "storage_alias": report.storage_alias,
                        "interrogated_at": report.interrogated_at,
                        "reason": report.reason,
                    }),
                )
                .await?;
        }

        file.interrogated = true;
        file.state_updated = Utc::now();
        self.file_dao.update(&file).await?;
        Ok(())
    }

    /// Ingest a `FileUpload`-state notification from the event bus. Only
    /// `inbox` starts tracking; `cancelled`/`failed`/`archived` transitions
    /// are applied if newer than what's on file; anything else is ignored,
    /// mirroring `process_file_upload`.
    #[tracing::instrument(level = "debug", skip(self, file))]
    pub async fn process_file_upload(&self, file: FileUnderInterrogation) -> Result<(), InterrogationError> {
        if file.state == FileUploadState::Init {
            return Ok(());
        }
        if file.state == FileUploadState::Inbox {
            match self.file_dao.insert(&file).await {
                Ok(()) | Err(DaoError::AlreadyExists { .. }) => return Ok(()),
                Err(other) => return Err(other.into()),
            }
        }

        let local = self.file_dao.get_by_id(&file.id).await?;
        if local.state_updated >= file.state_updated {
            tracing::info!(file_id = %file.id, "ignoring stale file state update");
            return Ok(());
        }

        if file.state != local.state
            && matches!(
                file.state,
                FileUploadState::Cancelled | FileUploadState::Failed | FileUploadState::Archived
            )
        {
            let mut updated = file;
            updated.can_remove = true;
            updated.interrogated = local.interrogated;
            self.file_dao.update(&updated).await?;
        }
        Ok(())
    }

    pub async fn get_files_not_yet_interrogated(
        &self,
        data_hub: &str,
    ) -> Result<Vec<BaseFileInformation>, InterrogationError> {
        let files = self
            .file_dao
            .find_all(doc! {"data_hub": data_hub, "state": "inbox", "interrogated": false})
            .await?;
        Ok(files
            .into_iter()
            .map(|f| BaseFileInformation {
                id: f.id,
                data_hub: f.data_hub,
            })
            .collect())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn ack_file_cancellation(&self, file_id: Uuid) -> Result<(), InterrogationError> {
        let mut file = self
            .file_dao
            .get_by_id(&file_id)
            .await
            .map_err(|_| InterrogationError::FileNotFound { file_id })?;
        file.state = FileUploadState::Cancelled;
        file.state_updated = Utc::now();
        file.can_remove = true;
        self.file_dao.update(&file).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use flp_common::dao::MockDao;
    use flp_common::error::DaoError;
    use flp_common::eventbus::MockEventPublisher;
    use flp_common::keystore::{DepositResponse, MockKeyStore};

    use super::*;

    fn interrogated_file(id: Uuid, state: FileUploadState, can_remove: bool) -> FileUnderInterrogation {
        FileUnderInterrogation {
            id,
            data_hub: "hub-a".to_string(),
            state,
            state_updated: Utc::now(),
            interrogated: false,
            can_remove,
        }
    }

    #[tokio::test]
    async fn check_if_removable_defaults_to_true_when_record_missing() {
        let mut file_dao = MockDao::new();
        file_dao
            .expect_get_by_id()
            .returning(|id| Err(DaoError::NotFound { collection: "filesUnderInterrogation".to_string(), id: id.to_string() }));
        let handler = InterrogationHandler::new(Arc::new(file_dao), Arc::new(MockKeyStore::new()), Arc::new(MockEventPublisher::new()));
        assert!(handler.check_if_removable(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn check_if_removable_respects_recorded_flag() {
        let id = Uuid::new_v4();
        let mut file_dao = MockDao::new();
        file_dao.expect_get_by_id().returning(move |_| Ok(interrogated_file(id, FileUploadState::Inbox, false)));
        let handler = InterrogationHandler::new(Arc::new(file_dao), Arc::new(MockKeyStore::new()), Arc::new(MockEventPublisher::new()));
        assert!(!handler.check_if_removable(id).await);
    }

    #[tokio::test]
    async fn interrogation_report_success_deposits_secret_and_publishes() {
        let id = Uuid::new_v4();
        let mut file_dao = MockDao::new();
        file_dao.expect_get_by_id().returning(move |_| Ok(interrogated_file(id, FileUploadState::Inbox, false)));
        file_dao.expect_update().returning(|file| {
            assert_eq!(file.state, FileUploadState::Interrogated);
            assert!(file.interrogated);
            Ok(())
        });

        let mut key_store = MockKeyStore::new();
        key_store.expect_deposit_secret().returning(|_| {
            Ok(DepositResponse {
                submitter_secret: "sub".to_string(),
                new_secret: "new".to_string(),
                secret_id: "secret-1".to_string(),
                offset: 0,
            })
        });

        let mut events = MockEventPublisher::new();
        events.expect_publish().returning(|_, _, type_, _| {
            assert_eq!(type_, "InterrogationSuccess");
            Ok(())
        });

        let handler = InterrogationHandler::new(Arc::new(file_dao), Arc::new(key_store), Arc::new(events));
        let report = InterrogationReport {
            file_id: id,
            storage_alias: "alias-a".to_string(),
            interrogated_at: Utc::now(),
            passed: true,
            secret: Some("raw-secret".to_string()),
            encrypted_parts_md5: vec![],
            encrypted_parts_sha256: vec![],
            reason: None,
        };
        assert!(handler.handle_interrogation_report(&report).await.is_ok());
    }

    #[tokio::test]
    async fn interrogation_report_failure_marks_removable_without_deposit() {
        let id = Uuid::new_v4();
        let mut file_dao = MockDao::new();
        file_dao.expect_get_by_id().returning(move |_| Ok(interrogated_file(id, FileUploadState::Inbox, false)));
        file_dao.expect_update().returning(|file| {
            assert_eq!(file.state, FileUploadState::Failed);
            assert!(file.can_remove);
            Ok(())
        });

        let mut events = MockEventPublisher::new();
        events.expect_publish().returning(|_, _, type_, _| {
            assert_eq!(type_, "InterrogationFailure");
            Ok(())
        });

        let handler = InterrogationHandler::new(Arc::new(file_dao), Arc::new(MockKeyStore::new()), Arc::new(events));
        let report = InterrogationReport {
            file_id: id,
            storage_alias: "alias-a".to_string(),
            interrogated_at: Utc::now(),
            passed: false,
            secret: None,
            encrypted_parts_md5: vec![],
            encrypted_parts_sha256: vec![],
            reason: Some("checksum mismatch".to_string()),
        };
        assert!(handler.handle_interrogation_report(&report).await.is_ok());
    }

    #[tokio::test]
    async fn process_file_upload_ignores_init_state() {
        let file_dao: MockDao<FileUnderInterrogation> = MockDao::new();
        let handler = InterrogationHandler::new(Arc::new(file_dao), Arc::new(MockKeyStore::new()), Arc::new(MockEventPublisher::new()));
        let file = interrogated_file(Uuid::new_v4(), FileUploadState::Init, false);
        assert!(handler.process_file_upload(file).await.is_ok());
    }

    #[tokio::test]
    async fn process_file_upload_swallows_duplicate_inbox_insert() {
        let mut file_dao = MockDao::new();
        file_dao
            .expect_insert()
            .returning(|f| Err(DaoError::AlreadyExists { collection: "filesUnderInterrogation".to_string(), id: f.id.to_string() }));
        let handler = InterrogationHandler::new(Arc::new(file_dao), Arc::new(MockKeyStore::new()), Arc::new(MockEventPublisher::new()));
        let file = interrogated_file(Uuid::new_v4(), FileUploadState::Inbox, false);
        assert!(handler.process_file_upload(file).await.is_ok());
    }

    #[tokio::test]
    async fn process_file_upload_ignores_stale_update() {
        let id = Uuid::new_v4();
        let newer = Utc::now();
        let mut file_dao = MockDao::new();
        file_dao.expect_get_by_id().returning(move |_| {
            let mut f = interrogated_file(id, FileUploadState::Archived, false);
            f.state_updated = newer;
            Ok(f)
        });
        let handler = InterrogationHandler::new(Arc::new(file_dao), Arc::new(MockKeyStore::new()), Arc::new(MockEventPublisher::new()));
        let mut stale = interrogated_file(id, FileUploadState::Cancelled, false);
        stale.state_updated = newer - chrono::Duration::seconds(5);
        assert!(handler.process_file_upload(stale).await.is_ok());
    }

    #[tokio::test]
    async fn has_already_been_processed_reports_false_when_no_record() {
        let mut file_dao = MockDao::new();
        file_dao
            .expect_get_by_id()
            .returning(|id| Err(DaoError::NotFound { collection: "fileIds".to_string(), id: id.to_string() }));
        let processor = UploadMetadataProcessor::new(
            Arc::new(ServiceKeypair::from_bytes([1u8; 32])),
            Arc::new(file_dao),
            Arc::new(MockKeyStore::new()),
            Arc::new(MockEventPublisher::new()),
        );
        assert!(!processor.has_already_been_processed(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn populate_by_event_inserts_and_publishes_validation_success() {
        let mut file_dao = MockDao::new();
        file_dao.expect_insert().returning(|_| Ok(()));
        let mut events = MockEventPublisher::new();
        events.expect_publish().returning(|_, _, type_, _| {
            assert_eq!(type_, "FileUploadValidationSuccess");
            Ok(())
        });
        let processor = UploadMetadataProcessor::new(
            Arc::new(ServiceKeypair::from_bytes([1u8; 32])),
            Arc::new(file_dao),
            Arc::new(MockKeyStore::new()),
            Arc::new(events),
        );
        let metadata = UploadMetadata {
            file_id: Uuid::new_v4(),
            object_id: "obj-1".to_string(),
            part_size: 16 * 1024 * 1024,
            unencrypted_size: 1000,
            encrypted_size: 1100,
            secret_id: "secret-1".to_string(),
            encrypted_parts_md5: vec![],
            encrypted_parts_sha256: vec![],
            unencrypted_checksum: "checksum".to_string(),
            storage_alias: "alias-a".to_string(),
        };
        assert!(processor.populate_by_event(&metadata, "secret-1").await.is_ok());
    }
}
