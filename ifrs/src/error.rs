//! Domain errors, grounded in the exceptions nested under `FileRegistryPort`
//! in `original_source/services/ifrs/src/ifrs/ports/inbound/file_registry.py`.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("storage alias '{storage_alias}' is not configured")]
    UnknownStorageAlias { storage_alias: String },

    #[error("re-registration of file {file_id} with different metadata was dropped")]
    FileUpdateDropped { file_id: Uuid },

    #[error("file {file_id} expected encrypted size {expected}, found {actual} in staging")]
    SizeMismatch { file_id: Uuid, expected: u64, actual: u64 },

    #[error("file {file_id} not present in the interrogation bucket")]
    FileNotInInterrogation { file_id: Uuid },

    #[error("failed to copy file {file_id} into bucket {dest_bucket_id}: {reason}")]
    CopyOperation {
        file_id: Uuid,
        dest_bucket_id: String,
        reason: String,
    },

    #[error("no registered file for accession '{accession}'")]
    FileNotInRegistry { accession: String },

    #[error("checksum mismatch for file {file_id}: expected {expected}, got {provided}")]
    ChecksumMismatch {
        file_id: Uuid,
        provided: String,
        expected: String,
    },

    #[error("file {file_id} is in the registry but missing from permanent storage")]
    FileInRegistryButNotInStorage { file_id: Uuid },

    #[error(transparent)]
    ObjectStorage(#[from] flp_common::error::ObjectStorageError),

    #[error(transparent)]
    Dao(#[from] flp_common::error::DaoError),

    #[error(transparent)]
    EventBus(#[from] flp_common::error::EventBusError),
}
