//! Domain errors raised by [`crate::core::UploadController`], grounded 1:1
//! in the exception classes nested under `UploadControllerPort` in
//! `original_source/services/ucs/src/ucs/ports/inbound/controller.py`.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("storage alias '{storage_alias}' is not known")]
    UnknownStorageAlias { storage_alias: String },

    #[error("FileUploadBox {box_id} not found")]
    BoxNotFound { box_id: Uuid },

    #[error("FileUploadBox {box_id} is locked")]
    LockedBox { box_id: Uuid },

    #[error("a FileUpload for alias '{alias}' already exists")]
    FileUploadAlreadyExists { alias: String },

    #[error("FileUpload {file_id} not found")]
    FileUploadNotFound { file_id: Uuid },

    #[error("S3 upload details for file {file_id} not found")]
    S3UploadDetailsNotFound { file_id: Uuid },

    #[error("S3 multipart upload {s3_upload_id} not found in bucket {bucket_id}")]
    S3UploadNotFound { s3_upload_id: String, bucket_id: String },

    #[error("S3 upload already in progress for file {file_id} in bucket {bucket_id}; manual cleanup required")]
    OrphanedMultipartUpload { file_id: Uuid, bucket_id: String },

    #[error("failed to complete S3 multipart upload for file {file_id}, upload {s3_upload_id}")]
    UploadCompletionError { file_id: Uuid, s3_upload_id: String, bucket_id: String },

    #[error("failed to abort S3 multipart upload for file {file_id}, upload {s3_upload_id}")]
    UploadAbortError { file_id: Uuid, s3_upload_id: String, bucket_id: String },

    #[error("FileUploadBox {box_id} has incomplete uploads: {file_ids:?}")]
    IncompleteUploads { box_id: Uuid, file_ids: Vec<Uuid> },

    #[error(transparent)]
    ObjectStorage(#[from] flp_common::error::ObjectStorageError),

    #[error(transparent)]
    Dao(#[from] flp_common::error::DaoError),
}
