//! Domain errors raised by [`crate::core::DataRepository`], grounded 1:1 in
//! the exception classes nested under `DataRepositoryPort` in
//! `original_source/services/dcs/src/dcs/core/data_repository.py`.

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("DRS object '{drs_id}' not found")]
    DrsObjectNotFound { drs_id: String },

    #[error("object not yet staged; retry after {retry_after} seconds")]
    RetryAccessLater { retry_after: u64 },

    #[error("storage alias '{alias}' is not configured")]
    StorageAliasNotConfigured { alias: String },

    #[error("failed to communicate with key store at {api_url}")]
    ApiCommunicationError { api_url: String },

    #[error("no envelope available for object '{object_id}'")]
    EnvelopeNotFound { object_id: String },

    #[error("outbox cleanup failed for object '{object_id}'")]
    CleanupError { object_id: String },

    #[error(transparent)]
    ObjectStorage(#[from] flp_common::error::ObjectStorageError),

    #[error(transparent)]
    Dao(#[from] flp_common::error::DaoError),

    #[error(transparent)]
    EventBus(#[from] flp_common::error::EventBusError),

    #[error(transparent)]
    KeyStore(#[from] flp_common::error::KeyStoreError),
}
