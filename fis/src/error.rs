//! Domain errors, grounded in the `ports/inbound/ingest.py` and
//! `ports/inbound/interrogation.py` exception classes.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("failed to decrypt envelope: {0}")]
    Decryption(String),

    #[error("decrypted payload did not match the expected schema: {0}")]
    WrongDecryptedFormat(String),

    #[error("failed to deposit file secret: {0}")]
    VaultCommunication(String),

    #[error(transparent)]
    KeyStore(#[from] flp_common::error::KeyStoreError),

    #[error(transparent)]
    Dao(#[from] flp_common::error::DaoError),

    #[error(transparent)]
    EventBus(#[from] flp_common::error::EventBusError),
}

#[derive(Debug, thiserror::Error)]
pub enum InterrogationError {
    #[error("no FileUnderInterrogation with ID {file_id}")]
    FileNotFound { file_id: Uuid },

    #[error("failed to deposit secret for file {file_id}: {reason}")]
    SecretDeposition { file_id: Uuid, reason: String },

    #[error(transparent)]
    KeyStore(#[from] flp_common::error::KeyStoreError),

    #[error(transparent)]
    Dao(#[from] flp_common::error::DaoError),

    #[error(transparent)]
    EventBus(#[from] flp_common::error::EventBusError),
}
