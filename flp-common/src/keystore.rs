//! HTTP client for the encryption key store (spec.md §2/§6's EKSS/Vault
//! wrapper). Grounded in `original_source`'s `call_ekss_api` /
//! `delete_secret_from_ekss` (`dcs/adapters/outbound/http/api_calls.py`)
//! and `ekss/adapters/outbound/vault/client.py` for the deposit shape. The
//! cryptography itself (wrapping/unwrapping session keys) stays inside the
//! key store process and is out of scope here per spec.md's Non-goals;
//! this client only speaks the documented HTTP surface.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::KeyStoreError as Error;

/// Port over the EKSS/Vault HTTP surface, so `DataRepository` (DCS) can be
/// unit-tested against a mock instead of a live key store.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn deposit_secret(&self, file_secret: &str) -> Result<DepositResponse, Error>;
    async fn fetch_envelope(&self, secret_id: &str, recipient_public_key: &str) -> Result<String, Error>;
    async fn delete_secret(&self, secret_id: &str) -> Result<(), Error>;
}

#[derive(Debug, Clone)]
pub struct KeyStoreClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct DepositRequest<'a> {
    file_secret: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct DepositResponse {
    pub submitter_secret: String,
    pub new_secret: String,
    pub secret_id: String,
    pub offset: u64,
}

#[derive(Debug, Deserialize)]
struct EnvelopeResponse {
    content: String,
}

impl KeyStoreClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("static reqwest client configuration is always valid");
        Self {
            base_url: base_url.into(),
            client,
        }
    }
}

#[async_trait]
impl KeyStore for KeyStoreClient {
    /// `PUT secret -> secret_id`. FIS calls this once per ingest to deposit
    /// the unwrapped session key (spec.md §4.3).
    #[tracing::instrument(level = "debug", skip(self, file_secret))]
    async fn deposit_secret(&self, file_secret: &str) -> Result<DepositResponse, Error> {
        let url = format!("{}/secrets", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&DepositRequest { file_secret })
            .send()
            .await
            .map_err(|e| Error::RequestFailed(e.to_string()))?;

        if response.status() != reqwest::StatusCode::CREATED {
            return Err(Error::BadResponse {
                status: response.status().as_u16(),
            });
        }
        response
            .json()
            .await
            .map_err(|e| Error::RequestFailed(e.to_string()))
    }

    /// `GET /secrets/{id}/envelopes/{recipient_public_key}` — base64 encoded
    /// Crypt4GH envelope for one recipient (spec.md §4.5 `serve_envelope`).
    #[tracing::instrument(level = "debug", skip(self, recipient_public_key))]
    async fn fetch_envelope(
        &self,
        secret_id: &str,
        recipient_public_key: &str,
    ) -> Result<String, Error> {
        let url = format!(
            "{}/secrets/{secret_id}/envelopes/{recipient_public_key}",
            self.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::RequestFailed(e.to_string()))?;

        match response.status() {
            reqwest::StatusCode::OK => {
                let body: EnvelopeResponse = response
                    .json()
                    .await
                    .map_err(|e| Error::RequestFailed(e.to_string()))?;
                Ok(body.content)
            }
            reqwest::StatusCode::NOT_FOUND => Err(Error::SecretNotFound {
                secret_id: secret_id.to_string(),
            }),
            status => Err(Error::BadResponse {
                status: status.as_u16(),
            }),
        }
    }

    /// `DELETE /secrets/{id}`. Missing secrets are not an error to the
    /// caller (spec.md §4.5 `delete_file` treats it as already-deleted).
    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete_secret(&self, secret_id: &str) -> Result<(), Error> {
        let url = format!(
            "{}/secrets/{secret_id}",
            self.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| Error::RequestFailed(e.to_string()))?;

        match response.status() {
            reqwest::StatusCode::NO_CONTENT | reqwest::StatusCode::NOT_FOUND => Ok(()),
            status => Err(Error::BadResponse {
                status: status.as_u16(),
            }),
        }
    }
}
