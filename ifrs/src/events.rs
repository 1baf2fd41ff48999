//! Kafka consumer loop dispatching `FileUploadValidationSuccess` and
//! accession-map events into [`crate::core::FileRegistry`]. IFRS has no
//! REST surface of its own (spec.md §6 lists none); it only reacts to the
//! event bus, as `original_source`'s `ifrs/adapters/inbound/event_sub.py`
//! does.

use std::sync::Arc;

use flp_common::eventbus::{commit_message, decode_message, DeadLetterSink, IdempotenceGuard};
use rdkafka::consumer::StreamConsumer;
use rdkafka::Message;
use uuid::Uuid;

use crate::core::FileRegistry;
use crate::models::PendingFileUpload;

pub async fn run(
    consumer: StreamConsumer,
    registry: Arc<FileRegistry>,
    idempotence: Arc<IdempotenceGuard>,
    dlq: Arc<DeadLetterSink>,
) {
    loop {
        let msg = match consumer.recv().await {
            Ok(msg) => msg,
            Err(err) => {
                tracing::error!(%err, "failed to receive from Kafka");
                continue;
            }
        };

        let (event_type, payload) = match decode_message(&msg) {
            Ok(pair) => pair,
            Err(err) => {
                tracing::error!(%err, "malformed message, shunting to DLQ");
                shunt(&dlq, &msg, &err.to_string()).await;
                if let Err(err) = commit_message(&consumer, &msg) {
                    tracing::error!(%err, "failed to commit offset for DLQ'd message");
                }
                continue;
            }
        };

        let correlation_id = payload
            .get("correlation_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let resource_id = msg.key().map(|k| String::from_utf8_lossy(k).to_string()).unwrap_or_default();

        match idempotence.claim(&correlation_id, &resource_id, &event_type).await {
            Ok(true) => {}
            Ok(false) => {
                if let Err(err) = commit_message(&consumer, &msg) {
                    tracing::error!(%err, "failed to commit offset for duplicate message");
                }
                continue;
            }
            Err(err) => {
                tracing::error!(%err, "idempotence check failed, skipping");
                continue;
            }
        }

        let result = match event_type.as_str() {
            "FileUploadValidationSuccess" => handle_upload_validation_success(&registry, payload).await,
            "FileAccessionMap" => handle_accession_map(&registry, payload).await,
            other => {
                tracing::debug!(event_type = other, "ignoring unrecognized event type");
                Ok(())
            }
        };

        if let Err(err) = result {
            tracing::error!(%err, "failed to process event, shunting to DLQ");
            shunt(&dlq, &msg, &err.to_string()).await;
        }

        if let Err(err) = commit_message(&consumer, &msg) {
            tracing::error!(%err, "failed to commit offset");
        }
    }
}

async fn shunt(dlq: &DeadLetterSink, msg: &rdkafka::message::BorrowedMessage<'_>, reason: &str) {
    let topic = msg.topic().to_string();
    let key = msg.key().map(|k| String::from_utf8_lossy(k).to_string()).unwrap_or_default();
    let raw = msg.payload().unwrap_or_default();
    if let Err(err) = dlq.shunt(&topic, &key, raw, reason).await {
        tracing::error!(%err, "failed to shunt message to DLQ");
    }
}

async fn handle_upload_validation_success(
    registry: &FileRegistry,
    payload: serde_json::Value,
) -> anyhow::Result<()> {
    let id: Uuid = serde_json::from_value(payload["file_id"].clone())?;
    let pending = PendingFileUpload {
        id,
        bucket_id: payload["bucket_id"].as_str().unwrap_or_default().to_string(),
        storage_alias: payload["storage_alias"].as_str().unwrap_or_default().to_string(),
        decrypted_sha256: payload["decrypted_sha256"].as_str().unwrap_or_default().to_string(),
        encrypted_size: payload["encrypted_size"].as_u64().unwrap_or_default(),
        unencrypted_size: payload["unencrypted_size"].as_u64().unwrap_or_default(),
    };
    registry.handle_file_upload(pending).await?;
    Ok(())
}

async fn handle_accession_map(registry: &FileRegistry, payload: serde_json::Value) -> anyhow::Result<()> {
    if let Some(map) = payload.as_object() {
        for (accession, file_id) in map {
            let file_id: Uuid = serde_json::from_value(file_id.clone())?;
            registry.store_accession(accession, file_id).await?;
        }
    }
    Ok(())
}
