//! Kafka consumer loop dispatching `FileInternallyRegistered` and
//! `FileDeletionRequested` events into [`crate::core::DataRepository`],
//! grounded in
//! `original_source/services/dcs/src/dcs/adapters/inbound/event_sub.py`.

use std::sync::Arc;

use flp_common::eventbus::{commit_message, decode_message, DeadLetterSink, IdempotenceGuard};
use rdkafka::consumer::StreamConsumer;
use rdkafka::Message;

use crate::core::DataRepository;
use crate::models::DrsObjectBase;

pub async fn run(
    consumer: StreamConsumer,
    repository: Arc<DataRepository>,
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
            "FileInternallyRegistered" => handle_file_registered(&repository, payload).await,
            "FileDeletionRequested" => handle_deletion_request(&repository, payload).await,
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

async fn handle_file_registered(repository: &DataRepository, payload: serde_json::Value) -> anyhow::Result<()> {
    let file = DrsObjectBase {
        file_id: payload["file_id"].as_str().unwrap_or_default().to_string(),
        decryption_secret_id: payload["decryption_secret_id"].as_str().unwrap_or_default().to_string(),
        decrypted_sha256: payload["decrypted_sha256"].as_str().unwrap_or_default().to_string(),
        decrypted_size: payload["decrypted_size"].as_u64().unwrap_or_default(),
        encrypted_size: payload["encrypted_size"].as_u64().unwrap_or_default(),
        s3_endpoint_alias: payload["s3_endpoint_alias"].as_str().unwrap_or_default().to_string(),
        creation_date: serde_json::from_value(payload["upload_date"].clone())
            .unwrap_or_else(|_| chrono::Utc::now()),
    };
    repository.register_new_file(file).await?;
    Ok(())
}

async fn handle_deletion_request(repository: &DataRepository, payload: serde_json::Value) -> anyhow::Result<()> {
    let file_id = payload["file_id"].as_str().unwrap_or_default();
    repository.delete_file(file_id).await?;
    Ok(())
}
