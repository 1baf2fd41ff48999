//! Shared ports, adapters, and ambient infrastructure used by all four
//! file-lifecycle-pipeline services (UCS, FIS, IFRS, DCS). Each service
//! binary owns its domain models and core logic; this crate owns the
//! things that are identical across services: object storage, the
//! document-store DAO, the Kafka-backed outbox, the key-store HTTP
//! client, JWT verification, tracing setup, config loading, and DB
//! migrations.

pub mod auth;
pub mod config;
pub mod dao;
pub mod error;
pub mod eventbus;
pub mod keystore;
pub mod migrate;
pub mod objstore;
pub mod telemetry;
