//! Document-store DAO port (spec.md §2) and a generic MongoDB adapter.
//!
//! Mirrors the shape of the teacher's `MetaStore` trait
//! (`crates/teacher_gateway/src/meta_store.rs`) — one trait per concern,
//! `Result<_, DaoError>` at every boundary, `#[tracing::instrument]` on
//! each method — but replaces the teacher's hand-rolled SQL/Postgres
//! implementation with the MongoDB driver, since every service in this
//! spec owns disjoint collections in a document store, not a shared
//! relational schema.

use std::marker::PhantomData;

use bson::{doc, Document};
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};
use mongodb::{Collection, Database};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::DaoError as Error;

/// A resource identifiable by a natural (non-ObjectId) key, the way every
/// entity in §3's data model is keyed by a UUID or accession string rather
/// than a Mongo-assigned `_id`.
pub trait Resource: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {
    type Id: Serialize + ToString + Send + Sync;
    fn id(&self) -> Self::Id;
}

#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait::async_trait]
pub trait Dao<T: Resource>: Send + Sync {
    async fn insert(&self, resource: &T) -> Result<(), Error>;
    async fn get_by_id(&self, id: &T::Id) -> Result<T, Error>;
    async fn find_one(&self, filter: Document) -> Result<T, Error>;
    async fn find_all(&self, filter: Document) -> Result<Vec<T>, Error>;
    async fn update(&self, resource: &T) -> Result<(), Error>;
    /// Insert-or-replace by id. Used for the transient join collections
    /// (`PendingFileUpload`, `FileIdToAccession`) where either side of a
    /// two-sided join may arrive first (spec.md §4.4).
    async fn upsert(&self, resource: &T) -> Result<(), Error>;
    async fn delete(&self, id: &T::Id) -> Result<(), Error>;
}

/// Generic MongoDB-backed DAO. One instance per collection per service, as
/// spec.md §6's "Persisted state layout" enumerates (`drs_objects`,
/// `file_metadata`, `fileUploads`, ...).
pub struct MongoDao<T: Resource> {
    collection: Collection<T>,
    name: String,
    _marker: PhantomData<T>,
}

impl<T: Resource> MongoDao<T> {
    pub fn new(db: &Database, collection_name: &str) -> Self {
        Self {
            collection: db.collection(collection_name),
            name: collection_name.to_string(),
            _marker: PhantomData,
        }
    }
}

#[async_trait::async_trait]
impl<T: Resource> Dao<T> for MongoDao<T> {
    #[tracing::instrument(level = "debug", skip(self, resource), fields(collection = %self.name))]
    async fn insert(&self, resource: &T) -> Result<(), Error> {
        let id = resource.id().to_string();
        if self
            .collection
            .find_one(doc! {"_id": &id}, None)
            .await
            .map_err(transient)?
            .is_some()
        {
            return Err(Error::AlreadyExists {
                collection: self.name.clone(),
                id,
            });
        }
        self.collection
            .insert_one(resource, None)
            .await
            .map_err(transient)?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self), fields(collection = %self.name))]
    async fn get_by_id(&self, id: &T::Id) -> Result<T, Error> {
        let id = id.to_string();
        self.collection
            .find_one(doc! {"_id": &id}, None)
            .await
            .map_err(transient)?
            .ok_or_else(|| Error::NotFound {
                collection: self.name.clone(),
                id,
            })
    }

    #[tracing::instrument(level = "debug", skip(self, filter), fields(collection = %self.name))]
    async fn find_one(&self, filter: Document) -> Result<T, Error> {
        self.collection
            .find_one(filter, None)
            .await
            .map_err(transient)?
            .ok_or_else(|| Error::NotFound {
                collection: self.name.clone(),
                id: "<filter>".to_string(),
            })
    }

    #[tracing::instrument(level = "debug", skip(self, filter), fields(collection = %self.name))]
    async fn find_all(&self, filter: Document) -> Result<Vec<T>, Error> {
        use futures::stream::TryStreamExt;
        let mut cursor = self.collection.find(filter, None).await.map_err(transient)?;
        let mut out = Vec::new();
        while let Some(item) = cursor.try_next().await.map_err(transient)? {
            out.push(item);
        }
        Ok(out)
    }

    #[tracing::instrument(level = "debug", skip(self, resource), fields(collection = %self.name))]
    async fn update(&self, resource: &T) -> Result<(), Error> {
        let id = resource.id().to_string();
        let doc = bson::to_document(resource).map_err(|e| Error::Transient(e.to_string()))?;
        let result = self
            .collection
            .find_one_and_update(
                doc! {"_id": &id},
                doc! {"$set": doc},
                FindOneAndUpdateOptions::builder()
                    .return_document(ReturnDocument::After)
                    .build(),
            )
            .await
            .map_err(transient)?;
        if result.is_none() {
            return Err(Error::NotFound {
                collection: self.name.clone(),
                id,
            });
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, resource), fields(collection = %self.name))]
    async fn upsert(&self, resource: &T) -> Result<(), Error> {
        let id = resource.id().to_string();
        let doc = bson::to_document(resource).map_err(|e| Error::Transient(e.to_string()))?;
        self.collection
            .find_one_and_update(
                doc! {"_id": &id},
                doc! {"$set": doc},
                FindOneAndUpdateOptions::builder()
                    .upsert(true)
                    .return_document(ReturnDocument::After)
                    .build(),
            )
            .await
            .map_err(transient)?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self), fields(collection = %self.name))]
    async fn delete(&self, id: &T::Id) -> Result<(), Error> {
        let id = id.to_string();
        let result = self
            .collection
            .delete_one(doc! {"_id": &id}, None)
            .await
            .map_err(transient)?;
        if result.deleted_count == 0 {
            return Err(Error::NotFound {
                collection: self.name.clone(),
                id,
            });
        }
        Ok(())
    }
}

fn transient<E: std::fmt::Display>(err: E) -> Error {
    Error::Transient(err.to_string())
}
