//! MongoDB client and collection wrapper
//!
//! Typed collections with automatic index creation, metadata timestamps,
//! and soft-delete filtering. State transitions that must not race use
//! `find_one_and_update` with the precondition folded into the filter, so
//! the check and the write are one atomic document operation.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::{
    options::{IndexOptions, ReturnDocument, UpdateModifications},
    results::{DeleteResult, UpdateResult},
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use tracing::{error, info};

use crate::db::schemas::Metadata;
use crate::types::PlatformError;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, PlatformError> {
        info!("Connecting to MongoDB at {}", uri);

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| PlatformError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        // Verify connection with timeout
        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| PlatformError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, PlatformError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    /// Get the raw MongoDB client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the database name
    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
{
    /// Create a new collection and apply indexes
    pub async fn new(
        client: &Client,
        db_name: &str,
        collection_name: &str,
    ) -> Result<Self, PlatformError> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        // Apply indexes
        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    /// Apply schema-defined indexes
    async fn apply_indexes(&self) -> Result<(), PlatformError> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| PlatformError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Insert a document, setting metadata timestamps
    pub async fn insert_one(&self, mut item: T) -> Result<ObjectId, PlatformError> {
        let metadata = item.mut_metadata();
        metadata.is_deleted = false;
        metadata.created_at = Some(DateTime::now());
        metadata.updated_at = Some(DateTime::now());

        let result = self.inner.insert_one(item).await.map_err(PlatformError::from)?;

        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| PlatformError::Database("Failed to get inserted ID".into()))
    }

    /// Find one document by filter
    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, PlatformError> {
        // Add is_deleted check
        let mut full_filter = filter;
        full_filter.insert("metadata.is_deleted", doc! { "$ne": true });

        self.inner
            .find_one(full_filter)
            .await
            .map_err(|e| PlatformError::Database(format!("Find failed: {}", e)))
    }

    /// Find one document by its ObjectId
    pub async fn find_by_id(&self, id: ObjectId) -> Result<Option<T>, PlatformError> {
        self.find_one(doc! { "_id": id }).await
    }

    /// Find many documents by filter, with optional sort and limit
    pub async fn find_many(
        &self,
        filter: Document,
        sort: Option<Document>,
        limit: Option<i64>,
    ) -> Result<Vec<T>, PlatformError> {
        use futures_util::StreamExt;

        // Add is_deleted check
        let mut full_filter = filter;
        full_filter.insert("metadata.is_deleted", doc! { "$ne": true });

        let mut find = self.inner.find(full_filter);
        if let Some(sort) = sort {
            find = find.sort(sort);
        }
        if let Some(limit) = limit {
            find = find.limit(limit);
        }

        let cursor = find
            .await
            .map_err(|e| PlatformError::Database(format!("Find failed: {}", e)))?;

        let results: Vec<T> = cursor
            .filter_map(|doc| async {
                match doc {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(results)
    }

    /// Count documents matching a filter
    pub async fn count(&self, filter: Document) -> Result<u64, PlatformError> {
        let mut full_filter = filter;
        full_filter.insert("metadata.is_deleted", doc! { "$ne": true });

        self.inner
            .count_documents(full_filter)
            .await
            .map_err(|e| PlatformError::Database(format!("Count failed: {}", e)))
    }

    /// Update one document, stamping `metadata.updated_at`
    pub async fn update_one(
        &self,
        filter: Document,
        mut update: Document,
    ) -> Result<UpdateResult, PlatformError> {
        stamp_updated_at(&mut update);

        self.inner
            .update_one(filter, UpdateModifications::Document(update))
            .await
            .map_err(PlatformError::from)
    }

    /// Atomically update one document and return the post-update state.
    ///
    /// The state precondition belongs in the filter: when no document
    /// matches, `Ok(None)` comes back and the caller reports the conflict.
    pub async fn find_one_and_update(
        &self,
        filter: Document,
        mut update: Document,
    ) -> Result<Option<T>, PlatformError> {
        let mut full_filter = filter;
        full_filter.insert("metadata.is_deleted", doc! { "$ne": true });

        stamp_updated_at(&mut update);

        self.inner
            .find_one_and_update(full_filter, update)
            .return_document(ReturnDocument::After)
            .await
            .map_err(PlatformError::from)
    }

    /// Soft delete a document
    pub async fn soft_delete(&self, filter: Document) -> Result<UpdateResult, PlatformError> {
        let update = doc! {
            "$set": {
                "metadata.is_deleted": true,
                "metadata.deleted_at": DateTime::now(),
            }
        };

        self.update_one(filter, update).await
    }

    /// Hard delete documents matching a filter. Used only by time-based
    /// audit purge; everything else soft-deletes.
    pub async fn delete_many(&self, filter: Document) -> Result<DeleteResult, PlatformError> {
        self.inner
            .delete_many(filter)
            .await
            .map_err(|e| PlatformError::Database(format!("Delete failed: {}", e)))
    }

    /// Get the underlying collection for advanced operations
    pub fn inner(&self) -> &Collection<T> {
        &self.inner
    }
}

/// Merge `metadata.updated_at` into the `$set` clause of an update document
fn stamp_updated_at(update: &mut Document) {
    if let Ok(set_doc) = update.get_document_mut("$set") {
        set_doc.insert("metadata.updated_at", DateTime::now());
    } else {
        update.insert("$set", doc! { "metadata.updated_at": DateTime::now() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_updated_at_merges_into_existing_set() {
        let mut update = doc! { "$set": { "status": "completed" }, "$inc": { "n": 1 } };
        stamp_updated_at(&mut update);

        let set = update.get_document("$set").unwrap();
        assert!(set.contains_key("status"));
        assert!(set.contains_key("metadata.updated_at"));
        assert!(update.contains_key("$inc"));
    }

    #[test]
    fn test_stamp_updated_at_creates_set() {
        let mut update = doc! { "$push": { "updates": { "note": "x" } } };
        stamp_updated_at(&mut update);

        assert!(update.get_document("$set").unwrap().contains_key("metadata.updated_at"));
    }
}
