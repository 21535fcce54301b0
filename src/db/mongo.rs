//! MongoDB client and collection wrapper

use bson::{doc, DateTime, Document};
use mongodb::{options::IndexOptions, Client, Collection, IndexModel};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, info};

use crate::db::schemas::Metadata;
use crate::types::GatekeeperError;

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
    /// Connect and ping. Fails fast when the server is unreachable.
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, GatekeeperError> {
        info!("Connecting to MongoDB database '{}'", db_name);

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| GatekeeperError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| GatekeeperError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection with its indexes applied
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, GatekeeperError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Typed MongoDB collection keyed by string `_id`
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
    pub async fn new(
        client: &Client,
        db_name: &str,
        collection_name: &str,
    ) -> Result<Self, GatekeeperError> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    async fn apply_indexes(&self) -> Result<(), GatekeeperError> {
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
            .map_err(|e| GatekeeperError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Insert or replace the document with `_id == id`
    pub async fn upsert(&self, id: &str, mut item: T) -> Result<(), GatekeeperError> {
        let metadata = item.mut_metadata();
        if metadata.created_at.is_none() {
            metadata.created_at = Some(DateTime::now());
        }
        if metadata.updated_at.is_none() {
            metadata.updated_at = Some(DateTime::now());
        }

        self.inner
            .replace_one(doc! { "_id": id }, item)
            .upsert(true)
            .await
            .map_err(|e| GatekeeperError::Database(format!("Upsert failed: {}", e)))?;
        Ok(())
    }

    /// Every document matching `filter`. Unreadable documents are logged and
    /// skipped.
    pub async fn find_many(&self, filter: Document) -> Result<Vec<T>, GatekeeperError> {
        use futures_util::StreamExt;

        let cursor = self
            .inner
            .find(filter)
            .await
            .map_err(|e| GatekeeperError::Database(format!("Find failed: {}", e)))?;

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

    pub async fn delete_one(&self, id: &str) -> Result<(), GatekeeperError> {
        self.inner
            .delete_one(doc! { "_id": id })
            .await
            .map_err(|e| GatekeeperError::Database(format!("Delete failed: {}", e)))?;
        Ok(())
    }

    pub async fn delete_many(&self, filter: Document) -> Result<u64, GatekeeperError> {
        let result = self
            .inner
            .delete_many(filter)
            .await
            .map_err(|e| GatekeeperError::Database(format!("Delete failed: {}", e)))?;
        Ok(result.deleted_count)
    }
}
