//! Closed raw-access capability
//!
//! Escape hatch for operations the fluent builder does not model. The set of
//! forwarded operations is fixed; there is no open-ended command dispatch.
//! Caller-supplied pipelines and filters are screened for JavaScript-executing
//! operators before they reach the driver.

use bson::{Bson, Document as BsonDocument};
use futures::TryStreamExt;
use mongodb::{Collection, IndexModel};
use remora_common::Result;

use crate::validation::screen_raw;

/// Raw handle over one collection, forwarding a fixed operation set.
#[derive(Debug, Clone)]
pub struct RawCollection {
    collection: Collection<BsonDocument>,
}

impl RawCollection {
    pub fn new(collection: Collection<BsonDocument>) -> Self {
        RawCollection { collection }
    }

    pub fn name(&self) -> &str {
        self.collection.name()
    }

    /// Runs a caller-built aggregation pipeline.
    ///
    /// # Errors
    /// Pipelines containing `$where` / `$function` / `$accumulator` are
    /// rejected before execution.
    pub async fn aggregate(&self, pipeline: Vec<BsonDocument>) -> Result<Vec<BsonDocument>> {
        for stage in &pipeline {
            screen_raw(&Bson::Document(stage.clone()))?;
        }
        let cursor = self.collection.aggregate(pipeline).await?;
        Ok(cursor.try_collect().await?)
    }

    /// Distinct values of `field` among documents matching `filter`.
    pub async fn distinct(&self, field: &str, filter: BsonDocument) -> Result<Vec<Bson>> {
        screen_raw(&Bson::Document(filter.clone()))?;
        let values = self.collection.distinct(field, filter).await?;
        Ok(values)
    }

    pub async fn count(&self, filter: BsonDocument) -> Result<u64> {
        screen_raw(&Bson::Document(filter.clone()))?;
        let count = self.collection.count_documents(filter).await?;
        Ok(count)
    }

    /// Creates one index, returning its server-assigned name.
    pub async fn create_index(&self, index: IndexModel) -> Result<String> {
        let result = self.collection.create_index(index).await?;
        Ok(result.index_name)
    }

    pub async fn list_index_names(&self) -> Result<Vec<String>> {
        let names = self.collection.list_index_names().await?;
        Ok(names)
    }

    pub async fn drop_index(&self, name: &str) -> Result<()> {
        self.collection.drop_index(name).await?;
        Ok(())
    }

    /// Drops the whole collection.
    pub async fn drop(&self) -> Result<()> {
        self.collection.drop().await?;
        Ok(())
    }
}
