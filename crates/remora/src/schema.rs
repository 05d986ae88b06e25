//! Index blueprint builder
//!
//! Accumulates index definitions fluently, then applies them to a collection
//! in one pass. Geospatial and TTL indexes reuse the same accumulation path
//! as plain ones; only the key document or options differ.

use std::time::Duration;

use bson::{doc, Document as BsonDocument};
use mongodb::options::IndexOptions;
use mongodb::{Collection, IndexModel};
use remora_common::Result;
use tracing::{debug, info};

/// Sort direction for a single-column index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrder {
    Ascending,
    Descending,
}

impl IndexOrder {
    fn key_value(&self) -> i32 {
        match self {
            IndexOrder::Ascending => 1,
            IndexOrder::Descending => -1,
        }
    }
}

/// Accumulated index definitions for one collection.
#[derive(Debug, Clone, Default)]
pub struct Blueprint {
    indexes: Vec<IndexModel>,
    drops: Vec<String>,
}

impl Blueprint {
    pub fn new() -> Self {
        Blueprint::default()
    }

    /// Plain ascending index on one column
    pub fn index(self, column: &str) -> Self {
        self.index_ordered(column, IndexOrder::Ascending)
    }

    pub fn index_ordered(mut self, column: &str, order: IndexOrder) -> Self {
        self.indexes.push(
            IndexModel::builder()
                .keys(doc! { column: order.key_value() })
                .build(),
        );
        self
    }

    /// Compound index over several columns, all ascending
    pub fn compound_index(mut self, columns: &[&str]) -> Self {
        let mut keys = BsonDocument::new();
        for column in columns {
            keys.insert(column.to_string(), 1);
        }
        self.indexes.push(IndexModel::builder().keys(keys).build());
        self
    }

    pub fn unique(mut self, column: &str) -> Self {
        self.indexes.push(
            IndexModel::builder()
                .keys(doc! { column: 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
        );
        self
    }

    /// Unique index that skips documents missing the column
    pub fn sparse_unique(mut self, column: &str) -> Self {
        self.indexes.push(
            IndexModel::builder()
                .keys(doc! { column: 1 })
                .options(
                    IndexOptions::builder()
                        .unique(true)
                        .sparse(true)
                        .build(),
                )
                .build(),
        );
        self
    }

    pub fn sparse(mut self, column: &str) -> Self {
        self.indexes.push(
            IndexModel::builder()
                .keys(doc! { column: 1 })
                .options(IndexOptions::builder().sparse(true).build())
                .build(),
        );
        self
    }

    /// Planar 2d geospatial index
    pub fn geo_2d(mut self, column: &str) -> Self {
        self.indexes.push(
            IndexModel::builder()
                .keys(doc! { column: "2d" })
                .build(),
        );
        self
    }

    /// Spherical geospatial index for GeoJSON data
    pub fn geo_2dsphere(mut self, column: &str) -> Self {
        self.indexes.push(
            IndexModel::builder()
                .keys(doc! { column: "2dsphere" })
                .build(),
        );
        self
    }

    /// TTL index: documents expire `after` the indexed timestamp
    pub fn expire(mut self, column: &str, after: Duration) -> Self {
        self.indexes.push(
            IndexModel::builder()
                .keys(doc! { column: 1 })
                .options(IndexOptions::builder().expire_after(after).build())
                .build(),
        );
        self
    }

    /// Queues an index drop by name, skipped silently when absent
    pub fn drop_index(mut self, name: &str) -> Self {
        self.drops.push(name.to_string());
        self
    }

    /// The accumulated index models, in declaration order
    pub fn models(&self) -> &[IndexModel] {
        &self.indexes
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty() && self.drops.is_empty()
    }

    /// Applies drops first, then creates the accumulated indexes.
    ///
    /// Drops of names the collection does not have are skipped rather than
    /// failed, so blueprints stay re-runnable.
    pub async fn apply(self, collection: &Collection<BsonDocument>) -> Result<()> {
        if !self.drops.is_empty() {
            let existing = collection.list_index_names().await?;
            for name in &self.drops {
                if existing.iter().any(|n| n == name) {
                    debug!(index = %name, "dropping index");
                    collection.drop_index(name).await?;
                }
            }
        }
        if !self.indexes.is_empty() {
            let count = self.indexes.len();
            collection.create_indexes(self.indexes).await?;
            info!(collection = collection.name(), indexes = count, "indexes created");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_index_keys() {
        let blueprint = Blueprint::new().index("email");
        assert_eq!(blueprint.models()[0].keys, doc! { "email": 1 });
        assert!(blueprint.models()[0].options.is_none());
    }

    #[test]
    fn test_descending_index() {
        let blueprint = Blueprint::new().index_ordered("created_at", IndexOrder::Descending);
        assert_eq!(blueprint.models()[0].keys, doc! { "created_at": -1 });
    }

    #[test]
    fn test_compound_index_preserves_column_order() {
        let blueprint = Blueprint::new().compound_index(&["last_name", "first_name"]);
        let keys: Vec<&String> = blueprint.models()[0].keys.keys().collect();
        assert_eq!(keys, vec!["last_name", "first_name"]);
    }

    #[test]
    fn test_unique_index_options() {
        let blueprint = Blueprint::new().unique("email");
        let options = blueprint.models()[0].options.as_ref().unwrap();
        assert_eq!(options.unique, Some(true));
        assert_eq!(options.sparse, None);
    }

    #[test]
    fn test_sparse_unique_combines_flags() {
        let blueprint = Blueprint::new().sparse_unique("phone");
        let options = blueprint.models()[0].options.as_ref().unwrap();
        assert_eq!(options.unique, Some(true));
        assert_eq!(options.sparse, Some(true));
    }

    #[test]
    fn test_geospatial_keys() {
        let blueprint = Blueprint::new().geo_2d("location").geo_2dsphere("area");
        assert_eq!(blueprint.models()[0].keys, doc! { "location": "2d" });
        assert_eq!(blueprint.models()[1].keys, doc! { "area": "2dsphere" });
    }

    #[test]
    fn test_expire_sets_ttl_option() {
        let blueprint = Blueprint::new().expire("created_at", Duration::from_secs(3600));
        let options = blueprint.models()[0].options.as_ref().unwrap();
        assert_eq!(options.expire_after, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_indexes_accumulate_in_order() {
        let blueprint = Blueprint::new()
            .index("a")
            .unique("b")
            .expire("c", Duration::from_secs(60));
        assert_eq!(blueprint.models().len(), 3);
        assert_eq!(blueprint.models()[0].keys, doc! { "a": 1 });
        assert_eq!(blueprint.models()[1].keys, doc! { "b": 1 });
        assert_eq!(blueprint.models()[2].keys, doc! { "c": 1 });
    }

    #[test]
    fn test_empty_blueprint() {
        assert!(Blueprint::new().is_empty());
        assert!(!Blueprint::new().index("a").is_empty());
        assert!(!Blueprint::new().drop_index("a_1").is_empty());
    }
}
