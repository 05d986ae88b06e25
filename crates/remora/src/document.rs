//! Model trait: typed documents over collections
//!
//! Implementing types declare their collection name and get CRUD round trips
//! with automatic BSON conversion, a query-builder entry point, and embedded
//! relation accessors. Relation names are always passed explicitly.

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson, Document as BsonDocument};
use futures::TryStreamExt;
use mongodb::{Collection, Database};
use remora_common::{RemoraError, Result};
use serde::{de::DeserializeOwned, Serialize};

use crate::embedded::{EmbedsMany, EmbedsOne};
use crate::query::builder::QueryBuilder;

/// A document type bound to one collection.
///
/// # Example
///
/// ```ignore
/// use serde::{Deserialize, Serialize};
/// use remora::Model;
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct User {
///     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
///     id: Option<ObjectId>,
///     email: String,
/// }
///
/// impl Model for User {
///     fn collection_name() -> &'static str {
///         "users"
///     }
///     fn id(&self) -> Option<ObjectId> {
///         self.id
///     }
///     fn set_id(&mut self, id: ObjectId) {
///         self.id = Some(id);
///     }
/// }
/// ```
#[async_trait]
pub trait Model: Serialize + DeserializeOwned + Send + Sync + Sized {
    fn collection_name() -> &'static str;

    /// The document's id, when it has one
    fn id(&self) -> Option<ObjectId> {
        None
    }

    /// Stores the id assigned at insert. Override when the type carries an
    /// `_id` field.
    fn set_id(&mut self, _id: ObjectId) {}

    fn to_document(&self) -> Result<BsonDocument> {
        bson::to_document(self).map_err(|e| RemoraError::Serialization(e.to_string()))
    }

    fn from_document(document: BsonDocument) -> Result<Self> {
        bson::from_document(document).map_err(|e| RemoraError::Deserialization(e.to_string()))
    }

    fn collection(db: &Database) -> Collection<BsonDocument> {
        db.collection(Self::collection_name())
    }

    /// Starts a fluent query over this model's collection
    fn query(db: &Database) -> QueryBuilder {
        QueryBuilder::new(Self::collection(db))
    }

    /// Handle over a to-many relation embedded under `relation` on this
    /// document.
    ///
    /// # Errors
    /// The document must have an id; unsaved documents have no parent to
    /// scope relation writes to.
    fn embeds_many(&self, relation: &str) -> Result<EmbedsMany> {
        let id = self.id().ok_or_else(|| {
            RemoraError::Relation(format!(
                "cannot open relation {} on an unsaved document",
                relation
            ))
        })?;
        let parent = self.to_document()?;
        Ok(EmbedsMany::new(Bson::ObjectId(id), relation).load(&parent))
    }

    /// Handle over a to-one relation embedded under `relation`.
    fn embeds_one(&self, relation: &str) -> Result<EmbedsOne> {
        let id = self.id().ok_or_else(|| {
            RemoraError::Relation(format!(
                "cannot open relation {} on an unsaved document",
                relation
            ))
        })?;
        let parent = self.to_document()?;
        Ok(EmbedsOne::new(Bson::ObjectId(id), relation).load(&parent))
    }

    /// Inserts this document, assigning and returning its new id.
    async fn insert_one(&mut self, db: &Database) -> Result<ObjectId> {
        let collection = Self::collection(db);
        let document = self.to_document()?;
        let result = collection.insert_one(document).await?;
        let id = result.inserted_id.as_object_id().ok_or_else(|| {
            RemoraError::Internal("inserted id is not an ObjectId".to_string())
        })?;
        self.set_id(id);
        Ok(id)
    }

    async fn find_one(db: &Database, filter: BsonDocument) -> Result<Option<Self>> {
        let collection = Self::collection(db);
        match collection.find_one(filter).await? {
            Some(document) => Ok(Some(Self::from_document(document)?)),
            None => Ok(None),
        }
    }

    async fn find_by_id(db: &Database, id: ObjectId) -> Result<Option<Self>> {
        Self::find_one(db, doc! { "_id": id }).await
    }

    async fn find(db: &Database, filter: BsonDocument) -> Result<Vec<Self>> {
        let collection = Self::collection(db);
        let documents: Vec<BsonDocument> =
            collection.find(filter).await?.try_collect().await?;
        documents.into_iter().map(Self::from_document).collect()
    }

    async fn count(db: &Database, filter: BsonDocument) -> Result<u64> {
        let collection = Self::collection(db);
        let count = collection.count_documents(filter).await?;
        Ok(count)
    }

    /// Inserts the document when it has no id, otherwise replaces the stored
    /// document wholesale. Returns the id either way.
    async fn save(&mut self, db: &Database) -> Result<ObjectId> {
        match self.id() {
            None => self.insert_one(db).await,
            Some(id) => {
                let collection = Self::collection(db);
                let document = self.to_document()?;
                collection
                    .replace_one(doc! { "_id": id }, document)
                    .upsert(true)
                    .await?;
                Ok(id)
            }
        }
    }

    /// Deletes the stored document. Returns whether one was deleted; an
    /// unsaved document deletes nothing.
    async fn delete(&self, db: &Database) -> Result<bool> {
        let Some(id) = self.id() else {
            return Ok(false);
        };
        let collection = Self::collection(db);
        let result = collection.delete_one(doc! { "_id": id }).await?;
        Ok(result.deleted_count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize)]
    struct User {
        #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
        id: Option<ObjectId>,
        email: String,
        addresses: Vec<BsonDocument>,
    }

    impl Model for User {
        fn collection_name() -> &'static str {
            "users"
        }
        fn id(&self) -> Option<ObjectId> {
            self.id
        }
        fn set_id(&mut self, id: ObjectId) {
            self.id = Some(id);
        }
    }

    fn saved_user() -> User {
        User {
            id: Some(ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap()),
            email: "test@example.com".to_string(),
            addresses: vec![doc! { "_id": ObjectId::new(), "city": "Lisbon" }],
        }
    }

    #[test]
    fn test_document_round_trip() {
        let user = saved_user();
        let document = user.to_document().unwrap();
        assert_eq!(document.get_str("email").unwrap(), "test@example.com");

        let back = User::from_document(document).unwrap();
        assert_eq!(back.email, user.email);
        assert_eq!(back.id, user.id);
    }

    #[test]
    fn test_unsaved_document_skips_id() {
        let user = User {
            id: None,
            email: "new@example.com".to_string(),
            addresses: Vec::new(),
        };
        let document = user.to_document().unwrap();
        assert!(!document.contains_key("_id"));
    }

    #[test]
    fn test_embeds_many_loads_from_serialized_state() {
        let user = saved_user();
        let relation = user.embeds_many("addresses").unwrap();
        assert_eq!(relation.len(), 1);
        assert_eq!(relation.items()[0].get_str("city").unwrap(), "Lisbon");
    }

    #[test]
    fn test_embeds_many_requires_saved_parent() {
        let user = User {
            id: None,
            email: "new@example.com".to_string(),
            addresses: Vec::new(),
        };
        let err = user.embeds_many("addresses").unwrap_err();
        assert!(matches!(err, RemoraError::Relation(_)));
    }
}
