//! Embedded-relation engine
//!
//! Treats an array (or sub-document) field on a parent document as a
//! relation: items are attached, replaced, and detached through queued writes
//! that flush as targeted parent updates. Replacements use the positional
//! operator, matching on the embedded item's `_id` so only that element is
//! rewritten.

use bson::{doc, oid::ObjectId, Bson, Document as BsonDocument};
use mongodb::Collection;
use remora_common::{RemoraError, Result};
use tracing::debug;

use crate::query::compiler::coerce_id;

/// Lifecycle of a relation handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationState {
    /// Constructed but not yet read from a parent document
    Unloaded,
    /// Items reflect the parent document as last read
    Loaded,
    /// Local items diverge from storage; writes are queued
    Dirty,
    /// Queued writes have been flushed
    Persisted,
}

/// A queued mutation against the parent's embedded array.
#[derive(Debug, Clone)]
enum EmbeddedWrite {
    Push(BsonDocument),
    Replace(ObjectId, BsonDocument),
    Pull(ObjectId),
}

/// Handle over a to-many embedded relation.
///
/// The relation field name is always explicit; nothing is inferred from the
/// parent's type.
#[derive(Debug, Clone)]
pub struct EmbedsMany {
    parent_id: Bson,
    relation: String,
    items: Vec<BsonDocument>,
    pending: Vec<EmbeddedWrite>,
    state: RelationState,
}

impl EmbedsMany {
    /// Creates an unloaded handle for `relation` on the parent identified by
    /// `parent_id`. Hex object-id strings are coerced the same way filter
    /// values are.
    pub fn new(parent_id: Bson, relation: impl Into<String>) -> Self {
        EmbedsMany {
            parent_id: coerce_id(&parent_id),
            relation: relation.into(),
            items: Vec::new(),
            pending: Vec::new(),
            state: RelationState::Unloaded,
        }
    }

    /// Loads items from a parent document already in hand. A missing or
    /// non-array field reads as an empty relation.
    pub fn load(mut self, parent: &BsonDocument) -> Self {
        self.items = match parent.get(&self.relation) {
            Some(Bson::Array(values)) => values
                .iter()
                .filter_map(|v| match v {
                    Bson::Document(d) => Some(d.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        self.state = RelationState::Loaded;
        self
    }

    pub fn state(&self) -> RelationState {
        self.state
    }

    pub fn items(&self) -> &[BsonDocument] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the loaded item with the given id, if any.
    pub fn find(&self, id: &ObjectId) -> Option<&BsonDocument> {
        self.items
            .iter()
            .find(|item| item.get_object_id("_id").ok().as_ref() == Some(id))
    }

    /// Queues a new item for insertion into the embedded array.
    ///
    /// An item without an `_id` gets a fresh ObjectId. Attaching an id that
    /// is already present in the relation is a usage error.
    ///
    /// # Errors
    /// Returns [`RemoraError::Relation`] on a duplicate embedded id.
    pub fn attach(&mut self, mut item: BsonDocument) -> Result<ObjectId> {
        let id = match item.get_object_id("_id") {
            Ok(id) => id,
            Err(_) => {
                let id = ObjectId::new();
                item.insert("_id", id);
                id
            }
        };
        if self.find(&id).is_some() {
            return Err(RemoraError::Relation(format!(
                "embedded document {} already attached to {}",
                id, self.relation
            )));
        }
        self.items.push(item.clone());
        self.pending.push(EmbeddedWrite::Push(item));
        self.state = RelationState::Dirty;
        Ok(id)
    }

    /// Queues an in-place replacement of the item with `item["_id"]`.
    ///
    /// # Errors
    /// The item must carry an `_id` and that id must already be attached.
    pub fn replace(&mut self, item: BsonDocument) -> Result<()> {
        let id = item.get_object_id("_id").map_err(|_| {
            RemoraError::Relation(format!(
                "embedded document for {} has no _id to replace by",
                self.relation
            ))
        })?;
        let slot = self
            .items
            .iter_mut()
            .find(|existing| existing.get_object_id("_id").ok() == Some(id))
            .ok_or_else(|| {
                RemoraError::Relation(format!(
                    "embedded document {} not attached to {}",
                    id, self.relation
                ))
            })?;
        *slot = item.clone();
        self.pending.push(EmbeddedWrite::Replace(id, item));
        self.state = RelationState::Dirty;
        Ok(())
    }

    /// Queues removal of the item with the given id.
    ///
    /// # Errors
    /// Detaching an id that is not attached is a usage error.
    pub fn detach(&mut self, id: ObjectId) -> Result<()> {
        let position = self
            .items
            .iter()
            .position(|item| item.get_object_id("_id").ok() == Some(id))
            .ok_or_else(|| {
                RemoraError::Relation(format!(
                    "embedded document {} not attached to {}",
                    id, self.relation
                ))
            })?;
        self.items.remove(position);
        self.pending.push(EmbeddedWrite::Pull(id));
        self.state = RelationState::Dirty;
        Ok(())
    }

    /// Compiles the queued writes into (filter, update) pairs, in queue order.
    ///
    /// Each pair is one `update_one` against the parent collection.
    /// Replacements filter on both the parent id and the embedded id, then
    /// rewrite the matched element through the positional operator.
    pub fn compile(&self) -> Vec<(BsonDocument, BsonDocument)> {
        let positional = format!("{}.$", self.relation);
        let embedded_id = format!("{}._id", self.relation);
        self.pending
            .iter()
            .map(|write| match write {
                EmbeddedWrite::Push(item) => (
                    doc! { "_id": self.parent_id.clone() },
                    doc! { "$push": { self.relation.as_str(): item.clone() } },
                ),
                EmbeddedWrite::Replace(id, item) => (
                    doc! { "_id": self.parent_id.clone(), embedded_id.as_str(): id },
                    doc! { "$set": { positional.as_str(): item.clone() } },
                ),
                EmbeddedWrite::Pull(id) => (
                    doc! { "_id": self.parent_id.clone() },
                    doc! { "$pull": { self.relation.as_str(): { "_id": id } } },
                ),
            })
            .collect()
    }

    /// Flushes the queued writes against the parent collection, one update
    /// per queued mutation, in order.
    ///
    /// # Errors
    /// Stops at the first failed update; already-flushed writes are not
    /// rolled back.
    pub async fn save(&mut self, collection: &Collection<BsonDocument>) -> Result<()> {
        let writes = self.compile();
        debug!(
            relation = %self.relation,
            writes = writes.len(),
            "flushing embedded relation"
        );
        for (filter, update) in writes {
            collection.update_one(filter, update).await?;
        }
        self.pending.clear();
        self.state = RelationState::Persisted;
        Ok(())
    }
}

/// Handle over a to-one embedded relation: a single sub-document field.
#[derive(Debug, Clone)]
pub struct EmbedsOne {
    parent_id: Bson,
    relation: String,
    item: Option<BsonDocument>,
    dirty: bool,
    state: RelationState,
}

impl EmbedsOne {
    pub fn new(parent_id: Bson, relation: impl Into<String>) -> Self {
        EmbedsOne {
            parent_id: coerce_id(&parent_id),
            relation: relation.into(),
            item: None,
            dirty: false,
            state: RelationState::Unloaded,
        }
    }

    /// Loads the sub-document from a parent document already in hand.
    pub fn load(mut self, parent: &BsonDocument) -> Self {
        self.item = parent.get_document(&self.relation).ok().cloned();
        self.state = RelationState::Loaded;
        self
    }

    pub fn state(&self) -> RelationState {
        self.state
    }

    pub fn get(&self) -> Option<&BsonDocument> {
        self.item.as_ref()
    }

    /// Queues a full replacement of the sub-document. Items without an `_id`
    /// get a fresh ObjectId.
    pub fn set(&mut self, mut item: BsonDocument) -> ObjectId {
        let id = match item.get_object_id("_id") {
            Ok(id) => id,
            Err(_) => {
                let id = ObjectId::new();
                item.insert("_id", id);
                id
            }
        };
        self.item = Some(item);
        self.dirty = true;
        self.state = RelationState::Dirty;
        id
    }

    /// Queues removal of the sub-document field.
    pub fn clear(&mut self) {
        self.item = None;
        self.dirty = true;
        self.state = RelationState::Dirty;
    }

    /// Compiles the queued write, if any, as a (filter, update) pair.
    pub fn compile(&self) -> Option<(BsonDocument, BsonDocument)> {
        if !self.dirty {
            return None;
        }
        let filter = doc! { "_id": self.parent_id.clone() };
        let update = match &self.item {
            Some(item) => doc! { "$set": { self.relation.as_str(): item.clone() } },
            None => doc! { "$unset": { self.relation.as_str(): 1 } },
        };
        Some((filter, update))
    }

    /// Flushes the queued write against the parent collection.
    pub async fn save(&mut self, collection: &Collection<BsonDocument>) -> Result<()> {
        if let Some((filter, update)) = self.compile() {
            debug!(relation = %self.relation, "flushing embedded sub-document");
            collection.update_one(filter, update).await?;
        }
        self.dirty = false;
        self.state = RelationState::Persisted;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent_id() -> ObjectId {
        ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap()
    }

    fn loaded_relation() -> EmbedsMany {
        let child = doc! { "_id": ObjectId::new(), "city": "Lisbon" };
        let parent = doc! { "_id": parent_id(), "addresses": [child] };
        EmbedsMany::new(Bson::ObjectId(parent_id()), "addresses").load(&parent)
    }

    // ===== lifecycle =====

    #[test]
    fn test_new_handle_is_unloaded() {
        let relation = EmbedsMany::new(Bson::ObjectId(parent_id()), "addresses");
        assert_eq!(relation.state(), RelationState::Unloaded);
    }

    #[test]
    fn test_load_reads_array_field() {
        let relation = loaded_relation();
        assert_eq!(relation.state(), RelationState::Loaded);
        assert_eq!(relation.len(), 1);
        assert_eq!(relation.items()[0].get_str("city").unwrap(), "Lisbon");
    }

    #[test]
    fn test_missing_field_loads_empty() {
        let parent = doc! { "_id": parent_id() };
        let relation = EmbedsMany::new(Bson::ObjectId(parent_id()), "addresses").load(&parent);
        assert!(relation.is_empty());
        assert_eq!(relation.state(), RelationState::Loaded);
    }

    #[test]
    fn test_hex_parent_id_is_coerced() {
        let relation = EmbedsMany::new(Bson::from("507f1f77bcf86cd799439011"), "addresses");
        let mut relation = relation;
        relation.attach(doc! { "city": "Porto" }).unwrap();
        let (filter, _) = relation.compile().into_iter().next().unwrap();
        assert_eq!(filter.get("_id"), Some(&Bson::ObjectId(parent_id())));
    }

    // ===== attach =====

    #[test]
    fn test_attach_generates_id_and_queues_push() {
        let mut relation = loaded_relation();
        let id = relation.attach(doc! { "city": "Porto" }).unwrap();
        assert_eq!(relation.state(), RelationState::Dirty);
        assert_eq!(relation.len(), 2);

        let writes = relation.compile();
        assert_eq!(writes.len(), 1);
        let (filter, update) = &writes[0];
        assert_eq!(filter, &doc! { "_id": parent_id() });
        let pushed = update
            .get_document("$push")
            .unwrap()
            .get_document("addresses")
            .unwrap();
        assert_eq!(pushed.get_object_id("_id").unwrap(), id);
        assert_eq!(pushed.get_str("city").unwrap(), "Porto");
    }

    #[test]
    fn test_attach_duplicate_id_is_rejected() {
        let mut relation = loaded_relation();
        let existing = relation.items()[0].get_object_id("_id").unwrap();
        let err = relation
            .attach(doc! { "_id": existing, "city": "Porto" })
            .unwrap_err();
        assert!(matches!(err, RemoraError::Relation(_)));
        assert_eq!(relation.len(), 1);
    }

    // ===== replace =====

    #[test]
    fn test_replace_compiles_positional_update() {
        let mut relation = loaded_relation();
        let id = relation.items()[0].get_object_id("_id").unwrap();
        relation
            .replace(doc! { "_id": id, "city": "Faro" })
            .unwrap();

        let writes = relation.compile();
        let (filter, update) = &writes[0];
        assert_eq!(
            filter,
            &doc! { "_id": parent_id(), "addresses._id": id }
        );
        assert_eq!(
            update,
            &doc! { "$set": { "addresses.$": { "_id": id, "city": "Faro" } } }
        );
        assert_eq!(relation.find(&id).unwrap().get_str("city").unwrap(), "Faro");
    }

    #[test]
    fn test_replace_unknown_id_is_rejected() {
        let mut relation = loaded_relation();
        let err = relation
            .replace(doc! { "_id": ObjectId::new(), "city": "Faro" })
            .unwrap_err();
        assert!(matches!(err, RemoraError::Relation(_)));
    }

    #[test]
    fn test_replace_without_id_is_rejected() {
        let mut relation = loaded_relation();
        let err = relation.replace(doc! { "city": "Faro" }).unwrap_err();
        assert!(matches!(err, RemoraError::Relation(_)));
    }

    // ===== detach =====

    #[test]
    fn test_detach_compiles_pull_by_embedded_id() {
        let mut relation = loaded_relation();
        let id = relation.items()[0].get_object_id("_id").unwrap();
        relation.detach(id).unwrap();
        assert!(relation.is_empty());

        let writes = relation.compile();
        let (filter, update) = &writes[0];
        assert_eq!(filter, &doc! { "_id": parent_id() });
        assert_eq!(update, &doc! { "$pull": { "addresses": { "_id": id } } });
    }

    #[test]
    fn test_detach_unknown_id_is_rejected() {
        let mut relation = loaded_relation();
        assert!(relation.detach(ObjectId::new()).is_err());
    }

    #[test]
    fn test_writes_compile_in_queue_order() {
        let mut relation = loaded_relation();
        let first = relation.items()[0].get_object_id("_id").unwrap();
        relation.attach(doc! { "city": "Porto" }).unwrap();
        relation.detach(first).unwrap();

        let writes = relation.compile();
        assert_eq!(writes.len(), 2);
        assert!(writes[0].1.contains_key("$push"));
        assert!(writes[1].1.contains_key("$pull"));
    }

    // ===== embeds-one =====

    #[test]
    fn test_embeds_one_set_compiles_set() {
        let mut relation = EmbedsOne::new(Bson::ObjectId(parent_id()), "profile");
        let id = relation.set(doc! { "bio": "hello" });
        assert_eq!(relation.state(), RelationState::Dirty);

        let (filter, update) = relation.compile().unwrap();
        assert_eq!(filter, doc! { "_id": parent_id() });
        assert_eq!(
            update,
            doc! { "$set": { "profile": { "_id": id, "bio": "hello" } } }
        );
    }

    #[test]
    fn test_embeds_one_clear_compiles_unset() {
        let parent = doc! { "_id": parent_id(), "profile": { "bio": "hello" } };
        let mut relation = EmbedsOne::new(Bson::ObjectId(parent_id()), "profile").load(&parent);
        assert!(relation.get().is_some());

        relation.clear();
        let (_, update) = relation.compile().unwrap();
        assert_eq!(update, doc! { "$unset": { "profile": 1 } });
    }

    #[test]
    fn test_embeds_one_clean_handle_compiles_nothing() {
        let parent = doc! { "_id": parent_id(), "profile": { "bio": "hello" } };
        let relation = EmbedsOne::new(Bson::ObjectId(parent_id()), "profile").load(&parent);
        assert!(relation.compile().is_none());
    }
}
