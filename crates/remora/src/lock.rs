//! Distributed lock and atomic counter on a MongoDB collection
//!
//! Acquisition is a single `findOneAndUpdate` with an aggregation-pipeline
//! update: the lock document is claimed only when it is expired or already
//! owned by the caller, and the post-update document decides the outcome.
//! No separate read ever races the write.

use std::time::Duration;

use bson::{doc, Bson, Document as BsonDocument};
use mongodb::options::ReturnDocument;
use mongodb::Collection;
use rand::Rng;
use remora_common::{RemoraError, Result};
use tracing::debug;

/// Chance that an acquisition also sweeps expired lock documents
const DEFAULT_CLEANUP_PROBABILITY: f64 = 0.02;

/// Tuning knobs for [`MongoLock`].
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// Probability, per acquisition attempt, of deleting all expired locks
    pub cleanup_probability: f64,
}

impl Default for LockOptions {
    fn default() -> Self {
        LockOptions {
            cleanup_probability: DEFAULT_CLEANUP_PROBABILITY,
        }
    }
}

/// Builds the conditional-claim pipeline for one acquisition attempt.
///
/// The `$cond` test passes when the stored expiration is at or before `now`
/// (missing fields compare low, so a fresh upsert also passes) or when the
/// stored owner is the caller. Both branches must test the same condition so
/// owner and expiration always change together.
fn acquire_pipeline(owner: &str, now: bson::DateTime, expires_at: bson::DateTime) -> Vec<BsonDocument> {
    let claimable = doc! { "$or": [
        { "$lte": [ "$expiration", now ] },
        { "$eq": [ "$owner", owner ] },
    ] };
    vec![doc! { "$set": {
        "owner": { "$cond": { "if": claimable.clone(), "then": owner, "else": "$owner" } },
        "expiration": { "$cond": { "if": claimable, "then": expires_at, "else": "$expiration" } },
    } }]
}

/// Non-blocking distributed lock.
///
/// Lock documents are keyed by name in `_id` and carry `owner` and
/// `expiration` fields. A held lock blocks other owners until its expiration
/// passes; the same owner can re-acquire to extend it.
#[derive(Debug, Clone)]
pub struct MongoLock {
    collection: Collection<BsonDocument>,
    options: LockOptions,
}

impl MongoLock {
    pub fn new(collection: Collection<BsonDocument>) -> Self {
        MongoLock::with_options(collection, LockOptions::default())
    }

    pub fn with_options(collection: Collection<BsonDocument>, options: LockOptions) -> Self {
        MongoLock {
            collection,
            options,
        }
    }

    /// Attempts to acquire `name` for `owner`, holding it for `ttl`.
    ///
    /// Returns immediately: `true` when the caller now holds the lock,
    /// `false` when another owner holds it unexpired. Re-acquiring a lock the
    /// caller already holds refreshes its expiration.
    ///
    /// # Errors
    /// Only transport or server failures; contention is not an error.
    pub async fn acquire(&self, name: &str, owner: &str, ttl: Duration) -> Result<bool> {
        self.lottery_cleanup().await?;

        let now = bson::DateTime::from_chrono(chrono::Utc::now());
        let expires_at = bson::DateTime::from_millis(now.timestamp_millis() + ttl.as_millis() as i64);
        let pipeline = acquire_pipeline(owner, now, expires_at);

        let stored = self
            .collection
            .find_one_and_update(
                doc! { "_id": name },
                mongodb::options::UpdateModifications::Pipeline(pipeline),
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| {
                RemoraError::Lock(format!("lock {} missing after upsert", name))
            })?;

        let acquired = stored.get_str("owner") == Ok(owner);
        debug!(lock = name, owner, acquired, "lock acquisition attempt");
        Ok(acquired)
    }

    /// Releases `name` if held by `owner`. Returns whether a lock was
    /// actually released; a lock held by someone else is left untouched.
    pub async fn release(&self, name: &str, owner: &str) -> Result<bool> {
        let result = self
            .collection
            .delete_one(doc! { "_id": name, "owner": owner })
            .await?;
        Ok(result.deleted_count > 0)
    }

    /// Releases `name` regardless of owner.
    pub async fn force_release(&self, name: &str) -> Result<()> {
        self.collection.delete_one(doc! { "_id": name }).await?;
        Ok(())
    }

    /// Returns the current owner of `name`, expired or not.
    pub async fn owner(&self, name: &str) -> Result<Option<String>> {
        let stored = self.collection.find_one(doc! { "_id": name }).await?;
        Ok(stored
            .and_then(|d| d.get_str("owner").ok().map(String::from)))
    }

    async fn lottery_cleanup(&self) -> Result<()> {
        if !rand::thread_rng().gen_bool(self.options.cleanup_probability.clamp(0.0, 1.0)) {
            return Ok(());
        }
        let result = self
            .collection
            .delete_many(doc! { "expiration": { "$lte": bson::DateTime::now() } })
            .await?;
        debug!(swept = result.deleted_count, "expired lock sweep");
        Ok(())
    }
}

/// Atomic named counter.
///
/// Each counter is one document keyed by name; increments are `$inc`
/// find-and-modify round trips that create the counter at the delta when it
/// does not exist yet.
#[derive(Debug, Clone)]
pub struct MongoCounter {
    collection: Collection<BsonDocument>,
}

impl MongoCounter {
    pub fn new(collection: Collection<BsonDocument>) -> Self {
        MongoCounter { collection }
    }

    /// Atomically adds `amount` and returns the post-increment value.
    pub async fn increment(&self, name: &str, amount: i64) -> Result<i64> {
        let stored = self
            .collection
            .find_one_and_update(
                doc! { "_id": name },
                doc! { "$inc": { "value": amount } },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| {
                RemoraError::Lock(format!("counter {} missing after upsert", name))
            })?;
        match stored.get("value") {
            Some(Bson::Int64(v)) => Ok(*v),
            Some(Bson::Int32(v)) => Ok(*v as i64),
            other => Err(RemoraError::Lock(format!(
                "counter {} holds non-integer value {:?}",
                name, other
            ))),
        }
    }

    pub async fn decrement(&self, name: &str, amount: i64) -> Result<i64> {
        self.increment(name, -amount).await
    }

    /// Reads the current value without modifying it. A missing counter reads
    /// as zero.
    pub async fn get(&self, name: &str) -> Result<i64> {
        let stored = self.collection.find_one(doc! { "_id": name }).await?;
        match stored.as_ref().and_then(|d| d.get("value")) {
            None => Ok(0),
            Some(Bson::Int64(v)) => Ok(*v),
            Some(Bson::Int32(v)) => Ok(*v as i64),
            other => Err(RemoraError::Lock(format!(
                "counter {} holds non-integer value {:?}",
                name, other
            ))),
        }
    }

    /// Deletes the counter document.
    pub async fn reset(&self, name: &str) -> Result<()> {
        self.collection.delete_one(doc! { "_id": name }).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_pipeline_shape() {
        let now = bson::DateTime::from_millis(1_000_000);
        let later = bson::DateTime::from_millis(1_060_000);
        let pipeline = acquire_pipeline("worker-1", now, later);
        assert_eq!(pipeline.len(), 1);

        let set = pipeline[0].get_document("$set").unwrap();
        let owner_cond = set
            .get_document("owner")
            .unwrap()
            .get_document("$cond")
            .unwrap();
        assert_eq!(owner_cond.get_str("then").unwrap(), "worker-1");
        assert_eq!(owner_cond.get_str("else").unwrap(), "$owner");

        let expiration_cond = set
            .get_document("expiration")
            .unwrap()
            .get_document("$cond")
            .unwrap();
        assert_eq!(expiration_cond.get("then"), Some(&Bson::DateTime(later)));
        assert_eq!(
            expiration_cond.get("else"),
            Some(&Bson::String("$expiration".to_string()))
        );
    }

    #[test]
    fn test_acquire_pipeline_claim_condition() {
        let now = bson::DateTime::from_millis(1_000_000);
        let later = bson::DateTime::from_millis(1_060_000);
        let pipeline = acquire_pipeline("worker-1", now, later);
        let condition = pipeline[0]
            .get_document("$set")
            .unwrap()
            .get_document("owner")
            .unwrap()
            .get_document("$cond")
            .unwrap()
            .get_document("if")
            .unwrap();
        assert_eq!(
            condition,
            &doc! { "$or": [
                { "$lte": [ "$expiration", now ] },
                { "$eq": [ "$owner", "worker-1" ] },
            ] }
        );
    }

    #[test]
    fn test_owner_and_expiration_test_same_condition() {
        let now = bson::DateTime::from_millis(1_000_000);
        let later = bson::DateTime::from_millis(1_060_000);
        let pipeline = acquire_pipeline("worker-1", now, later);
        let set = pipeline[0].get_document("$set").unwrap();
        let owner_if = set
            .get_document("owner")
            .unwrap()
            .get_document("$cond")
            .unwrap()
            .get_document("if")
            .unwrap();
        let expiration_if = set
            .get_document("expiration")
            .unwrap()
            .get_document("$cond")
            .unwrap()
            .get_document("if")
            .unwrap();
        assert_eq!(owner_if, expiration_if);
    }

    #[test]
    fn test_default_cleanup_probability() {
        let options = LockOptions::default();
        assert!((options.cleanup_probability - 0.02).abs() < f64::EPSILON);
    }
}
