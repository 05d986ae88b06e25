//! MongoDB adapter for relational-style query building
//!
//! Remora compiles relational predicates, grouping intents, and update
//! intents into native MongoDB command structures and executes them over the
//! official async driver.
//!
//! # Features
//! - Operator conversion table with SQL LIKE → regex translation
//! - Predicate compiler with deep-union AND merging and `$or` grouping
//! - Aggregation pipeline synthesis for GROUP BY + aggregate queries
//! - Update-operator compilation with one-operator-per-field enforcement
//! - Embedded one-to-one / one-to-many relations with positional updates
//! - Distributed lock and atomic counter primitives
//! - Declarative index blueprints

pub mod aggregation;
pub mod connection;
pub mod document;
pub mod embedded;
pub mod lock;
pub mod query;
pub mod raw;
pub mod schema;
pub mod update;
pub mod validation;

pub use aggregation::{AggregateFunction, AggregateSpec, GroupKeyMap, PipelineSpec};
pub use connection::{Connection, PoolConfig};
pub use document::Model;
pub use embedded::{EmbedsMany, EmbedsOne, RelationState};
pub use lock::{LockOptions, MongoCounter, MongoLock};
pub use query::{Operator, QueryBuilder, SortDirection, WhereGroup};
pub use raw::RawCollection;
pub use remora_common::{RemoraError, Result};
pub use schema::{Blueprint, IndexOrder};
pub use update::{UpdateSpec, WriteOptions};
pub use validation::{screen_raw, ValidatedCollectionName, ValidatedFieldName};
