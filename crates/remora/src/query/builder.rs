//! Fluent query builder and execution façade
//!
//! Builder calls accumulate where-clause nodes and query options; compilation
//! to filter documents and pipelines is pure and store-free, and the terminal
//! async methods execute against the collection. Every terminal method takes
//! an optional client session that is passed through to the driver verbatim.

use std::time::Duration;

use bson::{Bson, Document as BsonDocument};
use futures::TryStreamExt;
use mongodb::options::{FindOneOptions, FindOptions};
use mongodb::{ClientSession, Collection};
use remora_common::Result;
use tracing::debug;

use crate::aggregation::{
    self, AggregateFunction, AggregateSpec, GroupKeyMap, PipelineSpec, AGGREGATE_KEY,
};
use crate::query::clause::{Join, WhereClause, WhereKind};
use crate::query::compiler::{compile_wheres, DEFAULT_ID_FIELD};
use crate::query::operator::Operator;
use crate::update::{UpdateSpec, WriteOptions};
use crate::validation::screen_raw;

/// Sort direction for `order_by`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn key_value(&self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// An ordered list of where-clause nodes under construction.
///
/// Shared between the top level of a [`QueryBuilder`] and nested groups built
/// inside `where_nested` closures; the same fluent vocabulary applies at both
/// levels.
#[derive(Debug, Clone, Default)]
pub struct WhereGroup {
    clauses: Vec<WhereClause>,
}

impl WhereGroup {
    pub fn new() -> Self {
        WhereGroup::default()
    }

    fn push(mut self, kind: WhereKind, join: Join) -> Self {
        self.clauses.push(WhereClause::new(kind, join));
        self
    }

    /// column <operator> value, and-joined. The operator string is parsed
    /// against the conversion table.
    ///
    /// # Errors
    /// Unknown operators fail here, before any store call.
    pub fn where_clause(
        self,
        column: &str,
        operator: &str,
        value: impl Into<Bson>,
    ) -> Result<Self> {
        let operator = Operator::parse(operator)?;
        Ok(self.push(
            WhereKind::Basic {
                column: column.to_string(),
                operator,
                value: value.into(),
            },
            Join::And,
        ))
    }

    /// column <operator> value, or-joined
    pub fn or_where(self, column: &str, operator: &str, value: impl Into<Bson>) -> Result<Self> {
        let operator = Operator::parse(operator)?;
        Ok(self.push(
            WhereKind::Basic {
                column: column.to_string(),
                operator,
                value: value.into(),
            },
            Join::Or,
        ))
    }

    /// Equality shorthand, and-joined
    pub fn where_eq(self, column: &str, value: impl Into<Bson>) -> Self {
        self.push(
            WhereKind::Basic {
                column: column.to_string(),
                operator: Operator::Eq,
                value: value.into(),
            },
            Join::And,
        )
    }

    pub fn or_where_eq(self, column: &str, value: impl Into<Bson>) -> Self {
        self.push(
            WhereKind::Basic {
                column: column.to_string(),
                operator: Operator::Eq,
                value: value.into(),
            },
            Join::Or,
        )
    }

    pub fn where_in(self, column: &str, values: Vec<Bson>) -> Self {
        self.push(
            WhereKind::In {
                column: column.to_string(),
                values,
            },
            Join::And,
        )
    }

    pub fn or_where_in(self, column: &str, values: Vec<Bson>) -> Self {
        self.push(
            WhereKind::In {
                column: column.to_string(),
                values,
            },
            Join::Or,
        )
    }

    pub fn where_not_in(self, column: &str, values: Vec<Bson>) -> Self {
        self.push(
            WhereKind::NotIn {
                column: column.to_string(),
                values,
            },
            Join::And,
        )
    }

    pub fn where_null(self, column: &str) -> Self {
        self.push(
            WhereKind::Null {
                column: column.to_string(),
            },
            Join::And,
        )
    }

    pub fn or_where_null(self, column: &str) -> Self {
        self.push(
            WhereKind::Null {
                column: column.to_string(),
            },
            Join::Or,
        )
    }

    pub fn where_not_null(self, column: &str) -> Self {
        self.push(
            WhereKind::NotNull {
                column: column.to_string(),
            },
            Join::And,
        )
    }

    pub fn where_between(self, column: &str, low: impl Into<Bson>, high: impl Into<Bson>) -> Self {
        self.push(
            WhereKind::Between {
                column: column.to_string(),
                low: low.into(),
                high: high.into(),
                negated: false,
            },
            Join::And,
        )
    }

    pub fn where_not_between(
        self,
        column: &str,
        low: impl Into<Bson>,
        high: impl Into<Bson>,
    ) -> Self {
        self.push(
            WhereKind::Between {
                column: column.to_string(),
                low: low.into(),
                high: high.into(),
                negated: true,
            },
            Join::And,
        )
    }

    /// Splices a raw filter document, screened for JavaScript-executing
    /// operators first. Primary-key values inside it are still coerced at
    /// compile time.
    pub fn where_raw(self, filter: BsonDocument) -> Result<Self> {
        screen_raw(&Bson::Document(filter.clone()))?;
        Ok(self.push(WhereKind::Raw { filter }, Join::And))
    }

    /// Groups the clauses built by the closure, and-joined at this position
    pub fn where_nested<F>(self, build: F) -> Result<Self>
    where
        F: FnOnce(WhereGroup) -> Result<WhereGroup>,
    {
        let group = build(WhereGroup::new())?;
        Ok(self.push(
            WhereKind::Nested {
                clauses: group.clauses,
            },
            Join::And,
        ))
    }

    /// Groups the clauses built by the closure, or-joined at this position
    pub fn or_where_nested<F>(self, build: F) -> Result<Self>
    where
        F: FnOnce(WhereGroup) -> Result<WhereGroup>,
    {
        let group = build(WhereGroup::new())?;
        Ok(self.push(
            WhereKind::Nested {
                clauses: group.clauses,
            },
            Join::Or,
        ))
    }

    pub fn clauses(&self) -> &[WhereClause] {
        &self.clauses
    }
}

/// Fluent query over one collection.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    collection: Collection<BsonDocument>,
    id_field: String,
    wheres: WhereGroup,
    sort: BsonDocument,
    skip: Option<u64>,
    limit: Option<i64>,
    projection: Option<BsonDocument>,
    max_time: Option<Duration>,
    group_columns: Vec<String>,
    carry_columns: Vec<String>,
}

impl QueryBuilder {
    pub fn new(collection: Collection<BsonDocument>) -> Self {
        QueryBuilder {
            collection,
            id_field: DEFAULT_ID_FIELD.to_string(),
            wheres: WhereGroup::new(),
            sort: BsonDocument::new(),
            skip: None,
            limit: None,
            projection: None,
            max_time: None,
            group_columns: Vec::new(),
            carry_columns: Vec::new(),
        }
    }

    /// Overrides the primary-key field used for identifier coercion
    pub fn with_id_field(mut self, field: &str) -> Self {
        self.id_field = field.to_string();
        self
    }

    // ===== where vocabulary, delegated to the clause group =====

    pub fn where_clause(
        mut self,
        column: &str,
        operator: &str,
        value: impl Into<Bson>,
    ) -> Result<Self> {
        self.wheres = self.wheres.where_clause(column, operator, value)?;
        Ok(self)
    }

    pub fn or_where(
        mut self,
        column: &str,
        operator: &str,
        value: impl Into<Bson>,
    ) -> Result<Self> {
        self.wheres = self.wheres.or_where(column, operator, value)?;
        Ok(self)
    }

    pub fn where_eq(mut self, column: &str, value: impl Into<Bson>) -> Self {
        self.wheres = self.wheres.where_eq(column, value);
        self
    }

    pub fn or_where_eq(mut self, column: &str, value: impl Into<Bson>) -> Self {
        self.wheres = self.wheres.or_where_eq(column, value);
        self
    }

    pub fn where_in(mut self, column: &str, values: Vec<Bson>) -> Self {
        self.wheres = self.wheres.where_in(column, values);
        self
    }

    pub fn or_where_in(mut self, column: &str, values: Vec<Bson>) -> Self {
        self.wheres = self.wheres.or_where_in(column, values);
        self
    }

    pub fn where_not_in(mut self, column: &str, values: Vec<Bson>) -> Self {
        self.wheres = self.wheres.where_not_in(column, values);
        self
    }

    pub fn where_null(mut self, column: &str) -> Self {
        self.wheres = self.wheres.where_null(column);
        self
    }

    pub fn or_where_null(mut self, column: &str) -> Self {
        self.wheres = self.wheres.or_where_null(column);
        self
    }

    pub fn where_not_null(mut self, column: &str) -> Self {
        self.wheres = self.wheres.where_not_null(column);
        self
    }

    pub fn where_between(
        mut self,
        column: &str,
        low: impl Into<Bson>,
        high: impl Into<Bson>,
    ) -> Self {
        self.wheres = self.wheres.where_between(column, low, high);
        self
    }

    pub fn where_not_between(
        mut self,
        column: &str,
        low: impl Into<Bson>,
        high: impl Into<Bson>,
    ) -> Self {
        self.wheres = self.wheres.where_not_between(column, low, high);
        self
    }

    pub fn where_raw(mut self, filter: BsonDocument) -> Result<Self> {
        self.wheres = self.wheres.where_raw(filter)?;
        Ok(self)
    }

    pub fn where_nested<F>(mut self, build: F) -> Result<Self>
    where
        F: FnOnce(WhereGroup) -> Result<WhereGroup>,
    {
        self.wheres = self.wheres.where_nested(build)?;
        Ok(self)
    }

    pub fn or_where_nested<F>(mut self, build: F) -> Result<Self>
    where
        F: FnOnce(WhereGroup) -> Result<WhereGroup>,
    {
        self.wheres = self.wheres.or_where_nested(build)?;
        Ok(self)
    }

    // ===== query options =====

    pub fn order_by(mut self, column: &str, direction: SortDirection) -> Self {
        self.sort.insert(column.to_string(), direction.key_value());
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn projection(mut self, projection: BsonDocument) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Server-side execution time limit, passed through as maxTimeMS
    pub fn max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }

    pub fn group_by(mut self, columns: &[&str]) -> Self {
        self.group_columns
            .extend(columns.iter().map(|c| c.to_string()));
        self
    }

    /// Columns carried through a grouped query with a last-value accumulator
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.carry_columns
            .extend(columns.iter().map(|c| c.to_string()));
        self
    }

    // ===== pure compilation =====

    /// Compiles the accumulated where clauses into one filter document.
    pub fn compile_filter(&self) -> Result<BsonDocument> {
        compile_wheres(self.wheres.clauses(), &self.id_field)
    }

    /// Builds the aggregation pipeline for the accumulated state plus an
    /// optional aggregate intent, with the group-key decode map.
    pub fn build_pipeline(
        &self,
        aggregate: Option<AggregateSpec>,
    ) -> Result<(Vec<BsonDocument>, GroupKeyMap)> {
        let spec = PipelineSpec {
            filter: self.compile_filter()?,
            group_columns: self.group_columns.clone(),
            carry_columns: self.carry_columns.clone(),
            aggregate,
            sort: (!self.sort.is_empty()).then(|| self.sort.clone()),
            skip: self.skip,
            limit: self.limit,
        };
        aggregation::build_pipeline(&spec)
    }

    // ===== execution =====

    /// Runs the query and returns all matching documents. Grouped queries run
    /// through the aggregation pipeline with mangled group keys decoded back
    /// to their original paths.
    pub async fn find(self, session: Option<&mut ClientSession>) -> Result<Vec<BsonDocument>> {
        if !self.group_columns.is_empty() {
            return self.find_grouped(session).await;
        }

        let filter = self.compile_filter()?;
        debug!(collection = self.collection.name(), ?filter, "find");
        let options = FindOptions::builder()
            .sort((!self.sort.is_empty()).then(|| self.sort.clone()))
            .skip(self.skip)
            .limit(self.limit)
            .projection(self.projection.clone())
            .max_time(self.max_time)
            .build();

        match session {
            Some(session) => {
                let mut cursor = self
                    .collection
                    .find(filter)
                    .with_options(options)
                    .session(&mut *session)
                    .await?;
                let mut out = Vec::new();
                while let Some(document) = cursor.next(session).await {
                    out.push(document?);
                }
                Ok(out)
            }
            None => {
                let cursor = self.collection.find(filter).with_options(options).await?;
                Ok(cursor.try_collect().await?)
            }
        }
    }

    /// Returns the first matching document, honoring sort and projection.
    pub async fn first(self, session: Option<&mut ClientSession>) -> Result<Option<BsonDocument>> {
        let filter = self.compile_filter()?;
        let options = FindOneOptions::builder()
            .sort((!self.sort.is_empty()).then(|| self.sort.clone()))
            .skip(self.skip)
            .projection(self.projection.clone())
            .max_time(self.max_time)
            .build();

        let result = match session {
            Some(session) => {
                self.collection
                    .find_one(filter)
                    .with_options(options)
                    .session(session)
                    .await?
            }
            None => {
                self.collection
                    .find_one(filter)
                    .with_options(options)
                    .await?
            }
        };
        Ok(result)
    }

    /// Counts matching documents. When grouping is set, this returns the
    /// first group's count; use [`QueryBuilder::find`] for per-group results.
    pub async fn count(self, session: Option<&mut ClientSession>) -> Result<i64> {
        match self
            .aggregate_value(AggregateSpec::count(), session)
            .await?
        {
            Some(Bson::Int32(v)) => Ok(v as i64),
            Some(Bson::Int64(v)) => Ok(v),
            Some(Bson::Double(v)) => Ok(v as i64),
            _ => Ok(0),
        }
    }

    pub async fn sum(self, column: &str, session: Option<&mut ClientSession>) -> Result<Bson> {
        self.aggregate_column(AggregateFunction::Sum, column, session)
            .await
    }

    pub async fn avg(self, column: &str, session: Option<&mut ClientSession>) -> Result<Bson> {
        self.aggregate_column(AggregateFunction::Avg, column, session)
            .await
    }

    pub async fn min(self, column: &str, session: Option<&mut ClientSession>) -> Result<Bson> {
        self.aggregate_column(AggregateFunction::Min, column, session)
            .await
    }

    pub async fn max(self, column: &str, session: Option<&mut ClientSession>) -> Result<Bson> {
        self.aggregate_column(AggregateFunction::Max, column, session)
            .await
    }

    /// Applies a compiled update to every matching document (or just the
    /// first, per the options). Zero modified documents is a success.
    pub async fn update(
        self,
        spec: UpdateSpec,
        options: WriteOptions,
        session: Option<&mut ClientSession>,
    ) -> Result<u64> {
        let filter = self.compile_filter()?;
        let update = spec.compile()?;
        debug!(collection = self.collection.name(), ?filter, ?update, "update");

        let result = if options.multi {
            match session {
                Some(session) => {
                    self.collection
                        .update_many(filter, update)
                        .upsert(options.upsert)
                        .session(session)
                        .await?
                }
                None => {
                    self.collection
                        .update_many(filter, update)
                        .upsert(options.upsert)
                        .await?
                }
            }
        } else {
            match session {
                Some(session) => {
                    self.collection
                        .update_one(filter, update)
                        .upsert(options.upsert)
                        .session(session)
                        .await?
                }
                None => {
                    self.collection
                        .update_one(filter, update)
                        .upsert(options.upsert)
                        .await?
                }
            }
        };
        Ok(result.modified_count)
    }

    pub async fn increment(
        self,
        column: &str,
        amount: i64,
        session: Option<&mut ClientSession>,
    ) -> Result<u64> {
        let spec = UpdateSpec::new().increment(column, amount)?;
        self.update(spec, WriteOptions::default(), session).await
    }

    pub async fn decrement(
        self,
        column: &str,
        amount: i64,
        session: Option<&mut ClientSession>,
    ) -> Result<u64> {
        let spec = UpdateSpec::new().decrement(column, amount)?;
        self.update(spec, WriteOptions::default(), session).await
    }

    pub async fn push(
        self,
        column: &str,
        value: Bson,
        unique: bool,
        session: Option<&mut ClientSession>,
    ) -> Result<u64> {
        let spec = UpdateSpec::new().push(column, value, unique)?;
        self.update(spec, WriteOptions::default(), session).await
    }

    pub async fn pull(
        self,
        column: &str,
        value: Bson,
        session: Option<&mut ClientSession>,
    ) -> Result<u64> {
        let spec = UpdateSpec::new().pull(column, value)?;
        self.update(spec, WriteOptions::default(), session).await
    }

    pub async fn unset(
        self,
        columns: &[&str],
        session: Option<&mut ClientSession>,
    ) -> Result<u64> {
        let spec = UpdateSpec::new().unset(columns)?;
        self.update(spec, WriteOptions::default(), session).await
    }

    /// Deletes every matching document, returning the deleted count.
    pub async fn delete(self, session: Option<&mut ClientSession>) -> Result<u64> {
        let filter = self.compile_filter()?;
        debug!(collection = self.collection.name(), ?filter, "delete");
        let result = match session {
            Some(session) => self.collection.delete_many(filter).session(session).await?,
            None => self.collection.delete_many(filter).await?,
        };
        Ok(result.deleted_count)
    }

    /// Inserts a batch of documents, returning their ids in input order.
    pub async fn insert(
        self,
        documents: Vec<BsonDocument>,
        session: Option<&mut ClientSession>,
    ) -> Result<Vec<Bson>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let result = match session {
            Some(session) => {
                self.collection
                    .insert_many(documents)
                    .session(session)
                    .await?
            }
            None => self.collection.insert_many(documents).await?,
        };
        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    async fn find_grouped(
        self,
        session: Option<&mut ClientSession>,
    ) -> Result<Vec<BsonDocument>> {
        let (pipeline, key_map) = self.build_pipeline(None)?;
        let results = self.run_pipeline(pipeline, session).await?;
        Ok(results
            .into_iter()
            .map(|document| decode_group_result(&key_map, document))
            .collect())
    }

    async fn aggregate_column(
        self,
        function: AggregateFunction,
        column: &str,
        session: Option<&mut ClientSession>,
    ) -> Result<Bson> {
        let spec = AggregateSpec::new(function, Some(column.to_string()));
        Ok(self
            .aggregate_value(spec, session)
            .await?
            .unwrap_or(Bson::Null))
    }

    async fn aggregate_value(
        self,
        spec: AggregateSpec,
        session: Option<&mut ClientSession>,
    ) -> Result<Option<Bson>> {
        let (pipeline, _) = self.build_pipeline(Some(spec))?;
        let results = self.run_pipeline(pipeline, session).await?;
        Ok(results
            .into_iter()
            .next()
            .and_then(|document| document.get(AGGREGATE_KEY).cloned()))
    }

    async fn run_pipeline(
        &self,
        pipeline: Vec<BsonDocument>,
        session: Option<&mut ClientSession>,
    ) -> Result<Vec<BsonDocument>> {
        debug!(collection = self.collection.name(), stages = pipeline.len(), "aggregate");
        match session {
            Some(session) => {
                let mut cursor = self
                    .collection
                    .aggregate(pipeline)
                    .session(&mut *session)
                    .await?;
                let mut out = Vec::new();
                while let Some(document) = cursor.next(session).await {
                    out.push(document?);
                }
                Ok(out)
            }
            None => {
                let cursor = self.collection.aggregate(pipeline).await?;
                Ok(cursor.try_collect().await?)
            }
        }
    }
}

/// Flattens one `$group` result: `_id` sub-keys and carried columns are
/// rewritten back to their original dotted paths.
fn decode_group_result(key_map: &GroupKeyMap, mut document: BsonDocument) -> BsonDocument {
    let mut out = BsonDocument::new();
    if let Some(Bson::Document(id)) = document.remove("_id") {
        out.extend(key_map.decode_group_id(&id));
    }
    for (key, value) in document {
        out.insert(key_map.original(&key).to_string(), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};

    #[test]
    fn test_where_group_compiles_and_chain() {
        let group = WhereGroup::new()
            .where_clause("age", ">", 18)
            .unwrap()
            .where_clause("age", "<", 65)
            .unwrap();
        let filter = compile_wheres(group.clauses(), DEFAULT_ID_FIELD).unwrap();
        assert_eq!(filter, doc! { "age": { "$gt": 18, "$lt": 65 } });
    }

    #[test]
    fn test_where_group_or_wraps() {
        let group = WhereGroup::new()
            .where_eq("status", "active")
            .or_where_eq("status", "pending");
        let filter = compile_wheres(group.clauses(), DEFAULT_ID_FIELD).unwrap();
        assert_eq!(
            filter,
            doc! { "$or": [ { "status": "active" }, { "status": "pending" } ] }
        );
    }

    #[test]
    fn test_where_group_nested_closure() {
        let group = WhereGroup::new()
            .where_eq("year", 2024)
            .where_nested(|nested| {
                Ok(nested
                    .where_eq("genre", "drama")
                    .or_where_eq("genre", "comedy"))
            })
            .unwrap();
        let filter = compile_wheres(group.clauses(), DEFAULT_ID_FIELD).unwrap();
        assert_eq!(
            filter,
            doc! {
                "year": 2024,
                "$or": [ { "genre": "drama" }, { "genre": "comedy" } ],
            }
        );
    }

    #[test]
    fn test_where_group_unknown_operator_fails_at_build_time() {
        let err = WhereGroup::new()
            .where_clause("age", "~=", 18)
            .unwrap_err();
        assert!(err.is_usage_error());
    }

    #[test]
    fn test_where_raw_screens_dangerous_operators() {
        let err = WhereGroup::new()
            .where_raw(doc! { "$where": "this.a == 1" })
            .unwrap_err();
        assert!(err.to_string().contains("$where"));
    }

    #[test]
    fn test_where_raw_coerces_hex_ids() {
        let group = WhereGroup::new()
            .where_raw(doc! { "_id": "507f1f77bcf86cd799439011" })
            .unwrap();
        let filter = compile_wheres(group.clauses(), DEFAULT_ID_FIELD).unwrap();
        let expected = ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap();
        assert_eq!(filter.get("_id"), Some(&Bson::ObjectId(expected)));
    }

    #[test]
    fn test_where_between_pair() {
        let group = WhereGroup::new().where_between("year", 1990, 2000);
        let filter = compile_wheres(group.clauses(), DEFAULT_ID_FIELD).unwrap();
        assert_eq!(filter, doc! { "year": { "$gte": 1990, "$lte": 2000 } });
    }

    #[test]
    fn test_sort_direction_values() {
        assert_eq!(SortDirection::Asc.key_value(), 1);
        assert_eq!(SortDirection::Desc.key_value(), -1);
    }

    #[test]
    fn test_decode_group_result_flattens_id() {
        let key_map_source = PipelineSpec {
            group_columns: vec!["imdb.rating".to_string()],
            aggregate: Some(AggregateSpec::count()),
            ..Default::default()
        };
        let (_, key_map) = aggregation::build_pipeline(&key_map_source).unwrap();
        let decoded = decode_group_result(
            &key_map,
            doc! { "_id": { "imdb__rating": 8.5 }, "aggregate": 12 },
        );
        assert_eq!(decoded, doc! { "imdb.rating": 8.5, "aggregate": 12 });
    }
}
