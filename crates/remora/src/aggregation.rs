//! Aggregation pipeline synthesis for GROUP BY + aggregate semantics
//!
//! Builds the MongoDB pipeline equivalent of a relational GROUP BY with an
//! aggregate function. Stage order is fixed (`$match`, `$group`, `$sort`,
//! `$skip`, `$limit`): aggregation stages execute sequentially and reordering
//! changes results.

use std::collections::HashMap;

use bson::{doc, Bson, Document as BsonDocument};
use remora_common::{RemoraError, Result};

/// Separator substituted for dots in `$group` output keys: MongoDB rejects
/// dotted field names in this position.
const SAFE_SEPARATOR: &str = "__";

/// Output key holding the aggregate accumulator result
pub const AGGREGATE_KEY: &str = "aggregate";

/// Aggregate functions supported by the synthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    fn accumulator(&self) -> &'static str {
        match self {
            // count is expressed as a constant-1 sum
            AggregateFunction::Count | AggregateFunction::Sum => "$sum",
            AggregateFunction::Avg => "$avg",
            AggregateFunction::Min => "$min",
            AggregateFunction::Max => "$max",
        }
    }
}

impl std::fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        };
        write!(f, "{}", s)
    }
}

/// An aggregate intent: a function and, for all but `count`, a target column.
#[derive(Debug, Clone)]
pub struct AggregateSpec {
    pub function: AggregateFunction,
    pub column: Option<String>,
}

impl AggregateSpec {
    pub fn new(function: AggregateFunction, column: Option<String>) -> Self {
        AggregateSpec { function, column }
    }

    pub fn count() -> Self {
        AggregateSpec::new(AggregateFunction::Count, None)
    }
}

/// Maps mangled `$group` output keys back to their original dotted paths.
///
/// Produced alongside the pipeline; consumers use it to decode group results
/// whose columns contained dot notation.
#[derive(Debug, Clone, Default)]
pub struct GroupKeyMap {
    safe_to_original: HashMap<String, String>,
}

impl GroupKeyMap {
    fn record(&mut self, original: &str) -> String {
        let safe = original.replace('.', SAFE_SEPARATOR);
        if safe != original {
            self.safe_to_original
                .insert(safe.clone(), original.to_string());
        }
        safe
    }

    /// Returns the original dotted path for a mangled output key.
    pub fn original<'a>(&'a self, safe_key: &'a str) -> &'a str {
        self.safe_to_original
            .get(safe_key)
            .map(String::as_str)
            .unwrap_or(safe_key)
    }

    /// Rewrites the `_id` sub-document of one group result back to original
    /// column names.
    pub fn decode_group_id(&self, group_id: &BsonDocument) -> BsonDocument {
        let mut out = BsonDocument::new();
        for (key, value) in group_id {
            out.insert(self.original(key).to_string(), value.clone());
        }
        out
    }
}

/// Inputs for one pipeline build.
#[derive(Debug, Clone, Default)]
pub struct PipelineSpec {
    /// Compiled filter document; empty means no `$match` stage
    pub filter: BsonDocument,
    /// GROUP BY columns
    pub group_columns: Vec<String>,
    /// Non-grouped columns carried through with a last-value accumulator
    pub carry_columns: Vec<String>,
    /// Aggregate intent
    pub aggregate: Option<AggregateSpec>,
    /// Sort document applied after grouping
    pub sort: Option<BsonDocument>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
}

/// Builds the pipeline and the output-key decode map.
///
/// `$group._id` maps each group column to its field reference, or is `null`
/// when aggregating over all rows. Carried columns emulate the relational
/// "any value from the group" with `$last`. `count` translates to `$sum: 1`.
///
/// # Errors
/// An aggregate function other than `count` with no target column is a usage
/// error; nothing partial is ever returned.
pub fn build_pipeline(spec: &PipelineSpec) -> Result<(Vec<BsonDocument>, GroupKeyMap)> {
    let mut key_map = GroupKeyMap::default();
    let mut pipeline = Vec::new();

    if !spec.filter.is_empty() {
        pipeline.push(doc! { "$match": spec.filter.clone() });
    }

    if !spec.group_columns.is_empty() || spec.aggregate.is_some() {
        pipeline.push(doc! { "$group": group_stage(spec, &mut key_map)? });
    }

    if let Some(sort) = &spec.sort {
        if !sort.is_empty() {
            pipeline.push(doc! { "$sort": sort.clone() });
        }
    }
    if let Some(skip) = spec.skip {
        pipeline.push(doc! { "$skip": skip as i64 });
    }
    if let Some(limit) = spec.limit {
        pipeline.push(doc! { "$limit": limit });
    }

    Ok((pipeline, key_map))
}

fn group_stage(spec: &PipelineSpec, key_map: &mut GroupKeyMap) -> Result<BsonDocument> {
    let group_id = if spec.group_columns.is_empty() {
        Bson::Null
    } else {
        let mut id = BsonDocument::new();
        for column in &spec.group_columns {
            let safe = key_map.record(column);
            id.insert(safe, format!("${}", column));
        }
        Bson::Document(id)
    };

    let mut stage = doc! { "_id": group_id };

    for column in &spec.carry_columns {
        if spec.group_columns.contains(column) {
            continue;
        }
        let safe = key_map.record(column);
        stage.insert(safe, doc! { "$last": format!("${}", column) });
    }

    if let Some(aggregate) = &spec.aggregate {
        let accumulator = match (aggregate.function, &aggregate.column) {
            (AggregateFunction::Count, _) => doc! { "$sum": 1 },
            (function, Some(column)) => {
                doc! { function.accumulator(): format!("${}", column) }
            }
            (function, None) => {
                return Err(RemoraError::Query(format!(
                    "aggregate function {} requires a target column",
                    function
                )))
            }
        };
        stage.insert(AGGREGATE_KEY, accumulator);
    }

    Ok(stage)
}
