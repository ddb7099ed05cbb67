//! Wire request/response shapes for the six service endpoints (spec §6).

use docbase_value::{KeyWire, WireEntity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub(crate) struct LookupRequest {
    pub keys: Vec<KeyWire>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "databaseId")]
    pub database_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "readOptions")]
    pub read_options: Option<ReadOptions>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReadOptions {
    pub transaction: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LookupResponse {
    #[serde(default)]
    pub found: Vec<FoundEntity>,
    #[serde(default)]
    pub missing: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FoundEntity {
    pub entity: WireEntity,
}

#[derive(Debug, Serialize)]
pub(crate) struct CommitRequest {
    pub mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    pub mutations: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "databaseId")]
    pub database_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommitResponse {
    #[serde(default, rename = "mutationResults")]
    pub mutation_results: Vec<MutationResultWire>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MutationResultWire {
    pub key: Option<KeyWire>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AllocateIdsRequest {
    pub keys: Vec<KeyWire>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AllocateIdsResponse {
    #[serde(default)]
    pub keys: Vec<KeyWire>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RunQueryResponse {
    pub batch: QueryBatch,
}

#[derive(Debug, Deserialize)]
pub(crate) struct QueryBatch {
    #[serde(default, rename = "entityResults")]
    pub entity_results: Vec<EntityResult>,
    #[serde(default, rename = "endCursor")]
    pub end_cursor: String,
    #[serde(default, rename = "moreResults")]
    pub more_results: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EntityResult {
    pub entity: WireEntity,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RunAggregationQueryResponse {
    pub batch: AggregationBatch,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AggregationBatch {
    #[serde(default, rename = "aggregationResults")]
    pub aggregation_results: Vec<AggregationResult>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AggregationResult {
    #[serde(rename = "aggregateProperties")]
    pub aggregate_properties: std::collections::BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub(crate) struct BeginTransactionRequest {
    #[serde(skip_serializing_if = "Option::is_none", rename = "databaseId")]
    pub database_id: Option<String>,
    #[serde(rename = "transactionOptions")]
    pub transaction_options: TransactionOptionsWire,
}

#[derive(Debug, Serialize)]
pub(crate) enum TransactionOptionsWire {
    #[serde(rename = "readWrite")]
    ReadWrite {},
    #[serde(rename = "readOnly")]
    ReadOnly {
        #[serde(rename = "readTime", skip_serializing_if = "Option::is_none")]
        read_time: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
pub(crate) struct BeginTransactionResponse {
    pub transaction: String,
}
