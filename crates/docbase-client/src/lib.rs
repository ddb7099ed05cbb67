//! Client operations and transaction protocol (spec §4.6, §4.7 / C6, C7).

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod iterator;
mod mutation;
mod transaction;
mod wire;

use std::sync::Arc;
use std::time::Duration;

use docbase_auth::{TokenSource, TokenSourceOptions};
use docbase_error::{DocbaseError, ErrorKind};
use docbase_key::Key;
use docbase_query::Query;
use docbase_transport::{CancellationToken, Endpoints, RequestEngine, RetryConfig};
use docbase_value::{Entity, KeyWire, decode_entity, decode_entity_key};
use thiserror::Error;
use tracing::debug;

pub use iterator::QueryIterator;
pub use mutation::Mutation;
pub use transaction::{CommitResult, Transaction, TransactionOptions};

/// Configuration fixed at client construction: the bound project and
/// (optionally) a named database, the service base URL, and the retry
/// policy handed to the underlying [`RequestEngine`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// The project this client is bound to.
    pub project_id: String,
    /// A named database within the project, if not using the default.
    pub database_id: Option<String>,
    /// The service base URL; overridable so tests can point at a local
    /// server instead of mutating process-wide state (spec §9).
    pub base_url: url::Url,
    /// Retry/timing policy for every request this client issues.
    pub retry: RetryConfig,
}

impl ClientConfig {
    /// Build a config for `project_id` against the production base URL.
    pub fn new(project_id: impl Into<String>) -> Self {
        ClientConfig {
            project_id: project_id.into(),
            database_id: None,
            base_url: url::Url::parse("https://docbase.googleapis.com").expect("static URL parses"),
            retry: RetryConfig::default(),
        }
    }

    /// Bind to a named database instead of the default.
    pub fn with_database(mut self, database_id: impl Into<String>) -> Self {
        self.database_id = Some(database_id.into());
        self
    }

    /// Override the service base URL (tests: point at a local server).
    pub fn with_base_url(mut self, base_url: url::Url) -> Self {
        self.base_url = base_url;
        self
    }

    /// Apply environment variable overrides on top of this config.
    ///
    /// Recognised variables:
    /// - `DOCBASE_MAX_ATTEMPTS`
    /// - `DOCBASE_BASE_DELAY_MS`
    /// - `DOCBASE_MAX_DELAY_MS`
    /// - `DOCBASE_JITTER_FACTOR`
    /// - `DOCBASE_REQUEST_TIMEOUT_MS`
    /// - `DOCBASE_RESPONSE_CAP_BYTES`
    /// - `DOCBASE_DATABASE_ID`
    /// - `DOCBASE_BASE_URL`
    ///
    /// A variable that's set but doesn't parse is ignored rather than
    /// failing construction; malformed env state shouldn't be fatal for a
    /// library whose caller may not control the process environment.
    pub fn from_env_overlay(mut self) -> Self {
        if let Some(n) = env_parse::<u32>("DOCBASE_MAX_ATTEMPTS") {
            self.retry.max_attempts = n;
        }
        if let Some(ms) = env_parse::<u64>("DOCBASE_BASE_DELAY_MS") {
            self.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("DOCBASE_MAX_DELAY_MS") {
            self.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(f) = env_parse::<f64>("DOCBASE_JITTER_FACTOR") {
            self.retry.jitter_factor = f;
        }
        if let Some(ms) = env_parse::<u64>("DOCBASE_REQUEST_TIMEOUT_MS") {
            self.retry.attempt_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse::<usize>("DOCBASE_RESPONSE_CAP_BYTES") {
            self.retry.response_cap_bytes = n;
        }
        if let Ok(database_id) = std::env::var("DOCBASE_DATABASE_ID") {
            self.database_id = Some(database_id);
        }
        if let Ok(base_url) = std::env::var("DOCBASE_BASE_URL") {
            if let Ok(url) = url::Url::parse(&base_url) {
                self.base_url = url;
            }
        }
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// The client, built once per project/database pair and cheaply
/// cloneable (its transport and token source are shared, not copied).
#[derive(Clone)]
pub struct Client {
    engine: RequestEngine,
    endpoints: Endpoints,
    token_source: Arc<dyn TokenSource>,
    project_id: String,
    database_id: Option<String>,
}

impl Client {
    /// Build a client from `config`, authenticating requests via
    /// `token_source`.
    pub fn new(config: ClientConfig, token_source: Arc<dyn TokenSource>) -> Self {
        Client {
            engine: RequestEngine::new(config.retry),
            endpoints: Endpoints::new(config.base_url),
            token_source,
            project_id: config.project_id,
            database_id: config.database_id,
        }
    }

    /// The project this client is bound to.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn token(&self) -> docbase_error::Result<String> {
        self.token_source.access_token(&TokenSourceOptions::default()).await
    }

    fn database_id_ref(&self) -> Option<&str> {
        self.database_id.as_deref()
    }

    // ---- C6: lookups ----------------------------------------------

    /// Look up one entity. Fails with
    /// [`docbase_error::ErrorKind::NotFound`] if it doesn't exist.
    pub async fn get<T: Entity + Default>(&self, cancel: &CancellationToken, key: &Key) -> docbase_error::Result<T> {
        if key.kind().is_empty() {
            return Err(DocbaseError::validation("get: key must not be empty"));
        }
        self.lookup_one(cancel, key, None).await
    }

    /// Look up multiple entities. Fails with
    /// [`docbase_error::ErrorKind::NotFound`] if *any* key is missing.
    pub async fn get_multi<T: Entity + Default>(
        &self,
        cancel: &CancellationToken,
        keys: &[Key],
    ) -> docbase_error::Result<Vec<T>> {
        self.lookup_multi(cancel, keys, None).await
    }

    pub(crate) async fn lookup_one<T: Entity + Default>(
        &self,
        cancel: &CancellationToken,
        key: &Key,
        transaction: Option<&str>,
    ) -> docbase_error::Result<T> {
        let mut results = self.lookup_multi::<T>(cancel, std::slice::from_ref(key), transaction).await?;
        Ok(results.remove(0))
    }

    pub(crate) async fn lookup_multi<T: Entity + Default>(
        &self,
        cancel: &CancellationToken,
        keys: &[Key],
        transaction: Option<&str>,
    ) -> docbase_error::Result<Vec<T>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let request = wire::LookupRequest {
            keys: keys.iter().map(KeyWire::from_key).collect(),
            database_id: self.database_id.clone(),
            read_options: transaction.map(|t| wire::ReadOptions {
                transaction: t.to_string(),
            }),
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| DocbaseError::new(ErrorKind::Validation, "failed to serialize lookup request").with_source(e))?;
        let url = self.endpoints.lookup(&self.project_id);
        let bytes = self.post(cancel, &url, &body).await?;
        let response: wire::LookupResponse = parse_response(&bytes)?;

        if !response.missing.is_empty() {
            return Err(DocbaseError::no_such_entity().with_context("missing_count", response.missing.len()));
        }
        if response.found.is_empty() {
            return Err(DocbaseError::no_such_entity());
        }

        response
            .found
            .into_iter()
            .map(|found| {
                let mut dst = T::default();
                decode_entity(&found.entity, &mut dst)?;
                Ok(dst)
            })
            .collect()
    }

    // ---- C6: non-transactional commits -----------------------------

    /// Insert or replace one entity. Returns the key the server
    /// committed, with a server-assigned id if `key` was incomplete.
    pub async fn put<T: Entity>(&self, cancel: &CancellationToken, key: Key, src: &T) -> docbase_error::Result<Key> {
        let mutation = Mutation::upsert(key, src)?;
        let result = self.commit(cancel, "NON_TRANSACTIONAL", None, &[mutation]).await?;
        Ok(result.keys.into_iter().next().expect("commit returns one key per mutation"))
    }

    /// Insert or replace multiple entities; `keys` and `srcs` must be
    /// equal length.
    pub async fn put_multi<T: Entity>(
        &self,
        cancel: &CancellationToken,
        keys: &[Key],
        srcs: &[T],
    ) -> docbase_error::Result<Vec<Key>> {
        if keys.len() != srcs.len() {
            return Err(DocbaseError::validation("keys and sources must have equal length"));
        }
        let mutations: Vec<Mutation> = keys
            .iter()
            .zip(srcs)
            .map(|(k, s)| Mutation::upsert(k.clone(), s))
            .collect::<docbase_error::Result<_>>()?;
        let result = self.commit(cancel, "NON_TRANSACTIONAL", None, &mutations).await?;
        Ok(result.keys)
    }

    /// Delete one entity by key.
    pub async fn delete(&self, cancel: &CancellationToken, key: Key) -> docbase_error::Result<()> {
        self.commit(cancel, "NON_TRANSACTIONAL", None, &[Mutation::delete(key)]).await?;
        Ok(())
    }

    /// Delete multiple entities by key.
    pub async fn delete_multi(&self, cancel: &CancellationToken, keys: &[Key]) -> docbase_error::Result<()> {
        let mutations: Vec<Mutation> = keys.iter().cloned().map(Mutation::delete).collect();
        if mutations.is_empty() {
            return Ok(());
        }
        self.commit(cancel, "NON_TRANSACTIONAL", None, &mutations).await?;
        Ok(())
    }

    /// Apply an interleaved batch of insert/update/upsert/delete
    /// mutations in a single non-transactional commit.
    pub async fn mutate(&self, cancel: &CancellationToken, mutations: &[Mutation]) -> docbase_error::Result<Vec<Key>> {
        let result = self.commit(cancel, "NON_TRANSACTIONAL", None, mutations).await?;
        Ok(result.keys)
    }

    pub(crate) async fn commit(
        &self,
        cancel: &CancellationToken,
        mode: &'static str,
        transaction: Option<&str>,
        mutations: &[Mutation],
    ) -> docbase_error::Result<CommitResult> {
        let wire_mutations = mutations
            .iter()
            .enumerate()
            .map(|(i, m)| m.to_wire(i))
            .collect::<docbase_error::Result<Vec<_>>>()?;

        let request = wire::CommitRequest {
            mode,
            transaction: transaction.map(str::to_string),
            mutations: wire_mutations,
            database_id: self.database_id.clone(),
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| DocbaseError::new(ErrorKind::Validation, "failed to serialize commit request").with_source(e))?;
        let url = self.endpoints.commit(&self.project_id);
        let bytes = self.post(cancel, &url, &body).await?;
        let response: wire::CommitResponse = parse_response(&bytes)?;

        let keys = response
            .mutation_results
            .into_iter()
            .zip(mutations)
            .map(|(r, original)| match r.key {
                Some(wire_key) => wire_key.to_key(),
                None => Ok(original.key().clone()),
            })
            .collect::<docbase_error::Result<Vec<_>>>()?;
        Ok(CommitResult { keys })
    }

    // ---- C6: ID allocation ------------------------------------------

    /// Allocate server-assigned ids for incomplete keys, leaving
    /// already-complete keys untouched and in their original positions.
    pub async fn allocate_ids(&self, cancel: &CancellationToken, keys: &[Key]) -> docbase_error::Result<Vec<Key>> {
        let incomplete_positions: Vec<usize> = keys
            .iter()
            .enumerate()
            .filter(|(_, k)| k.incomplete())
            .map(|(i, _)| i)
            .collect();

        if incomplete_positions.is_empty() {
            return Ok(keys.to_vec());
        }

        let request = wire::AllocateIdsRequest {
            keys: incomplete_positions.iter().map(|&i| KeyWire::from_key(&keys[i])).collect(),
        };
        let body = serde_json::to_value(&request).map_err(|e| {
            DocbaseError::new(ErrorKind::Validation, "failed to serialize allocateIds request").with_source(e)
        })?;
        let url = self.endpoints.allocate_ids(&self.project_id);
        let bytes = self.post(cancel, &url, &body).await?;
        let response: wire::AllocateIdsResponse = parse_response(&bytes)?;

        let mut out = keys.to_vec();
        for (position, wire_key) in incomplete_positions.into_iter().zip(response.keys) {
            out[position] = wire_key.to_key()?;
        }
        Ok(out)
    }

    // ---- C6: queries --------------------------------------------------

    /// Run a keys-only query and return the matching keys.
    ///
    /// `q` must have been built with [`Query::keys_only`]; otherwise
    /// this fails fast without issuing any request.
    pub async fn all_keys(&self, cancel: &CancellationToken, q: &Query) -> docbase_error::Result<Vec<Key>> {
        if !q.is_keys_only() {
            return Err(DocbaseError::validation("all_keys requires a KeysOnly query"));
        }
        let mut iter: QueryIterator<EmptyEntity> = self.run(q.clone());
        let mut keys = Vec::new();
        loop {
            match iter.next_with_key(cancel).await {
                Ok((Some(key), _)) => keys.push(key),
                Ok((None, _)) => {}
                Err(e) if e.is_done() => break,
                Err(e) => return Err(e),
            }
        }
        Ok(keys)
    }

    /// Read one batch from `:runQuery`, appending each decoded entity to
    /// `dst` and returning the parallel key list. Unlike [`Client::run`],
    /// this does not follow the result cursor across multiple requests —
    /// a query whose results span more than one batch only yields its
    /// first batch here.
    pub async fn get_all<T: Entity + Default>(
        &self,
        cancel: &CancellationToken,
        q: &Query,
        dst: &mut Vec<T>,
    ) -> docbase_error::Result<Vec<Key>> {
        let batch = self.run_query_batch(cancel, q).await?;
        let mut keys = Vec::with_capacity(batch.entities.len());
        for entity in &batch.entities {
            let key = decode_entity_key(entity)?;
            let mut value = T::default();
            decode_entity(entity, &mut value)?;
            keys.push(key.ok_or_else(|| DocbaseError::new(ErrorKind::Decode, "query result entity has no key"))?);
            dst.push(value);
        }
        Ok(keys)
    }

    /// Run an aggregate count over `q`.
    pub async fn count(&self, cancel: &CancellationToken, q: &Query) -> docbase_error::Result<i64> {
        let body = q.to_count_wire()?;
        let url = self.endpoints.run_aggregation_query(&self.project_id);
        let bytes = self.post(cancel, &url, &body).await?;
        let response: wire::RunAggregationQueryResponse = parse_response(&bytes)?;

        let result = response
            .batch
            .aggregation_results
            .first()
            .ok_or_else(|| DocbaseError::new(ErrorKind::Decode, "aggregation response had no results"))?;
        let total = result
            .aggregate_properties
            .get("total")
            .and_then(|v| v.get("integerValue"))
            .ok_or_else(|| DocbaseError::new(ErrorKind::Decode, "aggregation result missing total.integerValue"))?;
        parse_count(total)
    }

    /// Start a lazy, cursor-driven iterator over `q`'s results.
    pub fn run<T: Entity + Default>(&self, q: Query) -> QueryIterator<T> {
        QueryIterator::new(self.clone(), q)
    }

    /// Delete every entity of `kind`. An empty kind is not an error.
    pub async fn delete_all_by_kind(&self, cancel: &CancellationToken, kind: &str) -> docbase_error::Result<()> {
        let keys = self.all_keys(cancel, &Query::new(kind).keys_only()).await?;
        if keys.is_empty() {
            return Ok(());
        }
        self.delete_multi(cancel, &keys).await
    }

    pub(crate) async fn run_query_batch(
        &self,
        cancel: &CancellationToken,
        q: &Query,
    ) -> docbase_error::Result<QueryBatchResult> {
        let body = q.to_wire()?;
        let url = self.endpoints.run_query(&self.project_id);
        let bytes = self.post(cancel, &url, &body).await?;
        let response: wire::RunQueryResponse = parse_response(&bytes)?;
        Ok(QueryBatchResult {
            entities: response.batch.entity_results.into_iter().map(|r| r.entity).collect(),
            end_cursor: response.batch.end_cursor,
            more_results: response.batch.more_results,
        })
    }

    // ---- C7: transactions -------------------------------------------

    /// Run `f` inside a fresh transaction, retrying on a conflicting
    /// commit (409/ABORTED) up to `opts.max_attempts` times. Any other
    /// error from `f` or from commit is terminal and propagates without
    /// retry.
    pub async fn run_in_transaction<F, Fut, R>(
        &self,
        cancel: &CancellationToken,
        opts: TransactionOptions,
        mut f: F,
    ) -> docbase_error::Result<(R, CommitResult)>
    where
        F: FnMut(&mut Transaction) -> Fut,
        Fut: std::future::Future<Output = docbase_error::Result<R>>,
    {
        let mut last_err: Option<DocbaseError> = None;

        for attempt in 0..opts.max_attempts {
            let token = self.begin_transaction(cancel, &opts).await?;
            let mut tx = Transaction {
                client: self.clone(),
                token,
                mutations: Vec::new(),
            };

            let value = f(&mut tx).await?;

            match self.commit(cancel, "TRANSACTIONAL", Some(&tx.token), &tx.mutations).await {
                Ok(commit) => return Ok((value, commit)),
                Err(err) => {
                    let retriable_conflict = is_conflict(&err);
                    if !retriable_conflict || attempt + 1 >= opts.max_attempts {
                        if retriable_conflict {
                            return Err(DocbaseError::new(
                                ErrorKind::Conflict,
                                "transaction conflict retries exhausted",
                            )
                            .with_context("attempts", opts.max_attempts)
                            .with_source(err));
                        }
                        return Err(err);
                    }
                    debug!(target: "docbase.client", attempt, "transaction conflict, retrying");
                    last_err = Some(err);
                    let delay = Duration::from_millis(100u64.saturating_mul(2u64.saturating_pow(attempt)));
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(DocbaseError::new(ErrorKind::Cancelled, "transaction cancelled during backoff")),
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| DocbaseError::new(ErrorKind::ServerError, "transaction retries exhausted")))
    }

    async fn begin_transaction(
        &self,
        cancel: &CancellationToken,
        opts: &TransactionOptions,
    ) -> docbase_error::Result<String> {
        let transaction_options = match opts.read_time {
            Some(t) => wire::TransactionOptionsWire::ReadOnly {
                read_time: Some(t.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)),
            },
            None => wire::TransactionOptionsWire::ReadWrite {},
        };
        let request = wire::BeginTransactionRequest {
            database_id: self.database_id.clone(),
            transaction_options,
        };
        let body = serde_json::to_value(&request).map_err(|e| {
            DocbaseError::new(ErrorKind::Validation, "failed to serialize beginTransaction request").with_source(e)
        })?;
        let url = self.endpoints.begin_transaction(&self.project_id);
        let bytes = self.post(cancel, &url, &body).await?;
        let response: wire::BeginTransactionResponse = parse_response(&bytes)?;
        Ok(response.transaction)
    }

    async fn post(
        &self,
        cancel: &CancellationToken,
        url: &url::Url,
        body: &serde_json::Value,
    ) -> docbase_error::Result<Vec<u8>> {
        let token = self.token().await?;
        self.engine
            .do_request(cancel, url, body, &token, &self.project_id, self.database_id_ref())
            .await
    }
}

pub(crate) struct QueryBatchResult {
    pub entities: Vec<docbase_value::WireEntity>,
    pub end_cursor: String,
    pub more_results: String,
}

/// A zero-field entity used when only keys matter (`all_keys`).
#[derive(Default)]
struct EmptyEntity;

impl Entity for EmptyEntity {
    fn fields() -> Vec<docbase_value::FieldSpec<Self>> {
        Vec::new()
    }
}

/// Narrow, crate-local decode failures, kept separate from
/// [`DocbaseError`]'s broader taxonomy and converted into it at this
/// crate's boundary (mirroring `abp-config::ConfigError` converting
/// into `abp-error::AbpError`).
#[derive(Debug, Error)]
enum DecodeError {
    #[error("invalid response JSON shape")]
    Json(#[from] serde_json::Error),
    #[error("aggregation total `{value}` is not a valid integer")]
    InvalidCountString { value: String },
    #[error("aggregation total is neither a string nor a number")]
    InvalidCountShape,
}

impl From<DecodeError> for DocbaseError {
    fn from(err: DecodeError) -> Self {
        match &err {
            DecodeError::Json(_) => {
                let message = err.to_string();
                DocbaseError::new(ErrorKind::Decode, message).with_source(err)
            }
            DecodeError::InvalidCountString { .. } | DecodeError::InvalidCountShape => {
                DocbaseError::new(ErrorKind::Decode, err.to_string())
            }
        }
    }
}

fn parse_response<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> docbase_error::Result<T> {
    serde_json::from_slice(bytes).map_err(|e| DecodeError::from(e).into())
}

fn parse_count(wire: &serde_json::Value) -> docbase_error::Result<i64> {
    if let Some(s) = wire.as_str() {
        return s.parse().map_err(|_| DecodeError::InvalidCountString { value: s.to_string() }.into());
    }
    wire.as_i64().ok_or_else(|| DecodeError::InvalidCountShape.into())
}

fn is_conflict(err: &DocbaseError) -> bool {
    let text = err.to_string();
    text.contains("409") || text.contains("ABORTED")
}

