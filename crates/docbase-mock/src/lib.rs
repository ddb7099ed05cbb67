//! In-memory server double speaking docbase's wire protocol (spec §6).
//!
//! `MockStore` answers the same request bodies `docbase-transport` sends
//! and returns the same response shapes the real service would, so tests
//! of `docbase-client`'s codec and protocol logic don't need a socket or
//! an event loop. It is not a HTTP server: callers hand it the decoded
//! JSON request body directly and get the decoded JSON response back.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Mutex;

use docbase_error::{DocbaseError, ErrorKind};
use docbase_key::Key;
use docbase_value::{KeyWire, Value, WireEntity, decode_value};
use serde_json::{Value as Json, json};

/// An in-memory stand-in for the REST service.
///
/// Cheaply constructed, `Send + Sync`, and safe to share across
/// concurrently-running tests via a single `Mutex`-guarded state.
#[derive(Default)]
pub struct MockStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    entities: BTreeMap<String, WireEntity>,
    next_id: i64,
    next_transaction: u64,
    transactions: BTreeMap<String, ()>,
}

impl MockStore {
    /// Build an empty store.
    pub fn new() -> Self {
        MockStore::default()
    }

    /// Number of entities currently stored.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entities.len()
    }

    /// Whether the store holds no entities.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seed the store directly, bypassing `:commit`.
    pub fn seed(&self, key: &Key, entity: WireEntity) {
        self.state.lock().unwrap().entities.insert(key.encode(), entity);
    }

    /// Handle a `:lookup` request body.
    pub fn lookup(&self, request: &Json) -> docbase_error::Result<Json> {
        let keys = request_keys(request)?;
        let state = self.state.lock().unwrap();
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for key in keys {
            match state.entities.get(&key.encode()) {
                Some(entity) => found.push(json!({ "entity": entity })),
                None => missing.push(json!({ "entity": { "key": KeyWire::from_key(&key) } })),
            }
        }
        Ok(json!({ "found": found, "missing": missing }))
    }

    /// Handle a `:commit` request body.
    pub fn commit(&self, request: &Json) -> docbase_error::Result<Json> {
        let mutations = request.get("mutations").and_then(Json::as_array).cloned().unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        let mut results = Vec::with_capacity(mutations.len());
        for (index, mutation) in mutations.iter().enumerate() {
            results.push(state.apply_mutation(index, mutation)?);
        }
        Ok(json!({ "mutationResults": results }))
    }

    /// Handle a `:runQuery` request body.
    pub fn run_query(&self, request: &Json) -> docbase_error::Result<Json> {
        let state = self.state.lock().unwrap();
        let (page, end_cursor, more) = state.run_query(request)?;
        Ok(json!({
            "batch": {
                "entityResults": page.into_iter().map(|e| json!({ "entity": e })).collect::<Vec<_>>(),
                "endCursor": end_cursor,
                "moreResults": more,
            }
        }))
    }

    /// Handle a `:runAggregationQuery` request body. Only `count` is
    /// understood, matching spec §4.6's `Count`.
    pub fn run_aggregation_query(&self, request: &Json) -> docbase_error::Result<Json> {
        let nested = request.get("nestedQuery").cloned().unwrap_or_else(|| json!({}));
        let state = self.state.lock().unwrap();
        let matches = state.matching(&nested)?;
        Ok(json!({
            "batch": {
                "aggregationResults": [{
                    "aggregateProperties": { "total": { "integerValue": matches.len().to_string() } },
                }],
            }
        }))
    }

    /// Handle an `:allocateIds` request body.
    pub fn allocate_ids(&self, request: &Json) -> docbase_error::Result<Json> {
        let keys = request_keys(request)?;
        let mut state = self.state.lock().unwrap();
        let mut assigned = Vec::with_capacity(keys.len());
        for key in &keys {
            let id = state.allocate_id();
            let key = Key::make_id(key.kind().to_string(), id, key.parent().cloned());
            assigned.push(serde_json::to_value(KeyWire::from_key(&key)).expect("KeyWire always serializes"));
        }
        Ok(json!({ "keys": assigned }))
    }

    /// Handle a `:beginTransaction` request body.
    pub fn begin_transaction(&self, _request: &Json) -> docbase_error::Result<Json> {
        let mut state = self.state.lock().unwrap();
        state.next_transaction += 1;
        let token = format!("txn-{}", state.next_transaction);
        state.transactions.insert(token.clone(), ());
        Ok(json!({ "transaction": token }))
    }

    /// Handle a `:rollback` request body. A no-op beyond forgetting the
    /// transaction token — the begin-without-commit protocol never
    /// mutated anything server-side (spec §4.7, §9).
    pub fn rollback(&self, request: &Json) -> docbase_error::Result<Json> {
        if let Some(token) = request.get("transaction").and_then(Json::as_str) {
            self.state.lock().unwrap().transactions.remove(token);
        }
        Ok(json!({}))
    }
}

impl State {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn apply_mutation(&mut self, index: usize, mutation: &Json) -> docbase_error::Result<Json> {
        let obj = mutation
            .as_object()
            .ok_or_else(|| mutation_error(index, "mutation is not a JSON object"))?;
        let (variant, payload) = obj
            .iter()
            .next()
            .ok_or_else(|| mutation_error(index, "mutation has no variant"))?;

        match variant.as_str() {
            v @ ("insert" | "update" | "upsert") => {
                let mut entity: WireEntity =
                    serde_json::from_value(payload.clone()).map_err(|e| mutation_error(index, "malformed entity").with_source(e))?;
                let key_wire = entity
                    .key
                    .clone()
                    .ok_or_else(|| mutation_error(index, "mutation entity has no key"))?;
                let mut key = key_wire.to_key()?;
                if key.kind().is_empty() {
                    return Err(mutation_error(index, "mutation key has an empty kind"));
                }

                let exists = self.entities.contains_key(&key.encode());
                if v == "insert" && exists {
                    return Err(mutation_error(index, "entity already exists"));
                }
                if v == "update" && !exists {
                    return Err(DocbaseError::no_such_entity().with_context("index", index));
                }

                if key.incomplete() {
                    let id = self.allocate_id();
                    key = Key::make_id(key.kind().to_string(), id, key.parent().cloned());
                    entity.key = Some(KeyWire::from_key(&key));
                }
                self.entities.insert(key.encode(), entity);
                Ok(json!({ "key": KeyWire::from_key(&key) }))
            }
            "delete" => {
                let key_wire: KeyWire =
                    serde_json::from_value(payload.clone()).map_err(|e| mutation_error(index, "malformed key").with_source(e))?;
                let key = key_wire.to_key()?;
                if key.kind().is_empty() {
                    return Err(mutation_error(index, "delete mutation has an empty key"));
                }
                self.entities.remove(&key.encode());
                Ok(json!({ "key": null }))
            }
            other => Err(mutation_error(index, &format!("unknown mutation variant {other}"))),
        }
    }

    fn run_query(&self, request: &Json) -> docbase_error::Result<(Vec<WireEntity>, String, &'static str)> {
        let mut matches = self.matching(request)?;
        if let Some(orders) = request.get("order").and_then(Json::as_array) {
            sort_entities(&mut matches, orders);
        }

        let cursor = request.get("startCursor").and_then(Json::as_str).filter(|s| !s.is_empty());
        let start = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| DocbaseError::new(ErrorKind::Validation, "malformed cursor"))?,
            None => request.get("offset").and_then(Json::as_i64).unwrap_or(0).max(0) as usize,
        };
        let limit = request.get("limit").and_then(Json::as_i64).unwrap_or(0).max(0) as usize;
        let end = if limit == 0 { matches.len() } else { (start + limit).min(matches.len()) };
        let page = matches.get(start.min(matches.len())..end).unwrap_or(&[]).to_vec();
        let more = if end < matches.len() { "NOT_FINISHED" } else { "NO_MORE_RESULTS" };
        Ok((page, end.to_string(), more))
    }

    fn matching(&self, request: &Json) -> docbase_error::Result<Vec<WireEntity>> {
        let kind = request
            .get("kind")
            .and_then(Json::as_array)
            .and_then(|a| a.first())
            .and_then(|k| k.get("name"))
            .and_then(Json::as_str)
            .ok_or_else(|| DocbaseError::new(ErrorKind::Validation, "query has no kind"))?;

        let filter = request.get("filter");
        let mut out = Vec::new();
        for entity in self.entities.values() {
            let Some(key_wire) = &entity.key else { continue };
            let key = key_wire.to_key()?;
            if key.kind() != kind {
                continue;
            }
            if let Some(filter) = filter {
                if !evaluate_filter(filter, entity, &key)? {
                    continue;
                }
            }
            out.push(entity.clone());
        }
        Ok(out)
    }
}

fn mutation_error(index: usize, message: &str) -> DocbaseError {
    DocbaseError::new(ErrorKind::Validation, message).with_context("index", index)
}

fn request_keys(request: &Json) -> docbase_error::Result<Vec<Key>> {
    let wires: Vec<KeyWire> = serde_json::from_value(request.get("keys").cloned().unwrap_or_else(|| json!([])))
        .map_err(|e| DocbaseError::new(ErrorKind::Decode, "malformed keys array").with_source(e))?;
    wires.iter().map(KeyWire::to_key).collect()
}

fn evaluate_filter(filter: &Json, entity: &WireEntity, key: &Key) -> docbase_error::Result<bool> {
    if let Some(composite) = filter.get("compositeFilter") {
        let filters = composite.get("filters").and_then(Json::as_array).cloned().unwrap_or_default();
        for f in &filters {
            if !evaluate_filter(f, entity, key)? {
                return Ok(false);
            }
        }
        return Ok(true);
    }

    let pf = filter
        .get("propertyFilter")
        .ok_or_else(|| DocbaseError::new(ErrorKind::Validation, "filter has no recognized shape"))?;
    let property = pf.get("property").and_then(|p| p.get("name")).and_then(Json::as_str).unwrap_or("");
    let op = pf.get("op").and_then(Json::as_str).unwrap_or("");
    let wire_value = pf.get("value").cloned().unwrap_or(Json::Null);

    if property == "__key__" && op == "HAS_ANCESTOR" {
        let decoded = decode_value(&wire_value)?;
        let ancestor = decoded.as_key()?;
        return Ok(is_descendant_of(key, ancestor));
    }

    let Some(prop) = entity.properties.get(property) else {
        return Ok(false);
    };
    let actual = decode_value(&prop.value)?;
    let target = decode_value(&wire_value)?;

    Ok(match op {
        "EQUAL" => actual == target,
        "LESS_THAN" => matches!(compare_values(&actual, &target), Some(Ordering::Less)),
        "LESS_THAN_OR_EQUAL" => matches!(compare_values(&actual, &target), Some(Ordering::Less | Ordering::Equal)),
        "GREATER_THAN" => matches!(compare_values(&actual, &target), Some(Ordering::Greater)),
        "GREATER_THAN_OR_EQUAL" => matches!(compare_values(&actual, &target), Some(Ordering::Greater | Ordering::Equal)),
        _ => false,
    })
}

fn is_descendant_of(key: &Key, ancestor: &Key) -> bool {
    let mut cur = Some(key);
    while let Some(k) = cur {
        if k == ancestor {
            return true;
        }
        cur = k.parent();
    }
    false
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x.partial_cmp(y),
        (Value::Double(x), Value::Double(y)) => x.partial_cmp(y),
        (Value::String(x), Value::String(y)) => x.partial_cmp(y),
        (Value::Timestamp(x), Value::Timestamp(y)) => x.partial_cmp(y),
        _ => None,
    }
}

fn sort_entities(entities: &mut [WireEntity], orders: &[Json]) {
    entities.sort_by(|a, b| {
        for order in orders {
            let name = order.get("property").and_then(|p| p.get("name")).and_then(Json::as_str).unwrap_or("");
            let descending = order.get("direction").and_then(Json::as_str) == Some("DESCENDING");
            let av = a.properties.get(name).and_then(|p| decode_value(&p.value).ok());
            let bv = b.properties.get(name).and_then(|p| decode_value(&p.value).ok());
            let ordering = match (av, bv) {
                (Some(x), Some(y)) => compare_values(&x, &y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            };
            let ordering = if descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbase_query::Query;
    use docbase_value::{Entity, FieldSpec, decode_entity, encode_entity};

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Task {
        priority: i64,
        done: bool,
    }

    impl Entity for Task {
        fn fields() -> Vec<FieldSpec<Self>> {
            vec![
                FieldSpec {
                    name: "priority",
                    wire_name: None,
                    skip: false,
                    noindex: false,
                    get: |t| Value::Integer(t.priority),
                    set: |t, v| {
                        t.priority = v.as_i64()?;
                        Ok(())
                    },
                },
                FieldSpec {
                    name: "done",
                    wire_name: None,
                    skip: false,
                    noindex: false,
                    get: |t| Value::Boolean(t.done),
                    set: |t, v| {
                        t.done = v.as_bool()?;
                        Ok(())
                    },
                },
            ]
        }
    }

    #[test]
    fn commit_then_lookup_round_trips_an_entity() {
        let store = MockStore::new();
        let key = Key::make_name("Task", "t1", None);
        let wire = encode_entity(Some(&key), &Task { priority: 2, done: false }).unwrap();
        let commit_body = json!({ "mutations": [{ "upsert": wire }] });
        store.commit(&commit_body).unwrap();

        let lookup_body = json!({ "keys": [KeyWire::from_key(&key)] });
        let response = store.lookup(&lookup_body).unwrap();
        let found = response["found"].as_array().unwrap();
        assert_eq!(found.len(), 1);
        let entity: WireEntity = serde_json::from_value(found[0]["entity"].clone()).unwrap();
        let mut back = Task::default();
        decode_entity(&entity, &mut back).unwrap();
        assert_eq!(back.priority, 2);
    }

    #[test]
    fn insert_assigns_an_id_for_an_incomplete_key() {
        let store = MockStore::new();
        let wire = encode_entity(Some(&Key::make_incomplete("Task", None)), &Task::default()).unwrap();
        let response = store.commit(&json!({ "mutations": [{ "insert": wire }] })).unwrap();
        let key_wire: KeyWire = serde_json::from_value(response["mutationResults"][0]["key"].clone()).unwrap();
        assert!(key_wire.to_key().unwrap().id() > 0);
    }

    #[test]
    fn insert_twice_on_the_same_complete_key_is_an_error() {
        let store = MockStore::new();
        let key = Key::make_name("Task", "dup", None);
        let wire = encode_entity(Some(&key), &Task::default()).unwrap();
        store.commit(&json!({ "mutations": [{ "insert": wire.clone() }] })).unwrap();
        let err = store.commit(&json!({ "mutations": [{ "insert": wire }] })).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn delete_then_lookup_reports_missing() {
        let store = MockStore::new();
        let key = Key::make_name("Task", "t1", None);
        store.seed(&key, encode_entity(Some(&key), &Task::default()).unwrap());
        store
            .commit(&json!({ "mutations": [{ "delete": KeyWire::from_key(&key) }] }))
            .unwrap();
        let response = store.lookup(&json!({ "keys": [KeyWire::from_key(&key)] })).unwrap();
        assert!(response["found"].as_array().unwrap().is_empty());
        assert_eq!(response["missing"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn run_query_filters_by_equality_and_sorts_ascending() {
        let store = MockStore::new();
        for (name, priority) in [("a", 3i64), ("b", 1), ("c", 2)] {
            let key = Key::make_name("Task", name, None);
            store.seed(&key, encode_entity(Some(&key), &Task { priority, done: true }).unwrap());
        }
        let query = Query::new("Task").filter("done", "=", true).order("priority");
        let response = store.run_query(&query.to_wire().unwrap()).unwrap();
        let results = response["batch"]["entityResults"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        let priorities: Vec<i64> = results
            .iter()
            .map(|r| {
                let entity: WireEntity = serde_json::from_value(r["entity"].clone()).unwrap();
                let mut task = Task::default();
                decode_entity(&entity, &mut task).unwrap();
                task.priority
            })
            .collect();
        assert_eq!(priorities, vec![1, 2, 3]);
    }

    #[test]
    fn run_query_paginates_with_limit_and_cursor() {
        let store = MockStore::new();
        for i in 0..5 {
            let key = Key::make_name("Task", format!("t{i}"), None);
            store.seed(&key, encode_entity(Some(&key), &Task { priority: i, done: false }).unwrap());
        }
        let query = Query::new("Task").order("priority").limit(2);
        let first = store.run_query(&query.clone().to_wire().unwrap()).unwrap();
        assert_eq!(first["batch"]["entityResults"].as_array().unwrap().len(), 2);
        assert_eq!(first["batch"]["moreResults"], "NOT_FINISHED");

        let cursor = first["batch"]["endCursor"].as_str().unwrap().to_string();
        let second = store.run_query(&query.start(cursor).to_wire().unwrap()).unwrap();
        assert_eq!(second["batch"]["entityResults"].as_array().unwrap().len(), 2);
        assert_eq!(second["batch"]["moreResults"], "NOT_FINISHED");
    }

    #[test]
    fn ancestor_filter_matches_only_descendants() {
        let store = MockStore::new();
        let parent = Key::make_name("Parent", "p1", None);
        let child = Key::make_name("Task", "c1", Some(parent.clone()));
        let other = Key::make_name("Task", "o1", None);
        store.seed(&child, encode_entity(Some(&child), &Task::default()).unwrap());
        store.seed(&other, encode_entity(Some(&other), &Task::default()).unwrap());

        let query = Query::new("Task").ancestor(parent);
        let response = store.run_query(&query.to_wire().unwrap()).unwrap();
        assert_eq!(response["batch"]["entityResults"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn count_reports_the_matching_total() {
        let store = MockStore::new();
        for i in 0..3 {
            let key = Key::make_name("Task", format!("t{i}"), None);
            store.seed(&key, encode_entity(Some(&key), &Task::default()).unwrap());
        }
        let response = store.run_aggregation_query(&Query::new("Task").to_count_wire().unwrap()).unwrap();
        assert_eq!(
            response["batch"]["aggregationResults"][0]["aggregateProperties"]["total"]["integerValue"],
            "3"
        );
    }

    #[test]
    fn allocate_ids_assigns_fresh_ids_per_call() {
        let store = MockStore::new();
        let request = json!({ "keys": [KeyWire::from_key(&Key::make_incomplete("Task", None))] });
        let a = store.allocate_ids(&request).unwrap();
        let b = store.allocate_ids(&request).unwrap();
        let id_a: KeyWire = serde_json::from_value(a["keys"][0].clone()).unwrap();
        let id_b: KeyWire = serde_json::from_value(b["keys"][0].clone()).unwrap();
        assert_ne!(id_a.to_key().unwrap().id(), id_b.to_key().unwrap().id());
    }

    #[test]
    fn begin_transaction_returns_a_fresh_token_each_time() {
        let store = MockStore::new();
        let a = store.begin_transaction(&json!({})).unwrap();
        let b = store.begin_transaction(&json!({})).unwrap();
        assert_ne!(a["transaction"], b["transaction"]);
    }
}
