//! Query model and wire projection (spec §4.5 / C5).

#![deny(unsafe_code)]
#![warn(missing_docs)]

use docbase_key::Key;
use docbase_value::{Value, encode_value};
use serde_json::json;

/// Sort direction for a query [`Order`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending order (the default).
    Ascending,
    /// Descending order, selected by a leading `-` on the field name.
    Descending,
}

impl Direction {
    fn wire(self) -> &'static str {
        match self {
            Direction::Ascending => "ASCENDING",
            Direction::Descending => "DESCENDING",
        }
    }
}

/// One entry of a query's ordering list.
#[derive(Debug, Clone)]
pub struct Order {
    property: String,
    direction: Direction,
}

#[derive(Debug, Clone)]
struct PropertyFilter {
    property: String,
    op: &'static str,
    value: Value,
}

fn map_shorthand_op(op: &str) -> Option<&'static str> {
    Some(match op {
        "=" => "EQUAL",
        "<" => "LESS_THAN",
        "<=" => "LESS_THAN_OR_EQUAL",
        ">" => "GREATER_THAN",
        ">=" => "GREATER_THAN_OR_EQUAL",
        _ => return None,
    })
}

/// A query against one kind, built fluently. Every mutator consumes and
/// returns `self` by value, so forking a query (cloning, then branching
/// into two builders) never aliases state (spec §9).
#[derive(Debug, Clone)]
pub struct Query {
    kind: String,
    filters: Vec<PropertyFilter>,
    ancestor: Option<Key>,
    orders: Vec<Order>,
    projection: Vec<String>,
    keys_only: bool,
    distinct_on: Vec<String>,
    namespace: Option<String>,
    limit: i64,
    offset: i64,
    start_cursor: Option<String>,
}

impl Query {
    /// Start a new query over entities of `kind`.
    pub fn new(kind: impl Into<String>) -> Self {
        Query {
            kind: kind.into(),
            filters: Vec::new(),
            ancestor: None,
            orders: Vec::new(),
            projection: Vec::new(),
            keys_only: false,
            distinct_on: Vec::new(),
            namespace: None,
            limit: 0,
            offset: 0,
            start_cursor: None,
        }
    }

    /// Add a property filter using a shorthand operator: one of
    /// `=`, `<`, `<=`, `>`, `>=`.
    pub fn filter(mut self, property: impl Into<String>, op: &str, value: impl Into<Value>) -> Self {
        if let Some(wire_op) = map_shorthand_op(op) {
            self.filters.push(PropertyFilter {
                property: property.into(),
                op: wire_op,
                value: value.into(),
            });
        }
        self
    }

    /// Add a filter from a legacy combined `"property op"` string.
    ///
    /// A malformed string — anything that doesn't split into exactly two
    /// whitespace-separated tokens, or whose operator token isn't
    /// recognized — is silently dropped (spec §4.5, §9 open question).
    pub fn filter_legacy(self, expr: &str, value: impl Into<Value>) -> Self {
        let mut tokens = expr.split_whitespace();
        let (Some(property), Some(op), None) = (tokens.next(), tokens.next(), tokens.next()) else {
            return self;
        };
        self.filter(property, op, value)
    }

    /// Restrict results to descendants of `key`.
    pub fn ancestor(mut self, key: Key) -> Self {
        self.ancestor = Some(key);
        self
    }

    /// Add an ordering entry. A leading `-` on `property` selects
    /// descending order.
    pub fn order(mut self, property: impl Into<String>) -> Self {
        let property = property.into();
        let (direction, name) = match property.strip_prefix('-') {
            Some(rest) => (Direction::Descending, rest.to_string()),
            None => (Direction::Ascending, property),
        };
        self.orders.push(Order {
            property: name,
            direction,
        });
        self
    }

    /// Project onto an explicit list of fields.
    pub fn project(mut self, fields: &[&str]) -> Self {
        self.projection = fields.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Restrict results to keys only.
    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }

    /// Whether this query was built with [`Query::keys_only`].
    pub fn is_keys_only(&self) -> bool {
        self.keys_only
    }

    /// Deduplicate results: uses the current projection if non-empty,
    /// otherwise is a no-op until a projection is set.
    pub fn distinct(mut self) -> Self {
        if !self.projection.is_empty() {
            self.distinct_on = self.projection.clone();
        }
        self
    }

    /// Deduplicate results on an explicit field list, independent of the
    /// projection.
    pub fn distinct_on(mut self, fields: &[&str]) -> Self {
        self.distinct_on = fields.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Scope the query to a namespace.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Cap the number of results. `0` (the default) means unlimited.
    pub fn limit(mut self, n: i64) -> Self {
        self.limit = n;
        self
    }

    /// Skip the first `n` results.
    pub fn offset(mut self, n: i64) -> Self {
        self.offset = n;
        self
    }

    /// Resume from a previously observed cursor.
    pub fn start(mut self, cursor: impl Into<String>) -> Self {
        self.start_cursor = Some(cursor.into());
        self
    }

    /// This query's kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    fn encode_filters(&self) -> docbase_error::Result<Vec<serde_json::Value>> {
        let mut out = Vec::with_capacity(self.filters.len() + 1);
        for f in &self.filters {
            out.push(json!({
                "propertyFilter": {
                    "property": { "name": f.property },
                    "op": f.op,
                    "value": encode_value(&f.value)?,
                }
            }));
        }
        if let Some(ancestor) = &self.ancestor {
            out.push(json!({
                "propertyFilter": {
                    "property": { "name": "__key__" },
                    "op": "HAS_ANCESTOR",
                    "value": encode_value(&Value::Key(ancestor.clone()))?,
                }
            }));
        }
        Ok(out)
    }

    /// Render this query into its `runQuery` wire body (spec §4.5).
    pub fn to_wire(&self) -> docbase_error::Result<serde_json::Value> {
        let mut body = serde_json::Map::new();
        body.insert("kind".into(), json!([{ "name": self.kind }]));

        let filters = self.encode_filters()?;
        match filters.len() {
            0 => {}
            1 => {
                body.insert("filter".into(), filters.into_iter().next().unwrap());
            }
            _ => {
                body.insert(
                    "filter".into(),
                    json!({ "compositeFilter": { "op": "AND", "filters": filters } }),
                );
            }
        }

        if !self.orders.is_empty() {
            body.insert(
                "order".into(),
                json!(
                    self.orders
                        .iter()
                        .map(|o| json!({
                            "property": { "name": o.property },
                            "direction": o.direction.wire(),
                        }))
                        .collect::<Vec<_>>()
                ),
            );
        }

        if !self.projection.is_empty() {
            body.insert(
                "projection".into(),
                json!(
                    self.projection
                        .iter()
                        .map(|p| json!({ "property": { "name": p } }))
                        .collect::<Vec<_>>()
                ),
            );
        } else if self.keys_only {
            body.insert("projection".into(), json!([{ "property": { "name": "__key__" } }]));
        }

        if !self.distinct_on.is_empty() {
            body.insert(
                "distinctOn".into(),
                json!(
                    self.distinct_on
                        .iter()
                        .map(|p| json!({ "name": p }))
                        .collect::<Vec<_>>()
                ),
            );
        }

        if let Some(ns) = &self.namespace {
            body.insert("partitionId".into(), json!({ "namespaceId": ns }));
        }

        if self.limit > 0 {
            body.insert("limit".into(), json!(self.limit));
        }
        if self.offset > 0 {
            body.insert("offset".into(), json!(self.offset));
        }
        if let Some(cursor) = &self.start_cursor {
            if !cursor.is_empty() {
                body.insert("startCursor".into(), json!(cursor));
            }
        }

        Ok(serde_json::Value::Object(body))
    }

    /// Wrap this query for a `runAggregationQuery` count request
    /// (spec §4.6 `Count`).
    pub fn to_count_wire(&self) -> docbase_error::Result<serde_json::Value> {
        Ok(json!({
            "aggregations": [{ "alias": "total", "count": {} }],
            "nestedQuery": self.to_wire()?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_list_is_always_present() {
        let wire = Query::new("Task").to_wire().unwrap();
        assert_eq!(wire["kind"], json!([{ "name": "Task" }]));
    }

    #[test]
    fn single_filter_is_not_wrapped_in_composite() {
        let wire = Query::new("Task").filter("done", "=", false).to_wire().unwrap();
        assert!(wire["filter"].get("propertyFilter").is_some());
        assert!(wire["filter"].get("compositeFilter").is_none());
    }

    #[test]
    fn multiple_filters_combine_under_and() {
        let wire = Query::new("Task")
            .filter("done", "=", false)
            .filter("priority", ">=", 3i64)
            .to_wire()
            .unwrap();
        let composite = &wire["filter"]["compositeFilter"];
        assert_eq!(composite["op"], "AND");
        assert_eq!(composite["filters"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn ancestor_adds_has_ancestor_filter() {
        let parent = Key::make_name("Parent", "p1", None);
        let wire = Query::new("Task").ancestor(parent).to_wire().unwrap();
        assert_eq!(wire["filter"]["propertyFilter"]["op"], "HAS_ANCESTOR");
        assert_eq!(wire["filter"]["propertyFilter"]["property"]["name"], "__key__");
    }

    #[test]
    fn ancestor_and_explicit_filter_and_compose() {
        let parent = Key::make_name("Parent", "p1", None);
        let wire = Query::new("Task")
            .filter("done", "=", false)
            .ancestor(parent)
            .to_wire()
            .unwrap();
        assert_eq!(wire["filter"]["compositeFilter"]["filters"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn order_flips_direction_on_leading_dash() {
        let wire = Query::new("Task").order("-priority").to_wire().unwrap();
        assert_eq!(wire["order"][0]["property"]["name"], "priority");
        assert_eq!(wire["order"][0]["direction"], "DESCENDING");
    }

    #[test]
    fn order_defaults_ascending() {
        let wire = Query::new("Task").order("priority").to_wire().unwrap();
        assert_eq!(wire["order"][0]["direction"], "ASCENDING");
    }

    #[test]
    fn keys_only_projects_dunder_key() {
        let wire = Query::new("Task").keys_only().to_wire().unwrap();
        assert_eq!(wire["projection"], json!([{ "property": { "name": "__key__" } }]));
    }

    #[test]
    fn explicit_projection_overrides_keys_only_projection_shape() {
        let wire = Query::new("Task").project(&["priority"]).to_wire().unwrap();
        assert_eq!(wire["projection"], json!([{ "property": { "name": "priority" } }]));
    }

    #[test]
    fn distinct_uses_current_projection() {
        let wire = Query::new("Task").project(&["priority"]).distinct().to_wire().unwrap();
        assert_eq!(wire["distinctOn"], json!([{ "name": "priority" }]));
    }

    #[test]
    fn distinct_on_is_independent_of_projection() {
        let wire = Query::new("Task").distinct_on(&["priority"]).to_wire().unwrap();
        assert_eq!(wire["distinctOn"], json!([{ "name": "priority" }]));
    }

    #[test]
    fn zero_limit_is_omitted() {
        let wire = Query::new("Task").to_wire().unwrap();
        assert!(wire.get("limit").is_none());
    }

    #[test]
    fn positive_limit_and_offset_are_emitted() {
        let wire = Query::new("Task").limit(10).offset(5).to_wire().unwrap();
        assert_eq!(wire["limit"], 10);
        assert_eq!(wire["offset"], 5);
    }

    #[test]
    fn namespace_emits_partition_id() {
        let wire = Query::new("Task").namespace("tenant-a").to_wire().unwrap();
        assert_eq!(wire["partitionId"], json!({ "namespaceId": "tenant-a" }));
    }

    #[test]
    fn legacy_filter_string_parses_property_and_op() {
        let wire = Query::new("Task").filter_legacy("priority >=", 3i64).to_wire().unwrap();
        assert_eq!(wire["filter"]["propertyFilter"]["property"]["name"], "priority");
        assert_eq!(wire["filter"]["propertyFilter"]["op"], "GREATER_THAN_OR_EQUAL");
    }

    #[test]
    fn legacy_filter_malformed_string_is_silently_dropped() {
        let wire = Query::new("Task").filter_legacy("priority", 3i64).to_wire().unwrap();
        assert!(wire.get("filter").is_none());

        let wire = Query::new("Task").filter_legacy("priority >= extra", 3i64).to_wire().unwrap();
        assert!(wire.get("filter").is_none());
    }

    #[test]
    fn builder_is_value_returning_not_aliasing() {
        let base = Query::new("Task").filter("done", "=", false);
        let a = base.clone().limit(1);
        let b = base.limit(2);
        assert_eq!(a.to_wire().unwrap()["limit"], 1);
        assert_eq!(b.to_wire().unwrap()["limit"], 2);
    }

    #[test]
    fn count_wire_wraps_nested_query() {
        let wire = Query::new("Task").to_count_wire().unwrap();
        assert_eq!(wire["aggregations"][0]["alias"], "total");
        assert_eq!(wire["nestedQuery"]["kind"], json!([{ "name": "Task" }]));
    }
}
