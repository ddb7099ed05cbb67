//! Runnable walkthrough of the docbase data model: build a key, encode
//! an entity, commit it, look it up, and run a query — all against an
//! in-memory [`docbase_mock::MockStore`] so the example needs no
//! credentials or network access.

use chrono::{TimeZone, Utc};
use clap::Parser;
use docbase_key::Key;
use docbase_mock::MockStore;
use docbase_query::Query;
use docbase_value::{Entity, FieldSpec, Value, decode_entity, encode_entity};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "docbase-quickstart", version, about = "Walk through docbase's key/entity/query model")]
struct Cli {
    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

/// The entity used throughout the walkthrough, matching the example in
/// the put/get scalars scenario: a name, a count, a flag, a score, a
/// timestamp, and a note excluded from indexing.
#[derive(Debug, Clone, PartialEq)]
struct Task {
    name: String,
    count: i64,
    active: bool,
    score: f64,
    updated_at: chrono::DateTime<Utc>,
    notes: String,
}

impl Default for Task {
    fn default() -> Self {
        Task {
            name: String::new(),
            count: 0,
            active: false,
            score: 0.0,
            updated_at: Utc.timestamp_opt(0, 0).unwrap(),
            notes: String::new(),
        }
    }
}

impl Entity for Task {
    fn fields() -> Vec<FieldSpec<Self>> {
        vec![
            FieldSpec {
                name: "name",
                wire_name: None,
                skip: false,
                noindex: false,
                get: |t| Value::String(t.name.clone()),
                set: |t, v| {
                    t.name = v.as_str()?.to_string();
                    Ok(())
                },
            },
            FieldSpec {
                name: "count",
                wire_name: None,
                skip: false,
                noindex: false,
                get: |t| Value::Integer(t.count),
                set: |t, v| {
                    t.count = v.as_i64()?;
                    Ok(())
                },
            },
            FieldSpec {
                name: "active",
                wire_name: None,
                skip: false,
                noindex: false,
                get: |t| Value::Boolean(t.active),
                set: |t, v| {
                    t.active = v.as_bool()?;
                    Ok(())
                },
            },
            FieldSpec {
                name: "score",
                wire_name: None,
                skip: false,
                noindex: false,
                get: |t| Value::Double(t.score),
                set: |t, v| {
                    t.score = v.as_f64()?;
                    Ok(())
                },
            },
            FieldSpec {
                name: "updated_at",
                wire_name: None,
                skip: false,
                noindex: false,
                get: |t| Value::Timestamp(t.updated_at),
                set: |t, v| {
                    t.updated_at = v.as_timestamp()?;
                    Ok(())
                },
            },
            FieldSpec {
                name: "notes",
                wire_name: None,
                skip: false,
                noindex: true,
                get: |t| Value::String(t.notes.clone()),
                set: |t, v| {
                    t.notes = v.as_str()?.to_string();
                    Ok(())
                },
            },
        ]
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(filter)).init();

    let store = MockStore::new();

    let key = Key::make_name("Task", "t1", None);
    let task = Task {
        name: "t".to_string(),
        count: 42,
        active: true,
        score: 3.14,
        updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        notes: "n".to_string(),
    };

    let wire = encode_entity(Some(&key), &task)?;
    println!("put {}: notes excludeFromIndexes={}", key, wire.properties["notes"].exclude_from_indexes);
    println!("count is wire-encoded as a decimal string: {}", wire.properties["count"].value["integerValue"]);

    store.commit(&json!({ "mutations": [{ "upsert": wire }] }))?;

    let lookup = store.lookup(&json!({ "keys": [docbase_value::KeyWire::from_key(&key)] }))?;
    let found = &lookup["found"][0]["entity"];
    let wire_entity: docbase_value::WireEntity = serde_json::from_value(found.clone())?;
    let mut round_tripped = Task::default();
    decode_entity(&wire_entity, &mut round_tripped)?;
    println!("get {key}: {round_tripped:?}");
    assert_eq!(round_tripped, task);

    let query = Query::new("Task").filter("active", "=", true).order("count");
    let results = store.run_query(&query.to_wire()?)?;
    let matched = results["batch"]["entityResults"].as_array().unwrap().len();
    println!("query active=true matched {matched} entity(ies)");

    store.commit(&json!({ "mutations": [{ "delete": docbase_value::KeyWire::from_key(&key) }] }))?;
    let lookup = store.lookup(&json!({ "keys": [docbase_value::KeyWire::from_key(&key)] }))?;
    println!("after delete, missing={}", lookup["missing"].as_array().unwrap().len());

    Ok(())
}
