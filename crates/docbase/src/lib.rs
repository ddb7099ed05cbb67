//! Client library for a hosted schemaless document store.
//!
//! This crate is a facade: it re-exports the public surface of
//! `docbase-key`, `docbase-value`, `docbase-query`, `docbase-error`,
//! `docbase-auth`, `docbase-transport`, and `docbase-client` so a
//! caller depends on one crate instead of seven. Each module here
//! mirrors the crate it re-exports; see that crate's own docs for
//! details.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Hierarchical key model (`docbase-key`).
pub mod key {
    pub use docbase_key::Key;
}

/// Scalar value and entity codec (`docbase-value`).
pub mod value {
    pub use docbase_value::{Entity, FieldSpec, KeyWire, Property, WireEntity, decode_entity, decode_entity_key, encode_entity};
    pub use docbase_value::{Value, decode_value, encode_value};
}

/// Query builder (`docbase-query`).
pub mod query {
    pub use docbase_query::{Direction, Query};
}

/// Unified error type (`docbase-error`).
pub mod error {
    pub use docbase_error::{DocbaseError, ErrorKind, Result};
}

/// Credential provider interface (`docbase-auth`).
pub mod auth {
    pub use docbase_auth::{StaticTokenSource, TokenSource, TokenSourceOptions};
}

/// Request engine, cancellation, and endpoint routing (`docbase-transport`).
pub mod transport {
    pub use docbase_transport::{CancellationToken, Endpoints, RequestEngine, RetryConfig, compute_delay, routing_header_value};
}

/// Client operations, transactions, and the query iterator (`docbase-client`).
pub mod client {
    pub use docbase_client::{Client, ClientConfig, CommitResult, Mutation, QueryIterator, Transaction, TransactionOptions};
}

/// In-memory server double, behind the `mock` feature (`docbase-mock`).
#[cfg(feature = "mock")]
pub mod mock {
    pub use docbase_mock::MockStore;
}

pub use auth::{StaticTokenSource, TokenSource, TokenSourceOptions};
pub use client::{Client, ClientConfig, CommitResult, Mutation, QueryIterator, Transaction, TransactionOptions};
pub use error::{DocbaseError, ErrorKind, Result};
pub use key::Key;
pub use query::{Direction, Query};
pub use value::{Entity, FieldSpec, KeyWire, Property, Value, WireEntity, decode_entity, decode_entity_key, decode_value, encode_entity, encode_value};

#[cfg(feature = "mock")]
pub use mock::MockStore;
