//! Lazy query iterator (spec §4.6 `Run`/`Next`/`Cursor`).

use std::collections::VecDeque;
use std::marker::PhantomData;

use docbase_error::DocbaseError;
use docbase_key::Key;
use docbase_query::Query;
use docbase_transport::CancellationToken;
use docbase_value::{Entity, WireEntity, decode_entity, decode_entity_key};

use crate::Client;

const CONTINUABLE: [&str; 3] = [
    "NOT_FINISHED",
    "MORE_RESULTS_AFTER_LIMIT",
    "MORE_RESULTS_AFTER_CURSOR",
];

/// A lazy, cursor-driven sequence of query results.
///
/// Each [`QueryIterator::next`] call consumes one buffered result; when
/// the buffer drains and the server reports more results are available,
/// the iterator transparently re-runs the query from the last cursor.
pub struct QueryIterator<T: Entity + Default> {
    client: Client,
    query: Query,
    buffer: VecDeque<WireEntity>,
    exhausted: bool,
    last_cursor: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity + Default> QueryIterator<T> {
    pub(crate) fn new(client: Client, query: Query) -> Self {
        QueryIterator {
            client,
            query,
            buffer: VecDeque::new(),
            exhausted: false,
            last_cursor: String::new(),
            _marker: PhantomData,
        }
    }

    /// Consume and return the next result, or [`DocbaseError::done`] once
    /// the sequence is exhausted.
    pub async fn next(&mut self, cancel: &CancellationToken) -> docbase_error::Result<T> {
        loop {
            if let Some(wire) = self.buffer.pop_front() {
                let mut dst = T::default();
                decode_entity(&wire, &mut dst)?;
                return Ok(dst);
            }
            if self.exhausted {
                return Err(DocbaseError::done());
            }
            self.fetch_batch(cancel).await?;
        }
    }

    /// Consume and return the next result's key alongside its value.
    pub async fn next_with_key(&mut self, cancel: &CancellationToken) -> docbase_error::Result<(Option<Key>, T)> {
        loop {
            if let Some(wire) = self.buffer.pop_front() {
                let key = decode_entity_key(&wire)?;
                let mut dst = T::default();
                decode_entity(&wire, &mut dst)?;
                return Ok((key, dst));
            }
            if self.exhausted {
                return Err(DocbaseError::done());
            }
            self.fetch_batch(cancel).await?;
        }
    }

    /// The cursor positioned after the most recently returned result's
    /// batch. Empty until at least one batch has been fetched.
    pub fn cursor(&self) -> &str {
        &self.last_cursor
    }

    async fn fetch_batch(&mut self, cancel: &CancellationToken) -> docbase_error::Result<()> {
        let mut query = self.query.clone();
        if !self.last_cursor.is_empty() {
            query = query.start(self.last_cursor.clone());
        }
        let batch = self.client.run_query_batch(cancel, &query).await?;
        self.buffer.extend(batch.entities);
        self.last_cursor = batch.end_cursor;
        self.exhausted = !CONTINUABLE.contains(&batch.more_results.as_str());
        Ok(())
    }
}
